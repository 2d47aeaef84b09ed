// Pipeline orchestrator: runs the stage DAG for one trigger.
//
// Change Detection -> Impact Assessment -> {Documentation, Knowledge Graph};
// Quality Audit is independent. A stage starts only after its predecessors
// finished, and is skipped when any of them did not succeed.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::agent::{AgentGateway, create_gateway};
use crate::config::CartographConfig;
use crate::docs::{DocumentationSink, FsDocumentationSink};
use crate::history::{GitHistory, RepositoryHistory};
use crate::progress::{NoopReporter, ProgressReporter};
use crate::scan::SourceScanner;
use crate::stage::{
    AuditInput, AuditStage, ChangeDetectionStage, DocumentationReport, DocumentationStage,
    GraphInput, GraphStage, ImpactStage, StageContext, StageId, StageReport, StageRun, run_stage,
};
use crate::store::{AuditArchive, FsGraphStore, GraphSnapshot, GraphStore};
use crate::trigger::AuditSchedule;
use crate::types::{AuditReport, AuditWindow, ChangeRecord, ImpactAssessment};

// ── Jobs ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Change detection through documentation and graph.
    #[default]
    Continuous,
    /// Quality audit only.
    Audit,
    /// Every stage.
    Full,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Continuous => "continuous",
            Self::Audit => "audit",
            Self::Full => "full",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continuous" => Some(Self::Continuous),
            "audit" => Some(Self::Audit),
            "full" => Some(Self::Full),
            _ => None,
        }
    }

    pub fn stages(self) -> &'static [StageId] {
        match self {
            Self::Continuous => &[
                StageId::ChangeDetection,
                StageId::ImpactAssessment,
                StageId::DocumentationGeneration,
                StageId::KnowledgeGraphBuild,
            ],
            Self::Audit => &[StageId::QualityAudit],
            Self::Full => &StageId::ALL,
        }
    }

    pub fn includes(self, stage: StageId) -> bool {
        self.stages().contains(&stage)
    }

    fn runs_change_branch(self) -> bool {
        self.includes(StageId::ChangeDetection)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Stage DAG ───────────────────────────────────────────────────────

/// The stage dependency graph.
#[derive(Debug, Clone)]
pub struct StageGraph {
    graph: DiGraph<StageId, ()>,
    index: BTreeMap<StageId, NodeIndex>,
}

impl Default for StageGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl StageGraph {
    pub fn new() -> Self {
        let mut graph = DiGraph::new();
        let index: BTreeMap<StageId, NodeIndex> = StageId::ALL
            .into_iter()
            .map(|id| (id, graph.add_node(id)))
            .collect();
        for id in StageId::ALL {
            for pred in id.predecessors() {
                graph.add_edge(index[pred], index[&id], ());
            }
        }
        Self { graph, index }
    }

    /// All stages, predecessors before dependants. Ties follow declaration order.
    pub fn topological_order(&self) -> Vec<StageId> {
        // The edge set is fixed and acyclic.
        toposort(&self.graph, None)
            .map(|order| order.into_iter().map(|ix| self.graph[ix]).collect())
            .unwrap_or_else(|_| StageId::ALL.to_vec())
    }

    /// Predecessors of `stage` that have not succeeded (or never ran).
    pub fn blocking(&self, stage: StageId, done: &BTreeMap<StageId, StageReport>) -> Vec<StageId> {
        let mut blocked: Vec<StageId> = self
            .graph
            .neighbors_directed(self.index[&stage], petgraph::Direction::Incoming)
            .map(|ix| self.graph[ix])
            .filter(|pred| !done.get(pred).is_some_and(|r| r.status.is_success()))
            .collect();
        blocked.sort();
        blocked
    }
}

// ── Run results ─────────────────────────────────────────────────────

/// Persistent summary of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_key: Option<String>,
    pub job: JobKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stages: BTreeMap<StageId, StageReport>,
}

impl RunReport {
    /// True when no stage failed.
    pub fn is_successful(&self) -> bool {
        self.failed_stages().is_empty()
    }

    pub fn failed_stages(&self) -> Vec<StageId> {
        self.stages
            .values()
            .filter(|r| r.status == crate::stage::StageStatus::Failed)
            .map(|r| r.stage)
            .collect()
    }

    /// Stage reports in DAG order.
    pub fn ordered(&self) -> Vec<&StageReport> {
        StageGraph::new()
            .topological_order()
            .into_iter()
            .filter_map(|id| self.stages.get(&id))
            .collect()
    }
}

/// Stage outputs of one run, present for stages that succeeded.
#[derive(Debug, Clone, Default)]
pub struct RunOutputs {
    pub changes: Option<Vec<ChangeRecord>>,
    pub assessment: Option<ImpactAssessment>,
    pub documentation: Option<DocumentationReport>,
    pub snapshot: Option<GraphSnapshot>,
    pub audit: Option<AuditReport>,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: RunReport,
    pub outputs: RunOutputs,
}

// ── Pipeline ────────────────────────────────────────────────────────

pub struct AnalysisPipeline {
    repo_root: PathBuf,
    config: CartographConfig,
    gateway: Arc<dyn AgentGateway>,
    history: Arc<dyn RepositoryHistory>,
    store: Arc<dyn GraphStore>,
    docs: Arc<dyn DocumentationSink>,
    audits: AuditArchive,
    progress: Arc<dyn ProgressReporter>,
    dag: StageGraph,
}

impl fmt::Debug for AnalysisPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisPipeline")
            .field("repo_root", &self.repo_root)
            .field("gateway", &self.gateway.name())
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl AnalysisPipeline {
    /// Wire the shipped collaborators for a repository from its config.
    pub fn from_config(repo_root: &Path, config: CartographConfig) -> crate::error::Result<Self> {
        let gateway: Arc<dyn AgentGateway> = Arc::from(create_gateway(&config.agent)?);
        let history = GitHistory::new(repo_root)
            .with_max_commits(config.repository.max_commits)
            .with_diff_preview_bytes(config.repository.diff_preview_bytes);
        let store = FsGraphStore::new(config.storage.graph_store(repo_root));
        let docs = FsDocumentationSink::new(config.storage.docs_root(repo_root));
        let audits = AuditArchive::new(config.storage.audit_store(repo_root));

        Ok(Self {
            repo_root: repo_root.to_path_buf(),
            gateway,
            history: Arc::new(history),
            store: Arc::new(store),
            docs: Arc::new(docs),
            audits,
            progress: Arc::new(NoopReporter),
            dag: StageGraph::new(),
            config,
        })
    }

    #[must_use]
    pub fn with_gateway(mut self, gateway: Arc<dyn AgentGateway>) -> Self {
        self.gateway = gateway;
        self
    }

    #[must_use]
    pub fn with_history(mut self, history: Arc<dyn RepositoryHistory>) -> Self {
        self.history = history;
        self
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn GraphStore>) -> Self {
        self.store = store;
        self
    }

    #[must_use]
    pub fn with_docs(mut self, docs: Arc<dyn DocumentationSink>) -> Self {
        self.docs = docs;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &CartographConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    fn context(&self) -> StageContext<'_> {
        StageContext {
            gateway: self.gateway.as_ref(),
            working_dir: &self.repo_root,
            timeout: self.config.agent.timeout(),
            strictness: self.config.pipeline.strictness,
        }
    }

    /// Run every stage `job` names. Stage failures are reported, not returned.
    #[instrument(skip_all, fields(job = %job, run_key = run_key.unwrap_or("-")))]
    pub async fn run(&self, job: JobKind, run_key: Option<&str>) -> RunOutcome {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!(%run_id, "Run started");
        self.progress.run_started(job.as_str(), job.stages().len() as u64);

        let window = run_key
            .and_then(AuditSchedule::window_of)
            .unwrap_or_else(AuditWindow::current);

        let ctx = self.context();
        let change_branch = async {
            if job.runs_change_branch() {
                self.run_change_branch(&ctx).await
            } else {
                (BTreeMap::new(), RunOutputs::default())
            }
        };
        let audit_branch = async {
            if job.includes(StageId::QualityAudit) {
                Some(self.run_audit(&ctx, window).await)
            } else {
                None
            }
        };
        let ((mut stages, mut outputs), audit) = tokio::join!(change_branch, audit_branch);

        if let Some(run) = audit {
            stages.insert(StageId::QualityAudit, run.report);
            outputs.audit = run.output;
        }

        let report = RunReport {
            run_id,
            run_key: run_key.map(str::to_string),
            job,
            started_at,
            finished_at: Utc::now(),
            stages,
        };
        self.progress.run_finished();

        let failed = report.failed_stages();
        if failed.is_empty() {
            info!(run_id = %report.run_id, "Run succeeded");
        } else {
            warn!(run_id = %report.run_id, failed = ?failed, "Run finished with failed stages");
        }
        RunOutcome { report, outputs }
    }

    fn begin(&self, stage: StageId) {
        self.progress.stage_started(stage);
    }

    fn end<T>(&self, run: &StageRun<T>) {
        self.progress.stage_finished(&run.report);
    }

    /// Record a stage as skipped when its predecessors did not all succeed.
    fn gate(&self, stage: StageId, done: &BTreeMap<StageId, StageReport>) -> Option<StageReport> {
        let blocking = self.dag.blocking(stage, done);
        if blocking.is_empty() {
            return None;
        }
        info!(stage = %stage, blocked_by = ?blocking, "Skipping stage after upstream failure");
        let report = StageReport::skipped(stage, &blocking);
        self.progress.stage_finished(&report);
        Some(report)
    }

    async fn run_change_branch(
        &self,
        ctx: &StageContext<'_>,
    ) -> (BTreeMap<StageId, StageReport>, RunOutputs) {
        let mut done: BTreeMap<StageId, StageReport> = BTreeMap::new();
        let mut outputs = RunOutputs::default();

        self.begin(StageId::ChangeDetection);
        let detection = ChangeDetectionStage::new(self.history.clone(), &self.config.repository.branch)
            .with_lookback_days(self.config.repository.lookback_days)
            .with_commit_analysis(self.config.pipeline.analyze_commits)
            .run(ctx)
            .await;
        self.end(&detection);
        done.insert(StageId::ChangeDetection, detection.report);
        outputs.changes = detection.output;

        let impact_run = match self.gate(StageId::ImpactAssessment, &done) {
            Some(skipped) => {
                done.insert(StageId::ImpactAssessment, skipped);
                None
            }
            None => {
                self.begin(StageId::ImpactAssessment);
                let changes = outputs.changes.clone().unwrap_or_default();
                let run = run_stage(&ImpactStage, ctx, &changes).await;
                self.end(&run);
                done.insert(StageId::ImpactAssessment, run.report.clone());
                Some(run)
            }
        };
        outputs.assessment = impact_run.and_then(|r| r.output);

        let docs_gate = self.gate(StageId::DocumentationGeneration, &done);
        let graph_gate = self.gate(StageId::KnowledgeGraphBuild, &done);
        let assessment = outputs.assessment.clone().unwrap_or_default();

        let docs_fut = async {
            if let Some(skipped) = docs_gate {
                return StageRun { output: None, report: skipped };
            }
            self.begin(StageId::DocumentationGeneration);
            let run = run_stage(&DocumentationStage::new(self.docs.clone()), ctx, &assessment).await;
            self.end(&run);
            run
        };
        let graph_fut = async {
            if let Some(skipped) = graph_gate {
                return StageRun { output: None, report: skipped };
            }
            self.begin(StageId::KnowledgeGraphBuild);
            let previous = match self.store.load().await {
                Ok(snapshot) => snapshot.map(|s| s.graph()),
                Err(e) => {
                    warn!(error = %e, "Current snapshot unreadable; building from scratch");
                    None
                }
            };
            let input = GraphInput {
                changes: outputs.changes.clone().unwrap_or_default(),
                assessment: assessment.clone(),
                previous,
            };
            let run = run_stage(&GraphStage::new(self.store.clone()), ctx, &input).await;
            self.end(&run);
            run
        };
        let (docs_run, graph_run) = tokio::join!(docs_fut, graph_fut);

        done.insert(StageId::DocumentationGeneration, docs_run.report);
        done.insert(StageId::KnowledgeGraphBuild, graph_run.report);
        outputs.documentation = docs_run.output;
        outputs.snapshot = graph_run.output;
        (done, outputs)
    }

    async fn run_audit(&self, ctx: &StageContext<'_>, window: AuditWindow) -> StageRun<AuditReport> {
        self.begin(StageId::QualityAudit);
        let scanner = SourceScanner::new(&self.repo_root, &self.config.audit);
        let run = match tokio::task::spawn_blocking(move || scanner.scan()).await {
            Ok(scan) => {
                let stage = AuditStage::new(self.audits.clone(), self.config.audit.max_files_in_prompt);
                run_stage(&stage, ctx, &AuditInput { window, scan }).await
            }
            Err(e) => {
                let mut report = StageReport::new(StageId::QualityAudit);
                report.status = crate::stage::StageStatus::Failed;
                report.error = Some(format!("source scan failed: {e}"));
                StageRun { output: None, report }
            }
        };
        self.end(&run);
        run
    }
}
