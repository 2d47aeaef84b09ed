//! Pipeline stages.
//!
//! A stage renders a prompt from its inputs, asks the agent once, normalizes
//! the answer and projects it onto its output schema. Answers that cannot be
//! projected degrade to documented defaults instead of failing the run; only
//! transport failures (and, in strict mode, content failures of structural
//! stages) fail a stage.

pub mod audit;
pub mod change_detection;
pub mod documentation;
pub mod fields;
pub mod graph;
pub mod impact;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{Instrument, debug, info, warn};

use crate::agent::{AgentGateway, AgentOutcome};
use crate::config::Strictness;
use crate::error::StageError;
use crate::normalize::{NormalizedResult, normalize};

pub use audit::{AuditInput, AuditStage};
pub use change_detection::ChangeDetectionStage;
pub use documentation::{DocumentationReport, DocumentationStage};
pub use graph::{GraphInput, GraphStage};
pub use impact::ImpactStage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    ChangeDetection,
    ImpactAssessment,
    DocumentationGeneration,
    KnowledgeGraphBuild,
    QualityAudit,
}

impl StageId {
    pub const ALL: [Self; 5] = [
        Self::ChangeDetection,
        Self::ImpactAssessment,
        Self::DocumentationGeneration,
        Self::KnowledgeGraphBuild,
        Self::QualityAudit,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChangeDetection => "change_detection",
            Self::ImpactAssessment => "impact_assessment",
            Self::DocumentationGeneration => "documentation_generation",
            Self::KnowledgeGraphBuild => "knowledge_graph_build",
            Self::QualityAudit => "quality_audit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.as_str() == s)
    }

    /// Stages whose outputs this stage consumes.
    pub fn predecessors(self) -> &'static [Self] {
        match self {
            Self::ChangeDetection | Self::QualityAudit => &[],
            Self::ImpactAssessment => &[Self::ChangeDetection],
            Self::DocumentationGeneration => &[Self::ImpactAssessment],
            Self::KnowledgeGraphBuild => &[Self::ChangeDetection, Self::ImpactAssessment],
        }
    }

    /// Structural stages substitute empty instances on unusable output;
    /// informational ones keep the raw text.
    pub fn is_structural(self) -> bool {
        matches!(self, Self::ImpactAssessment | Self::KnowledgeGraphBuild)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    SucceededStructured,
    SucceededDegraded,
    SkippedUpstreamFailure,
    Failed,
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SucceededStructured => "succeeded-structured",
            Self::SucceededDegraded => "succeeded-degraded",
            Self::SkippedUpstreamFailure => "skipped-due-to-upstream-failure",
            Self::Failed => "failed",
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::SucceededStructured | Self::SucceededDegraded)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened in one stage of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: StageId,
    pub status: StageStatus,
    /// One entry per defaulted field or degraded answer.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Number of agent invocations the stage made.
    #[serde(default)]
    pub agent_calls: u32,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub detail: BTreeMap<String, Value>,
}

impl StageReport {
    pub fn new(stage: StageId) -> Self {
        Self {
            stage,
            status: StageStatus::SucceededStructured,
            warnings: Vec::new(),
            error: None,
            agent_calls: 0,
            duration_ms: 0,
            detail: BTreeMap::new(),
        }
    }

    /// Report for a stage that never started because `failed` did not succeed.
    pub fn skipped(stage: StageId, failed: &[StageId]) -> Self {
        let mut report = Self::new(stage);
        report.status = StageStatus::SkippedUpstreamFailure;
        report.error = Some(format!(
            "upstream stage failed: {}",
            failed.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
        ));
        report
    }

    pub fn set_detail(&mut self, key: &str, value: impl Into<Value>) {
        self.detail.insert(key.to_string(), value.into());
    }

    fn finish(&mut self, start: Instant, result: &Result<StageStatus, StageError>) {
        self.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        match result {
            Ok(status) => self.status = *status,
            Err(e) => {
                self.status = StageStatus::Failed;
                self.error = Some(e.to_string());
            }
        }
    }
}

/// Output (when the stage succeeded) plus its report.
#[derive(Debug, Clone)]
pub struct StageRun<T> {
    pub output: Option<T>,
    pub report: StageReport,
}

/// How an output came to be, for stages whose side effects depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Produced without calling the agent.
    ShortCircuit,
    /// Projected from a structured answer.
    Structured,
    /// Substituted defaults or kept raw text.
    Degraded,
}

/// Per-run collaborators shared by every stage.
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    pub gateway: &'a dyn AgentGateway,
    pub working_dir: &'a Path,
    pub timeout: Duration,
    pub strictness: Strictness,
}

impl fmt::Debug for StageContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageContext")
            .field("gateway", &self.gateway.name())
            .field("working_dir", &self.working_dir)
            .field("timeout", &self.timeout)
            .field("strictness", &self.strictness)
            .finish()
    }
}

impl StageContext<'_> {
    /// One agent call, normalized. Transport failures become stage errors.
    pub async fn ask(
        &self,
        prompt: &str,
        report: &mut StageReport,
    ) -> Result<NormalizedResult, StageError> {
        report.agent_calls += 1;
        debug!(
            stage = %report.stage,
            prompt_bytes = prompt.len(),
            gateway = self.gateway.name(),
            "Invoking agent"
        );
        match self
            .gateway
            .invoke(prompt, self.working_dir, self.timeout)
            .await
        {
            AgentOutcome::Success { raw_output } => {
                let normalized = normalize(&raw_output);
                debug!(stage = %report.stage, kind = normalized.kind(), "Normalized agent output");
                Ok(normalized)
            }
            AgentOutcome::Failure { reason, detail } => {
                warn!(stage = %report.stage, %reason, %detail, "Agent invocation failed");
                Err(StageError::Transport {
                    reason: reason.to_string(),
                    detail,
                })
            }
        }
    }
}

/// Why a non-structured answer could not be projected.
pub fn content_problem(result: &NormalizedResult) -> String {
    match result {
        NormalizedResult::Structured(_) => "structured output".to_string(),
        NormalizedResult::Unstructured(_) => "agent returned unstructured output".to_string(),
        NormalizedResult::Empty => "agent returned no output".to_string(),
        NormalizedResult::Rejected(reason) => format!("agent reported an error: {reason}"),
    }
}

/// Best-effort text of a non-structured answer.
pub fn raw_text(result: &NormalizedResult) -> String {
    match result {
        NormalizedResult::Structured(v) => v.to_string(),
        NormalizedResult::Unstructured(text) | NormalizedResult::Rejected(text) => text.clone(),
        NormalizedResult::Empty => String::new(),
    }
}

/// One single-call stage: prompt, projection, degraded default, side effects.
#[async_trait::async_trait]
pub trait Stage: Send + Sync {
    type Input: Send + Sync;
    type Output: Send;

    fn id(&self) -> StageId;

    /// Output produced without calling the agent, when the input makes a call pointless.
    fn short_circuit(&self, _input: &Self::Input) -> Option<Self::Output> {
        None
    }

    fn render_prompt(&self, input: &Self::Input) -> String;

    /// Project a structured answer, pushing one warning per defaulted field.
    fn map_structured(
        &self,
        value: Value,
        input: &Self::Input,
        warnings: &mut Vec<String>,
    ) -> Self::Output;

    /// Output for an answer that could not be projected.
    fn degraded(&self, input: &Self::Input, result: &NormalizedResult) -> Self::Output;

    /// Side effects once the output is final (writing docs, saving a snapshot).
    async fn commit(
        &self,
        output: Self::Output,
        _provenance: Provenance,
        _report: &mut StageReport,
    ) -> Result<Self::Output, StageError> {
        Ok(output)
    }
}

/// Run one stage to completion. Never panics on agent misbehavior; every
/// outcome lands in the returned report.
pub async fn run_stage<S: Stage>(
    stage: &S,
    ctx: &StageContext<'_>,
    input: &S::Input,
) -> StageRun<S::Output> {
    let id = stage.id();
    let start = Instant::now();
    let mut report = StageReport::new(id);
    let result = execute(stage, ctx, input, &mut report)
        .instrument(tracing::info_span!("stage", stage = %id))
        .await;

    let (output, status) = match result {
        Ok((output, status)) => (Some(output), Ok(status)),
        Err(e) => (None, Err(e)),
    };
    report.finish(start, &status);
    info!(
        stage = %id,
        status = %report.status,
        warnings = report.warnings.len(),
        duration_ms = report.duration_ms,
        "Stage finished"
    );
    StageRun { output, report }
}

async fn execute<S: Stage>(
    stage: &S,
    ctx: &StageContext<'_>,
    input: &S::Input,
    report: &mut StageReport,
) -> Result<(S::Output, StageStatus), StageError> {
    let id = stage.id();
    if let Some(output) = stage.short_circuit(input) {
        info!(stage = %id, "Nothing to analyze, skipping agent call");
        report.set_detail("short_circuit", true);
        let output = stage.commit(output, Provenance::ShortCircuit, report).await?;
        return Ok((output, StageStatus::SucceededStructured));
    }

    let prompt = stage.render_prompt(input);
    let normalized = ctx.ask(&prompt, report).await?;
    report.set_detail("result_kind", normalized.kind());

    if let NormalizedResult::Structured(value) = normalized {
        let output = stage.map_structured(value, input, &mut report.warnings);
        let output = stage.commit(output, Provenance::Structured, report).await?;
        return Ok((output, StageStatus::SucceededStructured));
    }

    let problem = content_problem(&normalized);
    if id.is_structural() && ctx.strictness == Strictness::Strict {
        return Err(StageError::Content(problem));
    }
    warn!(stage = %id, %problem, "Degrading stage output");
    report.warnings.push(problem);
    let output = stage.degraded(input, &normalized);
    let output = stage.commit(output, Provenance::Degraded, report).await?;
    Ok((output, StageStatus::SucceededDegraded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{FailureReason, ScriptedAgent};

    /// Echoes the structured answer's `n` field; degrades to -1.
    struct EchoStage;

    #[async_trait::async_trait]
    impl Stage for EchoStage {
        type Input = bool;
        type Output = i64;

        fn id(&self) -> StageId {
            StageId::ImpactAssessment
        }

        fn short_circuit(&self, skip: &bool) -> Option<i64> {
            skip.then_some(0)
        }

        fn render_prompt(&self, _input: &bool) -> String {
            "echo".to_string()
        }

        fn map_structured(&self, value: Value, _: &bool, warnings: &mut Vec<String>) -> i64 {
            value.get("n").and_then(Value::as_i64).unwrap_or_else(|| {
                warnings.push("n defaulted".into());
                0
            })
        }

        fn degraded(&self, _: &bool, _: &NormalizedResult) -> i64 {
            -1
        }
    }

    fn ctx<'a>(agent: &'a ScriptedAgent, strictness: Strictness) -> StageContext<'a> {
        StageContext {
            gateway: agent,
            working_dir: Path::new("."),
            timeout: Duration::from_secs(5),
            strictness,
        }
    }

    const STRUCTURED: &str = "{\"type\":\"result\",\"result\":\"{\\\"n\\\":7}\"}";

    #[tokio::test]
    async fn structured_answer_is_projected() {
        let agent = ScriptedAgent::default().reply("echo", STRUCTURED);
        let run = run_stage(&EchoStage, &ctx(&agent, Strictness::Lenient), &false).await;
        assert_eq!(run.output, Some(7));
        assert_eq!(run.report.status, StageStatus::SucceededStructured);
        assert_eq!(run.report.agent_calls, 1);
        assert!(run.report.warnings.is_empty());
    }

    #[tokio::test]
    async fn short_circuit_skips_agent() {
        let agent = ScriptedAgent::default();
        let run = run_stage(&EchoStage, &ctx(&agent, Strictness::Lenient), &true).await;
        assert_eq!(run.output, Some(0));
        assert_eq!(run.report.agent_calls, 0);
        assert!(agent.prompts().is_empty());
    }

    #[tokio::test]
    async fn unstructured_degrades_when_lenient_and_fails_when_strict() {
        let agent = ScriptedAgent::default().reply("echo", "no json here");

        let lenient = run_stage(&EchoStage, &ctx(&agent, Strictness::Lenient), &false).await;
        assert_eq!(lenient.output, Some(-1));
        assert_eq!(lenient.report.status, StageStatus::SucceededDegraded);
        assert_eq!(lenient.report.warnings.len(), 1);

        let strict = run_stage(&EchoStage, &ctx(&agent, Strictness::Strict), &false).await;
        assert_eq!(strict.output, None);
        assert_eq!(strict.report.status, StageStatus::Failed);
        assert!(strict.report.error.unwrap().contains("unstructured"));
    }

    #[tokio::test]
    async fn transport_failure_fails_stage() {
        let agent = ScriptedAgent::default().fail("echo", FailureReason::Timeout);
        let run = run_stage(&EchoStage, &ctx(&agent, Strictness::Lenient), &false).await;
        assert_eq!(run.output, None);
        assert_eq!(run.report.status, StageStatus::Failed);
        assert!(run.report.error.unwrap().contains("timeout"));
    }

    #[test]
    fn stage_ids_round_trip_and_know_predecessors() {
        for id in StageId::ALL {
            assert_eq!(StageId::parse(id.as_str()), Some(id));
        }
        assert!(StageId::QualityAudit.predecessors().is_empty());
        assert_eq!(
            StageId::KnowledgeGraphBuild.predecessors(),
            &[StageId::ChangeDetection, StageId::ImpactAssessment]
        );
    }

    #[test]
    fn report_serializes_status_snake_case() {
        let report = StageReport::skipped(StageId::DocumentationGeneration, &[StageId::ImpactAssessment]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "skipped_upstream_failure");
        assert_eq!(json["stage"], "documentation_generation");
        assert!(json["error"].as_str().unwrap().contains("impact_assessment"));
    }
}
