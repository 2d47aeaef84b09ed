// Change detection: read the lookback window from repository history and,
// optionally, attach a per-commit analysis from the agent.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use serde_json::{Value, json};
use tracing::{Instrument, info, warn};

use crate::error::StageError;
use crate::history::RepositoryHistory;
use crate::normalize::NormalizedResult;
use crate::prompt::{join_or_none, respond_with_json};
use crate::types::ChangeRecord;

use super::{StageContext, StageId, StageReport, StageRun, StageStatus};

const SCHEMA: &str = r#"{
  "change_type": "feature | bugfix | refactor | docs | test | chore",
  "key_modifications": ["..."],
  "potential_impacts": ["..."],
  "quality_observations": ["..."]
}"#;

#[derive(Debug, Clone)]
pub struct ChangeDetectionStage {
    history: Arc<dyn RepositoryHistory>,
    branch: String,
    lookback_days: u32,
    analyze_commits: bool,
}

impl ChangeDetectionStage {
    pub fn new(history: Arc<dyn RepositoryHistory>, branch: impl Into<String>) -> Self {
        Self {
            history,
            branch: branch.into(),
            lookback_days: 7,
            analyze_commits: true,
        }
    }

    #[must_use]
    pub fn with_lookback_days(mut self, days: u32) -> Self {
        self.lookback_days = days;
        self
    }

    #[must_use]
    pub fn with_commit_analysis(mut self, enabled: bool) -> Self {
        self.analyze_commits = enabled;
        self
    }

    pub fn render_prompt(change: &ChangeRecord) -> String {
        format!(
            "## Task: change_detection\n\n\
             Analyze this git commit.\n\n\
             Commit: {id}\n\
             Author: {author}\n\
             Message: {message}\n\
             Files changed: {files}\n\
             Lines: +{add} -{del}\n\n\
             Diff preview:\n{diff}\n\n{schema}",
            id = change.id,
            author = change.author,
            message = change.message,
            files = join_or_none(&change.files),
            add = change.additions,
            del = change.deletions,
            diff = change.diff_summary.as_deref().unwrap_or("(unavailable)"),
            schema = respond_with_json(SCHEMA),
        )
    }

    /// Analysis value for one commit, or `None` when nothing usable came back.
    /// The flag is true when the answer had to be degraded.
    fn analysis_of(result: NormalizedResult) -> (Option<Value>, bool) {
        match result {
            NormalizedResult::Structured(value) => (Some(value), false),
            NormalizedResult::Unstructured(text) => (Some(json!({ "summary": text })), true),
            NormalizedResult::Rejected(reason) => (Some(json!({ "error": reason })), true),
            NormalizedResult::Empty => (None, true),
        }
    }

    pub async fn run(&self, ctx: &StageContext<'_>) -> StageRun<Vec<ChangeRecord>> {
        let start = Instant::now();
        let mut report = StageReport::new(StageId::ChangeDetection);
        let result = self
            .detect(ctx, &mut report)
            .instrument(tracing::info_span!("stage", stage = %StageId::ChangeDetection))
            .await;

        let (output, status) = match result {
            Ok((changes, status)) => (Some(changes), Ok(status)),
            Err(e) => (None, Err(e)),
        };
        report.finish(start, &status);
        info!(
            stage = %StageId::ChangeDetection,
            status = %report.status,
            changes = output.as_ref().map_or(0, Vec::len),
            duration_ms = report.duration_ms,
            "Stage finished"
        );
        StageRun { output, report }
    }

    async fn detect(
        &self,
        ctx: &StageContext<'_>,
        report: &mut StageReport,
    ) -> Result<(Vec<ChangeRecord>, StageStatus), StageError> {
        let since = Utc::now() - Duration::days(i64::from(self.lookback_days));
        let mut changes = self
            .history
            .list_changes(since, &self.branch)
            .await
            .map_err(|e| StageError::Input(e.to_string()))?;

        report.set_detail("branch", self.branch.clone());
        report.set_detail("since", since.to_rfc3339());
        report.set_detail("changes", changes.len());
        info!(branch = %self.branch, changes = changes.len(), "Detected changes");

        if !self.analyze_commits || changes.is_empty() {
            return Ok((changes, StageStatus::SucceededStructured));
        }

        let mut degraded = 0usize;
        for change in &mut changes {
            let prompt = Self::render_prompt(change);
            let normalized = ctx.ask(&prompt, report).await?;
            let (analysis, was_degraded) = Self::analysis_of(normalized);
            if was_degraded {
                degraded += 1;
                warn!(commit = change.short_id(), "Commit analysis degraded");
                report.warnings.push(format!(
                    "{}: commit analysis was not structured",
                    change.short_id()
                ));
            }
            change.analysis = analysis;
        }

        let status = if degraded > 0 {
            StageStatus::SucceededDegraded
        } else {
            StageStatus::SucceededStructured
        };
        Ok((changes, status))
    }
}
