// Trigger surface: turns external signals into run requests keyed for dedup.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::history::RepositoryHistory;
use crate::ledger::RunLedger;
use crate::pipeline::JobKind;
use crate::types::AuditWindow;

/// Checkpoint holding the last branch head the sensor acted on.
pub const HEAD_CHECKPOINT: &str = "sensor_last_head";

/// One trigger event. `run_key` identifies it for at-most-once execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub run_key: String,
    pub job: JobKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl RunRequest {
    pub fn new(run_key: impl Into<String>, job: JobKind) -> Self {
        Self {
            run_key: run_key.into(),
            job,
            tags: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Requests a continuous run whenever the branch head moves.
#[derive(Debug, Clone)]
pub struct HeadSensor {
    history: Arc<dyn RepositoryHistory>,
    ledger: Arc<dyn RunLedger>,
    branch: String,
}

impl HeadSensor {
    pub fn new(
        history: Arc<dyn RepositoryHistory>,
        ledger: Arc<dyn RunLedger>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            history,
            ledger,
            branch: branch.into(),
        }
    }

    /// The request the current head would trigger, without recording it.
    pub async fn pending(&self) -> crate::error::Result<Option<RunRequest>> {
        let head = self.history.head(&self.branch).await?;
        let last = self.ledger.get_checkpoint(HEAD_CHECKPOINT).await?;
        if last.as_deref() == Some(head.as_str()) {
            debug!(branch = %self.branch, %head, "Head unchanged");
            return Ok(None);
        }

        let mut request = RunRequest::new(format!("commit_{head}"), JobKind::Continuous)
            .with_tag("branch", self.branch.clone())
            .with_tag("commit", head);
        if let Some(prev) = last {
            request = request.with_tag("previous_head", prev);
        }
        Ok(Some(request))
    }

    /// Compare the current head with the checkpoint. On change, record the
    /// new head and return a request keyed `commit_<sha>`.
    pub async fn poll(&self) -> crate::error::Result<Option<RunRequest>> {
        let Some(request) = self.pending().await? else {
            return Ok(None);
        };
        if let Some(head) = request.tags.get("commit") {
            self.ledger.set_checkpoint(HEAD_CHECKPOINT, head).await?;
            info!(
                branch = %self.branch,
                %head,
                previous = ?request.tags.get("previous_head"),
                "New head detected"
            );
        }
        Ok(Some(request))
    }
}

/// Weekly quality audit schedule, one run per ISO week.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditSchedule;

impl AuditSchedule {
    pub fn run_key(window: AuditWindow) -> String {
        format!("audit_{}", window.key())
    }

    /// The request for the week containing `at`.
    pub fn request_at(at: DateTime<Utc>) -> RunRequest {
        let window = AuditWindow::containing(at);
        RunRequest::new(Self::run_key(window), JobKind::Audit).with_tag("window", window.key())
    }

    pub fn current() -> RunRequest {
        Self::request_at(Utc::now())
    }

    /// The audit window a run key names, if it is an audit key.
    pub fn window_of(run_key: &str) -> Option<AuditWindow> {
        run_key.strip_prefix("audit_").and_then(AuditWindow::parse)
    }
}
