//! Progress reporting for pipeline runs.
//!
//! The CLI uses `IndicatifReporter` to show one line per finished stage.
//! Library callers can use `NoopReporter` or provide their own implementation.

use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressStyle};

use crate::stage::{StageId, StageReport};

/// Receives stage lifecycle events. Stages on independent branches run
/// concurrently, so events for different stages may interleave.
pub trait ProgressReporter: Send + Sync {
    fn run_started(&self, job: &str, stages: u64);

    fn stage_started(&self, stage: StageId);

    fn stage_finished(&self, report: &StageReport);

    fn run_finished(&self);
}

/// No-op reporter for library callers that don't need progress output.
#[derive(Debug, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn run_started(&self, _job: &str, _stages: u64) {}
    fn stage_started(&self, _stage: StageId) {}
    fn stage_finished(&self, _report: &StageReport) {}
    fn run_finished(&self) {}
}

/// Reporter backed by an `indicatif` bar for CLI use.
#[derive(Debug)]
pub struct IndicatifReporter {
    bar: ProgressBar,
    running: Mutex<Vec<StageId>>,
}

impl Default for IndicatifReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl IndicatifReporter {
    pub fn new() -> Self {
        Self {
            bar: ProgressBar::new(0),
            running: Mutex::new(Vec::new()),
        }
    }

    /// A reporter that draws nothing, for `--quiet`.
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
            running: Mutex::new(Vec::new()),
        }
    }

    fn refresh_message(&self, running: &[StageId]) {
        let names: Vec<&str> = running.iter().map(|s| s.as_str()).collect();
        self.bar.set_message(names.join(", "));
    }
}

impl ProgressReporter for IndicatifReporter {
    fn run_started(&self, job: &str, stages: u64) {
        self.bar.set_length(stages);
        if let Ok(style) =
            ProgressStyle::with_template("{spinner:.green} [{pos}/{len}] {prefix} {msg}")
        {
            self.bar.set_style(style);
        }
        self.bar.set_prefix(job.to_string());
        self.bar.reset();
    }

    fn stage_started(&self, stage: StageId) {
        if let Ok(mut running) = self.running.lock() {
            running.push(stage);
            self.refresh_message(&running);
        }
    }

    fn stage_finished(&self, report: &StageReport) {
        if let Ok(mut running) = self.running.lock() {
            running.retain(|s| *s != report.stage);
            self.refresh_message(&running);
        }
        let mark = if report.status.is_success() { "ok" } else { "--" };
        self.bar.println(format!(
            "  {mark} {:<26} {} ({} ms)",
            report.stage.as_str(),
            report.status,
            report.duration_ms
        ));
        self.bar.inc(1);
    }

    fn run_finished(&self) {
        self.bar.finish_and_clear();
    }
}
