use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, ValueEnum};
use tracing::info;

use cartograph_core::config::CartographConfig;
use cartograph_core::ledger::RunLedger;
use cartograph_core::pipeline::{AnalysisPipeline, JobKind, RunReport};
use cartograph_core::progress::IndicatifReporter;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum JobArg {
    Continuous,
    Audit,
    Full,
}

impl From<JobArg> for JobKind {
    fn from(job: JobArg) -> Self {
        match job {
            JobArg::Continuous => Self::Continuous,
            JobArg::Audit => Self::Audit,
            JobArg::Full => Self::Full,
        }
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to git repository (default: current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Which stages to run
    #[arg(long, value_enum, default_value = "continuous")]
    pub job: JobArg,

    /// Trigger key; a key that already ran is skipped
    #[arg(long)]
    pub run_key: Option<String>,

    /// Run even if the run key was already claimed
    #[arg(long)]
    pub force: bool,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: RunArgs, quiet: bool) -> anyhow::Result<()> {
    let repo_path = super::resolve_repo(&args.path)?;
    let config = super::load_config(&repo_path)?;
    let ledger = super::open_ledger(&repo_path, &config)?;

    let Some(report) = execute(
        &repo_path,
        config,
        &ledger,
        args.job.into(),
        args.run_key.as_deref(),
        args.force,
        quiet || args.json,
    )
    .await?
    else {
        return Ok(());
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !quiet {
        print_report(&report);
    }
    ensure_successful(&report)
}

/// Claim the run key (if any), run the pipeline and record the report.
/// Returns `None` when the key had already been claimed.
pub async fn execute(
    repo_path: &Path,
    config: CartographConfig,
    ledger: &dyn RunLedger,
    job: JobKind,
    run_key: Option<&str>,
    force: bool,
    quiet: bool,
) -> anyhow::Result<Option<RunReport>> {
    if let Some(key) = run_key {
        if force {
            ledger.release_run(key).await.context("Cannot release run key in ledger")?;
        }
        if !ledger.claim_run(key, job).await.context("Cannot claim run key in ledger")? {
            info!(run_key = key, "Run key already claimed");
            if !quiet {
                println!("Run {key} was already processed; skipping (use --force to rerun)");
            }
            return Ok(None);
        }
    }

    let progress = if quiet {
        IndicatifReporter::hidden()
    } else {
        IndicatifReporter::new()
    };
    let pipeline = AnalysisPipeline::from_config(repo_path, config)
        .context("Cannot create agent gateway")?
        .with_progress(Arc::new(progress));
    let outcome = pipeline.run(job, run_key).await;

    ledger
        .complete_run(&outcome.report)
        .await
        .context("Cannot record run in ledger")?;
    Ok(Some(outcome.report))
}

pub fn ensure_successful(report: &RunReport) -> anyhow::Result<()> {
    let failed = report.failed_stages();
    if failed.is_empty() {
        return Ok(());
    }
    let names: Vec<&str> = failed.iter().map(|s| s.as_str()).collect();
    anyhow::bail!("Run completed with failed stages: {}", names.join(", "))
}

#[allow(clippy::cast_precision_loss)]
pub fn print_report(report: &RunReport) {
    let duration = report.finished_at - report.started_at;
    println!(
        "Run {} ({}{})",
        super::short(&report.run_id, 8),
        report.job,
        report
            .run_key
            .as_deref()
            .map(|k| format!(", key {k}"))
            .unwrap_or_default()
    );
    println!();
    for stage in report.ordered() {
        println!(
            "  {:<26} {:<26} {:>3} call(s) {:>7} ms",
            stage.stage.as_str(),
            stage.status.as_str(),
            stage.agent_calls,
            stage.duration_ms
        );
        if let Some(error) = &stage.error {
            println!("      error: {error}");
        }
        for warning in &stage.warnings {
            println!("      warning: {warning}");
        }
    }
    println!();
    println!("  Duration: {:.2}s", duration.num_milliseconds() as f64 / 1000.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartograph_core::stage::{StageId, StageReport, StageStatus};
    use std::collections::BTreeMap;

    fn report(status: StageStatus) -> RunReport {
        let mut stage = StageReport::new(StageId::ImpactAssessment);
        stage.status = status;
        RunReport {
            run_id: "run".into(),
            run_key: None,
            job: JobKind::Continuous,
            started_at: chrono::Utc::now(),
            finished_at: chrono::Utc::now(),
            stages: BTreeMap::from([(StageId::ImpactAssessment, stage)]),
        }
    }

    #[test]
    fn failed_stage_is_an_error() {
        let err = ensure_successful(&report(StageStatus::Failed)).unwrap_err();
        assert!(err.to_string().contains("failed stages: impact_assessment"));
        ensure_successful(&report(StageStatus::SucceededDegraded)).unwrap();
    }
}
