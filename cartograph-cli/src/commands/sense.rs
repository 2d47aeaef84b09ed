use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;

use cartograph_core::history::GitHistory;
use cartograph_core::ledger::RunLedger;
use cartograph_core::trigger::{AuditSchedule, HeadSensor, RunRequest};

#[derive(Args, Debug)]
pub struct SenseArgs {
    /// Path to git repository (default: current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Also request this week's quality audit
    #[arg(long)]
    pub audit: bool,

    /// Execute the requested runs (and record the head) instead of only printing them
    #[arg(long)]
    pub run: bool,
}

pub async fn run(args: SenseArgs, quiet: bool) -> anyhow::Result<()> {
    let repo_path = super::resolve_repo(&args.path)?;
    let config = super::load_config(&repo_path)?;
    let ledger = Arc::new(super::open_ledger(&repo_path, &config)?);

    let history = GitHistory::new(&repo_path);
    let sensor = HeadSensor::new(
        Arc::new(history),
        ledger.clone(),
        config.repository.branch.clone(),
    );

    let mut requests: Vec<RunRequest> = Vec::new();
    let sensed = if args.run {
        sensor.poll().await
    } else {
        sensor.pending().await
    };
    if let Some(request) = sensed.context("Cannot read branch head")? {
        requests.push(request);
    }
    if args.audit {
        requests.push(AuditSchedule::current());
    }

    if requests.is_empty() {
        if !quiet {
            println!("No new triggers on {}.", config.repository.branch);
        }
        return Ok(());
    }

    let mut failures = Vec::new();
    for request in requests {
        if !quiet {
            println!("Trigger: {} ({})", request.run_key, request.job);
        }
        if !args.run {
            continue;
        }
        let report = super::run::execute(
            &repo_path,
            config.clone(),
            ledger.as_ref() as &dyn RunLedger,
            request.job,
            Some(&request.run_key),
            false,
            quiet,
        )
        .await?;
        if let Some(report) = report {
            if !quiet {
                super::run::print_report(&report);
            }
            if let Err(e) = super::run::ensure_successful(&report) {
                failures.push(format!("{}: {e}", request.run_key));
            }
        }
    }

    if !failures.is_empty() {
        anyhow::bail!("{}", failures.join("; "));
    }
    Ok(())
}
