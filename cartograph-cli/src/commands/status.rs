use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;

use cartograph_core::config::config_path;
use cartograph_core::ledger::RunLedger;
use cartograph_core::store::{AuditArchive, FsGraphStore, GraphStore};
use cartograph_core::trigger::HEAD_CHECKPOINT;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Path to git repository (default: current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Number of recent runs to list
    #[arg(long, default_value = "5")]
    pub runs: usize,
}

pub async fn run(args: StatusArgs) -> anyhow::Result<()> {
    let repo_path = super::resolve_repo(&args.path)?;
    let config = super::load_config(&repo_path)?;
    let ledger = super::open_ledger(&repo_path, &config)?;

    println!("Cartograph status for {}", repo_path.display());
    println!();
    println!("  Config:   {}", config_path(&repo_path).display());
    println!("  Branch:   {}", config.repository.branch);
    println!("  Agent:    {:?} ({})", config.agent.backend, config.agent.command);
    println!("  Mode:     {:?}", config.pipeline.strictness);
    println!();

    let store = FsGraphStore::new(config.storage.graph_store(&repo_path));
    let versions = store.versions().await.context("Cannot list graph versions")?;
    match store.load().await.context("Cannot load current graph")? {
        Some(current) => println!(
            "  Graph:    v{} with {} nodes, {} edges ({} archived version{})",
            current.version,
            current.nodes.len(),
            current.edges.len(),
            versions.len(),
            if versions.len() == 1 { "" } else { "s" }
        ),
        None => println!("  Graph:    (none)"),
    }

    let audits = AuditArchive::new(config.storage.audit_store(&repo_path));
    let windows = audits.windows().context("Cannot list audit reports")?;
    match windows.last() {
        Some(latest) => println!("  Audits:   {} week(s), latest {latest}", windows.len()),
        None => println!("  Audits:   (none)"),
    }

    let last_head = ledger.get_checkpoint(HEAD_CHECKPOINT).await?;
    match &last_head {
        Some(sha) => println!("  Sensed:   {}", super::short(sha, 12)),
        None => println!("  Sensed:   (never)"),
    }
    let pending = count_pending_commits(&repo_path, &config.repository.branch, last_head.as_deref());
    if pending > 0 {
        println!(
            "            {pending} new commit{} since",
            if pending == 1 { "" } else { "s" }
        );
    }

    let runs = ledger.recent_runs(args.runs).await.context("Cannot read runs from ledger")?;
    println!();
    if runs.is_empty() {
        println!("  Runs:     (none)");
    } else {
        println!("  Recent runs:");
        for run in &runs {
            let failed = run.failed_stages();
            let outcome = if failed.is_empty() {
                "ok".to_string()
            } else {
                format!("failed: {}", failed.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", "))
            };
            println!(
                "    {}  {:<10} {:<24} {outcome}",
                run.finished_at.format("%Y-%m-%d %H:%M"),
                run.job.as_str(),
                run.run_key.as_deref().unwrap_or("-"),
            );
        }
    }

    Ok(())
}

/// Count commits between the last sensed head and the branch tip.
fn count_pending_commits(repo_path: &Path, branch: &str, checkpoint: Option<&str>) -> usize {
    let Ok(repo) = gix::open(repo_path) else {
        return 0;
    };
    let Ok(tip) = repo.rev_parse_single(branch) else {
        return 0;
    };
    let Ok(object) = tip.object() else {
        return 0;
    };
    let Ok(commit) = object.try_into_commit() else {
        return 0;
    };

    let stop_at = match checkpoint {
        Some(sha) if commit.id().to_string() == sha => return 0,
        Some(sha) => match repo.rev_parse_single(sha) {
            Ok(id) => Some(id.detach()),
            Err(_) => return 0,
        },
        None => None,
    };
    count_ancestors(&commit, stop_at)
}

fn count_ancestors(commit: &gix::Commit<'_>, stop_at: Option<gix::ObjectId>) -> usize {
    let mut count = 0usize;
    let Ok(ancestors) = commit.ancestors().all() else {
        return 0;
    };
    for info in ancestors {
        let Ok(info) = info else { break };
        if stop_at.is_some_and(|stop| info.id == stop) {
            break;
        }
        count += 1;
        if count >= 9999 {
            break;
        }
    }
    count
}
