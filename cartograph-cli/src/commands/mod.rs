pub mod graph;
pub mod init;
pub mod run;
pub mod sense;
pub mod serve;
pub mod status;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Subcommand;

use cartograph_core::config::{CartographConfig, config_path};
use cartograph_core::ledger::SqliteLedger;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initialize Cartograph for a git repository
    Init(init::InitArgs),
    /// Run the analysis pipeline once
    Run(run::RunArgs),
    /// Check triggers (branch head, weekly audit) and optionally run what they request
    Sense(sense::SenseArgs),
    /// Inspect knowledge graph snapshots
    Graph(graph::GraphArgs),
    /// Show configuration, snapshots, audits and recent runs
    Status(status::StatusArgs),
    /// Start MCP server for AI agent integration
    Serve(serve::ServeArgs),
}

pub async fn run(cmd: Command, quiet: bool) -> anyhow::Result<()> {
    match cmd {
        Command::Init(args) => init::run(args).await,
        Command::Run(args) => run::run(args, quiet).await,
        Command::Sense(args) => sense::run(args, quiet).await,
        Command::Graph(args) => graph::run(args).await,
        Command::Status(args) => status::run(args).await,
        Command::Serve(args) => serve::run(args).await,
    }
}

pub fn resolve_repo(path: &Path) -> anyhow::Result<PathBuf> {
    std::fs::canonicalize(path).with_context(|| format!("Cannot resolve path: {}", path.display()))
}

/// Load the config of an initialized repository.
pub fn load_config(repo_path: &Path) -> anyhow::Result<CartographConfig> {
    let path = config_path(repo_path);
    if !path.is_file() {
        anyhow::bail!(
            "Cartograph is not initialized in {}. Run `cartograph init` first.",
            repo_path.display()
        );
    }
    CartographConfig::load(&path).with_context(|| format!("Cannot load config: {}", path.display()))
}

pub fn open_ledger(repo_path: &Path, config: &CartographConfig) -> anyhow::Result<SqliteLedger> {
    let path = config.storage.ledger(repo_path);
    SqliteLedger::open(&path).with_context(|| format!("Cannot open ledger: {}", path.display()))
}

/// First `n` characters of a commit id.
pub fn short(id: &str, n: usize) -> &str {
    id.char_indices().nth(n).map_or(id, |(i, _)| &id[..i])
}
