use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, ValueEnum};

use cartograph_core::config::{
    AgentBackend, CartographConfig, STATE_DIR, Strictness, config_path,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum BackendArg {
    Cli,
    Anthropic,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Path to git repository (default: current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Branch to watch for changes
    #[arg(long)]
    pub branch: Option<String>,

    /// Agent backend
    #[arg(long, value_enum)]
    pub backend: Option<BackendArg>,

    /// Environment variable holding the API key (anthropic backend)
    #[arg(long, env = "CARTOGRAPH_API_KEY_ENV")]
    pub api_key_env: Option<String>,

    /// Fail structural stages on unusable agent output instead of degrading
    #[arg(long)]
    pub strict: bool,

    /// Overwrite an existing config
    #[arg(long)]
    pub force: bool,
}

#[allow(clippy::unused_async)]
pub async fn run(args: InitArgs) -> anyhow::Result<()> {
    let repo_path = super::resolve_repo(&args.path)?;
    if gix::open(&repo_path).is_err() {
        anyhow::bail!("Not a git repository: {}", repo_path.display());
    }

    let path = config_path(&repo_path);
    if path.exists() && !args.force {
        anyhow::bail!(
            "Cartograph is already set up in {} (use --force to overwrite {})",
            repo_path.display(),
            path.display()
        );
    }

    let mut config = CartographConfig::default();
    if let Some(branch) = args.branch {
        config.repository.branch = branch;
    }
    if let Some(backend) = args.backend {
        config.agent.backend = match backend {
            BackendArg::Cli => AgentBackend::Cli,
            BackendArg::Anthropic => AgentBackend::Anthropic,
        };
    }
    if let Some(var) = args.api_key_env {
        config.agent.api_key_env = var;
    }
    if args.strict {
        config.pipeline.strictness = Strictness::Strict;
    }
    config.validate().context("Invalid config")?;

    std::fs::create_dir_all(repo_path.join(STATE_DIR))
        .with_context(|| format!("Cannot create {STATE_DIR} in {}", repo_path.display()))?;
    let text = config.to_toml_string().context("Cannot serialize config")?;
    std::fs::write(&path, text)
        .with_context(|| format!("Cannot write config: {}", path.display()))?;

    let ledger = super::open_ledger(&repo_path, &config)?;

    println!("Cartograph initialized in {}", repo_path.display());
    println!();
    println!("  Config:  {}", path.display());
    if let Some(db) = ledger.path() {
        println!("  Ledger:  {}", db.display());
    }
    println!("  Branch:  {}", config.repository.branch);
    println!("  Docs:    {}", config.storage.docs_root(&repo_path).display());
    println!("  Graph:   {}", config.storage.graph_store(&repo_path).display());
    Ok(())
}
