use std::path::PathBuf;

use clap::Args;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Transport type: stdio
    #[arg(long, default_value = "stdio")]
    pub transport: String,
    /// Path to git repository (default: current directory)
    #[arg(long, default_value = ".")]
    pub path: PathBuf,
}

pub async fn run(args: ServeArgs) -> anyhow::Result<()> {
    let repo_path = super::resolve_repo(&args.path)?;
    // Fail with the usual message before the server starts reading stdin.
    super::load_config(&repo_path)?;

    match args.transport.as_str() {
        "stdio" => cartograph_mcp::serve_stdio(&repo_path)
            .await
            .map_err(|e| anyhow::anyhow!("MCP server error: {e}")),
        other => anyhow::bail!("Unsupported transport: {other}. Supported: stdio"),
    }
}
