use clap::Parser;

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "cartograph",
    version,
    about = "Keep documentation and a knowledge graph in step with a git repository"
)]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,
}

/// Classify an error into an exit code.
///
/// Exit codes:
///   0   success
///   1   general/unknown error
///   2   configuration error
///   3   repository not found / not initialized
///   4   ledger database error
///   6   agent gateway error
///   10  run completed with failed stages
fn classify_exit_code(err: &anyhow::Error) -> i32 {
    let msg = format!("{err:#}");
    let lower = msg.to_lowercase();

    if lower.contains("failed stages") {
        10
    } else if lower.contains("not initialized") || lower.contains("cannot resolve path") {
        3
    } else if lower.contains("agent") || lower.contains("api key") {
        6
    } else if lower.contains("config") {
        2
    } else if lower.contains("ledger") || lower.contains("sqlite") || lower.contains("database") {
        4
    } else {
        1
    }
}

fn main() {
    let cli = Cli::parse();

    let filter = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (_, 0) => "warn",
        (_, 1) => "info",
        (_, 2) => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: Failed to create runtime: {e}");
            std::process::exit(1);
        }
    };

    match runtime.block_on(commands::run(cli.command, cli.quiet)) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(classify_exit_code(&e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_not_initialized() {
        let err = anyhow::anyhow!("Cartograph is not initialized in /foo. Run `cartograph init` first.");
        assert_eq!(classify_exit_code(&err), 3);
    }

    #[test]
    fn exit_code_cannot_resolve() {
        let err = anyhow::anyhow!("Cannot resolve path: /nonexistent");
        assert_eq!(classify_exit_code(&err), 3);
    }

    #[test]
    fn exit_code_config() {
        let err = anyhow::anyhow!("Cannot load config: Parse error: expected `=`");
        assert_eq!(classify_exit_code(&err), 2);
    }

    #[test]
    fn exit_code_agent_wins_over_config() {
        let err = anyhow::anyhow!(
            "Cannot create agent gateway: Agent configuration error: environment variable X is not set"
        );
        assert_eq!(classify_exit_code(&err), 6);
    }

    #[test]
    fn exit_code_ledger() {
        let err = anyhow::anyhow!("Cannot open ledger: /repo/.cartograph/ledger.db");
        assert_eq!(classify_exit_code(&err), 4);
    }

    #[test]
    fn exit_code_failed_stages() {
        let err = anyhow::anyhow!("Run completed with failed stages: impact_assessment");
        assert_eq!(classify_exit_code(&err), 10);
    }

    #[test]
    fn exit_code_general() {
        let err = anyhow::anyhow!("Something unexpected happened");
        assert_eq!(classify_exit_code(&err), 1);
    }
}
