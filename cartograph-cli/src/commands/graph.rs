use std::fmt::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Subcommand, ValueEnum};

use cartograph_core::store::{FsGraphStore, GraphSnapshot, GraphStore};
use cartograph_graph::{GraphDelta, KnowledgeGraphNode};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Text,
    Json,
}

#[derive(Args, Debug)]
pub struct GraphArgs {
    /// Path to git repository (default: current directory)
    #[arg(long, default_value = ".", global = true)]
    pub path: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub format: Format,

    #[command(subcommand)]
    pub action: GraphAction,
}

#[derive(Subcommand, Debug)]
pub enum GraphAction {
    /// Show the current snapshot, or an archived version
    Show {
        /// Archived version to show instead of the current snapshot
        #[arg(long)]
        version: Option<u64>,
    },
    /// List archived versions
    Versions,
    /// Node-level changes from version A to version B
    Diff { from: u64, to: u64 },
}

pub async fn run(args: GraphArgs) -> anyhow::Result<()> {
    let repo_path = super::resolve_repo(&args.path)?;
    let config = super::load_config(&repo_path)?;
    let store = FsGraphStore::new(config.storage.graph_store(&repo_path));

    match args.action {
        GraphAction::Show { version } => {
            let snapshot = match version {
                Some(v) => store
                    .load_version(v)
                    .await
                    .with_context(|| format!("Cannot load graph version {v}"))?,
                None => store
                    .load()
                    .await
                    .context("Cannot load current graph")?
                    .context("No knowledge graph snapshot has been saved yet")?,
            };
            match args.format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&snapshot)?),
                Format::Text => print!("{}", render_snapshot(&snapshot)),
            }
        }
        GraphAction::Versions => {
            let versions = store.versions().await.context("Cannot list graph versions")?;
            match args.format {
                Format::Json => println!("{}", serde_json::to_string(&versions)?),
                Format::Text if versions.is_empty() => println!("No graph versions saved."),
                Format::Text => {
                    for v in versions {
                        println!("v{v}");
                    }
                }
            }
        }
        GraphAction::Diff { from, to } => {
            let delta = store
                .diff(from, to)
                .await
                .with_context(|| format!("Cannot diff graph v{from} -> v{to}"))?;
            match args.format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&delta)?),
                Format::Text => print!("{}", render_delta(&delta)),
            }
        }
    }
    Ok(())
}

fn render_snapshot(snapshot: &GraphSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Knowledge graph v{} ({})",
        snapshot.version,
        snapshot.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let _ = writeln!(out, "  {} nodes, {} edges", snapshot.nodes.len(), snapshot.edges.len());
    if !snapshot.metadata.is_empty() {
        out.push('\n');
        for (key, value) in &snapshot.metadata {
            let _ = writeln!(out, "  {key:<24} {value}");
        }
    }
    if !snapshot.nodes.is_empty() {
        out.push('\n');
        for node in &snapshot.nodes {
            out.push_str(&node_line(node));
        }
    }
    out
}

fn node_line(node: &KnowledgeGraphNode) -> String {
    let deps = if node.dependencies.is_empty() {
        String::new()
    } else {
        format!(" -> {}", node.dependencies.join(", "))
    };
    format!("  {:<10} {}{deps}\n", node.node_type.as_str(), node.id)
}

fn render_delta(delta: &GraphDelta) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Graph v{} -> v{}: {} change(s)",
        delta.from_version, delta.to_version, delta.total_changes
    );
    for (symbol, nodes) in [("+", &delta.added), ("-", &delta.removed), ("~", &delta.modified)] {
        for node in nodes {
            let _ = writeln!(out, "  {symbol} {} ({})", node.id, node.node_type.as_str());
        }
    }
    out
}
