// Cartograph MCP server: exposes the knowledge graph, audits and run history
// as MCP tools for AI agents.
//
// Tools:
//   cartograph_graph       current (or archived) snapshot summary, or one node
//   cartograph_graph_diff  node-level delta between two versions
//   cartograph_audit       latest (or one week's) quality audit
//   cartograph_runs        recent pipeline runs with per-stage status

use std::path::Path;
use std::sync::Arc;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{ServerCapabilities, ServerInfo};
use rmcp::{ServerHandler, ServiceExt, schemars, tool, tool_router};
use serde::Deserialize;
use tracing::info;

use cartograph_core::config::{CartographConfig, config_path};
use cartograph_core::ledger::{RunLedger, SqliteLedger};
use cartograph_core::store::{AuditArchive, FsGraphStore, GraphSnapshot, GraphStore};
use cartograph_core::types::{AuditWindow, Severity};

// ── Tool parameter types ──────────────────────────────────────────

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
pub struct GraphParams {
    /// Archived version (omit for the current snapshot)
    #[schemars(description = "Archived graph version (omit for the current snapshot)")]
    pub version: Option<u64>,
    /// Node id to describe in detail
    #[schemars(description = "Node id to describe with its dependencies and dependents (omit for a summary)")]
    pub node: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct GraphDiffParams {
    /// Older version
    #[schemars(description = "Version to diff from")]
    pub from: u64,
    /// Newer version
    #[schemars(description = "Version to diff to")]
    pub to: u64,
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
pub struct AuditParams {
    /// ISO week key like 2026-W07
    #[schemars(description = "ISO week key like 2026-W07 (omit for the latest audit)")]
    pub window: Option<String>,
    /// Minimum severity to include
    #[schemars(description = "Minimum severity: low, medium, high, critical (default: low)")]
    pub min_severity: Option<String>,
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
pub struct RunsParams {
    /// Number of runs to return (default: 10)
    #[schemars(description = "Number of recent runs to return (default: 10)")]
    pub limit: Option<u32>,
}

// ── Server struct ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CartographMcpServer {
    store: Arc<dyn GraphStore>,
    ledger: Arc<dyn RunLedger>,
    audits: AuditArchive,
    #[allow(dead_code)]
    tool_router: ToolRouter<Self>,
}

impl CartographMcpServer {
    /// Create a server over the stores configured for `repo_path`.
    pub fn new(repo_path: &Path) -> Result<Self, String> {
        let config = CartographConfig::load(&config_path(repo_path))
            .map_err(|e| format!("Failed to load config: {e}"))?;
        let ledger = SqliteLedger::open(&config.storage.ledger(repo_path))
            .map_err(|e| format!("Failed to open ledger: {e}"))?;
        Ok(Self::from_parts(
            Arc::new(FsGraphStore::new(config.storage.graph_store(repo_path))),
            Arc::new(ledger),
            AuditArchive::new(config.storage.audit_store(repo_path)),
        ))
    }

    /// Create from existing stores (for testing).
    pub fn from_parts(
        store: Arc<dyn GraphStore>,
        ledger: Arc<dyn RunLedger>,
        audits: AuditArchive,
    ) -> Self {
        Self {
            store,
            ledger,
            audits,
            tool_router: Self::tool_router(),
        }
    }
}

// ── Tool implementations ──────────────────────────────────────────

#[tool_router]
impl CartographMcpServer {
    #[tool(
        name = "cartograph_graph",
        description = "Summarize the repository knowledge graph (components and their dependencies), or describe one component. Use to understand architecture before making changes."
    )]
    async fn graph(&self, Parameters(params): Parameters<GraphParams>) -> String {
        match self.do_graph(params).await {
            Ok(s) => s,
            Err(e) => format!("Error: {e}"),
        }
    }

    #[tool(
        name = "cartograph_graph_diff",
        description = "Compare two knowledge graph versions: components added, removed and modified."
    )]
    async fn graph_diff(&self, Parameters(params): Parameters<GraphDiffParams>) -> String {
        match self.do_graph_diff(params).await {
            Ok(s) => s,
            Err(e) => format!("Error: {e}"),
        }
    }

    #[tool(
        name = "cartograph_audit",
        description = "Get the weekly code quality audit: issues by severity and category with suggested fixes."
    )]
    async fn audit(&self, Parameters(params): Parameters<AuditParams>) -> String {
        match self.do_audit(params) {
            Ok(s) => s,
            Err(e) => format!("Error: {e}"),
        }
    }

    #[tool(
        name = "cartograph_runs",
        description = "List recent Cartograph pipeline runs with the status of each stage."
    )]
    async fn runs(&self, Parameters(params): Parameters<RunsParams>) -> String {
        match self.do_runs(params).await {
            Ok(s) => s,
            Err(e) => format!("Error: {e}"),
        }
    }
}

impl ServerHandler for CartographMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Cartograph MCP server: repository knowledge graph and quality audits. \
                 Use cartograph_graph for the component map, cartograph_graph_diff to see how \
                 it changed between versions, cartograph_audit for quality findings, and \
                 cartograph_runs for pipeline history."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

// ── Tool logic (separated for testability) ────────────────────────

fn to_json(value: &serde_json::Value) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("Serialization error: {e}"))
}

impl CartographMcpServer {
    async fn snapshot(&self, version: Option<u64>) -> Result<Option<GraphSnapshot>, String> {
        match version {
            Some(v) => self
                .store
                .load_version(v)
                .await
                .map(Some)
                .map_err(|e| format!("Store error: {e}")),
            None => self.store.load().await.map_err(|e| format!("Store error: {e}")),
        }
    }

    async fn do_graph(&self, params: GraphParams) -> Result<String, String> {
        let Some(snapshot) = self.snapshot(params.version).await? else {
            return Ok("No knowledge graph has been built yet.".to_string());
        };

        if let Some(id) = params.node.as_deref() {
            let Some(node) = snapshot.nodes.iter().find(|n| n.id == id) else {
                return Ok(format!("No component '{id}' in graph v{}", snapshot.version));
            };
            return to_json(&serde_json::json!({
                "version": snapshot.version,
                "node": node,
            }));
        }

        let nodes: Vec<serde_json::Value> = snapshot
            .nodes
            .iter()
            .take(200)
            .map(|n| {
                serde_json::json!({
                    "id": n.id,
                    "type": n.node_type.as_str(),
                    "dependencies": n.dependencies,
                })
            })
            .collect();
        to_json(&serde_json::json!({
            "version": snapshot.version,
            "timestamp": snapshot.timestamp.to_rfc3339(),
            "node_count": snapshot.nodes.len(),
            "edge_count": snapshot.edges.len(),
            "metadata": snapshot.metadata,
            "nodes": nodes,
        }))
    }

    async fn do_graph_diff(&self, params: GraphDiffParams) -> Result<String, String> {
        let delta = self
            .store
            .diff(params.from, params.to)
            .await
            .map_err(|e| format!("Store error: {e}"))?;
        to_json(&serde_json::json!({
            "from_version": delta.from_version,
            "to_version": delta.to_version,
            "total_changes": delta.total_changes,
            "added": delta.added_ids(),
            "removed": delta.removed_ids(),
            "modified": delta.modified_ids(),
        }))
    }

    fn do_audit(&self, params: AuditParams) -> Result<String, String> {
        let window = match params.window.as_deref() {
            Some(key) => {
                AuditWindow::parse(key).ok_or_else(|| format!("Invalid audit window: {key}"))?
            }
            None => match self
                .audits
                .windows()
                .map_err(|e| format!("Store error: {e}"))?
                .last()
            {
                Some(w) => *w,
                None => return Ok("No quality audit has been run yet.".to_string()),
            },
        };
        let min = match params.min_severity.as_deref() {
            Some(s) => Severity::parse(s).ok_or_else(|| format!("Unknown severity: {s}"))?,
            None => Severity::Low,
        };

        let Some(report) = self
            .audits
            .load(window)
            .map_err(|e| format!("Store error: {e}"))?
        else {
            return Ok(format!("No audit for {window}"));
        };

        let issues: Vec<_> = report.issues.iter().filter(|i| i.severity >= min).collect();
        to_json(&serde_json::json!({
            "window": window.key(),
            "files_analyzed": report.files_analyzed,
            "total_lines": report.total_lines,
            "issue_count": issues.len(),
            "issues": issues,
            "narrative": report.narrative,
        }))
    }

    async fn do_runs(&self, params: RunsParams) -> Result<String, String> {
        let limit = params.limit.unwrap_or(10) as usize;
        let runs = self
            .ledger
            .recent_runs(limit)
            .await
            .map_err(|e| format!("Ledger error: {e}"))?;
        if runs.is_empty() {
            return Ok("No runs recorded yet.".to_string());
        }

        let entries: Vec<serde_json::Value> = runs
            .iter()
            .map(|run| {
                let stages: serde_json::Map<String, serde_json::Value> = run
                    .ordered()
                    .into_iter()
                    .map(|s| (s.stage.as_str().to_string(), s.status.as_str().into()))
                    .collect();
                serde_json::json!({
                    "run_id": run.run_id,
                    "run_key": run.run_key,
                    "job": run.job.as_str(),
                    "finished_at": run.finished_at.to_rfc3339(),
                    "successful": run.is_successful(),
                    "stages": stages,
                })
            })
            .collect();
        to_json(&serde_json::json!({ "count": entries.len(), "runs": entries }))
    }
}

/// Start the MCP server on stdio for the repository at `repo_path`.
pub async fn serve_stdio(repo_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let server = CartographMcpServer::new(repo_path)?;
    info!("Starting Cartograph MCP server (stdio transport)");

    let transport = tokio::io::join(tokio::io::stdin(), tokio::io::stdout());
    let service = server.serve(transport).await?;
    service.waiting().await?;

    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────
