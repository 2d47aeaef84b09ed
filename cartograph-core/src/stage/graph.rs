// Knowledge graph build: ask the agent for the component graph, normalize it,
// and persist it as the next snapshot version.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::{info, warn};

use cartograph_graph::{
    KnowledgeGraph, KnowledgeGraphNode, NodeType, dangling_dependencies, dependency_cycles,
};

use crate::error::StageError;
use crate::normalize::NormalizedResult;
use crate::prompt::{json_block, respond_with_json, truncate};
use crate::store::{GraphSnapshot, GraphStore};
use crate::types::{ChangeRecord, ImpactAssessment};

use super::fields::{optional_string_list, root_object, text};
use super::impact::ChangeBrief;
use super::{Provenance, Stage, StageId, StageReport, raw_text};

const SCHEMA: &str = r#"{
  "nodes": [
    {
      "id": "unique component id, e.g. src/app/models.py",
      "type": "module | class | function | service",
      "name": "display name",
      "dependencies": ["ids this component depends on"],
      "metadata": {}
    }
  ]
}"#;

const SUMMARY_LIMIT: usize = 200;

#[derive(Debug, Clone, Default)]
pub struct GraphInput {
    pub changes: Vec<ChangeRecord>,
    pub assessment: ImpactAssessment,
    /// The current snapshot's graph, so the agent can update rather than restart.
    pub previous: Option<KnowledgeGraph>,
}

#[derive(Debug, Clone)]
pub struct GraphStage {
    store: Arc<dyn GraphStore>,
}

impl GraphStage {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }
}

/// Counts of per-node defaults, reported once per field rather than per node.
#[derive(Default)]
struct NodeDefaults {
    skipped: usize,
    node_type: usize,
    name: usize,
    duplicates: usize,
}

impl NodeDefaults {
    fn into_warnings(self, warnings: &mut Vec<String>) {
        let mut push = |n: usize, what: &str| {
            if n > 0 {
                warnings.push(format!("{n} node(s): {what}"));
            }
        };
        push(self.skipped, "no id; skipped");
        push(self.node_type, "type missing or unrecognized; defaulted to module");
        push(self.name, "name missing; defaulted to id");
        push(self.duplicates, "duplicate id; first occurrence kept");
    }
}

fn map_node(
    obj: &Map<String, Value>,
    defaults: &mut NodeDefaults,
    warnings: &mut Vec<String>,
) -> Option<KnowledgeGraphNode> {
    let Some(id) = text(obj, "id") else {
        defaults.skipped += 1;
        return None;
    };
    let node_type = text(obj, "type")
        .and_then(|t| NodeType::parse(&t))
        .unwrap_or_else(|| {
            defaults.node_type += 1;
            NodeType::Module
        });
    let name = text(obj, "name").unwrap_or_else(|| {
        defaults.name += 1;
        id.clone()
    });
    let metadata: BTreeMap<String, Value> = match obj.get("metadata") {
        Some(Value::Object(m)) => m.clone().into_iter().collect(),
        _ => BTreeMap::new(),
    };

    Some(KnowledgeGraphNode {
        dependencies: optional_string_list(obj, "dependencies", warnings).unwrap_or_default(),
        dependents: optional_string_list(obj, "dependents", warnings).unwrap_or_default(),
        id,
        node_type,
        name,
        metadata,
    })
}

/// Fold an `edges: [{from, to}]` list into the `from` nodes' dependencies.
fn fold_edges(nodes: &mut [KnowledgeGraphNode], edges: &[Value], warnings: &mut Vec<String>) {
    let mut index: BTreeMap<String, usize> = BTreeMap::new();
    for (i, n) in nodes.iter().enumerate() {
        index.entry(n.id.clone()).or_insert(i);
    }
    let mut unmatched = 0usize;
    for edge in edges {
        let from = edge.get("from").and_then(Value::as_str);
        let to = edge.get("to").and_then(Value::as_str);
        match (from.and_then(|f| index.get(f)), to) {
            (Some(&i), Some(to)) if !to.trim().is_empty() => {
                nodes[i].dependencies.push(to.trim().to_string());
            }
            _ => unmatched += 1,
        }
    }
    if unmatched > 0 {
        warnings.push(format!("{unmatched} edge(s) without a known source node ignored"));
    }
}

fn snapshot_of(graph: KnowledgeGraph, input: &GraphInput) -> GraphSnapshot {
    let cycles = dependency_cycles(&graph);
    let dangling = dangling_dependencies(&graph).len();
    let (nodes, edges) = (graph.nodes.len(), graph.edges.len());
    GraphSnapshot::from_graph(graph)
        .with_metadata("total_nodes", json!(nodes))
        .with_metadata("total_edges", json!(edges))
        .with_metadata("dependency_cycles", json!(cycles))
        .with_metadata("dangling_dependencies", json!(dangling))
        .with_metadata("changes_analyzed", json!(input.changes.len()))
        .with_metadata("risk_level", json!(input.assessment.risk_level.as_str()))
}

#[async_trait::async_trait]
impl Stage for GraphStage {
    type Input = GraphInput;
    type Output = GraphSnapshot;

    fn id(&self) -> StageId {
        StageId::KnowledgeGraphBuild
    }

    fn render_prompt(&self, input: &GraphInput) -> String {
        let briefs: Vec<ChangeBrief<'_>> = input.changes.iter().map(ChangeBrief::from).collect();
        let previous = match &input.previous {
            Some(graph) if !graph.is_empty() => {
                let outline: BTreeMap<&str, &Vec<String>> = graph
                    .nodes
                    .iter()
                    .map(|n| (n.id.as_str(), &n.dependencies))
                    .collect();
                format!(
                    "Current graph (id -> dependencies); update it rather than starting over:\n{}\n\n",
                    json_block(&outline)
                )
            }
            _ => String::new(),
        };
        format!(
            "## Task: knowledge_graph_build\n\n\
             Analyze the repository in the working directory and describe its component \
             graph: modules, services, key classes and functions, and the dependencies \
             between them. Pay attention to circular dependencies, highly coupled \
             components and central points of failure.\n\n\
             Recent changes:\n{}\n\n\
             Impact assessment:\n{}\n\n\
             {previous}{}",
            json_block(&briefs),
            json_block(&input.assessment),
            respond_with_json(SCHEMA)
        )
    }

    fn map_structured(
        &self,
        value: Value,
        input: &GraphInput,
        warnings: &mut Vec<String>,
    ) -> GraphSnapshot {
        // A bare array is taken as the node list itself.
        let (raw_nodes, raw_edges) = match value {
            Value::Array(items) => (items, Vec::new()),
            other => {
                let mut obj = root_object(other, warnings);
                let nodes = match obj.remove("nodes") {
                    Some(Value::Array(items)) => items,
                    _ => {
                        warnings.push("nodes: missing or not a list; defaulted to []".into());
                        Vec::new()
                    }
                };
                let edges = match obj.remove("edges") {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                };
                (nodes, edges)
            }
        };

        let mut defaults = NodeDefaults::default();
        let mut seen = HashSet::new();
        let mut nodes = Vec::with_capacity(raw_nodes.len());
        for raw in &raw_nodes {
            let Some(obj) = raw.as_object() else {
                defaults.skipped += 1;
                continue;
            };
            if let Some(node) = map_node(obj, &mut defaults, warnings) {
                if seen.insert(node.id.clone()) {
                    nodes.push(node);
                } else {
                    defaults.duplicates += 1;
                }
            }
        }
        defaults.into_warnings(warnings);
        fold_edges(&mut nodes, &raw_edges, warnings);

        snapshot_of(KnowledgeGraph::from_nodes(nodes), input)
    }

    fn degraded(&self, input: &GraphInput, result: &NormalizedResult) -> GraphSnapshot {
        let text = raw_text(result);
        snapshot_of(KnowledgeGraph::default(), input)
            .with_metadata("degraded", json!(true))
            .with_metadata("analysis_summary", json!(truncate(&text, SUMMARY_LIMIT)))
    }

    async fn commit(
        &self,
        mut snapshot: GraphSnapshot,
        provenance: Provenance,
        report: &mut StageReport,
    ) -> Result<GraphSnapshot, StageError> {
        if provenance != Provenance::Structured {
            report.set_detail("saved", false);
            return Ok(snapshot);
        }
        if snapshot.nodes.is_empty() {
            report
                .warnings
                .push("no usable nodes; snapshot not saved".to_string());
            report.set_detail("saved", false);
            return Ok(snapshot);
        }

        let version = self.store.save(&snapshot).await.map_err(|e| {
            warn!(error = %e, "Snapshot save failed");
            StageError::Persist(e.to_string())
        })?;
        snapshot.version = version;
        info!(
            version,
            nodes = snapshot.nodes.len(),
            edges = snapshot.edges.len(),
            "Knowledge graph snapshot saved"
        );
        report.set_detail("saved", true);
        report.set_detail("version", version);
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FsGraphStore;

    fn stage(dir: &std::path::Path) -> (GraphStage, Arc<FsGraphStore>) {
        let store = Arc::new(FsGraphStore::new(dir));
        (GraphStage::new(store.clone()), store)
    }

    #[test]
    fn nodes_get_documented_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (stage, _) = stage(dir.path());
        let mut warnings = Vec::new();
        let snapshot = stage.map_structured(
            json!({"nodes": [
                {"id": "api", "type": "service", "dependencies": ["db"]},
                {"id": "db", "type": "database"},
                {"id": "api", "type": "module"},
                {"name": "anonymous"},
                7
            ]}),
            &GraphInput::default(),
            &mut warnings,
        );

        let ids: Vec<&str> = snapshot.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["api", "db"]);
        assert_eq!(snapshot.nodes[0].node_type, NodeType::Service);
        assert_eq!(snapshot.nodes[1].node_type, NodeType::Module);
        assert_eq!(snapshot.nodes[1].name, "db");
        assert_eq!(snapshot.nodes[1].dependents, vec!["api"]);
        assert_eq!(snapshot.edges.len(), 1);
        assert_eq!(snapshot.metadata["total_nodes"], json!(2));
        // skipped, type, name, duplicate
        assert_eq!(warnings.len(), 4, "{warnings:?}");
    }

    #[test]
    fn edge_list_folds_into_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        let (stage, _) = stage(dir.path());
        let mut warnings = Vec::new();
        let snapshot = stage.map_structured(
            json!({
                "nodes": [{"id": "a", "name": "a"}, {"id": "b", "name": "b"}],
                "edges": [{"from": "a", "to": "b"}, {"from": "ghost", "to": "a"}]
            }),
            &GraphInput::default(),
            &mut warnings,
        );
        assert_eq!(snapshot.nodes[0].dependencies, vec!["b"]);
        assert!(snapshot.graph().check_consistency().is_ok());
        assert!(warnings.iter().any(|w| w.contains("1 edge(s)")));
    }

    #[test]
    fn cycles_are_recorded_in_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let (stage, _) = stage(dir.path());
        let mut warnings = Vec::new();
        let snapshot = stage.map_structured(
            json!([
                {"id": "a", "name": "a", "dependencies": ["b"]},
                {"id": "b", "name": "b", "dependencies": ["a", "ext"]}
            ]),
            &GraphInput::default(),
            &mut warnings,
        );
        assert_eq!(snapshot.metadata["dependency_cycles"], json!([["a", "b"]]));
        assert_eq!(snapshot.metadata["dangling_dependencies"], json!(1));
    }

    #[tokio::test]
    async fn structured_snapshot_is_saved_degraded_is_not() {
        let dir = tempfile::tempdir().unwrap();
        let (stage, store) = stage(dir.path());
        let mut warnings = Vec::new();
        let snapshot = stage.map_structured(
            json!({"nodes": [{"id": "core", "name": "core"}]}),
            &GraphInput::default(),
            &mut warnings,
        );

        let mut report = StageReport::new(StageId::KnowledgeGraphBuild);
        let saved = stage.commit(snapshot, Provenance::Structured, &mut report).await.unwrap();
        assert_eq!(saved.version, 1);
        assert_eq!(report.detail["saved"], json!(true));

        let degraded = stage.degraded(
            &GraphInput::default(),
            &NormalizedResult::Unstructured("I looked around.".into()),
        );
        let mut report = StageReport::new(StageId::KnowledgeGraphBuild);
        let out = stage.commit(degraded, Provenance::Degraded, &mut report).await.unwrap();
        assert_eq!(out.version, 0);
        assert_eq!(out.metadata["analysis_summary"], json!("I looked around."));
        assert_eq!(store.versions().await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn save_failure_is_persist_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();
        let (stage, _) = stage(&blocker);

        let snapshot = GraphSnapshot::from_graph(KnowledgeGraph::from_nodes(vec![
            KnowledgeGraphNode::new("x", NodeType::Module),
        ]));
        let mut report = StageReport::new(StageId::KnowledgeGraphBuild);
        let err = stage
            .commit(snapshot, Provenance::Structured, &mut report)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Persist(_)));
    }

    #[test]
    fn prompt_includes_previous_graph_outline() {
        let dir = tempfile::tempdir().unwrap();
        let (stage, _) = stage(dir.path());
        let input = GraphInput {
            previous: Some(KnowledgeGraph::from_nodes(vec![
                KnowledgeGraphNode::new("svc", NodeType::Service).with_dependencies(["db"]),
            ])),
            ..GraphInput::default()
        };
        let prompt = stage.render_prompt(&input);
        assert!(prompt.contains("Task: knowledge_graph_build"));
        assert!(prompt.contains("\"svc\": [\n    \"db\"\n  ]"));
        assert!(!stage.render_prompt(&GraphInput::default()).contains("Current graph"));
    }
}
