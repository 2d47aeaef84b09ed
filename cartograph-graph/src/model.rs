// Knowledge graph data model.
//
// Edges are never authored directly: they are materialized from each node's
// dependency list, so a snapshot built through `KnowledgeGraph::from_nodes`
// always satisfies the dependency/edge correspondence.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::GraphError;

/// Relation label carried by every derived edge.
pub const DEPENDS_ON: &str = "depends_on";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    #[default]
    Module,
    Class,
    Function,
    Service,
}

impl NodeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Module => "module",
            Self::Class => "class",
            Self::Function => "function",
            Self::Service => "service",
        }
    }

    /// Parse a node type label, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "module" => Some(Self::Module),
            "class" => Some(Self::Class),
            "function" => Some(Self::Function),
            "service" => Some(Self::Service),
            _ => None,
        }
    }
}

/// A component of the codebase as described by the analysis agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraphNode {
    pub id: String,
    #[serde(rename = "type", default)]
    pub node_type: NodeType,
    pub name: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub dependents: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl KnowledgeGraphNode {
    pub fn new(id: impl Into<String>, node_type: NodeType) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            node_type,
            dependencies: Vec::new(),
            dependents: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub relation: String,
}

impl GraphEdge {
    pub fn depends_on(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            relation: DEPENDS_ON.to_string(),
        }
    }
}

/// Nodes plus the edges derived from them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    #[serde(default)]
    pub nodes: Vec<KnowledgeGraphNode>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
}

impl KnowledgeGraph {
    /// Build a graph from raw nodes.
    ///
    /// Node ids are deduplicated (first occurrence wins), dependency lists are
    /// sorted and deduplicated, `dependents` is extended with the reverse of
    /// every dependency, and one `depends_on` edge is materialized per
    /// dependency. Nodes come out sorted by id.
    pub fn from_nodes(nodes: Vec<KnowledgeGraphNode>) -> Self {
        let mut seen: HashSet<String> = HashSet::new();
        let mut unique: Vec<KnowledgeGraphNode> = Vec::with_capacity(nodes.len());
        for mut node in nodes {
            if !seen.insert(node.id.clone()) {
                warn!(id = %node.id, "Dropping duplicate knowledge graph node");
                continue;
            }
            node.dependencies = sorted_unique(std::mem::take(&mut node.dependencies));
            node.dependencies.retain(|d| d != &node.id);
            unique.push(node);
        }
        unique.sort_by(|a, b| a.id.cmp(&b.id));

        // Reverse index: dependency id -> dependant ids
        let mut reverse: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for node in &unique {
            for dep in &node.dependencies {
                reverse.entry(dep.as_str()).or_default().insert(node.id.as_str());
            }
        }
        let derived: Vec<Vec<String>> = unique
            .iter()
            .map(|n| {
                reverse
                    .get(n.id.as_str())
                    .map(|s| s.iter().map(|id| (*id).to_string()).collect())
                    .unwrap_or_default()
            })
            .collect();
        for (node, extra) in unique.iter_mut().zip(derived) {
            let mut all = std::mem::take(&mut node.dependents);
            all.extend(extra);
            node.dependents = sorted_unique(all);
        }

        let edges = materialize_edges(&unique);
        Self {
            nodes: unique,
            edges,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&KnowledgeGraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Verify the dependency/edge correspondence and id uniqueness.
    pub fn check_consistency(&self) -> crate::Result<()> {
        let mut ids = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(GraphError::DuplicateNode(node.id.clone()));
            }
        }

        let edges: HashSet<(&str, &str)> = self
            .edges
            .iter()
            .filter(|e| e.relation == DEPENDS_ON)
            .map(|e| (e.from.as_str(), e.to.as_str()))
            .collect();

        let mut declared = HashSet::new();
        for node in &self.nodes {
            for dep in &node.dependencies {
                declared.insert((node.id.as_str(), dep.as_str()));
                if !edges.contains(&(node.id.as_str(), dep.as_str())) {
                    return Err(GraphError::MissingEdge {
                        from: node.id.clone(),
                        to: dep.clone(),
                    });
                }
            }
        }

        if let Some((from, to)) = edges.iter().find(|pair| !declared.contains(*pair)) {
            return Err(GraphError::OrphanEdge {
                from: (*from).to_string(),
                to: (*to).to_string(),
            });
        }
        Ok(())
    }
}

/// One `depends_on` edge per (node, dependency) pair, in node order.
pub fn materialize_edges(nodes: &[KnowledgeGraphNode]) -> Vec<GraphEdge> {
    nodes
        .iter()
        .flat_map(|n| {
            n.dependencies
                .iter()
                .map(move |d| GraphEdge::depends_on(n.id.clone(), d.clone()))
        })
        .collect()
}

fn sorted_unique(mut items: Vec<String>) -> Vec<String> {
    items.retain(|s| !s.trim().is_empty());
    items.sort();
    items.dedup();
    items
}
