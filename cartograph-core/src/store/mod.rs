pub mod audit;
pub mod fs;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cartograph_graph::{GraphDelta, GraphEdge, KnowledgeGraph, KnowledgeGraphNode};

pub use audit::AuditArchive;
pub use fs::FsGraphStore;

/// One immutable, versioned capture of the knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// Assigned by the store at save time; 0 until then.
    #[serde(default)]
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub nodes: Vec<KnowledgeGraphNode>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl GraphSnapshot {
    pub fn from_graph(graph: KnowledgeGraph) -> Self {
        Self {
            version: 0,
            timestamp: Utc::now(),
            nodes: graph.nodes,
            edges: graph.edges,
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Copy of the nodes and edges as a [`KnowledgeGraph`].
    pub fn graph(&self) -> KnowledgeGraph {
        KnowledgeGraph {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
        }
    }

    /// Equality ignoring the store-assigned version and timestamp.
    pub fn same_content(&self, other: &Self) -> bool {
        self.nodes == other.nodes && self.edges == other.edges && self.metadata == other.metadata
    }
}

/// Versioned persistence for knowledge graph snapshots.
///
/// Implementations are the only writer of their backing location. Versions
/// are strictly increasing and never reused.
#[async_trait::async_trait]
pub trait GraphStore: Send + Sync + std::fmt::Debug {
    /// Persist a snapshot as the next version and make it current.
    async fn save(&self, snapshot: &GraphSnapshot) -> crate::error::Result<u64>;

    /// The current snapshot, if any version has been saved.
    async fn load(&self) -> crate::error::Result<Option<GraphSnapshot>>;

    /// One archived version.
    async fn load_version(&self, version: u64) -> crate::error::Result<GraphSnapshot>;

    /// All archived versions, ascending.
    async fn versions(&self) -> crate::error::Result<Vec<u64>>;

    /// Node-level delta from version `a` to version `b`.
    async fn diff(&self, a: u64, b: u64) -> crate::error::Result<GraphDelta> {
        let from = self.load_version(a).await?;
        let to = self.load_version(b).await?;
        let mut delta = cartograph_graph::diff_nodes(&from.nodes, &to.nodes);
        delta.from_version = a;
        delta.to_version = b;
        Ok(delta)
    }
}
