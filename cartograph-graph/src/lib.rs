pub mod analysis;
pub mod diff;
pub mod model;

pub use analysis::{dangling_dependencies, dependency_cycles};
pub use diff::{GraphDelta, diff_nodes};
pub use model::{DEPENDS_ON, GraphEdge, KnowledgeGraph, KnowledgeGraphNode, NodeType};

/// Error type for the knowledge graph model.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum GraphError {
    #[error("Node {from} depends on {to} but no matching edge exists")]
    MissingEdge { from: String, to: String },

    #[error("Edge {from} -> {to} has no matching dependency entry")]
    OrphanEdge { from: String, to: String },

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),
}

pub type Result<T> = std::result::Result<T, GraphError>;
