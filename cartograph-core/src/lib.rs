//! Cartograph core library: agent-driven analysis stages, the run
//! orchestrator, and the versioned knowledge graph store.
//!
//! The main entry point is [`pipeline::AnalysisPipeline`], which runs
//! Change Detection → Impact Assessment → {Documentation, Knowledge Graph}
//! alongside an independent Quality Audit, persisting snapshots through a
//! [`store::GraphStore`].

pub mod agent;
pub mod config;
pub mod docs;
pub mod error;
pub mod history;
pub mod ledger;
pub mod normalize;
pub mod pipeline;
pub mod progress;
pub mod prompt;
pub mod scan;
pub mod stage;
pub mod store;
pub mod trigger;
pub mod types;
