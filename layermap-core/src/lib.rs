//! layermap core library: reference resolution, the versioned graph store,
//! persistence and traversal queries.
//!
//! The main entry point is [`pipeline::Analyzer`], which runs
//! Classify → Extract → Resolve → Apply over a [`store::GraphStore`].
//! Queries in [`query`] run against any published [`graph::Graph`]
//! snapshot.

pub mod config;
pub mod error;
pub mod graph;
pub mod hash;
pub mod persist;
pub mod pipeline;
pub mod progress;
pub mod query;
pub mod resolve;
pub mod store;
pub mod types;

pub use config::LayermapConfig;
pub use error::{LayermapError, Result};
pub use graph::Graph;
pub use pipeline::{AnalysisSummary, Analyzer, FileStatus, SourceFile};
pub use store::GraphStore;
pub use types::{CancelToken, Edge, EdgeId, FileKey, GraphDiff, Node, NodeId};
