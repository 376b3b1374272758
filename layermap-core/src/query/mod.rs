//! Read-only queries over one graph snapshot.
//!
//! Every function here takes a `&Graph` and never blocks writers: callers
//! obtain the snapshot from [`GraphStore::snapshot`](crate::store::GraphStore::snapshot)
//! and may keep querying it while newer versions are published.

pub mod cycles;
pub mod impact;
pub mod lookup;
pub mod path;
pub mod subgraph;

use std::collections::BTreeSet;

use layermap_extract::EdgeKind;
use serde::{Deserialize, Serialize};

use crate::config::QuerySection;
use crate::graph::Graph;
use crate::types::{Edge, NodeId};

pub use cycles::{Cycle, CycleLimits, CycleReport, find_cycles};
pub use impact::{ImpactEntry, ImpactLayer, ImpactResult, impact};
pub use lookup::{GraphStats, NodeQuery, find_nodes, parse_edge_kind, parse_node_kind, stats};
pub use path::{GraphPath, shortest_path};
pub use subgraph::{Subgraph, SubgraphOptions, extract_subgraph};

/// Which way a traversal follows edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Toward dependents: from an edge's target to its source. Answers
    /// "what does a change here affect".
    #[default]
    Forward,
    /// Toward dependencies: from an edge's source to its target. Answers
    /// "what does this rely on".
    Backward,
    Both,
}

/// Restricts which edges a traversal may use.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeFilter {
    /// Allowed edge kinds; every kind when `None`.
    pub kinds: Option<BTreeSet<EdgeKind>>,
    /// Maximum number of hops; unbounded when `None`.
    pub max_depth: Option<usize>,
    /// Paths whose confidence product falls below this are pruned.
    pub min_confidence: f64,
}

impl Default for EdgeFilter {
    fn default() -> Self {
        Self {
            kinds: None,
            max_depth: None,
            min_confidence: 0.0,
        }
    }
}

impl EdgeFilter {
    /// Defaults taken from the `[query]` config section.
    pub fn from_config(section: &QuerySection) -> Self {
        Self {
            kinds: None,
            max_depth: section.impact_depth,
            min_confidence: section.min_confidence,
        }
    }

    #[must_use]
    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = EdgeKind>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    #[must_use]
    pub fn with_min_confidence(mut self, min: f64) -> Self {
        self.min_confidence = min;
        self
    }
}

/// Nodes one hop away from `id` in `direction`, with the edge used. Edges
/// below the filter's confidence floor are not crossed.
pub(crate) fn neighbors<'g>(
    graph: &'g Graph,
    id: NodeId,
    direction: Direction,
    filter: &'g EdgeFilter,
) -> impl Iterator<Item = (NodeId, &'g Edge)> + 'g {
    let kinds = filter.kinds.as_ref();
    let dependents = matches!(direction, Direction::Forward | Direction::Both)
        .then(|| graph.incoming(id, kinds).map(|e| (e.source, e)))
        .into_iter()
        .flatten();
    let dependencies = matches!(direction, Direction::Backward | Direction::Both)
        .then(|| graph.outgoing(id, kinds).map(|e| (e.target, e)))
        .into_iter()
        .flatten();
    dependents
        .chain(dependencies)
        .filter(move |(_, e)| e.confidence >= filter.min_confidence)
}
