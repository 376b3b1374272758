use std::collections::{BTreeSet, HashMap, VecDeque};

use layermap_extract::NodeKind;
use serde::Serialize;

use super::{Direction, EdgeFilter, neighbors};
use crate::error::QueryError;
use crate::graph::Graph;
use crate::types::{Edge, Node, NodeId};

#[derive(Debug, Clone, PartialEq)]
pub struct SubgraphOptions {
    /// Node kinds kept in the result; every kind when `None`. Traversal
    /// still passes through nodes of other kinds.
    pub node_kinds: Option<BTreeSet<NodeKind>>,
    pub edges: EdgeFilter,
    /// Hops from the seeds.
    pub depth: usize,
    pub direction: Direction,
}

impl Default for SubgraphOptions {
    fn default() -> Self {
        Self {
            node_kinds: None,
            edges: EdgeFilter::default(),
            depth: 1,
            direction: Direction::Both,
        }
    }
}

/// Nodes and the edges among them, both ordered by id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subgraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Subgraph {
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.binary_search_by_key(&id, |n| n.id).is_ok()
    }
}

/// The induced subgraph around `seeds`: every node within `depth` hops,
/// filtered by kind, plus every admitted edge between kept nodes.
pub fn extract_subgraph(
    graph: &Graph,
    seeds: &[NodeId],
    options: &SubgraphOptions,
) -> Result<Subgraph, QueryError> {
    let mut distance: HashMap<NodeId, usize> = HashMap::new();
    let mut queue = VecDeque::new();
    for &seed in seeds {
        if !graph.contains_node(seed) {
            return Err(QueryError::NodeNotFound(seed));
        }
        if distance.insert(seed, 0).is_none() {
            queue.push_back(seed);
        }
    }
    while let Some(node) = queue.pop_front() {
        let d = distance[&node];
        if d >= options.depth {
            continue;
        }
        for (next, _) in neighbors(graph, node, options.direction, &options.edges) {
            if !distance.contains_key(&next) {
                distance.insert(next, d + 1);
                queue.push_back(next);
            }
        }
    }

    let kept: BTreeSet<NodeId> = distance
        .into_keys()
        .filter(|id| {
            graph.node(*id).is_some_and(|n| {
                options
                    .node_kinds
                    .as_ref()
                    .is_none_or(|kinds| kinds.contains(&n.kind))
            })
        })
        .collect();
    let kinds = options.edges.kinds.as_ref();
    let mut edges: Vec<Edge> = kept
        .iter()
        .flat_map(|&id| graph.outgoing(id, kinds))
        .filter(|e| kept.contains(&e.target) && e.confidence >= options.edges.min_confidence)
        .cloned()
        .collect();
    edges.sort_by_key(|e| e.id);
    Ok(Subgraph {
        nodes: kept.iter().filter_map(|id| graph.node(*id)).cloned().collect(),
        edges,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::fixtures::{graph, id};

    #[test]
    fn collects_neighborhood_in_both_directions() {
        let g = graph(&[(1, 2, 1.0), (2, 3, 1.0), (3, 4, 1.0)]);
        let sub = extract_subgraph(&g, &[id(2)], &SubgraphOptions::default()).unwrap();
        assert_eq!(sub.nodes.len(), 3);
        assert!(sub.contains(id(1)) && sub.contains(id(3)));
        assert!(!sub.contains(id(4)));
        assert_eq!(sub.edges.len(), 2);
    }

    #[test]
    fn edges_are_induced_among_kept_nodes() {
        let g = graph(&[(1, 2, 1.0), (1, 3, 1.0), (2, 3, 1.0)]);
        let options = SubgraphOptions {
            direction: Direction::Backward,
            ..SubgraphOptions::default()
        };
        let sub = extract_subgraph(&g, &[id(1)], &options).unwrap();
        // 2 → 3 is not traversed from 1 in one hop but both ends are kept.
        assert_eq!(sub.edges.len(), 3);
    }

    #[test]
    fn kind_filter_drops_nodes_and_their_edges() {
        let g = graph(&[(1, 2, 1.0)]);
        let options = SubgraphOptions {
            node_kinds: Some(BTreeSet::from([NodeKind::Table])),
            ..SubgraphOptions::default()
        };
        let sub = extract_subgraph(&g, &[id(1)], &options).unwrap();
        assert!(sub.nodes.is_empty());
        assert!(sub.edges.is_empty());
    }

    #[test]
    fn weak_edges_are_not_crossed() {
        // 1 → 2 is below the floor, so 3 is out of reach too.
        let g = graph(&[(1, 2, 0.2), (2, 3, 1.0), (1, 4, 0.9)]);
        let options = SubgraphOptions {
            edges: EdgeFilter::default().with_min_confidence(0.5),
            depth: 2,
            direction: Direction::Backward,
            ..SubgraphOptions::default()
        };
        let sub = extract_subgraph(&g, &[id(1)], &options).unwrap();
        assert!(sub.contains(id(4)));
        assert!(!sub.contains(id(2)));
        assert!(!sub.contains(id(3)));
        assert_eq!(sub.edges.len(), 1);
    }

    #[test]
    fn unknown_seed_is_an_error() {
        let g = graph(&[(1, 2, 1.0)]);
        assert_eq!(
            extract_subgraph(&g, &[id(5)], &SubgraphOptions::default()),
            Err(QueryError::NodeNotFound(id(5)))
        );
    }
}
