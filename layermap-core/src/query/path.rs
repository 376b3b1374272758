use std::collections::{HashMap, VecDeque};

use serde::Serialize;

use super::EdgeFilter;
use crate::error::QueryError;
use crate::graph::Graph;
use crate::types::{Edge, EdgeId, NodeId};

/// Tolerance when comparing confidence products of different paths.
const TIE_EPSILON: f64 = 1e-12;

/// A directed path through the graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphPath {
    /// Node sequence, both endpoints included.
    pub nodes: Vec<NodeId>,
    /// Edge used for each hop.
    pub edges: Vec<EdgeId>,
    /// Product of the edge confidences.
    pub confidence: f64,
}

impl GraphPath {
    pub fn hops(&self) -> usize {
        self.edges.len()
    }
}

/// Shortest directed path from `from` to `to` following edge direction.
///
/// Among paths with the fewest hops the highest confidence product wins,
/// then the lexicographically smallest node sequence. A path whose product
/// falls below `filter.min_confidence` counts as no path.
pub fn shortest_path(
    graph: &Graph,
    from: NodeId,
    to: NodeId,
    filter: &EdgeFilter,
) -> Result<GraphPath, QueryError> {
    for id in [from, to] {
        if !graph.contains_node(id) {
            return Err(QueryError::NodeNotFound(id));
        }
    }
    if from == to {
        return Ok(GraphPath {
            nodes: vec![from],
            edges: Vec::new(),
            confidence: 1.0,
        });
    }
    let no_path = || QueryError::NoPathFound { from, to };

    let distance = hop_distances(graph, from, to, filter);
    let Some(&target_distance) = distance.get(&to) else {
        return Err(no_path());
    };

    // Best path into every node on a shortest route, built layer by layer.
    let mut best: HashMap<NodeId, GraphPath> = HashMap::from([(
        from,
        GraphPath {
            nodes: vec![from],
            edges: Vec::new(),
            confidence: 1.0,
        },
    )]);
    let mut layer = vec![from];
    for depth in 0..target_distance {
        let mut next_layer = Vec::new();
        for &node in &layer {
            let Some(prefix) = best.get(&node).cloned() else {
                continue;
            };
            for (next, edge) in strongest_edges(graph, node, filter) {
                if distance.get(&next) != Some(&(depth + 1)) {
                    continue;
                }
                let mut candidate = prefix.clone();
                candidate.nodes.push(next);
                candidate.edges.push(edge.id);
                candidate.confidence *= edge.confidence;
                match best.get(&next) {
                    None => {
                        next_layer.push(next);
                        best.insert(next, candidate);
                    }
                    Some(current) if better(&candidate, current) => {
                        best.insert(next, candidate);
                    }
                    Some(_) => {}
                }
            }
        }
        layer = next_layer;
    }

    best.remove(&to)
        .filter(|p| p.confidence >= filter.min_confidence)
        .ok_or_else(no_path)
}

fn better(candidate: &GraphPath, current: &GraphPath) -> bool {
    let diff = candidate.confidence - current.confidence;
    if diff.abs() > TIE_EPSILON {
        return diff > 0.0;
    }
    candidate.nodes < current.nodes
}

/// Forward hop counts from `from`, stopping once `to` is settled.
fn hop_distances(
    graph: &Graph,
    from: NodeId,
    to: NodeId,
    filter: &EdgeFilter,
) -> HashMap<NodeId, usize> {
    let mut distance = HashMap::from([(from, 0usize)]);
    let mut queue = VecDeque::from([from]);
    while let Some(node) = queue.pop_front() {
        let d = distance[&node];
        if node == to || filter.max_depth.is_some_and(|max| d >= max) {
            continue;
        }
        if distance.get(&to).is_some_and(|&t| d >= t) {
            break;
        }
        for edge in graph.outgoing(node, filter.kinds.as_ref()) {
            if !distance.contains_key(&edge.target) {
                distance.insert(edge.target, d + 1);
                queue.push_back(edge.target);
            }
        }
    }
    distance
}

/// One edge per successor: the most confident, lowest id on ties.
fn strongest_edges<'g>(
    graph: &'g Graph,
    node: NodeId,
    filter: &'g EdgeFilter,
) -> Vec<(NodeId, &'g Edge)> {
    let mut chosen: HashMap<NodeId, &Edge> = HashMap::new();
    for edge in graph.outgoing(node, filter.kinds.as_ref()) {
        let replace = chosen.get(&edge.target).is_none_or(|c| {
            edge.confidence
                .total_cmp(&c.confidence)
                .then_with(|| c.id.cmp(&edge.id))
                .is_gt()
        });
        if replace {
            chosen.insert(edge.target, edge);
        }
    }
    let mut out: Vec<_> = chosen.into_iter().collect();
    out.sort_by_key(|(id, _)| *id);
    out
}
