use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap, VecDeque};

use serde::Serialize;

use super::{Direction, EdgeFilter, neighbors};
use crate::error::QueryError;
use crate::graph::Graph;
use crate::types::NodeId;

/// One node reached by an impact traversal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImpactEntry {
    pub node: NodeId,
    /// Fewest hops from the origin.
    pub distance: usize,
    /// Highest confidence product over the paths considered.
    pub confidence: f64,
}

/// All nodes at one hop distance, ordered by id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImpactLayer {
    pub distance: usize,
    pub nodes: Vec<ImpactEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImpactResult {
    pub origin: NodeId,
    pub direction: Direction,
    pub layers: Vec<ImpactLayer>,
}

impl ImpactResult {
    pub fn entries(&self) -> impl Iterator<Item = &ImpactEntry> {
        self.layers.iter().flat_map(|l| l.nodes.iter())
    }

    pub fn get(&self, id: NodeId) -> Option<&ImpactEntry> {
        self.entries().find(|e| e.node == id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.layers.iter().map(|l| l.nodes.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// Everything reachable from `origin` in `direction`, the origin itself
/// excluded. Forward impact collects dependents, backward impact
/// dependencies.
pub fn impact(
    graph: &Graph,
    origin: NodeId,
    direction: Direction,
    filter: &EdgeFilter,
) -> Result<ImpactResult, QueryError> {
    if !graph.contains_node(origin) {
        return Err(QueryError::NodeNotFound(origin));
    }
    let confidence = match filter.max_depth {
        None => best_confidence(graph, origin, direction, filter),
        Some(depth) => bounded_confidence(graph, origin, direction, filter, depth),
    };
    let distance = hop_distances(graph, origin, direction, filter, &confidence);

    let mut layers: BTreeMap<usize, Vec<ImpactEntry>> = BTreeMap::new();
    for (node, d) in distance {
        if node == origin {
            continue;
        }
        if let Some(&c) = confidence.get(&node) {
            layers.entry(d).or_default().push(ImpactEntry {
                node,
                distance: d,
                confidence: c,
            });
        }
    }
    Ok(ImpactResult {
        origin,
        direction,
        layers: layers
            .into_iter()
            .map(|(distance, mut nodes)| {
                nodes.sort_by_key(|e| e.node);
                ImpactLayer { distance, nodes }
            })
            .collect(),
    })
}

/// Max-heap entry ordered by confidence, then by id for determinism.
#[derive(Debug, PartialEq)]
struct Frontier {
    confidence: f64,
    node: NodeId,
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.confidence
            .total_cmp(&other.confidence)
            .then_with(|| other.node.cmp(&self.node))
    }
}

/// Maximum confidence product over all paths. Confidences never exceed 1,
/// so a best-first search settles each node once.
fn best_confidence(
    graph: &Graph,
    origin: NodeId,
    direction: Direction,
    filter: &EdgeFilter,
) -> HashMap<NodeId, f64> {
    let mut best: HashMap<NodeId, f64> = HashMap::from([(origin, 1.0)]);
    let mut settled = std::collections::HashSet::new();
    let mut heap = BinaryHeap::from([Frontier {
        confidence: 1.0,
        node: origin,
    }]);
    while let Some(Frontier { confidence, node }) = heap.pop() {
        if !settled.insert(node) {
            continue;
        }
        for (next, edge) in neighbors(graph, node, direction, filter) {
            let candidate = confidence * edge.confidence;
            if candidate < filter.min_confidence || settled.contains(&next) {
                continue;
            }
            if best.get(&next).is_none_or(|&c| candidate > c) {
                best.insert(next, candidate);
                heap.push(Frontier {
                    confidence: candidate,
                    node: next,
                });
            }
        }
    }
    best
}

/// Maximum confidence product over paths of at most `depth` edges.
fn bounded_confidence(
    graph: &Graph,
    origin: NodeId,
    direction: Direction,
    filter: &EdgeFilter,
    depth: usize,
) -> HashMap<NodeId, f64> {
    let mut best: HashMap<NodeId, f64> = HashMap::from([(origin, 1.0)]);
    for _ in 0..depth {
        let previous = best.clone();
        let mut changed = false;
        for (&node, &confidence) in &previous {
            for (next, edge) in neighbors(graph, node, direction, filter) {
                let candidate = confidence * edge.confidence;
                if candidate < filter.min_confidence {
                    continue;
                }
                if best.get(&next).is_none_or(|&c| candidate > c) {
                    best.insert(next, candidate);
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
    best
}

/// Breadth-first hop counts through the nodes that survived pruning.
fn hop_distances(
    graph: &Graph,
    origin: NodeId,
    direction: Direction,
    filter: &EdgeFilter,
    included: &HashMap<NodeId, f64>,
) -> HashMap<NodeId, usize> {
    let mut distance = HashMap::from([(origin, 0usize)]);
    let mut queue = VecDeque::from([origin]);
    while let Some(node) = queue.pop_front() {
        let d = distance[&node];
        if filter.max_depth.is_some_and(|max| d >= max) {
            continue;
        }
        for (next, _) in neighbors(graph, node, direction, filter) {
            if included.contains_key(&next) && !distance.contains_key(&next) {
                distance.insert(next, d + 1);
                queue.push_back(next);
            }
        }
    }
    distance
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::query::fixtures::{graph, id};

    #[test]
    fn forward_collects_dependents_by_layer() {
        // 1 → 2 → 3 ; 4 → 3
        let g = graph(&[(1, 2, 1.0), (2, 3, 0.5), (4, 3, 0.8)]);
        let result = impact(&g, id(3), Direction::Forward, &EdgeFilter::default()).unwrap();
        assert_eq!(result.layers.len(), 2);
        assert_eq!(result.layers[0].distance, 1);
        assert_eq!(result.layers[0].nodes.len(), 2);
        let one = result.get(id(1)).unwrap();
        assert_eq!(one.distance, 2);
        assert!((one.confidence - 0.5).abs() < 1e-9);
        assert!(!result.contains(id(3)));

        let back = impact(&g, id(1), Direction::Backward, &EdgeFilter::default()).unwrap();
        assert!(back.contains(id(3)));
        assert!(!back.contains(id(4)));
    }

    #[test]
    fn confidence_is_the_best_product() {
        // 1 → 2 → 4 (0.9 · 0.9) and 1 → 3 → 4 (1.0 · 0.5)
        let g = graph(&[(1, 2, 0.9), (2, 4, 0.9), (1, 3, 1.0), (3, 4, 0.5)]);
        let result = impact(&g, id(1), Direction::Backward, &EdgeFilter::default()).unwrap();
        assert!((result.get(id(4)).unwrap().confidence - 0.81).abs() < 1e-9);
    }

    #[test]
    fn depth_bound_limits_paths_considered() {
        // Short weak path and long strong path to 4.
        let g = graph(&[(1, 4, 0.2), (1, 2, 1.0), (2, 3, 1.0), (3, 4, 1.0)]);
        let bounded = EdgeFilter::default().with_max_depth(1);
        let result = impact(&g, id(1), Direction::Backward, &bounded).unwrap();
        assert_eq!(result.len(), 2);
        assert!((result.get(id(4)).unwrap().confidence - 0.2).abs() < 1e-9);

        let result = impact(&g, id(1), Direction::Backward, &EdgeFilter::default()).unwrap();
        let four = result.get(id(4)).unwrap();
        assert_eq!(four.distance, 1);
        assert!((four.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn min_confidence_prunes_weak_paths() {
        let g = graph(&[(1, 2, 0.5), (2, 3, 0.5)]);
        let filter = EdgeFilter::default().with_min_confidence(0.3);
        let result = impact(&g, id(1), Direction::Backward, &filter).unwrap();
        assert!(result.contains(id(2)));
        assert!(!result.contains(id(3)));
    }

    #[test]
    fn cycles_terminate_and_exclude_the_origin() {
        let g = graph(&[(1, 2, 1.0), (2, 1, 1.0)]);
        let result = impact(&g, id(1), Direction::Both, &EdgeFilter::default()).unwrap();
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn unknown_origin_is_an_error() {
        let g = graph(&[(1, 2, 1.0)]);
        assert_eq!(
            impact(&g, id(9), Direction::Forward, &EdgeFilter::default()),
            Err(QueryError::NodeNotFound(id(9)))
        );
    }

    proptest! {
        #[test]
        fn impact_is_transitive(edges in proptest::collection::vec((0u32..8, 0u32..8), 1..24)) {
            let weighted: Vec<_> = edges.iter().map(|&(a, b)| (a, b, 1.0)).collect();
            let g = graph(&weighted);
            let filter = EdgeFilter::default();
            for &(a, b) in &edges {
                for &(b2, c) in &edges {
                    if b2 != b || a == c {
                        continue;
                    }
                    let forward = impact(&g, id(c), Direction::Forward, &filter).unwrap();
                    prop_assert!(forward.contains(id(a)));
                    let backward = impact(&g, id(a), Direction::Backward, &filter).unwrap();
                    prop_assert!(backward.contains(id(c)));
                }
            }
        }
    }
}
