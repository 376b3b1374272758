use std::collections::{BTreeSet, HashMap};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;
use tracing::debug;

use super::EdgeFilter;
use crate::config::QuerySection;
use crate::graph::Graph;
use crate::types::NodeId;

/// Bounds on cycle enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleLimits {
    /// Longest cycle reported, in nodes.
    pub max_length: usize,
    /// Enumeration stops after this many cycles.
    pub max_cycles: usize,
}

impl Default for CycleLimits {
    fn default() -> Self {
        Self::from_config(&QuerySection::default())
    }
}

impl CycleLimits {
    pub fn from_config(section: &QuerySection) -> Self {
        Self {
            max_length: section.max_cycle_length,
            max_cycles: section.max_cycles,
        }
    }
}

/// One elementary cycle, rotated to start at its smallest node id. The
/// closing edge back to the first node is implied.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Cycle {
    pub nodes: Vec<NodeId>,
}

impl Cycle {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains(&id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CycleReport {
    /// Cycles in lexicographic order of their node sequences.
    pub cycles: Vec<Cycle>,
    /// Whether `max_cycles` cut enumeration short.
    pub truncated: bool,
}

// ── In-memory graph ────────────────────────────────────────────────

/// A petgraph `DiGraph` over the edges admitted by a filter, with
/// `NodeId` ↔ `NodeIndex` mapping.
struct FilteredGraph {
    graph: DiGraph<NodeId, ()>,
    node_to_index: HashMap<NodeId, NodeIndex>,
}

impl FilteredGraph {
    fn build(source: &Graph, filter: &EdgeFilter) -> Self {
        let mut graph = DiGraph::<NodeId, ()>::new();
        let mut node_to_index: HashMap<NodeId, NodeIndex> = HashMap::new();
        for edge in source.edges() {
            if filter.kinds.as_ref().is_some_and(|k| !k.contains(&edge.kind))
                || edge.confidence < filter.min_confidence
            {
                continue;
            }
            let mut index = |id: NodeId| *node_to_index.entry(id).or_insert_with(|| graph.add_node(id));
            let (src, tgt) = (index(edge.source), index(edge.target));
            graph.update_edge(src, tgt, ());
        }
        Self {
            graph,
            node_to_index,
        }
    }

    /// Successors of `id` restricted to `component`, ordered by id.
    fn successors(&self, id: NodeId, component: &BTreeSet<NodeId>) -> Vec<NodeId> {
        let Some(&index) = self.node_to_index.get(&id) else {
            return Vec::new();
        };
        let next: BTreeSet<NodeId> = self
            .graph
            .neighbors(index)
            .map(|n| self.graph[n])
            .filter(|n| component.contains(n))
            .collect();
        next.into_iter().collect()
    }
}

/// Elementary directed cycles, found per strongly connected component.
///
/// Each cycle is enumerated once, from its smallest node. A node with an
/// edge to itself is a cycle of length one.
pub fn find_cycles(graph: &Graph, filter: &EdgeFilter, limits: CycleLimits) -> CycleReport {
    let filtered = FilteredGraph::build(graph, filter);
    let mut components: Vec<BTreeSet<NodeId>> = tarjan_scc(&filtered.graph)
        .into_iter()
        .map(|c| c.into_iter().map(|i| filtered.graph[i]).collect::<BTreeSet<_>>())
        .filter(|c| {
            c.len() > 1
                || c.iter()
                    .next()
                    .is_some_and(|&n| filtered.successors(n, c).contains(&n))
        })
        .collect();
    components.sort();

    let mut search = Search {
        graph: &filtered,
        limits,
        found: Vec::new(),
        truncated: false,
    };
    for component in &components {
        for &start in component {
            if search.truncated {
                break;
            }
            let mut path = vec![start];
            search.extend(start, component, &mut path);
        }
    }

    let mut cycles = search.found;
    cycles.sort();
    debug!(
        components = components.len(),
        cycles = cycles.len(),
        truncated = search.truncated,
        "Cycle search finished"
    );
    CycleReport {
        cycles,
        truncated: search.truncated,
    }
}

struct Search<'g> {
    graph: &'g FilteredGraph,
    limits: CycleLimits,
    found: Vec<Cycle>,
    truncated: bool,
}

impl Search<'_> {
    /// Depth-first extension of `path`, visiting only nodes larger than
    /// `start` so every cycle is reported from its minimum.
    fn extend(&mut self, start: NodeId, component: &BTreeSet<NodeId>, path: &mut Vec<NodeId>) {
        let Some(&last) = path.last() else {
            return;
        };
        for next in self.graph.successors(last, component) {
            if self.truncated {
                return;
            }
            if next == start {
                if self.found.len() >= self.limits.max_cycles {
                    self.truncated = true;
                    return;
                }
                self.found.push(Cycle {
                    nodes: path.clone(),
                });
            } else if next > start && path.len() < self.limits.max_length && !path.contains(&next) {
                path.push(next);
                self.extend(start, component, path);
                path.pop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::fixtures::{graph, id};

    #[test]
    fn two_node_cycle_is_found_once() {
        let g = graph(&[(1, 2, 1.0), (2, 1, 1.0), (2, 3, 1.0)]);
        let report = find_cycles(&g, &EdgeFilter::default(), CycleLimits::default());
        assert_eq!(report.cycles.len(), 1);
        let cycle = &report.cycles[0];
        assert_eq!(cycle.len(), 2);
        assert_eq!(cycle.nodes[0], id(1).min(id(2)));
        assert!(!cycle.contains(id(3)));
        assert!(!report.truncated);
    }

    #[test]
    fn acyclic_graph_has_no_cycles() {
        let g = graph(&[(1, 2, 1.0), (2, 3, 1.0), (1, 3, 1.0)]);
        let report = find_cycles(&g, &EdgeFilter::default(), CycleLimits::default());
        assert!(report.cycles.is_empty());
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let g = graph(&[(1, 1, 1.0), (1, 2, 1.0)]);
        let report = find_cycles(&g, &EdgeFilter::default(), CycleLimits::default());
        assert_eq!(report.cycles, vec![Cycle { nodes: vec![id(1)] }]);
    }

    #[test]
    fn overlapping_cycles_are_enumerated() {
        // 1 → 2 → 3 → 1 and 1 → 3 → 1
        let g = graph(&[(1, 2, 1.0), (2, 3, 1.0), (3, 1, 1.0), (1, 3, 1.0)]);
        let report = find_cycles(&g, &EdgeFilter::default(), CycleLimits::default());
        assert_eq!(report.cycles.len(), 2);
        let mut lengths: Vec<_> = report.cycles.iter().map(Cycle::len).collect();
        lengths.sort_unstable();
        assert_eq!(lengths, vec![2, 3]);
    }

    #[test]
    fn limits_bound_length_and_count() {
        let g = graph(&[(1, 2, 1.0), (2, 3, 1.0), (3, 1, 1.0), (1, 3, 1.0)]);
        let short = CycleLimits {
            max_length: 2,
            max_cycles: 10,
        };
        assert_eq!(find_cycles(&g, &EdgeFilter::default(), short).cycles.len(), 1);

        let few = CycleLimits {
            max_length: 8,
            max_cycles: 1,
        };
        let report = find_cycles(&g, &EdgeFilter::default(), few);
        assert_eq!(report.cycles.len(), 1);
        assert!(report.truncated);
    }

    #[test]
    fn weak_edges_can_be_excluded() {
        let g = graph(&[(1, 2, 1.0), (2, 1, 0.2)]);
        let filter = EdgeFilter::default().with_min_confidence(0.5);
        assert!(find_cycles(&g, &filter, CycleLimits::default()).cycles.is_empty());
    }
}
