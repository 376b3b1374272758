// Contribution ledger: which file version contributed which node, edge and
// placeholder, and how overlapping contributions materialize.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tracing::warn;

use crate::graph::{Graph, Provenance};
use crate::types::{Edge, EdgeId, FileKey, GraphDiff, Node, NodeId};

type Owners = BTreeMap<String, FileKey>;

#[derive(Debug, Default, Clone)]
pub(crate) struct Ledger {
    contributions: BTreeMap<FileKey, Arc<GraphDiff>>,
    paths: BTreeMap<String, FileKey>,
    node_definers: HashMap<NodeId, Owners>,
    placeholder_owners: HashMap<NodeId, Owners>,
    edge_owners: HashMap<EdgeId, Owners>,
    pub(crate) version: u64,
}

impl Ledger {
    pub(crate) fn starting_at(version: u64) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    pub(crate) fn contributions(&self) -> impl Iterator<Item = &Arc<GraphDiff>> {
        self.contributions.values()
    }

    pub(crate) fn contribution_for(&self, path: &str) -> Option<&Arc<GraphDiff>> {
        self.paths.get(path).and_then(|k| self.contributions.get(k))
    }

    /// Replace the contributions of the diffs' paths and drop those of
    /// `removed`, then derive the next snapshot from `base`. `None` when
    /// nothing changed.
    pub(crate) fn commit(
        &mut self,
        base: &Graph,
        diffs: Vec<GraphDiff>,
        removed: &[String],
    ) -> Option<Graph> {
        let mut touched_nodes = BTreeSet::new();
        let mut touched_edges = BTreeSet::new();
        let mut dropped_keys = Vec::new();
        let mut added_keys = Vec::new();

        for path in removed {
            if let Some(old) = self.detach(path) {
                touch(&old, &mut touched_nodes, &mut touched_edges);
                dropped_keys.push(old.file_key.clone());
            }
        }
        for diff in diffs {
            if self
                .contribution_for(&diff.path)
                .is_some_and(|old| **old == diff)
            {
                continue;
            }
            if let Some(old) = self.detach(&diff.path) {
                touch(&old, &mut touched_nodes, &mut touched_edges);
                dropped_keys.push(old.file_key.clone());
            }
            touch(&diff, &mut touched_nodes, &mut touched_edges);
            added_keys.push(diff.file_key.clone());
            self.attach(Arc::new(diff));
        }
        if dropped_keys.is_empty() && added_keys.is_empty() {
            return None;
        }

        self.version += 1;
        let mut next = base.clone();
        next.version = self.version;

        for id in touched_nodes {
            match self.materialize_node(id) {
                Some(node) => {
                    let definers = self
                        .node_definers
                        .get(&id)
                        .map(|owners| owners.keys().cloned().collect())
                        .unwrap_or_default();
                    next.put_node(node, definers, self.version);
                }
                None => next.drop_node(id),
            }
        }
        for id in touched_edges {
            match self.materialize_edge(id) {
                Some(edge) => next.put_edge(edge),
                None => next.drop_edge(id),
            }
        }

        for key in &dropped_keys {
            if let Some(old) = next.provenance.remove(key) {
                if next.files.get(&old.path) == Some(key) {
                    next.files.remove(&old.path);
                }
            }
        }
        for key in &added_keys {
            if let Some(diff) = self.contributions.get(key) {
                next.files.insert(diff.path.clone(), key.clone());
                next.provenance.insert(key.clone(), provenance_of(diff));
            }
        }
        Some(next)
    }

    fn attach(&mut self, diff: Arc<GraphDiff>) {
        let key = diff.file_key.clone();
        let path = diff.path.clone();
        for node in &diff.nodes {
            owners(&mut self.node_definers, node.id).insert(path.clone(), key.clone());
        }
        for node in &diff.placeholders {
            owners(&mut self.placeholder_owners, node.id).insert(path.clone(), key.clone());
        }
        for edge in &diff.edges {
            owners(&mut self.edge_owners, edge.id).insert(path.clone(), key.clone());
        }
        self.paths.insert(path, key.clone());
        self.contributions.insert(key, diff);
    }

    fn detach(&mut self, path: &str) -> Option<Arc<GraphDiff>> {
        let key = self.paths.remove(path)?;
        let diff = self.contributions.remove(&key)?;
        for node in &diff.nodes {
            disown(&mut self.node_definers, node.id, path);
        }
        for node in &diff.placeholders {
            disown(&mut self.placeholder_owners, node.id, path);
        }
        for edge in &diff.edges {
            disown(&mut self.edge_owners, edge.id, path);
        }
        Some(diff)
    }

    /// A concrete contribution wins over placeholders; among several, the
    /// one from the lexically smallest path.
    fn materialize_node(&self, id: NodeId) -> Option<Node> {
        if let Some(definers) = self.node_definers.get(&id) {
            let mut found = definers
                .values()
                .filter_map(|key| self.contributions.get(key))
                .filter_map(|diff| diff.node(id));
            if let Some(chosen) = found.next() {
                for other in found {
                    if other.kind != chosen.kind {
                        warn!(
                            signature = %chosen.signature,
                            kept = %chosen.kind,
                            ignored = %other.kind,
                            "Conflicting kinds for one node identity"
                        );
                    }
                }
                return Some(chosen.clone());
            }
        }
        self.placeholder_owners
            .get(&id)?
            .values()
            .filter_map(|key| self.contributions.get(key))
            .find_map(|diff| diff.placeholder(id))
            .cloned()
    }

    fn materialize_edge(&self, id: EdgeId) -> Option<Edge> {
        let mut parts = self
            .edge_owners
            .get(&id)?
            .values()
            .filter_map(|key| self.contributions.get(key))
            .filter_map(|diff| diff.edge(id));
        let mut merged = parts.next()?.clone();
        for part in parts {
            merged.merge(part);
        }
        merged.evidence.sort();
        merged.evidence.dedup();
        Some(merged)
    }
}

fn owners<K: std::hash::Hash + Eq>(map: &mut HashMap<K, Owners>, id: K) -> &mut Owners {
    map.entry(id).or_default()
}

fn disown<K: std::hash::Hash + Eq>(map: &mut HashMap<K, Owners>, id: K, path: &str) {
    if let Some(owners) = map.get_mut(&id) {
        owners.remove(path);
        if owners.is_empty() {
            map.remove(&id);
        }
    }
}

fn touch(diff: &GraphDiff, nodes: &mut BTreeSet<NodeId>, edges: &mut BTreeSet<EdgeId>) {
    nodes.extend(diff.nodes.iter().map(|n| n.id));
    nodes.extend(diff.placeholders.iter().map(|n| n.id));
    edges.extend(diff.edges.iter().map(|e| e.id));
}

fn provenance_of(diff: &GraphDiff) -> Provenance {
    let sorted_nodes = |nodes: &[Node]| {
        let mut ids: Vec<NodeId> = nodes.iter().map(|n| n.id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    };
    let mut edge_ids: Vec<EdgeId> = diff.edges.iter().map(|e| e.id).collect();
    edge_ids.sort_unstable();
    edge_ids.dedup();
    Provenance {
        path: diff.path.clone(),
        node_ids: sorted_nodes(&diff.nodes),
        edge_ids,
        placeholder_ids: sorted_nodes(&diff.placeholders),
        lookups: diff.lookups.clone(),
    }
}
