use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::graph::{Graph, lookup_keys};
use crate::types::{LookupKey, Node, NodeId};

/// Definitions visible while resolving one file: the file's own
/// definitions layered over the snapshot. Snapshot nodes that only the
/// file's previous version defined are hidden, as are stubs and markers.
pub(crate) struct View<'a> {
    graph: &'a Graph,
    path: &'a str,
    local: &'a BTreeMap<NodeId, Node>,
    local_keys: HashMap<LookupKey, BTreeSet<NodeId>>,
    consulted: BTreeSet<LookupKey>,
}

impl<'a> View<'a> {
    pub(crate) fn new(graph: &'a Graph, path: &'a str, local: &'a BTreeMap<NodeId, Node>) -> Self {
        let mut local_keys: HashMap<LookupKey, BTreeSet<NodeId>> = HashMap::new();
        for node in local.values() {
            for key in lookup_keys(node) {
                local_keys.entry(key).or_default().insert(node.id);
            }
        }
        Self {
            graph,
            path,
            local,
            local_keys,
            consulted: BTreeSet::new(),
        }
    }

    /// A candidate by identity.
    pub(crate) fn node(&self, id: NodeId) -> Option<&'a Node> {
        if let Some(node) = self.local.get(&id) {
            return node.is_concrete().then_some(node);
        }
        self.graph.node(id).filter(|n| self.visible(n))
    }

    /// Every candidate registered under `key`, ordered by id. The key is
    /// recorded as consulted.
    pub(crate) fn lookup(&mut self, key: LookupKey) -> Vec<&'a Node> {
        let mut found: BTreeMap<NodeId, &'a Node> = BTreeMap::new();
        if let Some(ids) = self.local_keys.get(&key) {
            for id in ids {
                if let Some(node) = self.local.get(id) {
                    found.insert(*id, node);
                }
            }
        }
        let graph = self.graph;
        for node in graph.lookup(&key) {
            if !self.local.contains_key(&node.id) && self.visible(node) {
                found.entry(node.id).or_insert(node);
            }
        }
        self.consulted.insert(key);
        found.into_values().collect()
    }

    /// Record a key whose definitions would change this file's resolution
    /// even though it was not scanned.
    pub(crate) fn record(&mut self, key: LookupKey) {
        self.consulted.insert(key);
    }

    pub(crate) fn is_local(&self, id: NodeId) -> bool {
        self.local.contains_key(&id)
    }

    /// Introduction version of a candidate; the file's own definitions
    /// count as the newest.
    pub(crate) fn introduced(&self, id: NodeId) -> u64 {
        if self.is_local(id) {
            u64::MAX
        } else {
            self.graph.introduced(id).unwrap_or(0)
        }
    }

    pub(crate) fn into_consulted(self) -> BTreeSet<LookupKey> {
        self.consulted
    }

    fn visible(&self, node: &Node) -> bool {
        node.is_concrete() && self.graph.definers(node.id).any(|p| p != self.path)
    }
}
