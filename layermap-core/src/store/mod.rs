//! Versioned graph store.
//!
//! Readers take an `Arc<Graph>` snapshot and keep it for as long as they
//! like; writers serialize on the contribution ledger, derive the next
//! snapshot and publish it with a single pointer swap. A batch is either
//! published whole or not at all.

mod ledger;
mod validate;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{PersistError, StoreError};
use crate::graph::Graph;
use crate::persist::{GraphDocument, ProvenanceEntry, validate_document};
use crate::types::{CancelToken, Edge, GraphDiff, Node};
use ledger::Ledger;

pub use validate::validate_diff;

/// Holds the current graph snapshot and the per-file contributions it was
/// materialized from.
#[derive(Debug)]
pub struct GraphStore {
    current: ArcSwap<Graph>,
    ledger: Mutex<Ledger>,
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Graph::default()),
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> Arc<Graph> {
        self.current.load_full()
    }

    pub fn version(&self) -> u64 {
        self.current.load().version()
    }

    /// Apply one file's contribution.
    pub fn apply_diff(&self, diff: GraphDiff) -> Result<Arc<Graph>, StoreError> {
        self.apply_changes(vec![diff], &[], &CancelToken::new())
    }

    /// Apply several contributions as one version.
    pub fn apply_batch(
        &self,
        diffs: Vec<GraphDiff>,
        cancel: &CancelToken,
    ) -> Result<Arc<Graph>, StoreError> {
        self.apply_changes(diffs, &[], cancel)
    }

    /// Drop everything a path contributed.
    pub fn remove_file(&self, path: &str) -> Result<Arc<Graph>, StoreError> {
        self.apply_changes(Vec::new(), &[path.to_string()], &CancelToken::new())
    }

    /// Replace the contributions of the diffs' paths, drop those of
    /// `removed`, and publish the result as one new version. Re-applying
    /// contributions the store already holds publishes nothing and returns
    /// the current snapshot.
    pub fn apply_changes(
        &self,
        diffs: Vec<GraphDiff>,
        removed: &[String],
        cancel: &CancelToken,
    ) -> Result<Arc<Graph>, StoreError> {
        for diff in &diffs {
            validate_diff(diff)?;
        }
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        let mut ledger = self.ledger.lock();
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let base = self.current.load_full();
        let batch = diffs.len();
        match ledger.commit(&base, diffs, removed) {
            Some(next) => Ok(self.publish(next, batch, removed.len())),
            None => {
                debug!(version = base.version(), "Batch changed nothing");
                Ok(base)
            }
        }
    }

    /// Discard every contribution and build a new version from `diffs`
    /// alone. Nodes that survive keep their original introduction version.
    pub fn full_rebuild(
        &self,
        diffs: Vec<GraphDiff>,
        cancel: &CancelToken,
    ) -> Result<Arc<Graph>, StoreError> {
        for diff in &diffs {
            validate_diff(diff)?;
        }
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        let mut ledger = self.ledger.lock();
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let old = self.current.load_full();
        let mut fresh = Ledger::starting_at(old.version());
        let batch = diffs.len();
        let mut next = fresh.commit(&Graph::default(), diffs, &[]).unwrap_or_else(|| {
            fresh.version += 1;
            Graph::empty_at(fresh.version)
        });
        inherit_introduced(&mut next, &old);
        *ledger = fresh;
        Ok(self.publish(next, batch, 0))
    }

    /// A throwaway graph holding only definitions: the current ones with
    /// `definitions` replacing their paths' contributions and `removed`
    /// gone, or `definitions` alone when `from_scratch`. References are
    /// resolved against it before the real batch is applied.
    pub fn stage(&self, definitions: &[GraphDiff], removed: &[String], from_scratch: bool) -> Graph {
        let ledger = self.ledger.lock();
        let current = self.current.load_full();
        let diffs = definitions.iter().map(GraphDiff::definitions_only).collect();
        if from_scratch {
            let mut fresh = Ledger::starting_at(current.version());
            let mut staged = fresh
                .commit(&Graph::default(), diffs, &[])
                .unwrap_or_default();
            inherit_introduced(&mut staged, &current);
            staged
        } else {
            let mut scratch = ledger.clone();
            scratch
                .commit(&current, diffs, removed)
                .unwrap_or_else(|| (*current).clone())
        }
    }

    /// The persisted form of the current state.
    pub fn document(&self) -> GraphDocument {
        let ledger = self.ledger.lock();
        let graph = self.current.load_full();
        let mut provenance: Vec<ProvenanceEntry> = ledger
            .contributions()
            .map(|diff| {
                let mut node_ids: Vec<_> = diff.nodes.iter().map(|n| n.id).collect();
                node_ids.sort_unstable();
                node_ids.dedup();
                let mut edge_ids: Vec<_> = diff.edges.iter().map(|e| e.id).collect();
                edge_ids.sort_unstable();
                edge_ids.dedup();
                let mut placeholders = diff.placeholders.clone();
                placeholders.sort_by_key(|n| n.id);
                placeholders.dedup_by_key(|n| n.id);
                ProvenanceEntry {
                    file_key: diff.file_key.clone(),
                    path: diff.path.clone(),
                    node_ids,
                    edge_ids,
                    placeholders,
                    lookups: diff.lookups.clone(),
                }
            })
            .collect();
        provenance.sort_by(|a, b| a.path.cmp(&b.path));
        GraphDocument {
            format_version: crate::persist::FORMAT_VERSION,
            version: graph.version(),
            saved_at: None,
            nodes: graph.nodes().cloned().collect(),
            edges: graph.edges().cloned().collect(),
            provenance,
        }
    }

    /// Replace the whole state with a loaded document. The document is
    /// rebuilt into per-file contributions and must materialize back into
    /// exactly its own nodes and edges.
    pub fn restore(&self, doc: &GraphDocument) -> Result<Arc<Graph>, PersistError> {
        validate_document(doc)?;
        let diffs = reconstruct_diffs(doc);

        let mut fresh = Ledger::default();
        let mut next = fresh
            .commit(&Graph::default(), diffs, &[])
            .unwrap_or_default();
        let nodes: BTreeMap<_, _> = doc.nodes.iter().map(|n| (n.id, n.clone())).collect();
        let edges: BTreeMap<_, _> = doc.edges.iter().map(|e| (e.id, e.clone())).collect();
        if next.nodes != nodes {
            return Err(PersistError::Corrupt(
                "provenance does not reproduce the stored nodes".into(),
            ));
        }
        if next.edges != edges {
            return Err(PersistError::Corrupt(
                "provenance does not reproduce the stored edges".into(),
            ));
        }
        next.version = doc.version;
        for introduced in next.introduced.values_mut() {
            *introduced = doc.version;
        }
        fresh.version = doc.version;

        let mut ledger = self.ledger.lock();
        *ledger = fresh;
        let graph = Arc::new(next);
        self.current.store(Arc::clone(&graph));
        info!(
            version = graph.version(),
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "Restored graph"
        );
        Ok(graph)
    }

    fn publish(&self, next: Graph, diffs: usize, removed: usize) -> Arc<Graph> {
        let graph = Arc::new(next);
        self.current.store(Arc::clone(&graph));
        info!(
            version = graph.version(),
            diffs,
            removed,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "Published graph version"
        );
        graph
    }
}

fn inherit_introduced(next: &mut Graph, old: &Graph) {
    let inherited: Vec<_> = next
        .introduced
        .keys()
        .filter_map(|id| old.introduced(*id).map(|v| (*id, v)))
        .collect();
    for (id, version) in inherited {
        next.introduced.insert(id, version);
    }
}

/// Split a document back into the contributions it was materialized from.
/// Each edge keeps the evidence its own file supplied; evidence no owner
/// claims goes to the lexically first owner.
fn reconstruct_diffs(doc: &GraphDocument) -> Vec<GraphDiff> {
    let nodes: HashMap<_, &Node> = doc.nodes.iter().map(|n| (n.id, n)).collect();
    let edges: HashMap<_, &Edge> = doc.edges.iter().map(|e| (e.id, e)).collect();

    let mut owners: HashMap<_, Vec<&str>> = HashMap::new();
    for entry in &doc.provenance {
        for id in &entry.edge_ids {
            owners.entry(*id).or_default().push(entry.path.as_str());
        }
    }
    for paths in owners.values_mut() {
        paths.sort_unstable();
    }

    doc.provenance
        .iter()
        .map(|entry| {
            let mut diff = GraphDiff::new(entry.file_key.clone(), entry.path.clone());
            diff.nodes = entry
                .node_ids
                .iter()
                .filter_map(|id| nodes.get(id).map(|n| (*n).clone()))
                .collect();
            diff.placeholders = entry.placeholders.clone();
            diff.lookups = entry.lookups.clone();
            diff.edges = entry
                .edge_ids
                .iter()
                .filter_map(|id| edges.get(id))
                .map(|edge| {
                    let paths = owners.get(&edge.id).map(Vec::as_slice).unwrap_or_default();
                    let first = paths.first().copied() == Some(entry.path.as_str());
                    let mut own = (*edge).clone();
                    own.evidence.retain(|ev| {
                        ev.file == entry.path || (first && !paths.contains(&ev.file.as_str()))
                    });
                    own
                })
                .collect();
            diff
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use layermap_extract::{EdgeKind, LineRange, NodeKind};

    use super::*;
    use crate::hash;
    use crate::types::{Evidence, NodeId, display_name};

    fn def(kind: NodeKind, signature: &str, path: &str) -> Node {
        Node {
            id: hash::node_id(kind, signature),
            kind,
            source_file: Some(path.into()),
            line_range: LineRange::line(1),
            signature: signature.into(),
            name: display_name(signature).into(),
            attributes: BTreeMap::new(),
        }
    }

    fn evidence(path: &str, line: u32) -> Evidence {
        Evidence {
            file: path.into(),
            line,
            note: None,
            candidates: Vec::new(),
        }
    }

    /// `Svc.find/0` defined in `svc.java`, invoking `Mapper.find/0` which it
    /// does not define.
    fn service_diff(content: &str) -> GraphDiff {
        let path = "svc.java";
        let mut diff = GraphDiff::new(hash::file_key(path, content), path);
        let caller = def(NodeKind::ServiceMethod, "Svc.find/0", path);
        let callee = Node::stub(NodeKind::MapperMethod, "Mapper.find/0", "Mapper.find");
        diff.edges.push(
            Edge::new(caller.id, callee.id, EdgeKind::Invokes, 0.4).with_evidence(evidence(path, 3)),
        );
        diff.nodes.push(caller);
        diff.placeholders.push(callee);
        diff
    }

    fn mapper_diff() -> GraphDiff {
        let path = "mapper.java";
        let mut diff = GraphDiff::new(hash::file_key(path, "m"), path);
        diff.nodes.push(def(NodeKind::MapperMethod, "Mapper.find/0", path));
        diff
    }

    fn callee_id() -> NodeId {
        hash::node_id(NodeKind::MapperMethod, "Mapper.find/0")
    }

    #[test]
    fn reapplying_a_diff_publishes_nothing() {
        let store = GraphStore::new();
        let first = store.apply_diff(service_diff("a")).unwrap();
        assert_eq!(first.version(), 1);
        let again = store.apply_diff(service_diff("a")).unwrap();
        assert_eq!(again.version(), 1);
        assert!(Arc::ptr_eq(&first, &again));
    }

    #[test]
    fn definitions_replace_stubs_in_place() {
        let store = GraphStore::new();
        let before = store.apply_diff(service_diff("a")).unwrap();
        assert!(before.node(callee_id()).unwrap().is_stub());
        let edge_ids: Vec<_> = before.edges().map(|e| e.id).collect();

        let after = store.apply_diff(mapper_diff()).unwrap();
        assert_eq!(after.version(), 2);
        assert_eq!(after.node(callee_id()).unwrap().kind, NodeKind::MapperMethod);
        assert_eq!(after.edges().map(|e| e.id).collect::<Vec<_>>(), edge_ids);
        // The old snapshot is untouched.
        assert!(before.node(callee_id()).unwrap().is_stub());

        let reverted = store.remove_file("mapper.java").unwrap();
        assert!(reverted.node(callee_id()).unwrap().is_stub());
        assert_eq!(reverted.file_key("mapper.java"), None);
    }

    #[test]
    fn replacing_a_file_drops_its_old_contribution() {
        let store = GraphStore::new();
        store.apply_diff(service_diff("a")).unwrap();
        let path = "svc.java";
        let mut diff = GraphDiff::new(hash::file_key(path, "b"), path);
        diff.nodes.push(def(NodeKind::ServiceMethod, "Svc.other/0", path));
        let graph = store.apply_diff(diff).unwrap();
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.edge_count(), 0);
        assert_eq!(graph.file_key(path), Some(&hash::file_key(path, "b")));
    }

    #[test]
    fn invalid_or_cancelled_batches_publish_nothing() {
        let store = GraphStore::new();
        let mut bad = service_diff("a");
        bad.placeholders.clear();
        let err = store
            .apply_batch(vec![mapper_diff(), bad], &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidDiff { .. }));
        assert_eq!(store.version(), 0);

        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            store.apply_batch(vec![mapper_diff()], &cancel),
            Err(StoreError::Cancelled)
        ));
        assert_eq!(store.snapshot().node_count(), 0);
    }

    #[test]
    fn shared_edges_merge_and_survive_one_owner() {
        let store = GraphStore::new();
        let other = {
            let path = "svc2.java";
            let mut diff = service_diff("a");
            diff.path = path.into();
            diff.file_key = hash::file_key(path, "a");
            diff.edges[0].confidence = 0.9;
            diff.edges[0].evidence = vec![evidence(path, 8)];
            diff
        };
        let graph = store
            .apply_batch(vec![service_diff("a"), other], &CancelToken::new())
            .unwrap();
        let edge = graph.edges().next().unwrap();
        assert!((edge.confidence - 0.9).abs() < f64::EPSILON);
        assert_eq!(edge.evidence.len(), 2);

        let graph = store.remove_file("svc2.java").unwrap();
        let edge = graph.edges().next().unwrap();
        assert!((edge.confidence - 0.4).abs() < f64::EPSILON);
        assert_eq!(edge.evidence.len(), 1);
    }

    #[test]
    fn document_restores_into_an_equal_graph() {
        let store = GraphStore::new();
        store
            .apply_batch(vec![service_diff("a"), mapper_diff()], &CancelToken::new())
            .unwrap();
        let doc = store.document();
        assert_eq!(doc.version, 1);

        let restored = GraphStore::new();
        let graph = restored.restore(&doc).unwrap();
        assert_eq!(graph.version(), 1);
        assert!(graph.same_content(&store.snapshot()));
        assert_eq!(restored.document(), doc);

        // Incremental updates keep working after a restore.
        let graph = restored.remove_file("mapper.java").unwrap();
        assert_eq!(graph.version(), 2);
        assert!(graph.node(callee_id()).unwrap().is_stub());
    }

    #[test]
    fn restore_rejects_inconsistent_provenance() {
        let store = GraphStore::new();
        store.apply_diff(service_diff("a")).unwrap();
        let mut doc = store.document();
        doc.edges[0].confidence = 0.2;
        doc.provenance[0].edge_ids.clear();
        assert!(matches!(
            GraphStore::new().restore(&doc),
            Err(PersistError::Corrupt(_))
        ));
    }

    #[test]
    fn full_rebuild_bumps_version_and_keeps_recency() {
        let store = GraphStore::new();
        store.apply_diff(mapper_diff()).unwrap();
        store.apply_diff(service_diff("a")).unwrap();
        let graph = store
            .full_rebuild(vec![service_diff("a"), mapper_diff()], &CancelToken::new())
            .unwrap();
        assert_eq!(graph.version(), 3);
        assert_eq!(graph.introduced(callee_id()), Some(1));

        let empty = store.full_rebuild(Vec::new(), &CancelToken::new()).unwrap();
        assert_eq!(empty.version(), 4);
        assert_eq!(empty.node_count(), 0);
        assert_eq!(store.apply_diff(mapper_diff()).unwrap().version(), 5);
    }

    #[test]
    fn staging_sees_new_definitions_only() {
        let store = GraphStore::new();
        store.apply_diff(service_diff("a")).unwrap();
        let staged = store.stage(&[mapper_diff()], &[], false);
        assert_eq!(staged.node(callee_id()).unwrap().kind, NodeKind::MapperMethod);
        assert!(staged.introduced(callee_id()) > staged.introduced(service_diff("a").nodes[0].id));
        assert_eq!(store.version(), 1);

        let scratch = store.stage(&[mapper_diff()], &[], true);
        assert_eq!(scratch.node_count(), 1);
        assert_eq!(scratch.edge_count(), 0);
    }
}
