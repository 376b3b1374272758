//! Immutable graph snapshots.
//!
//! A [`Graph`] is never mutated once published: the store clones the
//! current snapshot, patches the clone and publishes it as the next version.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use layermap_extract::{EdgeKind, NodeKind, route_stem};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::types::{Edge, EdgeId, FileKey, LookupKey, Node, NodeId, attr, display_name};

/// What one file version contributed, by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Provenance {
    pub path: String,
    pub node_ids: Vec<NodeId>,
    pub edge_ids: Vec<EdgeId>,
    pub placeholder_ids: Vec<NodeId>,
    pub lookups: BTreeSet<LookupKey>,
}

/// Per-edge-kind adjacency: `kind → node → edge ids`.
#[derive(Debug, Clone, Default)]
pub(crate) struct Adjacency {
    by_kind: HashMap<EdgeKind, HashMap<NodeId, BTreeSet<EdgeId>>>,
}

impl Adjacency {
    fn insert(&mut self, kind: EdgeKind, node: NodeId, edge: EdgeId) {
        self.by_kind
            .entry(kind)
            .or_default()
            .entry(node)
            .or_default()
            .insert(edge);
    }

    fn remove(&mut self, kind: EdgeKind, node: NodeId, edge: EdgeId) {
        if let Some(per_node) = self.by_kind.get_mut(&kind) {
            if let Some(edges) = per_node.get_mut(&node) {
                edges.remove(&edge);
                if edges.is_empty() {
                    per_node.remove(&node);
                }
            }
        }
    }

    fn edges(&self, kind: EdgeKind, node: NodeId) -> impl Iterator<Item = EdgeId> + '_ {
        self.by_kind
            .get(&kind)
            .and_then(|per_node| per_node.get(&node))
            .into_iter()
            .flatten()
            .copied()
    }
}

/// Names under which a concrete node can be found by the resolver.
pub fn lookup_keys(node: &Node) -> Vec<LookupKey> {
    if !node.is_concrete() {
        return Vec::new();
    }
    let mut keys = vec![LookupKey::Kind(node.kind)];
    let sig = node.signature.as_str();
    match node.kind {
        NodeKind::Page | NodeKind::Include => {
            keys.push(LookupKey::Page(display_name(sig).to_ascii_lowercase()));
        }
        NodeKind::Controller | NodeKind::Service | NodeKind::MapperInterface => {
            keys.push(LookupKey::Type(simple_type_name(sig).to_ascii_lowercase()));
        }
        NodeKind::ControllerMethod | NodeKind::ServiceMethod | NodeKind::MapperMethod => {
            keys.push(LookupKey::Member(display_name(sig).to_ascii_lowercase()));
            for route in node_routes(node) {
                keys.push(LookupKey::Route(route_stem(&route)));
                keys.push(LookupKey::RouteTail(route_tail(&route)));
            }
        }
        NodeKind::SqlStatement => {
            keys.push(LookupKey::Statement(statement_tail(sig)));
        }
        NodeKind::Table => keys.push(LookupKey::Table(sig.to_ascii_lowercase())),
        NodeKind::Column => {
            let name = sig.rsplit('.').next().unwrap_or(sig);
            keys.push(LookupKey::Column(name.to_ascii_lowercase()));
        }
        NodeKind::StubUnresolved => {}
    }
    keys
}

/// Simple name of a (possibly nested) fully-qualified type name.
pub fn simple_type_name(fqcn: &str) -> &str {
    fqcn.rsplit('.').next().unwrap_or(fqcn)
}

/// Last dotted segment of a statement id, lower-cased.
pub fn statement_tail(id: &str) -> String {
    id.rsplit('.').next().unwrap_or(id).to_ascii_lowercase()
}

/// Last segment of a route stem; template segments collapse to `{}`.
pub fn route_tail(route: &str) -> String {
    let stem = route_stem(route);
    let last = stem.rsplit('/').next().unwrap_or("");
    if last.contains('{') {
        "{}".to_string()
    } else {
        last.to_string()
    }
}

/// Routes a controller method answers, from its `routes` attribute.
pub fn node_routes(node: &Node) -> Vec<String> {
    node.attr(attr::ROUTES)
        .map(|routes| {
            routes
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(layermap_extract::normalize_route)
                .collect()
        })
        .unwrap_or_default()
}

/// One immutable version of the application graph.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub(crate) version: u64,
    pub(crate) nodes: BTreeMap<NodeId, Node>,
    pub(crate) edges: BTreeMap<EdgeId, Edge>,
    forward: Adjacency,
    reverse: Adjacency,
    symbols: HashMap<LookupKey, BTreeSet<NodeId>>,
    /// Paths of the files that define each node concretely.
    pub(crate) definers: HashMap<NodeId, BTreeSet<String>>,
    /// Version at which each concrete node first appeared.
    pub(crate) introduced: HashMap<NodeId, u64>,
    pub(crate) provenance: BTreeMap<FileKey, Provenance>,
    pub(crate) files: BTreeMap<String, FileKey>,
}

impl Graph {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(&id)
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// All nodes, ordered by id.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// All edges, ordered by id.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Edges leaving `id`, restricted to `kinds` when given.
    pub fn outgoing<'a>(
        &'a self,
        id: NodeId,
        kinds: Option<&'a BTreeSet<EdgeKind>>,
    ) -> impl Iterator<Item = &'a Edge> + 'a {
        self.adjacent(&self.forward, id, kinds)
    }

    /// Edges arriving at `id`, restricted to `kinds` when given.
    pub fn incoming<'a>(
        &'a self,
        id: NodeId,
        kinds: Option<&'a BTreeSet<EdgeKind>>,
    ) -> impl Iterator<Item = &'a Edge> + 'a {
        self.adjacent(&self.reverse, id, kinds)
    }

    fn adjacent<'a>(
        &'a self,
        adjacency: &'a Adjacency,
        id: NodeId,
        kinds: Option<&'a BTreeSet<EdgeKind>>,
    ) -> impl Iterator<Item = &'a Edge> + 'a {
        EdgeKind::ALL
            .into_iter()
            .filter(move |k| kinds.is_none_or(|ks| ks.contains(k)))
            .flat_map(move |k| adjacency.edges(k, id))
            .filter_map(|e| self.edges.get(&e))
    }

    /// Concrete nodes registered under a lookup key.
    pub fn lookup(&self, key: &LookupKey) -> impl Iterator<Item = &Node> {
        self.symbols
            .get(key)
            .into_iter()
            .flatten()
            .filter_map(|id| self.nodes.get(id))
    }

    /// Paths of the files that define `id`.
    pub fn definers(&self, id: NodeId) -> impl Iterator<Item = &str> {
        self.definers.get(&id).into_iter().flatten().map(String::as_str)
    }

    /// Version at which a concrete node first appeared.
    pub fn introduced(&self, id: NodeId) -> Option<u64> {
        self.introduced.get(&id).copied()
    }

    /// Current file key of a path.
    pub fn file_key(&self, path: &str) -> Option<&FileKey> {
        self.files.get(path)
    }

    /// Every file with a contribution, by path.
    pub fn files(&self) -> impl Iterator<Item = (&str, &FileKey)> {
        self.files.iter().map(|(p, k)| (p.as_str(), k))
    }

    pub fn provenance(&self) -> impl Iterator<Item = (&FileKey, &Provenance)> {
        self.provenance.iter()
    }

    pub fn provenance_of(&self, key: &FileKey) -> Option<&Provenance> {
        self.provenance.get(key)
    }

    /// Files whose resolution consulted any of `keys`.
    pub fn dependents_of<'a>(
        &'a self,
        keys: &'a BTreeSet<LookupKey>,
    ) -> impl Iterator<Item = &'a Provenance> + 'a {
        self.provenance
            .values()
            .filter(move |p| !p.lookups.is_disjoint(keys))
    }

    /// Same nodes, edges and provenance, ignoring version and recency.
    pub fn same_content(&self, other: &Graph) -> bool {
        self.nodes == other.nodes && self.edges == other.edges && self.provenance == other.provenance
    }

    // ── Mutation (store only) ──────────────────────────────────────

    /// An empty graph published as `version`.
    pub(crate) fn empty_at(version: u64) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    pub(crate) fn put_node(&mut self, node: Node, definers: BTreeSet<String>, version: u64) {
        let id = node.id;
        let was_concrete = self.nodes.get(&id).is_some_and(Node::is_concrete);
        self.unindex(id);
        for key in lookup_keys(&node) {
            self.symbols.entry(key).or_default().insert(id);
        }
        if node.is_concrete() {
            if !was_concrete {
                self.introduced.insert(id, version);
            }
        } else {
            self.introduced.remove(&id);
        }
        if definers.is_empty() {
            self.definers.remove(&id);
        } else {
            self.definers.insert(id, definers);
        }
        self.nodes.insert(id, node);
    }

    pub(crate) fn drop_node(&mut self, id: NodeId) {
        self.unindex(id);
        self.nodes.remove(&id);
        self.definers.remove(&id);
        self.introduced.remove(&id);
    }

    fn unindex(&mut self, id: NodeId) {
        let Some(old) = self.nodes.get(&id) else {
            return;
        };
        for key in lookup_keys(old) {
            if let Some(ids) = self.symbols.get_mut(&key) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.symbols.remove(&key);
                }
            }
        }
    }

    pub(crate) fn put_edge(&mut self, edge: Edge) {
        self.drop_edge(edge.id);
        self.forward.insert(edge.kind, edge.source, edge.id);
        self.reverse.insert(edge.kind, edge.target, edge.id);
        self.edges.insert(edge.id, edge);
    }

    pub(crate) fn drop_edge(&mut self, id: EdgeId) {
        if let Some(old) = self.edges.remove(&id) {
            self.forward.remove(old.kind, old.source, id);
            self.reverse.remove(old.kind, old.target, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use layermap_extract::LineRange;

    use super::*;
    use crate::hash;

    fn node(kind: NodeKind, signature: &str) -> Node {
        Node {
            id: hash::node_id(kind, signature),
            kind,
            source_file: Some("f".into()),
            line_range: LineRange::line(1),
            signature: signature.into(),
            name: display_name(signature).into(),
            attributes: BTreeMap::new(),
        }
    }

    #[test]
    fn keys_cover_each_kind() {
        let mut m = node(NodeKind::ControllerMethod, "com.acme.web.UserController.list/1");
        m.attributes
            .insert(attr::ROUTES.into(), "/user/list.do, /users/{id}".into());
        let keys = lookup_keys(&m);
        assert!(keys.contains(&LookupKey::Member("list".into())));
        assert!(keys.contains(&LookupKey::Route("/user/list".into())));
        assert!(keys.contains(&LookupKey::RouteTail("list".into())));
        assert!(keys.contains(&LookupKey::RouteTail("{}".into())));

        let t = node(NodeKind::Service, "com.acme.service.UserService");
        assert!(lookup_keys(&t).contains(&LookupKey::Type("userservice".into())));
        let c = node(NodeKind::Column, "users.email");
        assert!(lookup_keys(&c).contains(&LookupKey::Column("email".into())));
        let s = node(NodeKind::SqlStatement, "com.acme.UserMapper.findById");
        assert!(lookup_keys(&s).contains(&LookupKey::Statement("findbyid".into())));

        let stub = Node::stub(NodeKind::Table, "users", "users");
        assert!(lookup_keys(&stub).is_empty());
    }

    #[test]
    fn adjacency_tracks_edges_by_kind() {
        let mut g = Graph::default();
        let a = node(NodeKind::ServiceMethod, "A.a/0");
        let b = node(NodeKind::MapperMethod, "B.b/0");
        let (ia, ib) = (a.id, b.id);
        g.put_node(a, BTreeSet::from(["f".to_string()]), 1);
        g.put_node(b, BTreeSet::from(["f".to_string()]), 1);
        g.put_edge(Edge::new(ia, ib, EdgeKind::Invokes, 1.0));
        g.put_edge(Edge::new(ia, ib, EdgeKind::Implements, 0.5));

        assert_eq!(g.outgoing(ia, None).count(), 2);
        let only = BTreeSet::from([EdgeKind::Invokes]);
        assert_eq!(g.outgoing(ia, Some(&only)).count(), 1);
        assert_eq!(g.incoming(ib, None).count(), 2);
        assert_eq!(g.incoming(ia, None).count(), 0);

        g.drop_edge(hash::edge_id(ia, ib, EdgeKind::Invokes));
        assert_eq!(g.outgoing(ia, None).count(), 1);
        assert_eq!(g.lookup(&LookupKey::Member("a".into())).count(), 1);
        assert_eq!(g.introduced(ia), Some(1));

        g.drop_node(ia);
        assert_eq!(g.lookup(&LookupKey::Member("a".into())).count(), 0);
        assert_eq!(g.introduced(ia), None);
    }

    #[test]
    fn empty_graph_carries_its_version() {
        let g = Graph::empty_at(7);
        assert_eq!(g.version(), 7);
        assert_eq!(g.node_count(), 0);
        assert!(g.same_content(&Graph::default()));
    }

    #[test]
    fn route_tails() {
        assert_eq!(route_tail("/user/list.do"), "list");
        assert_eq!(route_tail("/user/{id}"), "{}");
        assert_eq!(route_tail("/"), "");
    }
}
