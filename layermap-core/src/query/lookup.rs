use std::collections::BTreeMap;

use layermap_extract::{EdgeKind, NodeKind};
use serde::Serialize;

use crate::error::QueryError;
use crate::graph::Graph;
use crate::types::Node;

/// Criteria for [`find_nodes`]. Empty criteria match every node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeQuery {
    pub kind: Option<NodeKind>,
    /// Exact signature match.
    pub signature: Option<String>,
    /// Case-insensitive substring of the signature or display name.
    pub text: Option<String>,
    /// Restrict to nodes defined in this file.
    pub source_file: Option<String>,
}

impl NodeQuery {
    #[must_use]
    pub fn kind(mut self, kind: NodeKind) -> Self {
        self.kind = Some(kind);
        self
    }

    #[must_use]
    pub fn signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into().to_lowercase());
        self
    }

    #[must_use]
    pub fn source_file(mut self, path: impl Into<String>) -> Self {
        self.source_file = Some(path.into());
        self
    }

    fn matches(&self, node: &Node) -> bool {
        self.kind.is_none_or(|k| node.kind == k)
            && self.signature.as_deref().is_none_or(|s| node.signature == s)
            && self
                .source_file
                .as_deref()
                .is_none_or(|p| node.source_file.as_deref() == Some(p))
            && self.text.as_deref().is_none_or(|t| {
                node.signature.to_lowercase().contains(t) || node.name.to_lowercase().contains(t)
            })
    }
}

/// Nodes matching `query`, ordered by id.
pub fn find_nodes<'g>(graph: &'g Graph, query: &NodeQuery) -> Vec<&'g Node> {
    graph.nodes().filter(|n| query.matches(n)).collect()
}

pub fn parse_node_kind(name: &str) -> Result<NodeKind, QueryError> {
    NodeKind::parse(name).ok_or_else(|| QueryError::UnknownKind(name.to_string()))
}

pub fn parse_edge_kind(name: &str) -> Result<EdgeKind, QueryError> {
    EdgeKind::parse(name).ok_or_else(|| QueryError::UnknownKind(name.to_string()))
}

/// Counts describing one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphStats {
    pub version: u64,
    pub nodes: usize,
    pub edges: usize,
    pub files: usize,
    /// Unresolved placeholders, parse markers excluded.
    pub stubs: usize,
    pub markers: usize,
    pub nodes_by_kind: BTreeMap<NodeKind, usize>,
    pub edges_by_kind: BTreeMap<EdgeKind, usize>,
    /// Mean edge confidence; zero for an edgeless graph.
    pub mean_confidence: f64,
}

pub fn stats(graph: &Graph) -> GraphStats {
    let mut nodes_by_kind = BTreeMap::new();
    let (mut stubs, mut markers) = (0, 0);
    for node in graph.nodes() {
        *nodes_by_kind.entry(node.kind).or_insert(0) += 1;
        if node.is_marker() {
            markers += 1;
        } else if node.is_stub() {
            stubs += 1;
        }
    }
    let mut edges_by_kind = BTreeMap::new();
    let mut total = 0.0;
    for edge in graph.edges() {
        *edges_by_kind.entry(edge.kind).or_insert(0) += 1;
        total += edge.confidence;
    }
    #[allow(clippy::cast_precision_loss)]
    let mean_confidence = if graph.edge_count() == 0 {
        0.0
    } else {
        total / graph.edge_count() as f64
    };
    GraphStats {
        version: graph.version(),
        nodes: graph.node_count(),
        edges: graph.edge_count(),
        files: graph.files().count(),
        stubs,
        markers,
        nodes_by_kind,
        edges_by_kind,
        mean_confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::fixtures::graph;

    #[test]
    fn finds_by_kind_and_text() {
        let g = graph(&[(1, 2, 1.0), (2, 3, 1.0)]);
        assert_eq!(find_nodes(&g, &NodeQuery::default()).len(), 3);
        let found = find_nodes(&g, &NodeQuery::default().text("M2"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].signature, "S.m2/0");
        assert!(find_nodes(&g, &NodeQuery::default().kind(NodeKind::Table)).is_empty());
        assert_eq!(
            find_nodes(&g, &NodeQuery::default().signature("S.m3/0").source_file("S.java")).len(),
            1
        );
    }

    #[test]
    fn kind_names_parse_case_insensitively() {
        assert_eq!(parse_node_kind("servicemethod"), Ok(NodeKind::ServiceMethod));
        assert_eq!(parse_edge_kind("ReadsTable"), Ok(EdgeKind::ReadsTable));
        assert_eq!(
            parse_node_kind("Widget"),
            Err(QueryError::UnknownKind("Widget".into()))
        );
    }

    #[test]
    fn stats_count_kinds() {
        let g = graph(&[(1, 2, 1.0), (2, 3, 0.5)]);
        let s = stats(&g);
        assert_eq!(s.nodes, 3);
        assert_eq!(s.edges, 2);
        assert_eq!(s.nodes_by_kind.get(&NodeKind::ServiceMethod), Some(&3));
        assert_eq!(s.edges_by_kind.get(&EdgeKind::Invokes), Some(&2));
        assert!((s.mean_confidence - 0.75).abs() < 1e-9);
        assert_eq!(s.stubs, 0);
    }
}
