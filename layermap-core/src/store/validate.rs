use std::collections::HashSet;

use crate::error::StoreError;
use crate::hash;
use crate::types::GraphDiff;

/// Check that applying `diff` cannot break a graph invariant: ids match
/// signatures, every edge endpoint is carried by the diff, confidences lie
/// in (0, 1].
pub fn validate_diff(diff: &GraphDiff) -> Result<(), StoreError> {
    let invalid = |reason: String| StoreError::InvalidDiff {
        path: diff.path.clone(),
        reason,
    };
    if diff.path.is_empty() {
        return Err(invalid("empty path".into()));
    }

    let mut carried = HashSet::new();
    for node in &diff.nodes {
        if node.id != node.expected_id() {
            return Err(invalid(format!(
                "node {} does not match signature {:?}",
                node.id, node.signature
            )));
        }
        carried.insert(node.id);
    }
    for node in &diff.placeholders {
        if !node.is_stub() {
            return Err(invalid(format!("placeholder {} is not a stub", node.id)));
        }
        if node.id != node.expected_id() {
            return Err(invalid(format!(
                "placeholder {} does not match signature {:?}",
                node.id, node.signature
            )));
        }
        carried.insert(node.id);
    }

    for edge in &diff.edges {
        if edge.id != hash::edge_id(edge.source, edge.target, edge.kind) {
            return Err(invalid(format!("edge {} does not match its endpoints", edge.id)));
        }
        if !(edge.confidence > 0.0 && edge.confidence <= 1.0) {
            return Err(invalid(format!(
                "edge {} has confidence {} outside (0, 1]",
                edge.id, edge.confidence
            )));
        }
        for end in [edge.source, edge.target] {
            if !carried.contains(&end) {
                return Err(invalid(format!("edge {} dangles at {end}", edge.id)));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use layermap_extract::{EdgeKind, LineRange, NodeKind};

    use super::*;
    use crate::types::{Edge, FileKey, Node};

    fn table(name: &str) -> Node {
        Node {
            id: hash::node_id(NodeKind::Table, name),
            kind: NodeKind::Table,
            source_file: Some("schema.sql".into()),
            line_range: LineRange::line(1),
            signature: name.into(),
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }

    fn diff() -> GraphDiff {
        GraphDiff::new(FileKey("k".into()), "schema.sql")
    }

    #[test]
    fn accepts_carried_endpoints() {
        let mut d = diff();
        let a = table("a");
        let b = Node::stub(NodeKind::Table, "b", "b");
        d.edges.push(Edge::new(a.id, b.id, EdgeKind::ReadsTable, 0.4));
        d.nodes.push(a);
        d.placeholders.push(b);
        validate_diff(&d).unwrap();
    }

    #[test]
    fn rejects_dangling_edges() {
        let mut d = diff();
        let a = table("a");
        d.edges.push(Edge::new(a.id, hash::node_id(NodeKind::Table, "b"), EdgeKind::ReadsTable, 1.0));
        d.nodes.push(a);
        let err = validate_diff(&d).unwrap_err();
        assert!(err.to_string().contains("dangles"), "{err}");
    }

    #[test]
    fn rejects_bad_ids_and_confidences() {
        let mut d = diff();
        let mut a = table("a");
        a.signature = "other".into();
        d.nodes.push(a);
        assert!(validate_diff(&d).is_err());

        let mut d = diff();
        let a = table("a");
        d.edges.push(Edge::new(a.id, a.id, EdgeKind::ReadsTable, 0.0));
        d.nodes.push(a);
        assert!(validate_diff(&d).is_err());

        let mut d = diff();
        d.placeholders.push(table("a"));
        assert!(validate_diff(&d).is_err());
    }
}
