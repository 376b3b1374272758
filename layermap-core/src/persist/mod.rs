//! Persisted graph format and storage backends.
//!
//! [`GraphDocument`] is the compatibility contract: field names, enum
//! spellings and id encoding are stable across releases, and
//! [`document_schema`] publishes them as JSON Schema.

pub mod json;
pub mod schema;
pub mod sqlite;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::{PersistFormat, PersistenceSection};
use crate::error::PersistError;
use crate::hash;
use crate::types::{Edge, EdgeId, FileKey, LookupKey, Node, NodeId};

pub use json::JsonFile;
pub use sqlite::SqliteFile;

/// Version of the persisted layout written by this build.
pub const FORMAT_VERSION: u32 = 1;

/// Full graph state: materialized nodes and edges plus the per-file
/// provenance needed to keep updating incrementally after a load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GraphDocument {
    pub format_version: u32,
    /// Store version the document was taken at.
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub saved_at: Option<DateTime<Utc>>,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub provenance: Vec<ProvenanceEntry>,
}

/// What one file version contributed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProvenanceEntry {
    pub file_key: FileKey,
    pub path: String,
    pub node_ids: Vec<NodeId>,
    pub edge_ids: Vec<EdgeId>,
    /// Stubs the file carries for targets it does not define.
    pub placeholders: Vec<Node>,
    pub lookups: BTreeSet<LookupKey>,
}

impl GraphDocument {
    pub fn empty() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            version: 0,
            saved_at: None,
            nodes: Vec::new(),
            edges: Vec::new(),
            provenance: Vec::new(),
        }
    }

    /// Stamp the save time.
    #[must_use]
    pub fn stamped(mut self) -> Self {
        self.saved_at = Some(Utc::now());
        self
    }
}

/// JSON Schema of [`GraphDocument`].
pub fn document_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(GraphDocument)
}

/// A place a graph document can be saved to and loaded from.
pub trait GraphPersistence: Send + Sync + std::fmt::Debug {
    /// Replace whatever was stored with `doc`, atomically.
    fn save(&self, doc: &GraphDocument) -> Result<(), PersistError>;

    /// Read and validate the stored document.
    fn load(&self) -> Result<GraphDocument, PersistError>;

    /// Whether anything has been saved yet.
    fn exists(&self) -> bool;
}

/// Open the backend configured for a project rooted at `root`.
pub fn open_backend(root: &Path, section: &PersistenceSection) -> Box<dyn GraphPersistence> {
    let path = root.join(&section.path);
    match section.format {
        PersistFormat::Json => Box::new(JsonFile::new(path)),
        PersistFormat::Sqlite => Box::new(SqliteFile::new(path)),
    }
}

/// Check every structural invariant of a loaded document.
pub fn validate_document(doc: &GraphDocument) -> Result<(), PersistError> {
    if doc.format_version != FORMAT_VERSION {
        return Err(PersistError::UnsupportedVersion {
            found: doc.format_version,
            expected: FORMAT_VERSION,
        });
    }
    let corrupt = |msg: String| Err(PersistError::Corrupt(msg));

    let mut nodes = HashMap::new();
    for node in &doc.nodes {
        if node.id != node.expected_id() {
            return corrupt(format!(
                "node {} does not match its signature {:?}",
                node.id, node.signature
            ));
        }
        if nodes.insert(node.id, node).is_some() {
            return corrupt(format!("duplicate node {}", node.id));
        }
    }

    let mut edges = HashSet::new();
    for edge in &doc.edges {
        if edge.id != hash::edge_id(edge.source, edge.target, edge.kind) {
            return corrupt(format!("edge {} does not match its endpoints", edge.id));
        }
        if !edges.insert(edge.id) {
            return corrupt(format!("duplicate edge {}", edge.id));
        }
        if !(edge.confidence > 0.0 && edge.confidence <= 1.0) {
            return corrupt(format!(
                "edge {} has confidence {} outside (0, 1]",
                edge.id, edge.confidence
            ));
        }
        for end in [edge.source, edge.target] {
            if !nodes.contains_key(&end) {
                return corrupt(format!("edge {} dangles at {end}", edge.id));
            }
        }
    }

    let mut covered_nodes = HashSet::new();
    let mut covered_edges = HashSet::new();
    let mut keys = HashSet::new();
    let mut paths = HashSet::new();
    for entry in &doc.provenance {
        if !keys.insert(&entry.file_key) || !paths.insert(&entry.path) {
            return corrupt(format!("duplicate provenance for {}", entry.path));
        }
        for id in &entry.node_ids {
            if !nodes.contains_key(id) {
                return corrupt(format!("{} claims missing node {id}", entry.path));
            }
            covered_nodes.insert(*id);
        }
        for id in &entry.edge_ids {
            if !edges.contains(id) {
                return corrupt(format!("{} claims missing edge {id}", entry.path));
            }
            covered_edges.insert(*id);
        }
        for stub in &entry.placeholders {
            if !stub.is_stub() || stub.id != stub.expected_id() {
                return corrupt(format!("{} carries an invalid placeholder {}", entry.path, stub.id));
            }
            if !nodes.contains_key(&stub.id) {
                return corrupt(format!("{} carries placeholder {} for no node", entry.path, stub.id));
            }
            covered_nodes.insert(stub.id);
        }
    }
    if let Some(orphan) = doc.nodes.iter().find(|n| !covered_nodes.contains(&n.id)) {
        return corrupt(format!("node {} has no provenance", orphan.id));
    }
    if let Some(orphan) = doc.edges.iter().find(|e| !covered_edges.contains(&e.id)) {
        return corrupt(format!("edge {} has no provenance", orphan.id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_names_the_contract_fields() {
        let schema = serde_json::to_value(document_schema()).unwrap();
        let props = &schema["properties"];
        for field in ["format_version", "version", "nodes", "edges", "provenance"] {
            assert!(props.get(field).is_some(), "missing {field}");
        }
    }

    #[test]
    fn empty_document_is_valid() {
        validate_document(&GraphDocument::empty()).unwrap();
    }

    #[test]
    fn rejects_future_versions() {
        let mut doc = GraphDocument::empty();
        doc.format_version = 99;
        assert!(matches!(
            validate_document(&doc),
            Err(PersistError::UnsupportedVersion { found: 99, .. })
        ));
    }

    #[test]
    fn rejects_nodes_without_provenance() {
        let mut doc = GraphDocument::empty();
        doc.nodes.push(Node::stub(layermap_extract::NodeKind::Table, "users", "users"));
        assert!(matches!(validate_document(&doc), Err(PersistError::Corrupt(_))));
    }
}
