use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use layermap_extract::{EdgeKind, LineRange, NodeKind};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::hash;

// ── Typed ID wrappers ──────────────────────────────────────────────

macro_rules! hex_id {
    ($name:ident) => {
        /// 64-bit identity hash, serialized as 16 lowercase hex digits.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{:016x}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                u64::from_str_radix(s.trim(), 16).map(Self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let text = String::deserialize(deserializer)?;
                text.parse().map_err(serde::de::Error::custom)
            }
        }

        impl JsonSchema for $name {
            fn schema_name() -> String {
                stringify!($name).to_string()
            }

            fn json_schema(
                generator: &mut schemars::r#gen::SchemaGenerator,
            ) -> schemars::schema::Schema {
                String::json_schema(generator)
            }
        }
    };
}

hex_id!(NodeId);
hex_id!(EdgeId);

/// Content hash of one version of one source file (path + content).
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct FileKey(pub String);

impl std::fmt::Display for FileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Nodes ──────────────────────────────────────────────────────────

/// Attribute keys the core itself reads or writes.
pub mod attr {
    /// On stubs: the kind of definition the stub stands in for.
    pub const EXPECTED_KIND: &str = "expected_kind";
    /// On stubs: the symbolic reference that produced the stub.
    pub const REFERENCE: &str = "reference";
    /// On parse-problem markers: the problem description.
    pub const ERROR: &str = "error";
    /// Resolution scope of a definition (package or web directory).
    pub const SCOPE: &str = "scope";
    /// Signature of the owning type or table.
    pub const OWNER: &str = "owner";
    /// Comma-separated routes a controller method answers.
    pub const ROUTES: &str = "routes";
    /// Comma-separated HTTP verbs a controller method accepts.
    pub const HTTP_METHODS: &str = "http_methods";
}

/// A typed entity in the application graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    /// File the node was defined in. `None` for stubs.
    pub source_file: Option<String>,
    pub line_range: LineRange,
    /// Canonical signature the id is derived from.
    pub signature: String,
    /// Short display name.
    pub name: String,
    pub attributes: BTreeMap<String, String>,
}

impl Node {
    /// Placeholder for a referenced entity that has not been observed.
    pub fn stub(expected: NodeKind, signature: &str, reference: &str) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert(attr::EXPECTED_KIND.to_string(), expected.as_str().to_string());
        attributes.insert(attr::REFERENCE.to_string(), reference.to_string());
        Self {
            id: hash::node_id(expected, signature),
            kind: NodeKind::StubUnresolved,
            source_file: None,
            line_range: LineRange::default(),
            signature: signature.to_string(),
            name: display_name(signature).to_string(),
            attributes,
        }
    }

    /// Marker recording a parse problem at `path:line`.
    pub fn marker(path: &str, line: u32, message: &str) -> Self {
        let signature = hash::marker_signature(path, line);
        let mut attributes = BTreeMap::new();
        attributes.insert(attr::ERROR.to_string(), message.to_string());
        Self {
            id: hash::marker_id(path, line),
            kind: NodeKind::StubUnresolved,
            source_file: Some(path.to_string()),
            line_range: LineRange::line(line),
            name: signature.clone(),
            signature,
            attributes,
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn is_stub(&self) -> bool {
        self.kind == NodeKind::StubUnresolved
    }

    /// A stub recording a parse problem rather than a missing target.
    pub fn is_marker(&self) -> bool {
        self.is_stub() && self.attributes.contains_key(attr::ERROR)
    }

    /// A real definition: neither a placeholder nor a marker.
    pub fn is_concrete(&self) -> bool {
        !self.is_stub()
    }

    /// For stubs, the kind of the definition that would replace them.
    pub fn expected_kind(&self) -> Option<NodeKind> {
        self.attr(attr::EXPECTED_KIND).and_then(NodeKind::parse)
    }

    /// The id this node must have given its kind and signature.
    pub fn expected_id(&self) -> NodeId {
        let kind = if self.is_stub() {
            self.expected_kind().unwrap_or(NodeKind::StubUnresolved)
        } else {
            self.kind
        };
        hash::node_id(kind, &self.signature)
    }

    /// Resolution scope: the package or web directory of its file.
    pub fn scope(&self) -> Option<&str> {
        self.attr(attr::SCOPE)
    }
}

/// Short name of a signature: the last path segment for paths and routes,
/// the last dotted segment otherwise, ignoring a trailing `/arity`.
pub fn display_name(signature: &str) -> &str {
    let base = match signature.rsplit_once('/') {
        Some((head, tail)) if !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) => head,
        _ => signature,
    };
    let tail = if base.contains('/') {
        base.rsplit('/').next()
    } else {
        base.rsplit('.').next()
    };
    tail.filter(|t| !t.is_empty()).unwrap_or(base)
}

// ── Edges ──────────────────────────────────────────────────────────

/// Where an edge came from.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub struct Evidence {
    pub file: String,
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Every candidate considered, for ambiguous resolutions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,
}

/// A typed dependency: `source` depends on `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    pub kind: EdgeKind,
    /// Certainty of the binding, in (0, 1].
    pub confidence: f64,
    pub evidence: Vec<Evidence>,
}

impl Edge {
    pub fn new(source: NodeId, target: NodeId, kind: EdgeKind, confidence: f64) -> Self {
        Self {
            id: hash::edge_id(source, target, kind),
            source,
            target,
            kind,
            confidence,
            evidence: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence.push(evidence);
        self
    }

    /// Fold a duplicate of this edge in: maximum confidence, union of evidence.
    pub fn merge(&mut self, other: &Edge) {
        debug_assert_eq!(self.id, other.id);
        self.confidence = self.confidence.max(other.confidence);
        self.evidence.extend(other.evidence.iter().cloned());
        self.evidence.sort();
        self.evidence.dedup();
    }
}

// ── Resolution bookkeeping ─────────────────────────────────────────

/// A name the resolver consulted. A file whose diff recorded a key must be
/// re-resolved when a definition carrying that key appears or disappears.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(tag = "key", content = "name", rename_all = "snake_case")]
pub enum LookupKey {
    /// Method name, lower-cased.
    Member(String),
    /// Simple type name, lower-cased.
    Type(String),
    /// Last segment of a statement id, lower-cased.
    Statement(String),
    /// Page file name, lower-cased.
    Page(String),
    /// Route without the extension of its last segment.
    Route(String),
    /// Last route segment without extension; `{}` for a template segment.
    RouteTail(String),
    Table(String),
    /// Column name, lower-cased.
    Column(String),
    /// Every definition of a kind, for scans such as table patterns.
    Kind(NodeKind),
}

/// Everything one file contributes to the graph, produced by the resolver
/// and applied atomically by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GraphDiff {
    pub file_key: FileKey,
    pub path: String,
    /// Definitions and parse-problem markers from this file.
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    /// A stub for every edge endpoint this file does not define. Only
    /// materialized when no file defines the node.
    pub placeholders: Vec<Node>,
    pub lookups: BTreeSet<LookupKey>,
}

impl GraphDiff {
    pub fn new(file_key: FileKey, path: impl Into<String>) -> Self {
        Self {
            file_key,
            path: path.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
            placeholders: Vec::new(),
            lookups: BTreeSet::new(),
        }
    }

    /// The same contribution without edges, placeholders and lookups.
    pub fn definitions_only(&self) -> Self {
        Self {
            file_key: self.file_key.clone(),
            path: self.path.clone(),
            nodes: self.nodes.clone(),
            edges: Vec::new(),
            placeholders: Vec::new(),
            lookups: BTreeSet::new(),
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn placeholder(&self, id: NodeId) -> Option<&Node> {
        self.placeholders.iter().find(|n| n.id == id)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.iter().find(|e| e.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty() && self.placeholders.is_empty()
    }
}

// ── Cancellation ───────────────────────────────────────────────────

/// Cooperative cancellation flag shared between a caller and a batch.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
