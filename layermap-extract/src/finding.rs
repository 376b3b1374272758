//! Findings: what one extractor learned from one file.
//!
//! A [`FindingSet`] holds candidate definitions and *unresolved* references.
//! References carry symbolic [`Target`] descriptors rather than node ids, so
//! that resolution can use knowledge from every other file.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{ArtifactKind, EdgeKind, LineRange, NodeKind};

/// All findings extracted from one source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingSet {
    /// Normalized path of the source file.
    pub path: String,
    pub artifact: ArtifactKind,
    /// Logical scope of the file: Java package or web directory.
    /// Used to prefer nearby candidates during resolution.
    pub scope: Option<String>,
    pub definitions: Vec<Definition>,
    pub references: Vec<Reference>,
    pub issues: Vec<ParseIssue>,
}

impl FindingSet {
    pub fn new(path: impl Into<String>, artifact: ArtifactKind) -> Self {
        Self {
            path: path.into(),
            artifact,
            scope: None,
            definitions: Vec::new(),
            references: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn define(&mut self, definition: Definition) {
        self.definitions.push(definition);
    }

    pub fn refer(&mut self, reference: Reference) {
        self.references.push(reference);
    }

    pub fn issue(&mut self, line: u32, message: impl Into<String>) {
        self.issues.push(ParseIssue {
            line,
            message: message.into(),
        });
    }

    /// Whether a definition with this kind and signature is already present.
    pub fn defines(&self, kind: NodeKind, signature: &str) -> bool {
        self.definitions
            .iter()
            .any(|d| d.kind == kind && d.signature == signature)
    }

    pub fn definition(&self, signature: &str) -> Option<&Definition> {
        self.definitions.iter().find(|d| d.signature == signature)
    }
}

/// A candidate node produced by an extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    pub kind: NodeKind,
    /// Canonical signature; together with `kind` it determines the node id.
    pub signature: String,
    /// Short display name (method name, class simple name, table name).
    pub name: String,
    /// Signature of the enclosing definition, if any.
    pub owner: Option<String>,
    pub lines: LineRange,
    pub attributes: BTreeMap<String, String>,
}

impl Definition {
    pub fn new(
        kind: NodeKind,
        signature: impl Into<String>,
        name: impl Into<String>,
        lines: LineRange,
    ) -> Self {
        Self {
            kind,
            signature: signature.into(),
            name: name.into(),
            owner: None,
            lines,
            attributes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    #[must_use]
    pub fn with_attr(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }
}

/// An unresolved reference from a local definition to some target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    /// Kind of the local definition the reference originates from.
    pub from_kind: NodeKind,
    /// Signature of the local definition the reference originates from.
    pub from: String,
    pub edge: EdgeKind,
    pub target: Target,
    pub line: u32,
    /// Confidence before resolution weighting, in (0, 1].
    pub confidence: f64,
    /// When set, the resulting edge points from the target back to the
    /// local definition (interface member → implementing member).
    pub inverted: bool,
    pub note: Option<String>,
}

impl Reference {
    pub fn new(
        from_kind: NodeKind,
        from: impl Into<String>,
        edge: EdgeKind,
        target: Target,
        line: u32,
    ) -> Self {
        Self {
            from_kind,
            from: from.into(),
            edge,
            target,
            line,
            confidence: 1.0,
            inverted: false,
            note: None,
        }
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(f64::MIN_POSITIVE, 1.0);
        self
    }

    #[must_use]
    pub fn inverted(mut self) -> Self {
        self.inverted = true;
        self
    }

    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// A type name as written at a use site plus its possible qualified names,
/// most likely first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRef {
    pub name: String,
    pub candidates: Vec<String>,
}

impl TypeRef {
    /// Simple (unqualified) name.
    pub fn simple_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    /// The best qualified guess, falling back to the written name.
    pub fn primary(&self) -> &str {
        self.candidates.first().map_or(&self.name, String::as_str)
    }
}

/// Symbolic description of what a reference points at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Target {
    /// A method on some type. `arity` is unknown for reflective lookups.
    Member {
        owner: Option<TypeRef>,
        member: String,
        arity: Option<usize>,
        kinds: Vec<NodeKind>,
    },
    /// A type (used for `implements` / `extends`).
    Type { type_ref: TypeRef, kinds: Vec<NodeKind> },
    /// A web route, as linked from a page.
    Route {
        path: String,
        method: Option<String>,
    },
    /// Another page by web path.
    Resource { path: String },
    /// A SQL statement by identifier.
    Statement { id: String },
    /// A table by (possibly schema-qualified) name.
    Table { name: String },
    /// A table whose name is only partly static, e.g. `order_${month}`.
    TablePattern { pattern: String },
    /// A column, optionally bound to one table.
    Column {
        table: Option<String>,
        name: String,
        candidates: Vec<String>,
    },
}

impl Target {
    /// The node kind a stub for this target would expect.
    pub fn expected_kind(&self) -> NodeKind {
        match self {
            Self::Member { kinds, .. } | Self::Type { kinds, .. } => kinds
                .first()
                .copied()
                .unwrap_or(NodeKind::StubUnresolved),
            Self::Route { .. } => NodeKind::ControllerMethod,
            Self::Resource { path } => {
                if is_fragment_path(path) {
                    NodeKind::Include
                } else {
                    NodeKind::Page
                }
            }
            Self::Statement { .. } => NodeKind::SqlStatement,
            Self::Table { .. } | Self::TablePattern { .. } => NodeKind::Table,
            Self::Column { .. } => NodeKind::Column,
        }
    }

    /// Human-readable description for evidence and stub attributes.
    pub fn describe(&self) -> String {
        match self {
            Self::Member {
                owner,
                member,
                arity,
                ..
            } => {
                let owner = owner.as_ref().map_or("?", |o| o.name.as_str());
                match arity {
                    Some(n) => format!("{owner}.{member}/{n}"),
                    None => format!("{owner}.{member}"),
                }
            }
            Self::Type { type_ref, .. } => type_ref.name.clone(),
            Self::Route { path, method } => match method {
                Some(m) => format!("{m} {path}"),
                None => path.clone(),
            },
            Self::Resource { path } => path.clone(),
            Self::Statement { id } => id.clone(),
            Self::Table { name } => name.clone(),
            Self::TablePattern { pattern } => pattern.clone(),
            Self::Column { table, name, .. } => match table {
                Some(t) => format!("{t}.{name}"),
                None => name.clone(),
            },
        }
    }
}

/// A problem found while parsing. Becomes a marker node in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseIssue {
    pub line: u32,
    pub message: String,
}

/// Page fragments (`.jspf`, `.inc`, tag files) are modeled as includes.
pub fn is_fragment_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    [".jspf", ".inc", ".tag", ".tagx"]
        .iter()
        .any(|ext| lower.ends_with(ext))
}

/// Canonical form of a URL path used as a route key: query and fragment
/// dropped, a single leading slash, no duplicate or trailing slashes.
pub fn normalize_route(path: &str) -> String {
    let path = path.trim();
    let end = path.find(['?', '#']).unwrap_or(path.len());
    let segments: Vec<&str> = path[..end].split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

/// A route with the extension of its last segment removed, so that
/// `/user/list.do` and `/user/list` share a stem.
pub fn route_stem(route: &str) -> String {
    let route = normalize_route(route);
    match route.rsplit_once('/') {
        Some((dir, last)) => match last.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => format!("{dir}/{stem}"),
            _ => route.clone(),
        },
        None => route.clone(),
    }
}
