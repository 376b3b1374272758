pub mod extractors;
pub mod finding;
pub mod java;
pub mod markup;
pub mod sql;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use extractors::{ExtractOptions, Extractor, ExtractorRegistry};
pub use finding::{
    Definition, FindingSet, ParseIssue, Reference, Target, TypeRef, normalize_route, route_stem,
};

/// Error type for the extraction layer.
///
/// Extractors themselves never fail on malformed input; these errors cover
/// the few places where a caller hands us something structurally unusable
/// (e.g. schema rows that are not valid JSON).
#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    #[error("Tree-sitter error: {0}")]
    TreeSitter(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ExtractError>;

// ── Node kinds ─────────────────────────────────────────────────────

/// Every entity in the layered application graph.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum NodeKind {
    /// A page template (JSP, HTML).
    Page,
    /// A page fragment that only exists to be included by other pages.
    Include,
    /// A web controller class.
    Controller,
    /// A request-handling method on a controller.
    ControllerMethod,
    /// A service class or service interface.
    Service,
    /// A method on a service.
    ServiceMethod,
    /// A data-access mapper (interface or DAO class).
    MapperInterface,
    /// A mapper method bound to a statement identifier.
    MapperMethod,
    /// One SQL statement.
    SqlStatement,
    /// A database table.
    Table,
    /// A column of a database table.
    Column,
    /// Placeholder for a referenced entity that has not been observed yet,
    /// or a marker for a parse problem.
    StubUnresolved,
}

impl NodeKind {
    pub const ALL: [Self; 12] = [
        Self::Page,
        Self::Include,
        Self::Controller,
        Self::ControllerMethod,
        Self::Service,
        Self::ServiceMethod,
        Self::MapperInterface,
        Self::MapperMethod,
        Self::SqlStatement,
        Self::Table,
        Self::Column,
        Self::StubUnresolved,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Page => "Page",
            Self::Include => "Include",
            Self::Controller => "Controller",
            Self::ControllerMethod => "ControllerMethod",
            Self::Service => "Service",
            Self::ServiceMethod => "ServiceMethod",
            Self::MapperInterface => "MapperInterface",
            Self::MapperMethod => "MapperMethod",
            Self::SqlStatement => "SqlStatement",
            Self::Table => "Table",
            Self::Column => "Column",
            Self::StubUnresolved => "StubUnresolved",
        }
    }

    /// Parse a kind from its canonical spelling, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
    }

    /// Namespace used when hashing a node identity.
    ///
    /// Kinds that can name the same entity share a namespace: a class is one
    /// identity whether it was classified as a controller or a service, and
    /// a stub hashes in the namespace of the kind it expects.
    pub fn identity_namespace(self) -> &'static str {
        match self {
            Self::Page | Self::Include => "page",
            Self::Controller | Self::Service | Self::MapperInterface => "type",
            Self::ControllerMethod | Self::ServiceMethod | Self::MapperMethod => "method",
            Self::SqlStatement => "sql",
            Self::Table => "table",
            Self::Column => "column",
            Self::StubUnresolved => "marker",
        }
    }

    pub fn is_type(self) -> bool {
        matches!(
            self,
            Self::Controller | Self::Service | Self::MapperInterface
        )
    }

    pub fn is_method(self) -> bool {
        matches!(
            self,
            Self::ControllerMethod | Self::ServiceMethod | Self::MapperMethod
        )
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Edge kinds ─────────────────────────────────────────────────────

/// Typed dependency between two nodes. An edge always reads
/// "source depends on target".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum EdgeKind {
    /// Page → Page/Include: static or dynamic include.
    Includes,
    /// Caller → callee (page → controller method, method → method).
    Invokes,
    /// Abstract type or member → concrete realization.
    Implements,
    /// Method → SQL statement it executes.
    ExecutesSql,
    /// SQL statement → table it reads.
    ReadsTable,
    /// SQL statement → table it writes.
    WritesTable,
    /// SQL statement → column it mentions.
    ReferencesColumn,
}

impl EdgeKind {
    pub const ALL: [Self; 7] = [
        Self::Includes,
        Self::Invokes,
        Self::Implements,
        Self::ExecutesSql,
        Self::ReadsTable,
        Self::WritesTable,
        Self::ReferencesColumn,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Includes => "Includes",
            Self::Invokes => "Invokes",
            Self::Implements => "Implements",
            Self::ExecutesSql => "ExecutesSql",
            Self::ReadsTable => "ReadsTable",
            Self::WritesTable => "WritesTable",
            Self::ReferencesColumn => "ReferencesColumn",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Artifact kinds ─────────────────────────────────────────────────

/// The six artifact families an extractor can handle.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Page,
    Controller,
    Service,
    Mapper,
    Sql,
    Schema,
}

impl ArtifactKind {
    pub const ALL: [Self; 6] = [
        Self::Page,
        Self::Controller,
        Self::Service,
        Self::Mapper,
        Self::Sql,
        Self::Schema,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Controller => "controller",
            Self::Service => "service",
            Self::Mapper => "mapper",
            Self::Sql => "sql",
            Self::Schema => "schema",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Span type ──────────────────────────────────────────────────────

/// Inclusive 1-based line span.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

impl LineRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    pub fn line(line: u32) -> Self {
        Self::new(line, line)
    }
}

impl From<tree_sitter::Range> for LineRange {
    fn from(r: tree_sitter::Range) -> Self {
        Self::new(row_to_line(r.start_point.row), row_to_line(r.end_point.row))
    }
}

fn row_to_line(row: usize) -> u32 {
    u32::try_from(row).map_or(u32::MAX, |r| r.saturating_add(1))
}

/// Normalize a file path to forward slashes without a leading `./`.
pub fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let trimmed = unified.trim_start_matches("./");
    let mut out = String::with_capacity(trimmed.len());
    let mut prev_slash = false;
    for c in trimmed.chars() {
        if c == '/' {
            if !prev_slash {
                out.push(c);
            }
            prev_slash = true;
        } else {
            out.push(c);
            prev_slash = false;
        }
    }
    out
}
