use crate::types::NodeId;

/// Top-level layermap error type.
///
/// All fallible operations in `layermap-core` return [`Result<T, LayermapError>`](Result).
/// Each variant wraps a domain-specific error enum, allowing callers to
/// match on the error source without losing type information. Problems
/// local to one file or one reference never surface here: they become
/// markers, stubs and low-confidence edges instead.
#[derive(thiserror::Error, Debug)]
pub enum LayermapError {
    /// Error applying changes to the graph store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Error saving or loading a persisted graph.
    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    /// Error evaluating a query.
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// Error in configuration parsing or validation.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Error from the extraction layer.
    #[error("Extraction error: {0}")]
    Extract(#[from] layermap_extract::ExtractError),

    /// The batch was cancelled before anything was published.
    #[error("Cancelled")]
    Cancelled,
}

/// Errors from the versioned graph store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// A diff is structurally unusable (dangling endpoint, bad id, bad
    /// confidence). Applying it would break a graph invariant.
    #[error("Invalid diff for {path}: {reason}")]
    InvalidDiff {
        /// Path of the file the diff belongs to.
        path: String,
        /// Which invariant the diff violates.
        reason: String,
    },

    /// The batch was cancelled before commit.
    #[error("Batch cancelled before commit")]
    Cancelled,
}

/// Errors from graph persistence backends.
#[derive(thiserror::Error, Debug)]
pub enum PersistError {
    /// The persisted document is unreadable or violates a graph invariant.
    #[error("Corrupt persisted graph: {0}")]
    Corrupt(String),

    /// The document was written by an incompatible format version.
    #[error("Unsupported format version {found} (expected {expected})")]
    UnsupportedVersion {
        /// Version recorded in the document.
        found: u32,
        /// Version this build reads and writes.
        expected: u32,
    },

    /// Underlying `SQLite` operation failed.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from query evaluation. All are recoverable.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// The node does not exist in the queried snapshot.
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// No path connects the two nodes under the given filter.
    #[error("No path from {from} to {to}")]
    NoPathFound {
        /// Start of the requested path.
        from: NodeId,
        /// End of the requested path.
        to: NodeId,
    },

    /// A node or edge kind name that does not exist.
    #[error("Unknown kind: {0}")]
    UnknownKind(String),
}

/// Errors in layermap configuration parsing and validation.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The configuration file does not exist at the expected path.
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// Configuration values are present but semantically invalid.
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// Configuration file syntax could not be parsed (TOML error).
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Convenience alias for `Result<T, LayermapError>`.
pub type Result<T> = std::result::Result<T, LayermapError>;

impl From<StoreError> for PersistError {
    fn from(e: StoreError) -> Self {
        Self::Corrupt(e.to_string())
    }
}
