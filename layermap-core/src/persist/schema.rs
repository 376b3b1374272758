/// Current schema version.
pub const SCHEMA_VERSION: &str = "1";

/// Full SQL schema for the persisted graph.
pub const SCHEMA_SQL: &str = r"
-- Document metadata: format and store version, save time
CREATE TABLE IF NOT EXISTS layermap_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Materialized nodes
CREATE TABLE IF NOT EXISTS nodes (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    source_file TEXT,
    line_start INTEGER NOT NULL,
    line_end INTEGER NOT NULL,
    signature TEXT NOT NULL,
    name TEXT NOT NULL,
    attributes TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_nodes_kind ON nodes(kind);
CREATE INDEX IF NOT EXISTS idx_nodes_signature ON nodes(signature);

-- Materialized edges
CREATE TABLE IF NOT EXISTS edges (
    id TEXT PRIMARY KEY,
    source TEXT NOT NULL REFERENCES nodes(id),
    target TEXT NOT NULL REFERENCES nodes(id),
    kind TEXT NOT NULL,
    confidence REAL NOT NULL,
    evidence TEXT NOT NULL DEFAULT '[]'
);
CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source);
CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target);

-- Per-file provenance
CREATE TABLE IF NOT EXISTS provenance (
    file_key TEXT PRIMARY KEY,
    path TEXT NOT NULL UNIQUE,
    placeholders TEXT NOT NULL DEFAULT '[]',
    lookups TEXT NOT NULL DEFAULT '[]'
);

-- Node and edge ids contributed by each file
CREATE TABLE IF NOT EXISTS provenance_members (
    file_key TEXT NOT NULL REFERENCES provenance(file_key) ON DELETE CASCADE,
    role TEXT NOT NULL,
    member_id TEXT NOT NULL,
    PRIMARY KEY (file_key, role, member_id)
);
CREATE INDEX IF NOT EXISTS idx_pm_member ON provenance_members(member_id);
";

/// `SQLite` PRAGMAs for performance.
pub const PRAGMAS_SQL: &str = r"
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -64000;
PRAGMA foreign_keys = ON;
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_executes_on_in_memory_sqlite() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(PRAGMAS_SQL).unwrap();
        conn.execute_batch(SCHEMA_SQL).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        for table in ["layermap_meta", "nodes", "edges", "provenance", "provenance_members"] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA_SQL).unwrap();
        conn.execute_batch(SCHEMA_SQL).unwrap();
    }
}
