use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use layermap_extract::{EdgeKind, LineRange, NodeKind};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, warn};

use super::{GraphDocument, GraphPersistence, ProvenanceEntry, schema, validate_document};
use crate::error::PersistError;
use crate::types::{Edge, Node};

const ROLE_NODE: &str = "node";
const ROLE_EDGE: &str = "edge";

/// Graph document stored in a `SQLite` database, written in one transaction.
#[derive(Debug, Clone)]
pub struct SqliteFile {
    path: PathBuf,
}

impl SqliteFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, PersistError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&self.path)?;
        conn.execute_batch(schema::PRAGMAS_SQL)?;
        // WAL is unavailable on some filesystems; the default journal works too.
        if let Err(e) = conn.execute_batch("PRAGMA journal_mode = WAL;") {
            warn!(path = %self.path.display(), error = %e, "Could not enable WAL journal mode");
        }
        conn.execute_batch(schema::SCHEMA_SQL)?;
        Ok(conn)
    }
}

impl GraphPersistence for SqliteFile {
    fn save(&self, doc: &GraphDocument) -> Result<(), PersistError> {
        let mut conn = self.connect()?;
        write_document(&mut conn, doc)?;
        debug!(
            path = %self.path.display(),
            nodes = doc.nodes.len(),
            edges = doc.edges.len(),
            "Saved graph to SQLite"
        );
        Ok(())
    }

    fn load(&self) -> Result<GraphDocument, PersistError> {
        if !self.path.exists() {
            return Err(PersistError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", self.path.display()),
            )));
        }
        let conn = self.connect()?;
        let doc = read_document(&conn)?;
        validate_document(&doc)?;
        Ok(doc)
    }

    fn exists(&self) -> bool {
        self.path.exists()
    }
}

fn write_document(conn: &mut Connection, doc: &GraphDocument) -> Result<(), PersistError> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        "DELETE FROM provenance_members;
         DELETE FROM provenance;
         DELETE FROM edges;
         DELETE FROM nodes;
         DELETE FROM layermap_meta;",
    )?;

    {
        let mut meta =
            tx.prepare("INSERT INTO layermap_meta (key, value) VALUES (?1, ?2)")?;
        meta.execute(params!["schema_version", schema::SCHEMA_VERSION])?;
        meta.execute(params!["format_version", doc.format_version.to_string()])?;
        meta.execute(params!["version", doc.version.to_string()])?;
        if let Some(saved_at) = doc.saved_at {
            meta.execute(params!["saved_at", saved_at.to_rfc3339()])?;
        }

        let mut node_stmt = tx.prepare(
            "INSERT INTO nodes (id, kind, source_file, line_start, line_end, signature, name, attributes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for node in &doc.nodes {
            node_stmt.execute(params![
                node.id.to_string(),
                node.kind.as_str(),
                node.source_file,
                node.line_range.start,
                node.line_range.end,
                node.signature,
                node.name,
                serde_json::to_string(&node.attributes)?,
            ])?;
        }

        let mut edge_stmt = tx.prepare(
            "INSERT INTO edges (id, source, target, kind, confidence, evidence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for edge in &doc.edges {
            edge_stmt.execute(params![
                edge.id.to_string(),
                edge.source.to_string(),
                edge.target.to_string(),
                edge.kind.as_str(),
                edge.confidence,
                serde_json::to_string(&edge.evidence)?,
            ])?;
        }

        let mut prov_stmt = tx.prepare(
            "INSERT INTO provenance (file_key, path, placeholders, lookups) VALUES (?1, ?2, ?3, ?4)",
        )?;
        let mut member_stmt = tx.prepare(
            "INSERT OR IGNORE INTO provenance_members (file_key, role, member_id) VALUES (?1, ?2, ?3)",
        )?;
        for entry in &doc.provenance {
            prov_stmt.execute(params![
                entry.file_key.0,
                entry.path,
                serde_json::to_string(&entry.placeholders)?,
                serde_json::to_string(&entry.lookups)?,
            ])?;
            for id in &entry.node_ids {
                member_stmt.execute(params![entry.file_key.0, ROLE_NODE, id.to_string()])?;
            }
            for id in &entry.edge_ids {
                member_stmt.execute(params![entry.file_key.0, ROLE_EDGE, id.to_string()])?;
            }
        }
    }

    tx.commit()?;
    Ok(())
}

fn corrupt(what: impl std::fmt::Display) -> PersistError {
    PersistError::Corrupt(what.to_string())
}

fn parse_id<T: std::str::FromStr>(text: &str) -> Result<T, PersistError> {
    text.parse().map_err(|_| corrupt(format!("bad id {text:?}")))
}

fn read_meta(conn: &Connection, key: &str) -> Result<Option<String>, PersistError> {
    Ok(conn
        .query_row(
            "SELECT value FROM layermap_meta WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?)
}

fn read_document(conn: &Connection) -> Result<GraphDocument, PersistError> {
    let format_version = read_meta(conn, "format_version")?
        .ok_or_else(|| corrupt("missing format_version"))?
        .parse()
        .map_err(corrupt)?;
    let version = read_meta(conn, "version")?
        .ok_or_else(|| corrupt("missing version"))?
        .parse()
        .map_err(corrupt)?;
    let saved_at = read_meta(conn, "saved_at")?
        .map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
        .transpose()
        .map_err(corrupt)?;

    let mut nodes = Vec::new();
    let mut stmt = conn.prepare(
        "SELECT id, kind, source_file, line_start, line_end, signature, name, attributes
         FROM nodes ORDER BY id",
    )?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let id: String = row.get(0)?;
        let kind: String = row.get(1)?;
        let attributes: String = row.get(7)?;
        nodes.push(Node {
            id: parse_id(&id)?,
            kind: NodeKind::parse(&kind).ok_or_else(|| corrupt(format!("node kind {kind:?}")))?,
            source_file: row.get(2)?,
            line_range: LineRange::new(row.get(3)?, row.get(4)?),
            signature: row.get(5)?,
            name: row.get(6)?,
            attributes: serde_json::from_str::<BTreeMap<String, String>>(&attributes)
                .map_err(corrupt)?,
        });
    }

    let mut edges = Vec::new();
    let mut stmt = conn.prepare(
        "SELECT id, source, target, kind, confidence, evidence FROM edges ORDER BY id",
    )?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let id: String = row.get(0)?;
        let source: String = row.get(1)?;
        let target: String = row.get(2)?;
        let kind: String = row.get(3)?;
        let evidence: String = row.get(5)?;
        edges.push(Edge {
            id: parse_id(&id)?,
            source: parse_id(&source)?,
            target: parse_id(&target)?,
            kind: EdgeKind::parse(&kind).ok_or_else(|| corrupt(format!("edge kind {kind:?}")))?,
            confidence: row.get(4)?,
            evidence: serde_json::from_str(&evidence).map_err(corrupt)?,
        });
    }

    let mut provenance = Vec::new();
    let mut stmt =
        conn.prepare("SELECT file_key, path, placeholders, lookups FROM provenance ORDER BY path")?;
    let mut members = conn.prepare(
        "SELECT role, member_id FROM provenance_members WHERE file_key = ?1 ORDER BY role, member_id",
    )?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let file_key: String = row.get(0)?;
        let placeholders: String = row.get(2)?;
        let lookups: String = row.get(3)?;
        let mut entry = ProvenanceEntry {
            file_key: crate::types::FileKey(file_key.clone()),
            path: row.get(1)?,
            node_ids: Vec::new(),
            edge_ids: Vec::new(),
            placeholders: serde_json::from_str(&placeholders).map_err(corrupt)?,
            lookups: serde_json::from_str(&lookups).map_err(corrupt)?,
        };
        let mut member_rows = members.query(params![file_key])?;
        while let Some(m) = member_rows.next()? {
            let role: String = m.get(0)?;
            let id: String = m.get(1)?;
            match role.as_str() {
                ROLE_NODE => entry.node_ids.push(parse_id(&id)?),
                ROLE_EDGE => entry.edge_ids.push(parse_id(&id)?),
                other => return Err(corrupt(format!("provenance role {other:?}"))),
            }
        }
        provenance.push(entry);
    }

    Ok(GraphDocument {
        format_version,
        version,
        saved_at,
        nodes,
        edges,
        provenance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::FORMAT_VERSION;

    #[test]
    fn empty_document_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let file = SqliteFile::new(dir.path().join("state/graph.db"));
        assert!(!file.exists());
        let doc = GraphDocument::empty().stamped();
        file.save(&doc).unwrap();
        assert!(file.exists());
        let loaded = file.load().unwrap();
        assert_eq!(loaded.format_version, FORMAT_VERSION);
        assert_eq!(loaded.saved_at.map(|t| t.timestamp()), doc.saved_at.map(|t| t.timestamp()));
        assert!(loaded.nodes.is_empty());
    }

    #[test]
    fn corrupt_rows_fail_distinctly() {
        let dir = tempfile::tempdir().unwrap();
        let file = SqliteFile::new(dir.path().join("graph.db"));
        file.save(&GraphDocument::empty()).unwrap();
        let conn = Connection::open(file.path()).unwrap();
        conn.execute(
            "INSERT INTO nodes (id, kind, source_file, line_start, line_end, signature, name)
             VALUES ('zz', 'Table', NULL, 0, 0, 'users', 'users')",
            [],
        )
        .unwrap();
        drop(conn);
        assert!(matches!(file.load(), Err(PersistError::Corrupt(_))));
    }

    #[test]
    fn connection_opens_in_wal_mode() {
        let dir = tempfile::tempdir().unwrap();
        let file = SqliteFile::new(dir.path().join("graph.db"));
        let conn = file.connect().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_ascii_lowercase(), "wal");
    }

    #[test]
    fn missing_database_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = SqliteFile::new(dir.path().join("nope.db"));
        assert!(matches!(file.load(), Err(PersistError::Io(_))));
    }
}
