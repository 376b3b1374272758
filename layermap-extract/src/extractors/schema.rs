use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use super::{Extractor, has_extension};
use crate::finding::{Definition, FindingSet};
use crate::sql::{self, DdlColumn, DdlTable};
use crate::{ArtifactKind, LineRange, NodeKind, Result, normalize_path};

static CREATE_TABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bcreate\s+(?:\w+\s+)*table\b").expect("create table pattern is valid")
});

/// Statements a DDL-only dump may contain.
const DDL_KEYWORDS: &[&str] = &["CREATE", "ALTER", "DROP", "COMMENT", "SET", "USE", "GRANT"];

/// One row of column metadata, as exported from `information_schema.columns`
/// or an equivalent catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaRow {
    #[serde(alias = "table_schema")]
    pub schema: Option<String>,
    #[serde(alias = "table_name")]
    pub table: String,
    #[serde(alias = "column_name")]
    pub column: Option<String>,
    #[serde(alias = "type")]
    pub data_type: Option<String>,
    #[serde(alias = "is_nullable", deserialize_with = "yes_no")]
    pub nullable: Option<bool>,
    #[serde(alias = "column_key")]
    pub key: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BoolLike {
    Bool(bool),
    Text(String),
}

fn yes_no<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<bool>, D::Error> {
    Ok(
        Option::<BoolLike>::deserialize(deserializer)?.and_then(|v| match v {
            BoolLike::Bool(b) => Some(b),
            BoolLike::Text(s) => parse_yes_no(&s),
        }),
    )
}

fn parse_yes_no(s: &str) -> Option<bool> {
    match s.trim().to_ascii_uppercase().as_str() {
        "YES" | "Y" | "TRUE" | "1" => Some(true),
        "NO" | "N" | "FALSE" | "0" => Some(false),
        _ => None,
    }
}

/// Database schema: tables and columns from DDL dumps or catalog rows.
#[derive(Debug, Default)]
pub struct SchemaExtractor;

impl SchemaExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Build findings directly from catalog rows handed over by a caller.
    pub fn from_rows(path: &str, rows: &[SchemaRow]) -> FindingSet {
        let mut findings = FindingSet::new(normalize_path(path), ArtifactKind::Schema);
        let numbered: Vec<(u32, &SchemaRow)> = rows.iter().map(|r| (1, r)).collect();
        emit_tables(&mut findings, &group_rows(&numbered), "rows");
        findings
    }

    /// Parse a JSON array of rows.
    pub fn parse_json_rows(content: &str) -> Result<Vec<SchemaRow>> {
        Ok(serde_json::from_str(content)?)
    }

    fn extract_delimited(content: &str, path: &str, delimiter: char) -> FindingSet {
        let mut findings = FindingSet::new(normalize_path(path), ArtifactKind::Schema);
        let mut lines = content.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());
        let Some((_, header)) = lines.next() else {
            return findings;
        };
        let header: Vec<String> = split_fields(header, delimiter)
            .into_iter()
            .map(|h| h.to_ascii_lowercase())
            .collect();
        let position = |names: &[&str]| header.iter().position(|h| names.contains(&h.as_str()));
        let Some(table_at) = position(&["table_name", "table"]) else {
            findings.issue(1, "header has no table_name column");
            return findings;
        };
        let schema_at = position(&["table_schema", "schema"]);
        let column_at = position(&["column_name", "column"]);
        let type_at = position(&["data_type", "type"]);
        let nullable_at = position(&["is_nullable", "nullable"]);
        let key_at = position(&["column_key", "key"]);

        let mut rows = Vec::new();
        for (idx, line) in lines {
            let line_no = u32::try_from(idx + 1).unwrap_or(u32::MAX);
            let fields = split_fields(line, delimiter);
            let get = |at: Option<usize>| {
                at.and_then(|i| fields.get(i))
                    .filter(|f| !f.is_empty())
                    .cloned()
            };
            let Some(table) = get(Some(table_at)) else {
                findings.issue(line_no, "row has no table name");
                continue;
            };
            rows.push((
                line_no,
                SchemaRow {
                    schema: get(schema_at),
                    table,
                    column: get(column_at),
                    data_type: get(type_at),
                    nullable: get(nullable_at).and_then(|v| parse_yes_no(&v)),
                    key: get(key_at),
                },
            ));
        }
        let borrowed: Vec<(u32, &SchemaRow)> = rows.iter().map(|(l, r)| (*l, r)).collect();
        emit_tables(&mut findings, &group_rows(&borrowed), "rows");
        findings
    }
}

impl Extractor for SchemaExtractor {
    fn artifact(&self) -> ArtifactKind {
        ArtifactKind::Schema
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["sql", "ddl", "json", "csv", "tsv"]
    }

    fn accepts(&self, path: &str, content: &str) -> bool {
        if has_extension(path, &["ddl"]) {
            return true;
        }
        if has_extension(path, &["sql"]) {
            return is_ddl_only(content);
        }
        let lower = path.to_ascii_lowercase();
        has_extension(path, &["json", "csv", "tsv"])
            && ["schema", "ddl", "columns"].iter().any(|k| lower.contains(k))
    }

    fn extract(&self, content: &str, path: &str) -> FindingSet {
        if has_extension(path, &["json"]) {
            match Self::parse_json_rows(content) {
                Ok(rows) => {
                    let mut findings = Self::from_rows(path, &rows);
                    if rows.iter().any(|r| r.table.trim().is_empty()) {
                        findings.issue(1, "rows without a table name were skipped");
                    }
                    findings
                }
                Err(e) => {
                    let mut findings = FindingSet::new(normalize_path(path), ArtifactKind::Schema);
                    findings.issue(1, format!("invalid schema rows: {e}"));
                    findings
                }
            }
        } else if has_extension(path, &["csv"]) {
            Self::extract_delimited(content, path, ',')
        } else if has_extension(path, &["tsv"]) {
            Self::extract_delimited(content, path, '\t')
        } else {
            let mut findings = FindingSet::new(normalize_path(path), ArtifactKind::Schema);
            let (tables, issues) = sql::parse_create_tables(content);
            emit_tables(&mut findings, &tables, "ddl");
            for (line, message) in issues {
                findings.issue(line, message);
            }
            findings
        }
    }
}

/// A script made only of DDL with at least one `CREATE TABLE`.
fn is_ddl_only(content: &str) -> bool {
    if !CREATE_TABLE_RE.is_match(content) {
        return false;
    }
    sql::split_script(content).iter().all(|stmt| {
        let first = stmt
            .text
            .split(|c: char| !c.is_ascii_alphabetic())
            .find(|w| !w.is_empty())
            .unwrap_or("")
            .to_ascii_uppercase();
        DDL_KEYWORDS.contains(&first.as_str())
    })
}

/// Group rows into tables, keeping first-seen order.
fn group_rows(rows: &[(u32, &SchemaRow)]) -> Vec<DdlTable> {
    let mut tables: Vec<DdlTable> = Vec::new();
    let mut index: BTreeMap<String, usize> = BTreeMap::new();
    for (line, row) in rows {
        let name = row.table.trim();
        if name.is_empty() {
            continue;
        }
        let key = name.to_ascii_lowercase();
        let slot = *index.entry(key.clone()).or_insert_with(|| {
            tables.push(DdlTable {
                schema: row.schema.clone(),
                name: key,
                columns: Vec::new(),
                line: *line,
            });
            tables.len() - 1
        });
        if let Some(column) = row.column.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            tables[slot].columns.push(DdlColumn {
                name: column.to_ascii_lowercase(),
                data_type: row.data_type.clone(),
                nullable: row.nullable.unwrap_or(true),
                key: row.key.clone().filter(|k| !k.is_empty()),
            });
        }
    }
    tables
}

/// Define `Table` and `Column` nodes. Tables are keyed by lower-cased
/// unqualified name; the schema is kept as an attribute.
pub(crate) fn emit_tables(findings: &mut FindingSet, tables: &[DdlTable], source: &str) {
    for table in tables {
        let signature = table.name.to_ascii_lowercase();
        let lines = LineRange::line(table.line);
        if !findings.defines(NodeKind::Table, &signature) {
            let mut def = Definition::new(NodeKind::Table, &signature, &table.name, lines)
                .with_attr("source", source)
                .with_attr("columns", table.columns.len().to_string());
            if let Some(schema) = &table.schema {
                def = def.with_attr("schema", schema.clone());
            }
            findings.define(def);
        }
        for column in &table.columns {
            let column_sig = format!("{signature}.{}", column.name.to_ascii_lowercase());
            if findings.defines(NodeKind::Column, &column_sig) {
                continue;
            }
            let mut def = Definition::new(NodeKind::Column, &column_sig, &column.name, lines)
                .with_owner(&signature)
                .with_attr("table", signature.clone())
                .with_attr("nullable", column.nullable.to_string());
            if let Some(data_type) = &column.data_type {
                def = def.with_attr("data_type", data_type.clone());
            }
            if let Some(key) = &column.key {
                def = def.with_attr("key", key.clone());
            }
            findings.define(def);
        }
    }
}

/// Split one delimited line, honoring double quotes.
fn split_fields(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            c if c == delimiter && !quoted => fields.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    fields.push(current);
    fields.into_iter().map(|f| f.trim().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column<'a>(findings: &'a FindingSet, sig: &str) -> &'a Definition {
        findings
            .definitions
            .iter()
            .find(|d| d.kind == NodeKind::Column && d.signature == sig)
            .unwrap()
    }

    #[test]
    fn reads_ddl_dumps() {
        let ddl = "CREATE TABLE Users (\n  id BIGINT PRIMARY KEY,\n  email VARCHAR(120) NOT NULL\n);\n";
        let findings = SchemaExtractor::new().extract(ddl, "db/schema.sql");
        assert!(findings.defines(NodeKind::Table, "users"));
        let email = column(&findings, "users.email");
        assert_eq!(email.owner.as_deref(), Some("users"));
        assert_eq!(email.attributes["nullable"], "false");
        assert_eq!(column(&findings, "users.id").attributes["key"], "PRI");
    }

    #[test]
    fn reads_json_rows() {
        let json = r#"[
            {"table_schema": "shop", "table_name": "orders", "column_name": "id", "data_type": "bigint", "is_nullable": "NO", "column_key": "PRI"},
            {"table_schema": "shop", "table_name": "orders", "column_name": "note", "data_type": "text", "is_nullable": true},
            {"table": "audit_log"}
        ]"#;
        let findings = SchemaExtractor::new().extract(json, "catalog/schema.json");
        assert!(findings.issues.is_empty());
        let orders = findings
            .definitions
            .iter()
            .find(|d| d.signature == "orders")
            .unwrap();
        assert_eq!(orders.attributes["schema"], "shop");
        assert_eq!(orders.attributes["columns"], "2");
        assert_eq!(column(&findings, "orders.id").attributes["nullable"], "false");
        assert_eq!(column(&findings, "orders.note").attributes["nullable"], "true");
        assert!(findings.defines(NodeKind::Table, "audit_log"));
    }

    #[test]
    fn reads_csv_with_header() {
        let csv = "table_schema,table_name,column_name,data_type,is_nullable,column_key\nshop,users,id,bigint,NO,PRI\nshop,users,\"display, name\",varchar,YES,\n,,orphan,int,YES,\n";
        let findings = SchemaExtractor::new().extract(csv, "catalog/columns.csv");
        assert!(findings.defines(NodeKind::Column, "users.display, name"));
        assert_eq!(findings.issues.len(), 1);
        assert_eq!(findings.issues[0].line, 4);
    }

    #[test]
    fn invalid_json_is_an_issue() {
        let findings = SchemaExtractor::new().extract("{not json", "schema.json");
        assert!(findings.definitions.is_empty());
        assert_eq!(findings.issues.len(), 1);
    }

    #[test]
    fn only_ddl_scripts_are_schema() {
        let ex = SchemaExtractor::new();
        assert!(ex.accepts("db/init.sql", "-- init\nCREATE TABLE a (id INT);\nALTER TABLE a ADD b INT;"));
        assert!(!ex.accepts("db/mixed.sql", "CREATE TABLE a (id INT);\nSELECT * FROM a;"));
        assert!(!ex.accepts("db/report.sql", "SELECT 1"));
        assert!(ex.accepts("meta/schema.tsv", "table_name\tcolumn_name"));
        assert!(!ex.accepts("data/users.csv", "id,name"));
    }
}
