use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use super::schema::emit_tables;
use super::{ExtractOptions, Extractor, file_stem, has_extension};
use crate::finding::FindingSet;
use crate::markup::{self, LineIndex};
use crate::sql::{self, StatementSpec, emit_statement};
use crate::{ArtifactKind, LineRange, normalize_path};

static MAPPER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<mapper\b([^>]*)>").expect("mapper pattern is valid"));

static FRAGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<sql\b([^>]*)>").expect("fragment pattern is valid"));

static STATEMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(select|insert|update|delete)\b([^>]*)>").expect("statement pattern is valid")
});

/// Tags whose content may or may not end up in the executed SQL.
const DYNAMIC_TAGS: &[&str] = &["if", "when", "otherwise", "foreach", "bind"];

const MAX_INCLUDE_DEPTH: usize = 8;

/// SQL scripts and MyBatis XML mappers.
#[derive(Debug)]
pub struct SqlExtractor {
    options: ExtractOptions,
}

impl SqlExtractor {
    pub fn new(options: ExtractOptions) -> Self {
        Self { options }
    }

    fn extract_script(&self, content: &str, path: &str) -> FindingSet {
        let mut findings = FindingSet::new(normalize_path(path), ArtifactKind::Sql);
        let stem = file_stem(path);
        let mut ordinal = 0;
        for statement in sql::split_script(content) {
            if !sql::looks_like_sql(&sql::strip_comments(statement.text)) {
                continue;
            }
            ordinal += 1;
            let signature = format!("{}#{ordinal}", findings.path);
            let name = format!("{stem}#{ordinal}");
            emit_statement(
                &mut findings,
                StatementSpec {
                    signature: &signature,
                    name: &name,
                    lines: LineRange::new(statement.start_line, statement.end_line),
                    text: statement.text,
                    extra_dynamic: 0,
                    attributes: BTreeMap::new(),
                },
                &self.options,
            );
        }

        let (tables, issues) = sql::parse_create_tables(content);
        emit_tables(&mut findings, &tables, "ddl");
        for (line, message) in issues {
            findings.issue(line, message);
        }
        findings
    }

    fn extract_mapper(&self, content: &str, path: &str) -> FindingSet {
        let mut findings = FindingSet::new(normalize_path(path), ArtifactKind::Sql);
        let lines = LineIndex::new(content);
        let (text, open_comments) = markup::blank_regions(content, "<!--", "-->");
        for offset in open_comments {
            findings.issue(lines.line_of(offset), "unterminated XML comment");
        }

        let namespace = MAPPER_RE
            .captures(&text)
            .and_then(|caps| markup::attributes(caps.get(1)?.as_str()).remove("namespace"))
            .filter(|ns| !ns.trim().is_empty());
        let namespace = if let Some(ns) = namespace {
            ns.trim().to_string()
        } else {
            findings.issue(1, "mapper has no namespace");
            file_stem(path).to_string()
        };
        findings.scope = namespace.rsplit_once('.').map(|(pkg, _)| pkg.to_string());

        let mut fragments = BTreeMap::new();
        for caps in FRAGMENT_RE.captures_iter(&text) {
            let (Some(whole), Some(attrs)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let Some(id) = markup::attributes(attrs.as_str()).remove("id") else {
                continue;
            };
            match text[whole.end()..].find("</sql>") {
                Some(end) => {
                    fragments.insert(id, text[whole.end()..whole.end() + end].to_string());
                }
                None => findings.issue(
                    lines.line_of(whole.start()),
                    format!("unterminated <sql> fragment {id}"),
                ),
            }
        }

        for caps in STATEMENT_RE.captures_iter(&text) {
            let (Some(whole), Some(tag), Some(attrs)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            let start_line = lines.line_of(whole.start());
            if whole.as_str().ends_with("/>") {
                continue;
            }
            let tag = tag.as_str();
            let Some(id) = markup::attributes(attrs.as_str()).remove("id") else {
                findings.issue(start_line, format!("<{tag}> without id"));
                continue;
            };
            let close = format!("</{tag}>");
            let Some(end) = text[whole.end()..].find(&close) else {
                findings.issue(start_line, format!("unterminated <{tag}> {id}"));
                continue;
            };
            let body = &text[whole.end()..whole.end() + end];
            let end_line = lines.line_of(whole.end() + end);
            let signature = format!("{namespace}.{id}");

            let (flat, dynamic, issues) = flatten_dynamic_sql(body, &fragments);
            for message in issues {
                findings.issue(start_line, format!("{signature}: {message}"));
            }
            emit_statement(
                &mut findings,
                StatementSpec {
                    signature: &signature,
                    name: &id,
                    lines: LineRange::new(start_line, end_line),
                    text: &flat,
                    extra_dynamic: dynamic,
                    attributes: BTreeMap::from([
                        ("statement_type".to_string(), tag.to_string()),
                        ("namespace".to_string(), namespace.clone()),
                    ]),
                },
                &self.options,
            );
        }
        findings
    }
}

impl Extractor for SqlExtractor {
    fn artifact(&self) -> ArtifactKind {
        ArtifactKind::Sql
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["sql", "xml"]
    }

    fn accepts(&self, path: &str, content: &str) -> bool {
        if has_extension(path, &["sql"]) {
            return true;
        }
        has_extension(path, &["xml"]) && MAPPER_RE.is_match(content)
    }

    fn extract(&self, content: &str, path: &str) -> FindingSet {
        if has_extension(path, &["xml"]) {
            self.extract_mapper(content, path)
        } else {
            self.extract_script(content, path)
        }
    }
}

/// Flatten a MyBatis statement body to plain SQL.
///
/// Returns the SQL text, the number of dynamic tags encountered, and any
/// problems found. `<include refid>` is replaced by the referenced `<sql>`
/// fragment, `<where>`/`<set>`/`<trim>`/`<foreach>` contribute their
/// keywords and delimiters, and `<selectKey>` bodies are dropped.
pub(crate) fn flatten_dynamic_sql(
    body: &str,
    fragments: &BTreeMap<String, String>,
) -> (String, usize, Vec<String>) {
    let mut flattener = Flattener {
        fragments,
        out: String::with_capacity(body.len()),
        dynamic: 0,
        issues: Vec::new(),
    };
    flattener.run(body, 0);
    let text = sql::compact_whitespace(&flattener.out);
    (text, flattener.dynamic, flattener.issues)
}

struct Flattener<'a> {
    fragments: &'a BTreeMap<String, String>,
    out: String,
    dynamic: usize,
    issues: Vec<String>,
}

impl Flattener<'_> {
    fn run(&mut self, body: &str, depth: usize) {
        // Text to emit when the matching closing tag is reached.
        let mut closers: Vec<(String, String)> = Vec::new();
        let mut rest = body;

        while let Some(lt) = rest.find('<') {
            self.text(&rest[..lt]);
            let tail = &rest[lt..];

            if let Some(cdata) = tail.strip_prefix("<![CDATA[") {
                if let Some(end) = cdata.find("]]>") {
                    self.out.push_str(&cdata[..end]);
                    rest = &cdata[end + 3..];
                } else {
                    self.issues.push("unterminated CDATA section".to_string());
                    self.out.push_str(cdata);
                    return;
                }
                continue;
            }

            let Some(end) = tag_end(tail) else {
                // A bare comparison operator, not a tag.
                self.out.push('<');
                rest = &tail[1..];
                continue;
            };
            let raw = &tail[1..end];
            rest = &tail[end + 1..];

            let closing = raw.starts_with('/');
            let inner = raw.trim_start_matches('/').trim_end_matches('/').trim();
            let (name, attr_text) = inner
                .split_once(char::is_whitespace)
                .unwrap_or((inner, ""));
            let name = name.to_ascii_lowercase();

            if closing {
                if name == "set" {
                    let trimmed = self.out.trim_end().trim_end_matches(',').len();
                    self.out.truncate(trimmed);
                }
                if let Some(pos) = closers.iter().rposition(|(n, _)| *n == name) {
                    let (_, text) = closers.remove(pos);
                    self.out.push(' ');
                    self.out.push_str(&text);
                }
                self.out.push(' ');
                continue;
            }

            let attrs = markup::attributes(attr_text);
            match name.as_str() {
                "include" => {
                    let refid = attrs.get("refid").map_or("", String::as_str);
                    self.include(refid, depth);
                }
                "selectkey" => match find_ignore_case(rest, "</selectkey>") {
                    Some(close) => rest = &rest[close + "</selectkey>".len()..],
                    None => {
                        self.issues.push("unterminated <selectKey>".to_string());
                        return;
                    }
                },
                "where" => self.out.push_str(" WHERE "),
                "set" => self.out.push_str(" SET "),
                "trim" => {
                    if let Some(prefix) = attrs.get("prefix") {
                        self.out.push(' ');
                        self.out.push_str(prefix);
                    }
                    closers.push((name.clone(), attrs.get("suffix").cloned().unwrap_or_default()));
                }
                "foreach" => {
                    self.dynamic += 1;
                    if let Some(open) = attrs.get("open") {
                        self.out.push(' ');
                        self.out.push_str(open);
                    }
                    closers.push((name.clone(), attrs.get("close").cloned().unwrap_or_default()));
                }
                n if DYNAMIC_TAGS.contains(&n) => self.dynamic += 1,
                _ => {}
            }
            self.out.push(' ');
        }
        self.text(rest);
    }

    fn include(&mut self, refid: &str, depth: usize) {
        if depth >= MAX_INCLUDE_DEPTH {
            self.issues.push(format!("<include> nesting too deep at {refid}"));
            return;
        }
        let fragment = self.fragments.get(refid).or_else(|| {
            refid
                .rsplit_once('.')
                .and_then(|(_, local)| self.fragments.get(local))
        });
        if let Some(fragment) = fragment {
            self.out.push(' ');
            self.run(fragment, depth + 1);
            self.out.push(' ');
        } else {
            self.issues.push(format!("unknown sql fragment {refid}"));
            self.dynamic += 1;
        }
    }

    fn text(&mut self, text: &str) {
        self.out.push_str(&markup::decode_entities(text));
    }
}

/// Index of the `>` closing the tag that starts `tail`, honoring quoted
/// attribute values. `None` when `tail` does not start a tag.
fn tag_end(tail: &str) -> Option<usize> {
    let bytes = tail.as_bytes();
    let first = *bytes.get(1)?;
    if !(first.is_ascii_alphabetic() || first == b'/') {
        return None;
    }
    let mut quote = None;
    for (i, &b) in bytes.iter().enumerate().skip(1) {
        match (quote, b) {
            (None, b'"' | b'\'') => quote = Some(b),
            (Some(q), _) if q == b => quote = None,
            (None, b'>') => return Some(i),
            (None, b'<') => return None,
            _ => {}
        }
    }
    None
}

fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack.to_ascii_lowercase().find(needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EdgeKind, NodeKind, Target};

    const MAPPER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE mapper PUBLIC "-//mybatis.org//DTD Mapper 3.0//EN" "http://mybatis.org/dtd/mybatis-3-mapper.dtd">
<mapper namespace="com.acme.mapper.UserMapper">
  <!-- shared column list -->
  <sql id="cols">u.id, u.name, u.email</sql>

  <select id="selectAll" resultType="User">
    SELECT <include refid="cols"/> FROM users u
  </select>

  <select id="search" resultType="User">
    SELECT <include refid="cols"/> FROM users u
    <where>
      <if test="name != null">AND u.name LIKE #{name}</if>
      <if test="ids != null">AND u.id IN
        <foreach collection="ids" item="id" open="(" separator="," close=")">#{id}</foreach>
      </if>
      <![CDATA[ AND u.created_at < #{before} ]]>
    </where>
  </select>

  <insert id="insert">
    <selectKey keyProperty="id" resultType="long">SELECT LAST_INSERT_ID()</selectKey>
    INSERT INTO users (name, email) VALUES (#{name}, #{email})
  </insert>

  <delete id="purge">
    DELETE FROM audit_${suffix} WHERE created_at &lt; #{cutoff}
  </delete>
</mapper>
"#;

    fn extract_xml() -> FindingSet {
        SqlExtractor::new(ExtractOptions::default())
            .extract(MAPPER_XML, "src/main/resources/mapper/UserMapper.xml")
    }

    #[test]
    fn statements_are_namespaced() {
        let findings = extract_xml();
        assert_eq!(findings.scope.as_deref(), Some("com.acme.mapper"));
        let ids: Vec<_> = findings
            .definitions
            .iter()
            .filter(|d| d.kind == NodeKind::SqlStatement)
            .map(|d| d.signature.as_str())
            .collect();
        assert_eq!(
            ids,
            [
                "com.acme.mapper.UserMapper.selectAll",
                "com.acme.mapper.UserMapper.search",
                "com.acme.mapper.UserMapper.insert",
                "com.acme.mapper.UserMapper.purge",
            ]
        );
        let select_all = findings
            .definition("com.acme.mapper.UserMapper.selectAll")
            .unwrap();
        assert_eq!(select_all.lines.start, 7);
        assert_eq!(select_all.attributes["sql"], "SELECT u.id, u.name, u.email FROM users u");
        assert!(findings.issues.is_empty(), "{:?}", findings.issues);
    }

    #[test]
    fn dynamic_tags_reduce_confidence() {
        let findings = extract_xml();
        let search = findings
            .definition("com.acme.mapper.UserMapper.search")
            .unwrap();
        // two <if> plus one <foreach>
        assert_eq!(search.attributes["dynamic_fragments"], "3");
        let read = findings
            .references
            .iter()
            .find(|r| {
                r.from == "com.acme.mapper.UserMapper.search" && r.edge == EdgeKind::ReadsTable
            })
            .unwrap();
        assert!((read.confidence - 0.55).abs() < 1e-9);
        assert!(findings.references.iter().any(|r| {
            r.from == "com.acme.mapper.UserMapper.search"
                && r.target
                    == Target::Column {
                        table: Some("users".into()),
                        name: "created_at".into(),
                        candidates: vec!["users".into()],
                    }
        }));
    }

    #[test]
    fn select_key_is_not_part_of_the_insert() {
        let findings = extract_xml();
        let insert = findings
            .definition("com.acme.mapper.UserMapper.insert")
            .unwrap();
        assert!(!insert.attributes["sql"].contains("LAST_INSERT_ID"));
        assert!(findings.references.iter().any(|r| {
            r.from == "com.acme.mapper.UserMapper.insert"
                && r.edge == EdgeKind::WritesTable
                && r.target == Target::Table { name: "users".into() }
        }));
    }

    #[test]
    fn substituted_table_names_become_patterns() {
        let findings = extract_xml();
        assert!(findings.references.iter().any(|r| {
            r.from == "com.acme.mapper.UserMapper.purge"
                && r.edge == EdgeKind::WritesTable
                && r.target
                    == Target::TablePattern {
                        pattern: "audit_${suffix}".into(),
                    }
        }));
    }

    #[test]
    fn unterminated_statements_are_reported() {
        let xml = "<mapper namespace=\"a.B\">\n<select id=\"x\">SELECT 1 FROM t\n</mapper>";
        let findings = SqlExtractor::new(ExtractOptions::default()).extract(xml, "B.xml");
        assert_eq!(findings.issues.len(), 1);
        assert_eq!(findings.issues[0].line, 2);
        assert!(findings.definitions.is_empty());
    }

    #[test]
    fn scripts_number_their_statements() {
        let script = "-- nightly report\nSELECT * FROM orders WHERE status = 'open';\n\nCREATE TABLE tmp_totals (id INT);\nINSERT INTO tmp_totals SELECT id FROM orders;\n";
        let findings =
            SqlExtractor::new(ExtractOptions::default()).extract(script, "db/report.sql");
        let first = findings.definition("db/report.sql#1").unwrap();
        assert_eq!(first.lines.start, 2);
        assert_eq!(first.name, "report#1");
        assert!(findings.definition("db/report.sql#2").is_some());
        assert!(findings.defines(NodeKind::Table, "tmp_totals"));
        assert!(findings.references.iter().any(|r| {
            r.from == "db/report.sql#2"
                && r.edge == EdgeKind::WritesTable
                && r.target == Target::Table { name: "tmp_totals".into() }
        }));
    }

    #[test]
    fn flattens_trim_and_set() {
        let (text, dynamic, issues) = flatten_dynamic_sql(
            "UPDATE t <set><if test=\"a > 1\">a = #{a},</if></set> <trim prefix=\"WHERE\" suffix=\"\">id = 1</trim>",
            &BTreeMap::new(),
        );
        assert_eq!(text, "UPDATE t SET a = #{a} WHERE id = 1");
        assert_eq!(dynamic, 1);
        assert!(issues.is_empty());

        let (_, dynamic, issues) = flatten_dynamic_sql("<include refid=\"missing\"/>", &BTreeMap::new());
        assert_eq!(dynamic, 1);
        assert_eq!(issues.len(), 1);
    }
}
