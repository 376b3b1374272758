//! Permissive SQL tokenizer and table/column analysis.
//!
//! This is not a SQL parser. It recognizes enough structure to find which
//! tables a statement reads and writes and which columns it mentions, while
//! tolerating MyBatis placeholders (`#{}`), string substitutions (`${}`),
//! JDBC parameters (`?`, `:name`) and vendor syntax it does not know.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::extractors::ExtractOptions;
use crate::finding::{Definition, FindingSet, Reference, Target};
use crate::{EdgeKind, LineRange, NodeKind};

// ── Tokens ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Identifier or keyword. May embed `${}` substitutions.
    Word,
    /// Quoted identifier (`"x"`, `` `x` ``, `[x]`), quotes stripped.
    Quoted,
    Str,
    Number,
    /// Bind parameter: `?`, `:name`, `#{...}`.
    Param,
    /// A standalone `${...}` substitution.
    Dynamic,
    Punct(char),
    Op,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// Word contains a `${}` substitution.
    pub dynamic: bool,
    /// 1-based line within the tokenized text.
    pub line: u32,
}

impl Token {
    fn is_punct(&self, c: char) -> bool {
        self.kind == TokenKind::Punct(c)
    }

    fn is_name(&self) -> bool {
        matches!(self.kind, TokenKind::Word | TokenKind::Quoted)
    }

    /// Upper-cased keyword, if this token is a bare word that is a keyword.
    fn keyword(&self) -> Option<String> {
        if self.kind != TokenKind::Word || self.dynamic {
            return None;
        }
        let upper = self.text.to_ascii_uppercase();
        KEYWORDS.contains(&upper.as_str()).then_some(upper)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Tokenized {
    pub tokens: Vec<Token>,
    /// Count of `${}` substitutions seen.
    pub dynamic_fragments: usize,
    /// (line, message) problems: unterminated strings, comments, parens.
    pub issues: Vec<(u32, String)>,
}

const KEYWORDS: &[&str] = &[
    "ADD", "ALL", "ALTER", "AND", "ANY", "AS", "ASC", "BETWEEN", "BY", "CASCADE", "CASE", "CAST",
    "CHECK", "COLLATE", "COLUMN", "CONFLICT", "CONSTRAINT", "CREATE", "CROSS", "DEFAULT", "DELETE",
    "DESC", "DISTINCT", "DO", "DROP", "DUPLICATE", "ELSE", "END", "ESCAPE", "EXCEPT", "EXISTS",
    "EXTERNAL", "FALSE", "FETCH", "FIRST", "FOR", "FOREIGN", "FROM", "FULL", "FULLTEXT", "GLOBAL",
    "GROUP", "HAVING", "IF", "IGNORE", "ILIKE", "IN", "INDEX", "INNER", "INSERT", "INTERSECT",
    "INTERVAL", "INTO", "IS", "JOIN", "KEY", "LATERAL", "LEFT", "LIKE", "LIMIT", "LOCAL", "MATCHED",
    "MERGE", "MINUS", "MODIFY", "NATURAL", "NEXT", "NOT", "NOTHING", "NULL", "NULLS", "OFFSET",
    "ON", "ONLY", "OR", "ORDER", "OUTER", "OUTPUT", "OVER", "PARTITION", "PRIMARY", "RECURSIVE",
    "REFERENCES", "RENAME", "REPLACE", "RETURNING", "RIGHT", "ROW", "ROWS", "SELECT", "SET",
    "SOME", "SPATIAL", "TABLE", "TEMP", "TEMPORARY", "THEN", "TO", "TOP", "TRUE", "TRUNCATE",
    "UNION", "UNIQUE", "UPDATE", "USING", "VALUES", "VIEW", "WHEN", "WHERE", "WINDOW", "WITH",
];

const OPERATIONS: &[&str] = &[
    "SELECT", "INSERT", "UPDATE", "DELETE", "MERGE", "WITH", "CREATE", "ALTER", "DROP",
    "TRUNCATE", "REPLACE",
];

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '@'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$' || c == '@'
}

fn find_seq(chars: &[char], from: usize, pat: &[char]) -> Option<usize> {
    if pat.is_empty() || chars.len() < pat.len() {
        return None;
    }
    (from..=chars.len() - pat.len()).find(|&i| chars[i..i + pat.len()] == *pat)
}

fn push(out: &mut Tokenized, kind: TokenKind, text: String, dynamic: bool, line: u32) {
    out.tokens.push(Token {
        kind,
        text,
        dynamic,
        line,
    });
}

fn newlines(chars: &[char]) -> u32 {
    u32::try_from(chars.iter().filter(|&&c| c == '\n').count()).unwrap_or(u32::MAX)
}

/// Split SQL text into tokens. Never fails; problems are recorded as issues
/// and scanning stops at the first unterminated construct.
#[allow(clippy::too_many_lines)]
pub fn tokenize(text: &str) -> Tokenized {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let peek = |i: usize| chars.get(i).copied().unwrap_or('\0');
    let mut out = Tokenized::default();
    let mut line = 1u32;
    let mut i = 0;

    while i < len {
        let c = chars[i];
        if c == '\n' {
            line += 1;
            i += 1;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        // Comments
        if c == '-' && peek(i + 1) == '-' {
            while i < len && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if c == '/' && peek(i + 1) == '*' {
            if let Some(end) = find_seq(&chars, i + 2, &['*', '/']) {
                line += newlines(&chars[i..end]);
                i = end + 2;
                continue;
            }
            out.issues.push((line, "unterminated block comment".into()));
            break;
        }
        // String literal with '' and backslash escapes
        if c == '\'' {
            let mut j = i + 1;
            let mut closed = false;
            while j < len {
                match chars[j] {
                    '\\' => j += 2,
                    '\'' if peek(j + 1) == '\'' => j += 2,
                    '\'' => {
                        closed = true;
                        break;
                    }
                    _ => j += 1,
                }
            }
            if !closed {
                out.issues.push((line, "unterminated string literal".into()));
                break;
            }
            let body: String = chars[i + 1..j].iter().collect();
            push(&mut out, TokenKind::Str, body, false, line);
            line += newlines(&chars[i..j]);
            i = j + 1;
            continue;
        }
        // Quoted identifiers
        if matches!(c, '"' | '`' | '[') {
            let close = if c == '[' { ']' } else { c };
            match (i + 1..len).find(|&j| chars[j] == close) {
                Some(j) => {
                    let body: String = chars[i + 1..j].iter().collect();
                    push(&mut out, TokenKind::Quoted, body, false, line);
                    line += newlines(&chars[i..j]);
                    i = j + 1;
                }
                None => {
                    out.issues
                        .push((line, format!("unterminated quoted identifier `{c}`")));
                    break;
                }
            }
            continue;
        }
        // MyBatis bind parameter
        if c == '#' && peek(i + 1) == '{' {
            if let Some(j) = (i + 2..len).find(|&j| chars[j] == '}') {
                let body: String = chars[i..=j].iter().collect();
                push(&mut out, TokenKind::Param, body, false, line);
                i = j + 1;
                continue;
            }
            out.issues.push((line, "unterminated #{ placeholder".into()));
            break;
        }
        // Words, possibly with embedded ${} substitutions
        if is_ident_start(c) || (c == '$' && peek(i + 1) == '{') {
            let start_line = line;
            let mut word = String::new();
            let mut dynamic = false;
            let mut only_dynamic = true;
            let mut broken = false;
            while i < len {
                if chars[i] == '$' && peek(i + 1) == '{' {
                    if let Some(j) = (i + 2..len).find(|&j| chars[j] == '}') {
                        word.extend(&chars[i..=j]);
                        dynamic = true;
                        out.dynamic_fragments += 1;
                        i = j + 1;
                    } else {
                        out.issues.push((line, "unterminated ${ substitution".into()));
                        broken = true;
                        break;
                    }
                } else if is_ident_char(chars[i]) {
                    word.push(chars[i]);
                    only_dynamic = false;
                    i += 1;
                } else {
                    break;
                }
            }
            if broken {
                break;
            }
            let kind = if only_dynamic {
                TokenKind::Dynamic
            } else {
                TokenKind::Word
            };
            push(&mut out, kind, word, dynamic, start_line);
            continue;
        }
        if c == '?' {
            push(&mut out, TokenKind::Param, "?".into(), false, line);
            i += 1;
            continue;
        }
        if c == ':' {
            if peek(i + 1) == ':' {
                push(&mut out, TokenKind::Op, "::".into(), false, line);
                i += 2;
                continue;
            }
            if is_ident_start(peek(i + 1)) {
                let mut j = i + 1;
                while j < len && is_ident_char(chars[j]) {
                    j += 1;
                }
                let body: String = chars[i..j].iter().collect();
                push(&mut out, TokenKind::Param, body, false, line);
                i = j;
                continue;
            }
        }
        if c.is_ascii_digit() {
            let mut j = i;
            while j < len && (chars[j].is_ascii_alphanumeric() || chars[j] == '.') {
                j += 1;
            }
            let body: String = chars[i..j].iter().collect();
            push(&mut out, TokenKind::Number, body, false, line);
            i = j;
            continue;
        }
        if matches!(c, '(' | ')' | ',' | '.' | ';' | '*') {
            push(&mut out, TokenKind::Punct(c), c.to_string(), false, line);
        } else {
            push(&mut out, TokenKind::Op, c.to_string(), false, line);
        }
        i += 1;
    }

    check_parens(&mut out);
    out
}

fn check_parens(out: &mut Tokenized) {
    let mut depth = 0i64;
    for tok in &out.tokens {
        if tok.is_punct('(') {
            depth += 1;
        } else if tok.is_punct(')') {
            depth -= 1;
            if depth < 0 {
                out.issues
                    .push((tok.line, "unbalanced parentheses: unexpected `)`".into()));
                return;
            }
        }
    }
    if depth > 0 {
        let line = out.tokens.last().map_or(1, |t| t.line);
        out.issues
            .push((line, format!("unbalanced parentheses: {depth} unclosed")));
    }
}

// ── Analysis ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Access {
    Read,
    Write,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableUse {
    /// Lower-cased unqualified name, or the pattern text when dynamic.
    pub name: String,
    pub schema: Option<String>,
    pub access: Access,
    /// The name itself contains a `${}` substitution.
    pub pattern: bool,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnUse {
    pub table: Option<String>,
    pub name: String,
    pub candidates: Vec<String>,
    pub line: u32,
}

#[derive(Debug, Clone, Default)]
pub struct SqlAnalysis {
    /// Lower-cased leading operation keyword (`select`, `insert`, ...).
    pub operation: Option<String>,
    pub tables: Vec<TableUse>,
    pub columns: Vec<ColumnUse>,
    pub dynamic_fragments: usize,
    pub issues: Vec<(u32, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Clause {
    None,
    Select,
    From,
    Where,
    Set,
    On,
    Group,
    Values,
}

impl Clause {
    fn captures_columns(self) -> bool {
        matches!(
            self,
            Self::Select | Self::Where | Self::Set | Self::On | Self::Group
        )
    }
}

struct Scanner<'a> {
    toks: &'a [Token],
    ctes: HashSet<String>,
    /// alias → table (None for derived tables and CTEs)
    aliases: HashMap<String, Option<String>>,
    tables: Vec<TableUse>,
    qualified: Vec<(String, String, u32)>,
    bare: Vec<(String, u32)>,
    /// Output names introduced in the select list.
    output_aliases: HashSet<String>,
}

/// Analyze one SQL statement.
pub fn analyze(text: &str) -> SqlAnalysis {
    let tokenized = tokenize(text);
    let toks = &tokenized.tokens;
    let operation = toks
        .iter()
        .filter_map(Token::keyword)
        .find(|k| OPERATIONS.contains(&k.as_str()))
        .map(|k| k.to_ascii_lowercase());

    let mut scanner = Scanner {
        toks,
        ctes: collect_ctes(toks),
        aliases: HashMap::new(),
        tables: Vec::new(),
        qualified: Vec::new(),
        bare: Vec::new(),
        output_aliases: HashSet::new(),
    };
    scanner.scan();
    let columns = scanner.columns();

    let mut tables = scanner.tables;
    let mut seen = HashSet::new();
    tables.retain(|t| seen.insert((t.name.clone(), t.access)));

    SqlAnalysis {
        operation,
        tables,
        columns,
        dynamic_fragments: tokenized.dynamic_fragments,
        issues: tokenized.issues,
    }
}

/// Names introduced by `WITH name AS (...)`.
fn collect_ctes(toks: &[Token]) -> HashSet<String> {
    let mut ctes = HashSet::new();
    let mut i = 0;
    while i + 2 < toks.len() {
        if toks[i].is_name()
            && toks[i].keyword().is_none()
            && toks[i + 1].keyword().as_deref() == Some("AS")
            && toks[i + 2].is_punct('(')
        {
            let prev = i.checked_sub(1).map(|p| &toks[p]);
            let after_with = prev.is_some_and(|p| {
                p.is_punct(',') || matches!(p.keyword().as_deref(), Some("WITH" | "RECURSIVE"))
            });
            if after_with {
                ctes.insert(toks[i].text.to_ascii_lowercase());
            }
        }
        i += 1;
    }
    ctes
}

impl<'a> Scanner<'a> {
    fn tok(&self, i: usize) -> Option<&'a Token> {
        self.toks.get(i)
    }

    fn kw_at(&self, i: usize) -> Option<String> {
        self.tok(i).and_then(Token::keyword)
    }

    #[allow(clippy::too_many_lines)]
    fn scan(&mut self) {
        let mut clause = Clause::None;
        let mut stack: Vec<Clause> = Vec::new();
        let mut last_kw = String::new();
        let mut pending_delete = false;
        let toks = self.toks;
        let mut i = 0;

        while i < toks.len() {
            let tok = &toks[i];
            match tok.kind {
                TokenKind::Punct('(') => {
                    stack.push(clause);
                    i += 1;
                    continue;
                }
                TokenKind::Punct(')') => {
                    clause = stack.pop().unwrap_or(Clause::None);
                    i += 1;
                    // `(subquery) alias`
                    if clause == Clause::From {
                        i = self.skip_alias(i, None);
                    }
                    continue;
                }
                TokenKind::Punct(',') if clause == Clause::From => {
                    i = self.table_ref(i + 1, Access::Read);
                    continue;
                }
                _ => {}
            }

            if let Some(kw) = tok.keyword() {
                let mut next = i + 1;
                match kw.as_str() {
                    "SELECT" => clause = Clause::Select,
                    "FROM" => {
                        let access = if pending_delete {
                            Access::Write
                        } else {
                            Access::Read
                        };
                        pending_delete = false;
                        clause = Clause::From;
                        next = self.table_ref(i + 1, access);
                    }
                    "JOIN" => {
                        clause = Clause::From;
                        next = self.table_ref(i + 1, Access::Read);
                    }
                    "INTO" => {
                        next = self.table_ref(i + 1, Access::Write);
                        clause = Clause::None;
                        if self.tok(next).is_some_and(|t| t.is_punct('(')) {
                            next = self.insert_columns(next);
                        }
                    }
                    "UPDATE" => {
                        if matches!(last_kw.as_str(), "KEY" | "DO") {
                            clause = Clause::Set;
                        } else {
                            next = self.table_ref(i + 1, Access::Write);
                        }
                    }
                    "DELETE" => {
                        pending_delete = true;
                        if self
                            .tok(i + 1)
                            .is_some_and(|t| t.is_name() && t.keyword().is_none())
                        {
                            pending_delete = false;
                            next = self.table_ref(i + 1, Access::Write);
                        }
                    }
                    "USING" => {
                        if !self.tok(i + 1).is_some_and(|t| t.is_punct('(')) {
                            next = self.table_ref(i + 1, Access::Read);
                        }
                    }
                    "TRUNCATE" => {
                        let start = if self.kw_at(i + 1).as_deref() == Some("TABLE") {
                            i + 2
                        } else {
                            i + 1
                        };
                        next = self.table_ref(start, Access::Write);
                    }
                    "TABLE"
                        if matches!(
                            last_kw.as_str(),
                            "CREATE" | "ALTER" | "DROP" | "TEMPORARY" | "TEMP" | "GLOBAL"
                                | "LOCAL" | "EXTERNAL"
                        ) =>
                    {
                        let mut start = i + 1;
                        while matches!(
                            self.kw_at(start).as_deref(),
                            Some("IF" | "NOT" | "EXISTS" | "ONLY")
                        ) {
                            start += 1;
                        }
                        next = self.table_ref(start, Access::Write);
                        clause = Clause::None;
                    }
                    "SET" => clause = Clause::Set,
                    "WHERE" | "HAVING" => clause = Clause::Where,
                    "ON" => clause = Clause::On,
                    "BY" if matches!(last_kw.as_str(), "GROUP" | "ORDER" | "PARTITION") => {
                        clause = Clause::Group;
                    }
                    "VALUES" => clause = Clause::Values,
                    "LIMIT" | "OFFSET" | "UNION" | "EXCEPT" | "INTERSECT" | "MINUS"
                    | "RETURNING" => clause = Clause::None,
                    "AS" => {
                        if let Some(alias) = self.tok(i + 1).filter(|t| t.is_name()) {
                            if clause == Clause::Select {
                                self.output_aliases.insert(alias.text.to_ascii_lowercase());
                            }
                            next = i + 2;
                        }
                    }
                    _ => {}
                }
                last_kw = kw;
                i = next;
                continue;
            }

            if tok.is_name() && !tok.dynamic {
                i = self.column_candidate(i, clause);
                continue;
            }
            i += 1;
        }
    }

    /// Read a (possibly qualified) table reference with optional alias.
    fn table_ref(&mut self, mut i: usize, access: Access) -> usize {
        while matches!(self.kw_at(i).as_deref(), Some("ONLY" | "LATERAL" | "TABLE")) {
            i += 1;
        }
        let Some(first) = self.tok(i) else {
            return i;
        };
        if first.is_punct('(') || first.keyword().is_some() {
            return i;
        }
        if !matches!(
            first.kind,
            TokenKind::Word | TokenKind::Quoted | TokenKind::Dynamic
        ) {
            return i;
        }

        let line = first.line;
        let mut parts: Vec<&Token> = vec![first];
        let mut j = i + 1;
        while self.tok(j).is_some_and(|t| t.is_punct('.'))
            && self.tok(j + 1).is_some_and(|t| {
                matches!(
                    t.kind,
                    TokenKind::Word | TokenKind::Quoted | TokenKind::Dynamic
                )
            })
        {
            if let Some(part) = self.tok(j + 1) {
                parts.push(part);
            }
            j += 2;
        }

        // Table-valued function in a source position. A write target followed
        // by `(` is a column list: `INSERT INTO t (a, b)`.
        if access == Access::Read && self.tok(j).is_some_and(|t| t.is_punct('(')) {
            return j;
        }

        let Some(last) = parts.last() else {
            return j;
        };
        let name = last.text.to_ascii_lowercase();
        let schema = (parts.len() >= 2)
            .then(|| parts[parts.len() - 2])
            .filter(|p| !p.dynamic && p.kind != TokenKind::Dynamic)
            .map(|p| p.text.to_ascii_lowercase());

        let table = if last.kind == TokenKind::Dynamic {
            // Entirely substituted name: nothing static to match on.
            None
        } else if self.ctes.contains(&name) {
            None
        } else {
            self.tables.push(TableUse {
                name: name.clone(),
                schema,
                access,
                pattern: last.dynamic,
                line,
            });
            Some(name.clone())
        };
        if table.is_some() || self.ctes.contains(&name) {
            self.aliases.insert(name.clone(), table.clone());
        }
        self.skip_alias(j, table)
    }

    /// Consume `[AS] alias` after a table reference and record it.
    fn skip_alias(&mut self, mut i: usize, table: Option<String>) -> usize {
        if self.kw_at(i).as_deref() == Some("AS") {
            i += 1;
        }
        if let Some(tok) = self.tok(i) {
            if tok.is_name() && tok.keyword().is_none() && !tok.dynamic {
                let followed_by_dot = self.tok(i + 1).is_some_and(|t| t.is_punct('.'));
                if !followed_by_dot {
                    self.aliases.insert(tok.text.to_ascii_lowercase(), table);
                    return i + 1;
                }
            }
        }
        i
    }

    /// `INSERT INTO t (a, b, c)`: every name is a column of the last table.
    fn insert_columns(&mut self, open: usize) -> usize {
        let table = self
            .tables
            .last()
            .filter(|t| !t.pattern)
            .map(|t| t.name.clone());
        let mut depth = 0usize;
        let mut i = open;
        while let Some(tok) = self.tok(i) {
            if tok.is_punct('(') {
                depth += 1;
            } else if tok.is_punct(')') {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i + 1;
                }
            } else if depth == 1 && tok.is_name() && !tok.dynamic {
                if let Some(table) = &table {
                    self.qualified
                        .push((table.clone(), tok.text.to_ascii_lowercase(), tok.line));
                }
            }
            i += 1;
        }
        i
    }

    fn column_candidate(&mut self, i: usize, clause: Clause) -> usize {
        let toks = self.toks;
        let tok = &toks[i];
        // Qualified chain a.b[.c]
        if self.tok(i + 1).is_some_and(|t| t.is_punct('.')) {
            let mut parts: Vec<&Token> = vec![tok];
            let mut j = i + 1;
            while self.tok(j).is_some_and(|t| t.is_punct('.')) {
                match self.tok(j + 1) {
                    Some(t) if t.is_name() || t.is_punct('*') => parts.push(t),
                    _ => break,
                }
                j += 2;
            }
            let is_call = self.tok(j).is_some_and(|t| t.is_punct('('));
            if clause.captures_columns() && parts.len() >= 2 && !is_call {
                let col = parts[parts.len() - 1];
                let qualifier = parts[parts.len() - 2];
                if col.is_name() && !col.dynamic && !qualifier.dynamic {
                    self.qualified.push((
                        qualifier.text.to_ascii_lowercase(),
                        col.text.to_ascii_lowercase(),
                        col.line,
                    ));
                }
            }
            return j;
        }

        if !clause.captures_columns() {
            return i + 1;
        }
        if self.tok(i + 1).is_some_and(|t| t.is_punct('(')) {
            return i + 1;
        }
        if clause == Clause::Select {
            let prev = i.checked_sub(1).and_then(|p| self.tok(p));
            let is_alias = prev.is_some_and(|p| {
                (p.is_name() && p.keyword().is_none())
                    || p.is_punct(')')
                    || matches!(p.kind, TokenKind::Str | TokenKind::Number)
            });
            if is_alias {
                self.output_aliases.insert(tok.text.to_ascii_lowercase());
                return i + 1;
            }
        }
        let name = tok.text.to_ascii_lowercase();
        if self.aliases.contains_key(&name) || self.ctes.contains(&name) {
            return i + 1;
        }
        self.bare.push((name, tok.line));
        i + 1
    }

    fn columns(&self) -> Vec<ColumnUse> {
        let static_tables: Vec<String> = {
            let mut seen = HashSet::new();
            self.tables
                .iter()
                .filter(|t| !t.pattern)
                .filter(|t| seen.insert(t.name.clone()))
                .map(|t| t.name.clone())
                .collect()
        };
        let mut out: Vec<ColumnUse> = Vec::new();
        let mut seen = HashSet::new();
        for (qualifier, name, line) in &self.qualified {
            let table = match self.aliases.get(qualifier) {
                Some(Some(table)) => table.clone(),
                Some(None) => continue,
                None => qualifier.clone(),
            };
            if seen.insert((Some(table.clone()), name.clone())) {
                out.push(ColumnUse {
                    table: Some(table.clone()),
                    name: name.clone(),
                    candidates: vec![table],
                    line: *line,
                });
            }
        }
        if static_tables.is_empty() {
            return out;
        }
        for (name, line) in &self.bare {
            // Aliases declared after first use (`SELECT x AS y ... ORDER BY y`).
            if self.output_aliases.contains(name) || self.aliases.contains_key(name) {
                continue;
            }
            let table = (static_tables.len() == 1).then(|| static_tables[0].clone());
            if seen.insert((table.clone(), name.clone())) {
                out.push(ColumnUse {
                    table,
                    name: name.clone(),
                    candidates: static_tables.clone(),
                    line: *line,
                });
            }
        }
        out
    }
}

// ── Emitting findings ──────────────────────────────────────────────

/// Everything needed to turn one piece of SQL text into findings.
#[derive(Debug, Clone)]
pub struct StatementSpec<'a> {
    pub signature: &'a str,
    pub name: &'a str,
    pub lines: LineRange,
    pub text: &'a str,
    /// Dynamic fragments found outside the SQL text itself (MyBatis
    /// dynamic tags, Java string concatenation).
    pub extra_dynamic: usize,
    pub attributes: BTreeMap<String, String>,
}

/// Add a `SqlStatement` definition plus its table and column references.
pub fn emit_statement(findings: &mut FindingSet, stmt: StatementSpec<'_>, options: &ExtractOptions) {
    let analysis = analyze(stmt.text);
    let fragments = analysis.dynamic_fragments + stmt.extra_dynamic;
    let confidence = options.dynamic_confidence(fragments);
    let base_line = stmt.lines.start.max(1);
    let at = |rel: u32| base_line + rel.saturating_sub(1);

    let mut def = Definition::new(NodeKind::SqlStatement, stmt.signature, stmt.name, stmt.lines)
        .with_attr("dynamic_fragments", fragments.to_string())
        .with_attr("sql", compact_whitespace(stmt.text));
    if let Some(op) = &analysis.operation {
        def = def.with_attr("operation", op.clone());
    }
    for (k, v) in stmt.attributes {
        def.attributes.insert(k, v);
    }
    findings.define(def);

    for (line, message) in &analysis.issues {
        findings.issue(at(*line), format!("{}: {message}", stmt.signature));
    }

    for table in &analysis.tables {
        let edge = match table.access {
            Access::Read => EdgeKind::ReadsTable,
            Access::Write => EdgeKind::WritesTable,
        };
        let target = if table.pattern {
            Target::TablePattern {
                pattern: table.name.clone(),
            }
        } else {
            Target::Table {
                name: table.name.clone(),
            }
        };
        let mut reference = Reference::new(
            NodeKind::SqlStatement,
            stmt.signature,
            edge,
            target,
            at(table.line),
        )
        .with_confidence(confidence);
        if let Some(schema) = &table.schema {
            reference = reference.with_note(format!("schema {schema}"));
        }
        findings.refer(reference);
    }

    for column in &analysis.columns {
        findings.refer(
            Reference::new(
                NodeKind::SqlStatement,
                stmt.signature,
                EdgeKind::ReferencesColumn,
                Target::Column {
                    table: column.table.clone(),
                    name: column.name.clone(),
                    candidates: column.candidates.clone(),
                },
                at(column.line),
            )
            .with_confidence(confidence),
        );
    }
}

/// Collapse runs of whitespace to single spaces.
pub fn compact_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether text plausibly starts a SQL statement.
pub fn looks_like_sql(text: &str) -> bool {
    let first = text
        .trim_start()
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();
    matches!(
        first.as_str(),
        "SELECT" | "INSERT" | "UPDATE" | "DELETE" | "MERGE" | "WITH" | "REPLACE" | "TRUNCATE"
    )
}

// ── Scripts ────────────────────────────────────────────────────────

/// One statement of a `.sql` script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptStatement<'a> {
    pub text: &'a str,
    pub start_line: u32,
    pub end_line: u32,
}

/// Split a script at top-level semicolons, respecting strings and comments.
pub fn split_script(text: &str) -> Vec<ScriptStatement<'_>> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut start = 0;
    let mut line = 1u32;
    let mut start_line = 1u32;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\n' => line += 1,
            b'\'' | b'"' | b'`' => {
                let quote = bytes[i];
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\n' {
                        line += 1;
                    }
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    if bytes[i] == b'\n' {
                        line += 1;
                    }
                    i += 1;
                }
                i += 1;
            }
            b';' => {
                flush_statement(&mut out, &text[start..i], start_line, line);
                start = i + 1;
                start_line = line;
            }
            _ => {}
        }
        i += 1;
    }
    if start < text.len() {
        flush_statement(&mut out, &text[start..], start_line, line);
    }
    out
}

fn flush_statement<'a>(out: &mut Vec<ScriptStatement<'a>>, piece: &'a str, first: u32, last: u32) {
    if strip_comments(piece).trim().is_empty() {
        return;
    }
    let leading = leading_trivia(piece);
    let skipped = u32::try_from(piece[..leading].matches('\n').count()).unwrap_or(0);
    out.push(ScriptStatement {
        text: piece[leading..].trim_end(),
        start_line: first + skipped,
        end_line: last,
    });
}

/// Byte length of the whitespace and comments before a statement's first token.
fn leading_trivia(piece: &str) -> usize {
    let mut rest = piece;
    loop {
        let trimmed = rest.trim_start();
        if let Some(comment) = trimmed.strip_prefix("--") {
            rest = comment.find('\n').map_or("", |nl| &comment[nl..]);
        } else if let Some(comment) = trimmed.strip_prefix("/*") {
            rest = comment.find("*/").map_or("", |end| &comment[end + 2..]);
        } else {
            return piece.len() - trimmed.len();
        }
    }
}

/// Remove `--` and `/* */` comments (approximately; quotes are not tracked).
pub fn strip_comments(text: &str) -> String {
    text.lines()
        .map(|l| l.split("--").next().unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\n")
        .split("/*")
        .enumerate()
        .map(|(n, part)| {
            if n == 0 {
                part
            } else {
                part.split_once("*/").map_or("", |(_, rest)| rest)
            }
        })
        .collect()
}

// ── DDL ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdlColumn {
    pub name: String,
    pub data_type: Option<String>,
    pub nullable: bool,
    pub key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdlTable {
    pub schema: Option<String>,
    pub name: String,
    pub columns: Vec<DdlColumn>,
    pub line: u32,
}

/// Extract `CREATE TABLE` definitions from a DDL dump.
pub fn parse_create_tables(text: &str) -> (Vec<DdlTable>, Vec<(u32, String)>) {
    let tokenized = tokenize(text);
    let toks = &tokenized.tokens;
    let mut tables = Vec::new();
    let mut i = 0;
    while i < toks.len() {
        if toks[i].keyword().as_deref() != Some("CREATE") {
            i += 1;
            continue;
        }
        let mut j = i + 1;
        while matches!(
            toks.get(j).and_then(Token::keyword).as_deref(),
            Some("TEMPORARY" | "TEMP" | "GLOBAL" | "LOCAL" | "EXTERNAL" | "OR" | "REPLACE")
        ) {
            j += 1;
        }
        if toks.get(j).and_then(Token::keyword).as_deref() != Some("TABLE") {
            i = j.max(i + 1);
            continue;
        }
        j += 1;
        while matches!(
            toks.get(j).and_then(Token::keyword).as_deref(),
            Some("IF" | "NOT" | "EXISTS")
        ) {
            j += 1;
        }
        let mut parts = Vec::new();
        while let Some(t) = toks.get(j) {
            if !t.is_name() {
                break;
            }
            parts.push(t.text.to_ascii_lowercase());
            if toks.get(j + 1).is_some_and(|n| n.is_punct('.')) {
                j += 2;
            } else {
                j += 1;
                break;
            }
        }
        let Some(name) = parts.pop() else {
            i = j;
            continue;
        };
        let line = toks.get(i).map_or(1, |t| t.line);
        let (columns, end) = if toks.get(j).is_some_and(|t| t.is_punct('(')) {
            parse_column_defs(toks, j)
        } else {
            (Vec::new(), j)
        };
        tables.push(DdlTable {
            schema: parts.pop(),
            name,
            columns,
            line,
        });
        i = end.max(i + 1);
    }
    (tables, tokenized.issues)
}

fn parse_column_defs(toks: &[Token], open: usize) -> (Vec<DdlColumn>, usize) {
    let mut elements: Vec<Vec<&Token>> = vec![Vec::new()];
    let mut depth = 0usize;
    let mut i = open;
    while let Some(tok) = toks.get(i) {
        if tok.is_punct('(') {
            depth += 1;
            if depth == 1 {
                i += 1;
                continue;
            }
        } else if tok.is_punct(')') {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                i += 1;
                break;
            }
        } else if tok.is_punct(',') && depth == 1 {
            elements.push(Vec::new());
            i += 1;
            continue;
        }
        if let Some(current) = elements.last_mut() {
            current.push(tok);
        }
        i += 1;
    }

    let mut columns: Vec<DdlColumn> = Vec::new();
    let mut primary: Vec<String> = Vec::new();
    for element in elements.iter().filter(|e| !e.is_empty()) {
        let head = element[0];
        match head.keyword().as_deref() {
            Some("PRIMARY") => {
                primary.extend(
                    element
                        .iter()
                        .skip(2)
                        .filter(|t| t.is_name() && t.keyword().is_none())
                        .map(|t| t.text.to_ascii_lowercase()),
                );
                continue;
            }
            Some(
                "CONSTRAINT" | "UNIQUE" | "KEY" | "INDEX" | "FOREIGN" | "CHECK" | "FULLTEXT"
                | "SPATIAL",
            ) => continue,
            _ => {}
        }
        if !head.is_name() {
            continue;
        }
        let data_type = element.get(1).map(|t| {
            let mut ty = t.text.clone();
            if element.get(2).is_some_and(|p| p.is_punct('(')) {
                let args: Vec<&str> = element
                    .iter()
                    .skip(3)
                    .take_while(|p| !p.is_punct(')'))
                    .map(|p| p.text.as_str())
                    .collect();
                ty = format!("{ty}({})", args.join(""));
            }
            ty
        });
        let upper: Vec<String> = element.iter().filter_map(|t| t.keyword()).collect();
        let has_pair = |a: &str, b: &str| upper.windows(2).any(|w| w[0] == a && w[1] == b);
        let key = if has_pair("PRIMARY", "KEY") {
            Some("PRI".to_string())
        } else if upper.iter().any(|k| k == "UNIQUE") {
            Some("UNI".to_string())
        } else {
            None
        };
        columns.push(DdlColumn {
            name: head.text.to_ascii_lowercase(),
            data_type,
            nullable: !has_pair("NOT", "NULL") && key.as_deref() != Some("PRI"),
            key,
        });
    }
    for column in &mut columns {
        if primary.contains(&column.name) {
            column.key = Some("PRI".to_string());
            column.nullable = false;
        }
    }
    (columns, i)
}
