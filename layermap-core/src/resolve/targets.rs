// Candidate search per target descriptor, in rank order: identity, then
// unique name, then heuristic similarity.

use layermap_extract::{NodeKind, Target, TypeRef, normalize_route, route_stem};

use super::view::View;
use crate::graph::{node_routes, route_tail, simple_type_name, statement_tail};
use crate::hash;
use crate::types::{LookupKey, Node, NodeId, attr, display_name};

const SIMILARITY_EPSILON: f64 = 1e-9;

/// Similarity of a member match whose arity differs.
const ARITY_MISMATCH_SIMILARITY: f64 = 0.6;

/// Similarity of a statement match from another namespace.
const FOREIGN_NAMESPACE_SIMILARITY: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Rank {
    Exact,
    Name,
    Fuzzy,
}

impl Rank {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Name => "name",
            Self::Fuzzy => "fuzzy",
        }
    }
}

/// The best-ranked candidates for one reference. Fuzzy matches keep only
/// the candidates sharing the highest similarity.
#[derive(Debug)]
pub(crate) struct Matches<'a> {
    pub rank: Rank,
    pub nodes: Vec<&'a Node>,
    pub similarity: f64,
}

pub(crate) struct Search<'v, 'a> {
    view: &'v mut View<'a>,
    /// The referencing definition never matches itself by name.
    exclude: NodeId,
    min_similarity: f64,
}

impl<'v, 'a> Search<'v, 'a> {
    pub(crate) fn new(view: &'v mut View<'a>, exclude: NodeId, min_similarity: f64) -> Self {
        Self {
            view,
            exclude,
            min_similarity,
        }
    }

    pub(crate) fn find(&mut self, target: &Target, relative: bool) -> Option<Matches<'a>> {
        match target {
            Target::Member {
                owner,
                member,
                arity,
                kinds,
            } => self.member(owner.as_ref(), member, *arity, kinds),
            Target::Type { type_ref, .. } => self.type_ref(type_ref),
            Target::Route { path, method } => self.route(path, method.as_deref(), relative),
            Target::Resource { path } => self.resource(path),
            Target::Statement { id } => self.statement(id),
            Target::Table { name } => self.table(name),
            Target::TablePattern { pattern } => self.table_pattern(pattern),
            Target::Column {
                table,
                name,
                candidates,
            } => self.column(table.as_deref(), name, candidates),
        }
    }

    fn exact(&self, nodes: Vec<&'a Node>) -> Option<Matches<'a>> {
        (!nodes.is_empty()).then_some(Matches {
            rank: Rank::Exact,
            nodes,
            similarity: 1.0,
        })
    }

    fn named(&self, mut nodes: Vec<&'a Node>) -> Option<Matches<'a>> {
        nodes.retain(|n| n.id != self.exclude);
        nodes.sort_by_key(|n| n.id);
        nodes.dedup_by_key(|n| n.id);
        (!nodes.is_empty()).then_some(Matches {
            rank: Rank::Name,
            nodes,
            similarity: 1.0,
        })
    }

    fn fuzzy(&self, scored: Vec<(&'a Node, f64)>) -> Option<Matches<'a>> {
        let scored: Vec<_> = scored
            .into_iter()
            .filter(|(n, s)| n.id != self.exclude && *s >= self.min_similarity)
            .collect();
        let best = scored.iter().map(|(_, s)| *s).fold(0.0_f64, f64::max);
        let mut nodes: Vec<&Node> = scored
            .into_iter()
            .filter(|(_, s)| (best - s).abs() < SIMILARITY_EPSILON)
            .map(|(n, _)| n)
            .collect();
        nodes.sort_by_key(|n| n.id);
        nodes.dedup_by_key(|n| n.id);
        (!nodes.is_empty()).then_some(Matches {
            rank: Rank::Fuzzy,
            nodes,
            similarity: best,
        })
    }

    fn member(
        &mut self,
        owner: Option<&TypeRef>,
        member: &str,
        arity: Option<usize>,
        kinds: &[NodeKind],
    ) -> Option<Matches<'a>> {
        let hits = self.view.lookup(LookupKey::Member(member.to_ascii_lowercase()));
        let kind_ok = |n: &Node| n.kind.is_method() && (kinds.is_empty() || kinds.contains(&n.kind));

        if let Some(owner) = owner {
            for fqcn in qualified_names(owner) {
                let found: Vec<&Node> = match arity {
                    Some(n) => self
                        .view
                        .node(hash::node_id(NodeKind::ServiceMethod, &format!("{fqcn}.{member}/{n}")))
                        .filter(|n| n.kind.is_method())
                        .into_iter()
                        .collect(),
                    None => hits
                        .iter()
                        .copied()
                        .filter(|n| {
                            n.attr(attr::OWNER) == Some(fqcn) && display_name(&n.signature) == member
                        })
                        .collect(),
                };
                if let Some(m) = self.exact(found) {
                    return Some(m);
                }
            }
        }

        let named: Vec<&Node> = hits
            .iter()
            .copied()
            .filter(|n| kind_ok(n) && display_name(&n.signature) == member && arity_matches(n, arity))
            .collect();
        if let Some(owner) = owner {
            let simple = owner.simple_name();
            let owned: Vec<&Node> = named
                .iter()
                .copied()
                .filter(|n| n.attr(attr::OWNER).is_some_and(|o| simple_type_name(o) == simple))
                .collect();
            if let Some(m) = self.named(owned) {
                return Some(m);
            }
        }
        if let Some(m) = self.named(named) {
            return Some(m);
        }

        self.fuzzy(
            hits.into_iter()
                .filter(|n| kind_ok(n))
                .map(|n| {
                    let similarity = if arity_matches(n, arity) {
                        1.0
                    } else {
                        ARITY_MISMATCH_SIMILARITY
                    };
                    (n, similarity)
                })
                .collect(),
        )
    }

    fn type_ref(&mut self, type_ref: &TypeRef) -> Option<Matches<'a>> {
        let simple = type_ref.simple_name();
        let hits = self.view.lookup(LookupKey::Type(simple.to_ascii_lowercase()));
        for fqcn in qualified_names(type_ref) {
            let found = self
                .view
                .node(hash::node_id(NodeKind::Service, fqcn))
                .filter(|n| n.kind.is_type());
            if let Some(node) = found {
                return self.exact(vec![node]);
            }
        }
        let types = || hits.iter().copied().filter(|n| n.kind.is_type());
        self.named(types().filter(|n| simple_type_name(&n.signature) == simple).collect())
            .or_else(|| self.fuzzy(types().map(|n| (n, 1.0)).collect()))
    }

    fn route(&mut self, path: &str, method: Option<&str>, relative: bool) -> Option<Matches<'a>> {
        let route = normalize_route(path);
        let tail = route_tail(&route);
        let by_stem = self.view.lookup(LookupKey::Route(route_stem(&route)));
        let accepting: Vec<&Node> = by_stem
            .iter()
            .copied()
            .filter(|n| accepts(n, method))
            .collect();

        let exact: Vec<&Node> = accepting
            .iter()
            .copied()
            .filter(|n| node_routes(n).contains(&route))
            .collect();
        if let Some(m) = self.exact(exact) {
            return Some(m);
        }
        let named = if accepting.is_empty() { by_stem } else { accepting };
        if let Some(m) = self.named(named) {
            return Some(m);
        }

        let mut pool = if tail == "{}" {
            self.view.lookup(LookupKey::Kind(NodeKind::ControllerMethod))
        } else {
            self.view.lookup(LookupKey::RouteTail(tail))
        };
        pool.extend(self.view.lookup(LookupKey::RouteTail("{}".into())));
        self.fuzzy(
            pool.into_iter()
                .filter(|n| accepts(n, method))
                .filter_map(|n| {
                    node_routes(n)
                        .iter()
                        .filter_map(|r| route_similarity(&route, r, relative))
                        .reduce(f64::max)
                        .map(|s| (n, s))
                })
                .collect(),
        )
    }

    fn resource(&mut self, path: &str) -> Option<Matches<'a>> {
        let base = display_name(path);
        let hits = self.view.lookup(LookupKey::Page(base.to_ascii_lowercase()));
        let exact = self
            .view
            .node(hash::node_id(NodeKind::Page, path))
            .filter(|n| matches!(n.kind, NodeKind::Page | NodeKind::Include));
        if let Some(node) = exact {
            return self.exact(vec![node]);
        }
        self.named(
            hits.iter()
                .copied()
                .filter(|n| display_name(&n.signature) == base)
                .collect(),
        )
        .or_else(|| {
            self.fuzzy(
                hits.iter()
                    .map(|n| (*n, trailing_similarity(path, &n.signature)))
                    .collect(),
            )
        })
    }

    fn statement(&mut self, id: &str) -> Option<Matches<'a>> {
        let hits = self.view.lookup(LookupKey::Statement(statement_tail(id)));
        if let Some(node) = self
            .view
            .node(hash::node_id(NodeKind::SqlStatement, id))
            .filter(|n| n.kind == NodeKind::SqlStatement)
        {
            return self.exact(vec![node]);
        }

        let last = id.rsplit('.').next().unwrap_or(id);
        let namespace = namespace_name(id);
        let named: Vec<&Node> = hits
            .iter()
            .copied()
            .filter(|n| n.signature.rsplit('.').next() == Some(last))
            .collect();
        let same_namespace: Vec<&Node> = named
            .iter()
            .copied()
            .filter(|n| namespace.is_some() && namespace_name(&n.signature) == namespace)
            .collect();
        self.named(same_namespace)
            .or_else(|| self.named(named))
            .or_else(|| {
                self.fuzzy(
                    hits.iter()
                        .map(|n| {
                            let same = match (namespace, namespace_name(&n.signature)) {
                                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                                _ => false,
                            };
                            let similarity = if same { 1.0 } else { FOREIGN_NAMESPACE_SIMILARITY };
                            (*n, similarity)
                        })
                        .collect(),
                )
            })
    }

    fn table(&mut self, name: &str) -> Option<Matches<'a>> {
        let name = table_name(name);
        self.view.record(LookupKey::Table(name.clone()));
        let node = self
            .view
            .node(hash::node_id(NodeKind::Table, &name))
            .filter(|n| n.kind == NodeKind::Table)?;
        self.exact(vec![node])
    }

    fn table_pattern(&mut self, pattern: &str) -> Option<Matches<'a>> {
        let pattern = TablePattern::parse(pattern)?;
        let tables = self.view.lookup(LookupKey::Kind(NodeKind::Table));
        self.fuzzy(
            tables
                .into_iter()
                .filter_map(|t| pattern.similarity(&t.signature).map(|s| (t, s)))
                .collect(),
        )
    }

    fn column(&mut self, table: Option<&str>, name: &str, candidates: &[String]) -> Option<Matches<'a>> {
        let name = name.to_ascii_lowercase();
        let hits = self.view.lookup(LookupKey::Column(name.clone()));
        let tables: Vec<String> = table
            .map(table_name)
            .into_iter()
            .chain(candidates.iter().map(|c| table_name(c)))
            .collect();
        for t in &tables {
            let found = self
                .view
                .node(hash::node_id(NodeKind::Column, &format!("{t}.{name}")))
                .filter(|n| n.kind == NodeKind::Column);
            if let Some(node) = found {
                return self.exact(vec![node]);
            }
        }
        let in_tables: Vec<&Node> = hits
            .iter()
            .copied()
            .filter(|n| {
                n.signature
                    .rsplit_once('.')
                    .is_some_and(|(t, _)| tables.iter().any(|c| c == t))
            })
            .collect();
        self.named(in_tables).or_else(|| self.named(hits))
    }
}

/// Signature a definition satisfying `target` would have.
pub(crate) fn expected_signature(target: &Target) -> String {
    match target {
        Target::Member {
            owner,
            member,
            arity,
            ..
        } => {
            let base = match owner {
                Some(o) => format!("{}.{member}", o.primary()),
                None => member.clone(),
            };
            match arity {
                Some(n) => format!("{base}/{n}"),
                None => base,
            }
        }
        Target::Type { type_ref, .. } => type_ref.primary().to_string(),
        Target::Route { path, .. } => format!("route:{}", normalize_route(path)),
        Target::Resource { path } => path.clone(),
        Target::Statement { id } => id.clone(),
        Target::Table { name } => table_name(name),
        Target::TablePattern { pattern } => pattern.to_ascii_lowercase(),
        Target::Column {
            table,
            name,
            candidates,
        } => {
            let table = table
                .as_deref()
                .or_else(|| candidates.first().map(String::as_str))
                .map_or_else(|| "?".to_string(), table_name);
            format!("{table}.{}", name.to_ascii_lowercase())
        }
    }
}

fn qualified_names(type_ref: &TypeRef) -> impl Iterator<Item = &str> {
    let fallback = type_ref
        .candidates
        .is_empty()
        .then_some(type_ref.name.as_str());
    type_ref.candidates.iter().map(String::as_str).chain(fallback)
}

fn arity_matches(node: &Node, arity: Option<usize>) -> bool {
    let Some(arity) = arity else {
        return true;
    };
    node.signature
        .rsplit_once('/')
        .and_then(|(_, n)| n.parse::<usize>().ok())
        == Some(arity)
}

/// Whether a controller method accepts the HTTP verb. Methods without
/// declared verbs, and requests without one, match anything.
fn accepts(node: &Node, method: Option<&str>) -> bool {
    let Some(method) = method else {
        return true;
    };
    match node.attr(attr::HTTP_METHODS).map(str::trim) {
        None | Some("") => true,
        Some(verbs) => verbs.split(',').any(|v| v.trim().eq_ignore_ascii_case(method)),
    }
}

fn is_template(segment: &str) -> bool {
    segment.contains('{')
}

fn stem_segments(route: &str) -> Vec<String> {
    route_stem(route)
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Share of literally equal segments when `request` fits `route`, where a
/// template segment on either side matches anything. Relative requests
/// may match a suffix of the route.
pub(crate) fn route_similarity(request: &str, route: &str, relative: bool) -> Option<f64> {
    let req = stem_segments(request);
    let full = stem_segments(route);
    if req.is_empty() || full.is_empty() {
        return None;
    }
    let compared = if req.len() == full.len() {
        &full[..]
    } else if relative && req.len() < full.len() {
        &full[full.len() - req.len()..]
    } else {
        return None;
    };
    let mut literal = 0usize;
    for (a, b) in req.iter().zip(compared) {
        if is_template(a) || is_template(b) {
            continue;
        }
        if a != b {
            return None;
        }
        literal += 1;
    }
    #[allow(clippy::cast_precision_loss)]
    let similarity = literal as f64 / full.len() as f64;
    Some(similarity)
}

/// Share of trailing path segments two web paths have in common.
fn trailing_similarity(a: &str, b: &str) -> f64 {
    let left: Vec<&str> = a.split('/').filter(|s| !s.is_empty()).collect();
    let right: Vec<&str> = b.split('/').filter(|s| !s.is_empty()).collect();
    let common = left
        .iter()
        .rev()
        .zip(right.iter().rev())
        .take_while(|(x, y)| x.eq_ignore_ascii_case(y))
        .count();
    let total = left.len().max(right.len()).max(1);
    #[allow(clippy::cast_precision_loss)]
    let similarity = common as f64 / total as f64;
    similarity
}

/// Simple name of the namespace of a dotted statement id.
fn namespace_name(id: &str) -> Option<&str> {
    id.rsplit('.').nth(1)
}

fn table_name(name: &str) -> String {
    name.rsplit('.').next().unwrap_or(name).to_ascii_lowercase()
}

/// A table name with `${...}` substitutions, matched by its literal pieces
/// in order.
#[derive(Debug, PartialEq)]
pub(crate) struct TablePattern {
    pieces: Vec<String>,
    anchored_start: bool,
    anchored_end: bool,
}

impl TablePattern {
    pub(crate) fn parse(pattern: &str) -> Option<Self> {
        let pattern = table_name_of_pattern(pattern);
        let mut pieces = Vec::new();
        let mut rest = pattern.as_str();
        let anchored_start = !rest.starts_with("${");
        let mut anchored_end = true;
        while let Some(open) = rest.find("${") {
            if open > 0 {
                pieces.push(rest[..open].to_string());
            }
            match rest[open..].find('}') {
                Some(close) => rest = &rest[open + close + 1..],
                None => {
                    rest = "";
                    break;
                }
            }
        }
        if rest.is_empty() {
            anchored_end = false;
        } else {
            pieces.push(rest.to_string());
        }
        (!pieces.is_empty()).then_some(Self {
            pieces,
            anchored_start,
            anchored_end,
        })
    }

    /// Literal characters matched over the table name's length.
    pub(crate) fn similarity(&self, table: &str) -> Option<f64> {
        let mut pos = 0;
        let last = self.pieces.len() - 1;
        for (i, piece) in self.pieces.iter().enumerate() {
            if i == 0 && self.anchored_start {
                if !table.starts_with(piece.as_str()) {
                    return None;
                }
                pos = piece.len();
            } else if i == last && self.anchored_end {
                if !table.ends_with(piece.as_str()) || table.len() - piece.len() < pos {
                    return None;
                }
                pos = table.len();
            } else {
                let found = table[pos..].find(piece.as_str())?;
                pos += found + piece.len();
            }
        }
        let literal: usize = self.pieces.iter().map(String::len).sum();
        if literal >= table.len() {
            // A pattern must leave room for its substitution.
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let similarity = literal as f64 / table.len() as f64;
        Some(similarity)
    }
}

/// Unqualified, lower-cased pattern, keeping substitutions intact.
fn table_name_of_pattern(pattern: &str) -> String {
    let mut depth = 0i32;
    let mut split_at = 0;
    for (i, c) in pattern.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth -= 1,
            '.' if depth == 0 => split_at = i + 1,
            _ => {}
        }
    }
    pattern[split_at..].to_ascii_lowercase()
}
