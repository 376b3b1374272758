//! Reference resolution.
//!
//! [`Resolver::resolve`] turns one file's [`FindingSet`] into the
//! [`GraphDiff`] the store applies for that file. Every reference becomes
//! an edge: to the best-ranked candidate definition when there is one,
//! otherwise to a stub carrying the identity the missing definition would
//! have. Resolution never fails; uncertainty is expressed as confidence.

mod targets;
mod view;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use layermap_extract::{FindingSet, Reference};
use tracing::{debug, instrument};

use crate::config::{ResolverSection, TieBreak};
use crate::graph::Graph;
use crate::hash;
use crate::types::{Edge, EdgeId, Evidence, FileKey, GraphDiff, Node, NodeId, attr};
use targets::{Matches, Rank, Search};
use view::View;

/// Note a page attaches to links that are relative to the page.
const RELATIVE_NOTE: &str = "relative";

/// Binds symbolic references to graph nodes under the configured weights.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    settings: ResolverSection,
}

/// Where one reference ended up.
#[derive(Debug)]
struct Binding {
    target: NodeId,
    confidence: f64,
    candidates: Vec<String>,
    /// Stub to carry when the target is not defined by this file.
    placeholder: Option<Node>,
    outcome: Outcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Resolved,
    Ambiguous(Rank),
    Stub,
}

impl Resolver {
    pub fn new(settings: &ResolverSection) -> Self {
        Self {
            settings: settings.clone(),
        }
    }

    pub fn settings(&self) -> &ResolverSection {
        &self.settings
    }

    /// The nodes `findings` would contribute, without resolving any
    /// reference. Used to stage a batch's definitions before resolution.
    pub fn definitions(&self, file_key: FileKey, findings: &FindingSet) -> GraphDiff {
        let mut diff = GraphDiff::new(file_key, findings.path.as_str());
        diff.nodes = local_nodes(findings)
            .into_values()
            .chain(issue_markers(findings))
            .collect();
        diff.nodes.sort_by_key(|n| n.id);
        diff
    }

    /// Resolve `findings` against `graph` into the contribution of the
    /// file version identified by `file_key`.
    #[instrument(skip_all, name = "resolve", fields(path = %findings.path))]
    pub fn resolve(&self, file_key: FileKey, findings: &FindingSet, graph: &Graph) -> GraphDiff {
        let path = findings.path.as_str();
        let local = local_nodes(findings);
        let mut diff = GraphDiff::new(file_key, path);

        let mut edges: BTreeMap<EdgeId, Edge> = BTreeMap::new();
        let mut placeholders: BTreeMap<NodeId, Node> = BTreeMap::new();
        let (mut ambiguous, mut stubs) = (0usize, 0usize);
        let mut view = View::new(graph, path, &local);

        for reference in &findings.references {
            let source = hash::node_id(reference.from_kind, &reference.from);
            if !local.contains_key(&source) {
                placeholders
                    .entry(source)
                    .or_insert_with(|| Node::stub(reference.from_kind, &reference.from, &reference.from));
            }

            let binding = self.bind(&mut view, reference, findings.scope.as_deref(), source);
            match binding.outcome {
                Outcome::Ambiguous(rank) => {
                    ambiguous += 1;
                    debug!(
                        from = %reference.from,
                        target = %reference.target.describe(),
                        rank = rank.as_str(),
                        candidates = binding.candidates.len(),
                        "Ambiguous reference"
                    );
                }
                Outcome::Stub => stubs += 1,
                Outcome::Resolved => {}
            }
            if let Some(stub) = binding.placeholder {
                placeholders.entry(stub.id).or_insert(stub);
            }

            let (from, to) = if reference.inverted {
                (binding.target, source)
            } else {
                (source, binding.target)
            };
            let edge = Edge::new(from, to, reference.edge, binding.confidence).with_evidence(Evidence {
                file: path.to_string(),
                line: reference.line,
                note: reference.note.clone(),
                candidates: binding.candidates,
            });
            match edges.entry(edge.id) {
                Entry::Occupied(mut existing) => existing.get_mut().merge(&edge),
                Entry::Vacant(slot) => {
                    slot.insert(edge);
                }
            }
        }
        diff.lookups = view.into_consulted();

        diff.nodes = local.into_values().chain(issue_markers(findings)).collect();
        diff.nodes.sort_by_key(|n| n.id);
        diff.placeholders = placeholders.into_values().collect();
        diff.edges = edges.into_values().collect();

        debug!(
            nodes = diff.nodes.len(),
            edges = diff.edges.len(),
            stubs,
            ambiguous,
            "Resolved file"
        );
        diff
    }

    fn bind(
        &self,
        view: &mut View<'_>,
        reference: &Reference,
        scope: Option<&str>,
        source: NodeId,
    ) -> Binding {
        let settings = &self.settings;
        let relative = reference.note.as_deref() == Some(RELATIVE_NOTE);
        let found =
            Search::new(view, source, settings.min_fuzzy_similarity).find(&reference.target, relative);
        let Some(Matches {
            rank,
            nodes,
            similarity,
        }) = found
        else {
            return self.stub(reference);
        };

        let weight = match rank {
            Rank::Exact => 1.0,
            Rank::Name => settings.name_match_weight,
            Rank::Fuzzy => settings.fuzzy_match_weight * similarity,
        };
        let confidence = reference.confidence * weight;

        let in_scope: Vec<&Node> = scope
            .map(|s| nodes.iter().copied().filter(|n| n.scope() == Some(s)).collect())
            .unwrap_or_default();
        let tied = if in_scope.is_empty() { &nodes } else { &in_scope };

        let (winner, confidence, candidates, outcome) = if let [only] = tied.as_slice() {
            (*only, confidence, Vec::new(), Outcome::Resolved)
        } else {
            let Some(winner) = self.pick(view, tied) else {
                return self.stub(reference);
            };
            let mut candidates: Vec<String> = nodes.iter().map(|n| n.signature.clone()).collect();
            candidates.sort();
            candidates.dedup();
            (
                winner,
                confidence.min(settings.ambiguity_cap),
                candidates,
                Outcome::Ambiguous(rank),
            )
        };

        let placeholder = (!view.is_local(winner.id))
            .then(|| Node::stub(winner.kind, &winner.signature, &reference.target.describe()));
        Binding {
            target: winner.id,
            confidence,
            candidates,
            placeholder,
            outcome,
        }
    }

    /// Tie-break among equally ranked candidates outside (or all inside)
    /// the referencing scope.
    fn pick<'a>(&self, view: &View<'_>, tied: &[&'a Node]) -> Option<&'a Node> {
        tied.iter().copied().min_by(|a, b| {
            let recency = match self.settings.tie_break {
                TieBreak::ScopeThenRecency => view.introduced(b.id).cmp(&view.introduced(a.id)),
                TieBreak::ScopeThenLexical => Ordering::Equal,
            };
            recency
                .then_with(|| a.signature.cmp(&b.signature))
                .then_with(|| a.id.cmp(&b.id))
        })
    }

    fn stub(&self, reference: &Reference) -> Binding {
        let expected = reference.target.expected_kind();
        let signature = targets::expected_signature(&reference.target);
        let stub = Node::stub(expected, &signature, &reference.target.describe());
        Binding {
            target: stub.id,
            confidence: reference.confidence.min(self.settings.stub_confidence_cap),
            candidates: Vec::new(),
            placeholder: Some(stub),
            outcome: Outcome::Stub,
        }
    }
}

/// The file's definitions as nodes, keyed by id. Definitions sharing an
/// identity (overloads of equal arity) collapse into one node.
fn local_nodes(findings: &FindingSet) -> BTreeMap<NodeId, Node> {
    let mut nodes: BTreeMap<NodeId, Node> = BTreeMap::new();
    for def in &findings.definitions {
        let id = hash::node_id(def.kind, &def.signature);
        match nodes.entry(id) {
            Entry::Occupied(mut existing) => {
                let node = existing.get_mut();
                node.line_range.start = node.line_range.start.min(def.lines.start);
                node.line_range.end = node.line_range.end.max(def.lines.end);
                for (k, v) in &def.attributes {
                    node.attributes.entry(k.clone()).or_insert_with(|| v.clone());
                }
            }
            Entry::Vacant(slot) => {
                let mut attributes = def.attributes.clone();
                if let Some(scope) = &findings.scope {
                    attributes.insert(attr::SCOPE.to_string(), scope.clone());
                }
                if let Some(owner) = &def.owner {
                    attributes.insert(attr::OWNER.to_string(), owner.clone());
                }
                slot.insert(Node {
                    id,
                    kind: def.kind,
                    source_file: Some(findings.path.clone()),
                    line_range: def.lines,
                    signature: def.signature.clone(),
                    name: def.name.clone(),
                    attributes,
                });
            }
        }
    }
    nodes
}

/// One marker per line with problems; messages on a line are joined.
fn issue_markers(findings: &FindingSet) -> impl Iterator<Item = Node> + '_ {
    let mut by_line: BTreeMap<u32, Vec<&str>> = BTreeMap::new();
    for issue in &findings.issues {
        let messages = by_line.entry(issue.line).or_default();
        if !messages.contains(&issue.message.as_str()) {
            messages.push(&issue.message);
        }
    }
    by_line
        .into_iter()
        .map(|(line, messages)| Node::marker(&findings.path, line, &messages.join("; ")))
}
