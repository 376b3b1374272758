//! Findings for Java classes and interfaces. Controllers, services and mappers
//! differ only in the node kinds they produce and a few framework conventions,
//! so they share this walker and pass a [`Profile`].

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::finding::{Definition, FindingSet, Reference, Target, TypeRef, normalize_route};
use crate::java::{ArgValue, CallSite, JavaFile, JavaMethod, JavaType, Receiver, find_annotation};
use crate::sql::{StatementSpec, emit_statement};
use crate::{ArtifactKind, EdgeKind, NodeKind, normalize_path};

use super::ExtractOptions;
use super::sql::flatten_dynamic_sql;

/// `SqlSession` methods whose first argument is a statement id.
const STATEMENT_METHODS: &[&str] = &[
    "selectOne", "selectList", "selectMap", "selectCursor", "select", "insert", "update",
    "delete",
];

const REFLECTION_KINDS: &[NodeKind] = &[
    NodeKind::ServiceMethod,
    NodeKind::MapperMethod,
    NodeKind::ControllerMethod,
];

const MAPPINGS: &[(&str, Option<&str>)] = &[
    ("RequestMapping", None),
    ("GetMapping", Some("GET")),
    ("PostMapping", Some("POST")),
    ("PutMapping", Some("PUT")),
    ("DeleteMapping", Some("DELETE")),
    ("PatchMapping", Some("PATCH")),
];

const SQL_ANNOTATIONS: &[&str] = &["Select", "Insert", "Update", "Delete"];

const PROVIDER_ANNOTATIONS: &[&str] = &[
    "SelectProvider",
    "InsertProvider",
    "UpdateProvider",
    "DeleteProvider",
];

/// What a Java artifact family turns into.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Profile {
    pub artifact: ArtifactKind,
    pub type_kind: NodeKind,
    pub method_kind: NodeKind,
    /// Kinds a call through a typed field may land on, most likely first.
    pub call_kinds: &'static [NodeKind],
    /// Read Spring request mappings into `routes` attributes.
    pub routes: bool,
    /// Bind interface methods to statements named `<fqcn>.<method>`.
    pub bind_statements: bool,
}

pub(crate) fn extract_java(
    content: &str,
    path: &str,
    profile: Profile,
    options: &ExtractOptions,
) -> FindingSet {
    let mut findings = FindingSet::new(normalize_path(path), profile.artifact);
    let file = match JavaFile::parse(content) {
        Ok(file) => file,
        Err(e) => {
            debug!(path, error = %e, "Java source could not be parsed");
            findings.issue(1, e.to_string());
            return findings;
        }
    };
    if !file.error_lines.is_empty() {
        debug!(path, errors = file.error_lines.len(), "Java source has syntax errors");
    }
    findings.scope.clone_from(&file.package);
    for line in &file.error_lines {
        findings.issue(*line, "syntax error");
    }
    for ty in &file.types {
        TypeEmitter {
            file: &file,
            ty,
            profile,
            options,
            sql_counters: HashMap::new(),
        }
        .emit(&mut findings);
    }
    findings
}

struct TypeEmitter<'a> {
    file: &'a JavaFile,
    ty: &'a JavaType,
    profile: Profile,
    options: &'a ExtractOptions,
    sql_counters: HashMap<String, usize>,
}

impl TypeEmitter<'_> {
    fn emit(mut self, findings: &mut FindingSet) {
        let ty = self.ty;
        let kind = self.profile.type_kind;
        let mut def = Definition::new(kind, &ty.fqcn, &ty.name, ty.lines)
            .with_attr("interface", ty.is_interface.to_string());
        if let Some(package) = &self.file.package {
            def = def.with_attr("package", package.clone());
        }
        if !ty.annotations.is_empty() {
            def = def.with_attr("annotations", annotation_names(&ty.annotations));
        }
        if let Some((prefixes, _)) = mapping(&ty.annotations).filter(|_| self.profile.routes) {
            def = def.with_attr("route_prefix", prefixes.join(","));
        }
        findings.define(def);

        for supertype in ty.supertypes().filter(|s| self.file.is_project_type(s)) {
            findings.refer(
                Reference::new(
                    kind,
                    &ty.fqcn,
                    EdgeKind::Implements,
                    Target::Type {
                        type_ref: self.file.resolve_type(supertype),
                        kinds: vec![kind],
                    },
                    ty.lines.start,
                )
                .inverted(),
            );
        }

        for method in ty.methods.iter().filter(|m| !m.is_constructor) {
            self.emit_method(method, findings);
        }
    }

    fn emit_method(&mut self, method: &JavaMethod, findings: &mut FindingSet) {
        let ty = self.ty;
        let kind = self.profile.method_kind;
        let signature = format!("{}.{}/{}", ty.fqcn, method.name, method.arity());
        let binds = self.profile.bind_statements && ty.is_interface;
        let statement_id = format!("{}.{}", ty.fqcn, method.name);

        if !findings.defines(kind, &signature) {
            let mut def = Definition::new(kind, &signature, &method.name, method.lines)
                .with_owner(&ty.fqcn)
                .with_attr("params", method.param_types());
            if !method.annotations.is_empty() {
                def = def.with_attr("annotations", annotation_names(&method.annotations));
            }
            let routes = if self.profile.routes {
                routes_of(ty, method)
            } else {
                None
            };
            if let Some((routes, verbs)) = routes {
                def = def.with_attr("routes", routes.join(","));
                if !verbs.is_empty() {
                    def = def.with_attr("http_methods", verbs.join(","));
                }
            }
            if binds {
                def = def.with_attr("statement_id", statement_id.clone());
            }
            findings.define(def);
        }

        if binds {
            self.bind_statement(method, &signature, &statement_id, findings);
        }
        if method.annotation("Override").is_some() {
            self.emit_override(method, &signature, findings);
        }
        for call in &method.calls {
            self.emit_call(&signature, call, findings);
        }
        for embedded in &method.sql_strings {
            let counter = self.sql_counters.entry(method.name.clone()).or_insert(0);
            *counter += 1;
            let name = format!("{}#sql{counter}", method.name);
            let statement = format!("{}.{name}", ty.fqcn);
            emit_statement(
                findings,
                StatementSpec {
                    signature: &statement,
                    name: &name,
                    lines: embedded.lines,
                    text: &embedded.value.text,
                    extra_dynamic: 0,
                    attributes: BTreeMap::from([("embedded_in".to_string(), signature.clone())]),
                },
                self.options,
            );
            findings.refer(Reference::new(
                kind,
                &signature,
                EdgeKind::ExecutesSql,
                Target::Statement { id: statement },
                embedded.lines.start,
            ));
        }
    }

    /// Mapper interface methods execute the statement named after them. SQL
    /// given inline through annotations defines that statement here.
    fn bind_statement(
        &self,
        method: &JavaMethod,
        signature: &str,
        statement_id: &str,
        findings: &mut FindingSet,
    ) {
        if !findings.defines(NodeKind::SqlStatement, statement_id) {
            let inline = SQL_ANNOTATIONS
                .iter()
                .find_map(|name| method.annotation(name))
                .map(|a| a.get("value").join(" "));
            let provider = PROVIDER_ANNOTATIONS
                .iter()
                .find_map(|name| method.annotation(name));
            if let Some(text) = inline {
                let (text, extra, issues) = if text.trim_start().starts_with("<script>") {
                    flatten_dynamic_sql(&text, &BTreeMap::new())
                } else {
                    (text, 0, Vec::new())
                };
                for message in issues {
                    findings.issue(method.lines.start, format!("{statement_id}: {message}"));
                }
                emit_statement(
                    findings,
                    StatementSpec {
                        signature: statement_id,
                        name: &method.name,
                        lines: method.lines,
                        text: &text,
                        extra_dynamic: extra,
                        attributes: BTreeMap::from([(
                            "source".to_string(),
                            "annotation".to_string(),
                        )]),
                    },
                    self.options,
                );
            } else if let Some(provider) = provider {
                let target = provider
                    .get("type")
                    .first()
                    .or_else(|| provider.get("value").first())
                    .map(|t| t.trim_end_matches(".class").to_string())
                    .unwrap_or_default();
                let provider_method = provider.get("method").first().cloned().unwrap_or_default();
                emit_statement(
                    findings,
                    StatementSpec {
                        signature: statement_id,
                        name: &method.name,
                        lines: method.lines,
                        text: "",
                        extra_dynamic: 1,
                        attributes: BTreeMap::from([(
                            "provider".to_string(),
                            format!("{target}.{provider_method}"),
                        )]),
                    },
                    self.options,
                );
            }
        }
        findings.refer(Reference::new(
            self.profile.method_kind,
            signature,
            EdgeKind::ExecutesSql,
            Target::Statement {
                id: statement_id.to_string(),
            },
            method.lines.start,
        ));
    }

    /// An `@Override` method realizes the same member of a supertype. The
    /// edge points from the supertype member to this one.
    fn emit_override(&self, method: &JavaMethod, signature: &str, findings: &mut FindingSet) {
        let supertypes: Vec<TypeRef> = self
            .ty
            .implements
            .iter()
            .chain(&self.ty.extends)
            .filter(|s| self.file.is_project_type(s))
            .map(|s| self.file.resolve_type(s))
            .collect();
        let Some(first) = supertypes.first() else {
            return;
        };
        let owner = TypeRef {
            name: first.name.clone(),
            candidates: supertypes
                .iter()
                .flat_map(|t| t.candidates.iter().cloned())
                .collect(),
        };
        findings.refer(
            Reference::new(
                self.profile.method_kind,
                signature,
                EdgeKind::Implements,
                Target::Member {
                    owner: Some(owner),
                    member: method.name.clone(),
                    arity: Some(method.arity()),
                    kinds: vec![self.profile.method_kind],
                },
                method.lines.start,
            )
            .inverted(),
        );
    }

    fn emit_call(&self, from: &str, call: &CallSite, findings: &mut FindingSet) {
        let kind = self.profile.method_kind;
        if let Some(id) = self.statement_call(call) {
            findings.refer(
                Reference::new(kind, from, EdgeKind::ExecutesSql, Target::Statement { id }, call.line)
                    .with_confidence(self.options.statement_call_confidence)
                    .with_note(format!("via {}", call.method)),
            );
            return;
        }
        if let Some(target) = self.reflection_target(call) {
            findings.refer(
                Reference::new(kind, from, EdgeKind::Invokes, target, call.line)
                    .with_confidence(self.options.reflection_confidence)
                    .with_note("reflection"),
            );
            return;
        }
        let target = match &call.receiver {
            Receiver::Own if self.ty.has_method(&call.method, call.arity()) => Target::Member {
                owner: Some(TypeRef {
                    name: self.ty.name.clone(),
                    candidates: vec![self.ty.fqcn.clone()],
                }),
                member: call.method.clone(),
                arity: Some(call.arity()),
                kinds: vec![kind],
            },
            Receiver::Variable { ty: Some(ty), .. } if self.file.is_project_type(ty) => {
                Target::Member {
                    owner: Some(self.file.resolve_type(ty)),
                    member: call.method.clone(),
                    arity: Some(call.arity()),
                    kinds: self.profile.call_kinds.to_vec(),
                }
            }
            Receiver::Variable { name, ty: None } if names_a_component(name) => {
                findings.refer(
                    Reference::new(
                        kind,
                        from,
                        EdgeKind::Invokes,
                        Target::Member {
                            owner: None,
                            member: call.method.clone(),
                            arity: Some(call.arity()),
                            kinds: self.profile.call_kinds.to_vec(),
                        },
                        call.line,
                    )
                    .with_confidence(self.options.unknown_receiver_confidence)
                    .with_note(format!("untyped receiver {name}")),
                );
                return;
            }
            _ => return,
        };
        findings.refer(Reference::new(kind, from, EdgeKind::Invokes, target, call.line));
    }

    /// Statement id of a call like `sqlSession.selectList("ns.findAll", p)`.
    fn statement_call(&self, call: &CallSite) -> Option<String> {
        if !STATEMENT_METHODS.contains(&call.method.as_str()) {
            return None;
        }
        let id = call.args.first()?.as_str().filter(|v| v.is_static())?;
        let session_like = match &call.receiver {
            Receiver::Variable { name, ty } => {
                ty.as_deref().is_some_and(|t| t.contains("SqlSession"))
                    || name.to_ascii_lowercase().contains("sqlsession")
            }
            Receiver::Expression => true,
            Receiver::Own => {
                !self.ty.has_method(&call.method, call.arity())
                    && self
                        .ty
                        .extends
                        .iter()
                        .any(|s| s.contains("SqlSession") || s.contains("DaoSupport"))
            }
            _ => false,
        };
        (session_like && !id.text.trim().is_empty()).then(|| id.text.trim().to_string())
    }

    /// Method bound by name through reflection: `Foo.class.getMethod("bar")`
    /// or `ReflectionUtils.findMethod(Foo.class, "bar")`.
    fn reflection_target(&self, call: &CallSite) -> Option<Target> {
        let (class, name) = match call.method.as_str() {
            "getMethod" | "getDeclaredMethod" => {
                let class = match &call.receiver {
                    Receiver::ClassLiteral(t) => Some(t.clone()),
                    _ => None,
                };
                (class, call.args.first()?.as_str()?)
            }
            "findMethod" => {
                let class = match call.args.first()? {
                    ArgValue::ClassLiteral(t) => Some(t.clone()),
                    _ => None,
                };
                (class, call.args.get(1)?.as_str()?)
            }
            _ => return None,
        };
        if !name.is_static() {
            return None;
        }
        let owner = class
            .filter(|c| self.file.is_project_type(c))
            .map(|c| self.file.resolve_type(&c));
        Some(Target::Member {
            owner,
            member: name.text.clone(),
            arity: None,
            kinds: REFLECTION_KINDS.to_vec(),
        })
    }
}

/// Whether an untyped variable name suggests another application tier.
fn names_a_component(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    ["service", "mapper", "dao", "manager", "repository"]
        .iter()
        .any(|suffix| lower.ends_with(suffix))
}

fn annotation_names(annotations: &[crate::java::Annotation]) -> String {
    annotations
        .iter()
        .map(|a| a.name.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

/// Paths and HTTP verbs of the first request-mapping annotation present.
fn mapping(annotations: &[crate::java::Annotation]) -> Option<(Vec<String>, Vec<String>)> {
    let (annotation, verb) = MAPPINGS
        .iter()
        .find_map(|(name, verb)| find_annotation(annotations, name).map(|a| (a, *verb)))?;
    let mut paths: Vec<String> = annotation
        .get("value")
        .iter()
        .chain(annotation.get("path"))
        .cloned()
        .collect();
    if paths.is_empty() {
        paths.push(String::new());
    }
    let verbs = match verb {
        Some(v) => vec![v.to_string()],
        None => annotation
            .get("method")
            .iter()
            .map(|m| m.rsplit('.').next().unwrap_or(m).to_ascii_uppercase())
            .collect(),
    };
    Some((paths, verbs))
}

/// Full routes of a handler method: class prefixes × method paths.
fn routes_of(ty: &JavaType, method: &JavaMethod) -> Option<(Vec<String>, Vec<String>)> {
    let (paths, verbs) = mapping(&method.annotations)?;
    let prefixes = mapping(&ty.annotations).map_or_else(|| vec![String::new()], |(p, _)| p);
    let mut routes: Vec<String> = prefixes
        .iter()
        .flat_map(|prefix| {
            paths
                .iter()
                .map(move |path| normalize_route(&format!("{prefix}/{path}")))
        })
        .collect();
    routes.sort();
    routes.dedup();
    Some((routes, verbs))
}
