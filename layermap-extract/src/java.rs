//! A small structural model of a Java compilation unit, built with
//! tree-sitter. Controller, service and mapper extraction all read this model
//! instead of walking syntax trees themselves.

use std::collections::BTreeMap;

use tree_sitter::Node;

use crate::{ExtractError, LineRange, Result, TypeRef};

/// Types that never belong to the analyzed application.
const LIBRARY_TYPES: &[&str] = &[
    "Object", "String", "StringBuilder", "StringBuffer", "Integer", "Long", "Short", "Byte",
    "Double", "Float", "Boolean", "Character", "Number", "BigDecimal", "BigInteger", "Math",
    "System", "Thread", "Class", "Enum", "Iterable", "Runnable", "Exception",
    "RuntimeException", "Throwable", "Error", "List", "ArrayList", "LinkedList", "Map",
    "HashMap", "LinkedHashMap", "TreeMap", "Set", "HashSet", "TreeSet", "Collection",
    "Collections", "Arrays", "Objects", "Optional", "Stream", "Collectors", "Date",
    "LocalDate", "LocalDateTime", "Instant", "Duration", "UUID", "Iterator", "Comparable",
    "Comparator", "Serializable", "Cloneable", "AutoCloseable", "Override", "Deprecated",
    "SqlSession", "SqlSessionTemplate", "SqlSessionDaoSupport", "JdbcTemplate",
    "NamedParameterJdbcTemplate", "JdbcDaoSupport", "HibernateDaoSupport", "Model", "ModelMap",
    "HttpServletRequest", "HttpServletResponse", "HttpSession",
];

/// Import prefixes of well-known frameworks and the JDK.
const LIBRARY_PREFIXES: &[&str] = &[
    "java.", "javax.", "jakarta.", "org.springframework.", "org.apache.", "org.mybatis.",
    "org.slf4j.", "org.hibernate.", "com.fasterxml.", "com.google.", "com.baomidou.", "lombok.",
];

const PRIMITIVES: &[&str] = &[
    "void", "boolean", "byte", "char", "short", "int", "long", "float", "double", "var",
];

/// One parsed `.java` file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JavaFile {
    pub package: Option<String>,
    /// Single-type imports, fully qualified.
    pub imports: Vec<String>,
    /// Packages imported with `.*`.
    pub wildcard_imports: Vec<String>,
    pub types: Vec<JavaType>,
    /// Lines where the parser had to recover from a syntax error.
    pub error_lines: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JavaType {
    pub name: String,
    pub fqcn: String,
    pub is_interface: bool,
    pub annotations: Vec<Annotation>,
    /// Supertypes as written (`extends` for classes and interfaces).
    pub extends: Vec<String>,
    pub implements: Vec<String>,
    /// Field name → declared type.
    pub fields: BTreeMap<String, String>,
    /// `static final String` constants with a statically known value.
    pub constants: BTreeMap<String, String>,
    pub methods: Vec<JavaMethod>,
    pub lines: LineRange,
}

impl JavaType {
    pub fn annotation(&self, name: &str) -> Option<&Annotation> {
        find_annotation(&self.annotations, name)
    }

    pub fn has_method(&self, name: &str, arity: usize) -> bool {
        self.methods
            .iter()
            .any(|m| !m.is_constructor && m.name == name && m.params.len() == arity)
    }

    /// Every supertype, `extends` first.
    pub fn supertypes(&self) -> impl Iterator<Item = &String> {
        self.extends.iter().chain(&self.implements)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Annotation {
    /// Simple name, without `@` or package.
    pub name: String,
    /// Element name → values. A single unnamed element is stored as `value`.
    pub values: BTreeMap<String, Vec<String>>,
}

impl Annotation {
    pub fn get(&self, key: &str) -> &[String] {
        self.values.get(key).map_or(&[], Vec::as_slice)
    }
}

pub fn find_annotation<'a>(annotations: &'a [Annotation], name: &str) -> Option<&'a Annotation> {
    annotations.iter().find(|a| a.name == name)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Param {
    pub ty: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JavaMethod {
    pub name: String,
    pub params: Vec<Param>,
    pub annotations: Vec<Annotation>,
    pub is_constructor: bool,
    pub lines: LineRange,
    pub calls: Vec<CallSite>,
    /// String expressions in the body that look like SQL.
    pub sql_strings: Vec<EmbeddedSql>,
}

impl JavaMethod {
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn annotation(&self, name: &str) -> Option<&Annotation> {
        find_annotation(&self.annotations, name)
    }

    pub fn param_types(&self) -> String {
        self.params
            .iter()
            .map(|p| p.ty.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Who a method call is made on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receiver {
    /// Unqualified call or `this.m()`.
    Own,
    /// A local, parameter or field, with its declared type when known.
    Variable { name: String, ty: Option<String> },
    /// A static call on a type name.
    Type(String),
    /// A call on a class literal, e.g. `Foo.class.getMethod(..)`.
    ClassLiteral(String),
    /// Anything else (chained calls, `new` expressions).
    Expression,
}

/// A call argument, as far as it can be known statically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    Str(StringValue),
    ClassLiteral(String),
    Other,
}

impl ArgValue {
    pub fn as_str(&self) -> Option<&StringValue> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// A string expression with its non-literal operands replaced by `${name}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringValue {
    pub text: String,
    pub dynamic_parts: usize,
}

impl StringValue {
    pub fn is_static(&self) -> bool {
        self.dynamic_parts == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub receiver: Receiver,
    pub method: String,
    pub args: Vec<ArgValue>,
    pub line: u32,
}

impl CallSite {
    pub fn arity(&self) -> usize {
        self.args.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedSql {
    pub value: StringValue,
    pub lines: LineRange,
}

// ── Parsing ────────────────────────────────────────────────────────

pub fn parse_tree(source: &str) -> Result<tree_sitter::Tree> {
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&tree_sitter_java::LANGUAGE.into())
        .map_err(|e| ExtractError::TreeSitter(format!("Failed to set language: {e}")))?;
    parser
        .parse(source, None)
        .ok_or_else(|| ExtractError::TreeSitter("parser returned no tree".to_string()))
}

impl JavaFile {
    pub fn parse(source: &str) -> Result<Self> {
        let tree = parse_tree(source)?;
        let root = tree.root_node();
        let mut file = Self::default();

        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            match child.kind() {
                "package_declaration" => {
                    file.package = first_named_text(child, source, &["scoped_identifier", "identifier"]);
                }
                "import_declaration" => file.read_import(child, source),
                _ => {}
            }
        }

        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            if is_type_declaration(child) {
                let prefix = file.package.clone();
                file.read_type(child, source, prefix.as_deref());
            }
        }

        if root.has_error() {
            collect_error_lines(root, &mut file.error_lines);
        }
        Ok(file)
    }

    fn read_import(&mut self, node: Node<'_>, source: &str) {
        let text = node_text(node, source);
        let is_static = text.contains("static ");
        let Some(name) = first_named_text(node, source, &["scoped_identifier", "identifier"])
        else {
            return;
        };
        let wildcard = find_child_by_kind(node, "asterisk").is_some();
        if wildcard {
            if !is_static {
                self.wildcard_imports.push(name);
            }
        } else if !is_static {
            self.imports.push(name);
        }
    }

    fn read_type(&mut self, node: Node<'_>, source: &str, prefix: Option<&str>) {
        let Some(name) = node.child_by_field_name("name").map(|n| node_text(n, source)) else {
            return;
        };
        let fqcn = match prefix {
            Some(p) if !p.is_empty() => format!("{p}.{name}"),
            _ => name.to_string(),
        };
        let mut ty = JavaType {
            name: name.to_string(),
            fqcn: fqcn.clone(),
            is_interface: node.kind() == "interface_declaration",
            annotations: modifiers_annotations(node, source),
            lines: node.range().into(),
            ..JavaType::default()
        };

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "superclass" | "extends_interfaces" => {
                    collect_type_names(child, source, &mut ty.extends);
                }
                "super_interfaces" => collect_type_names(child, source, &mut ty.implements),
                _ => {}
            }
        }

        let mut nested = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            // Fields first: method bodies need their types and constant values.
            let mut cursor = body.walk();
            for member in body.named_children(&mut cursor) {
                if matches!(member.kind(), "field_declaration" | "constant_declaration") {
                    read_field(member, source, &mut ty);
                }
            }
            let mut cursor = body.walk();
            for member in body.named_children(&mut cursor) {
                match member.kind() {
                    "method_declaration" | "constructor_declaration" => {
                        let method = read_method(member, source, &ty);
                        ty.methods.push(method);
                    }
                    _ if is_type_declaration(member) => nested.push(member),
                    _ => {}
                }
            }
        }

        self.types.push(ty);
        for member in nested {
            self.read_type(member, source, Some(&fqcn));
        }
    }

    /// Candidate qualified names for a type as written in this file.
    pub fn resolve_type(&self, written: &str) -> TypeRef {
        let name = base_type_name(written);
        let simple = name.rsplit('.').next().unwrap_or(&name).to_string();

        let qualified = name.contains('.')
            && name.starts_with(|c: char| c.is_ascii_lowercase());
        if qualified {
            return TypeRef {
                name: simple,
                candidates: vec![name],
            };
        }

        let mut candidates = Vec::new();
        if let Some(local) = self.types.iter().find(|t| t.name == simple) {
            candidates.push(local.fqcn.clone());
        }
        if let Some(import) = self
            .imports
            .iter()
            .find(|i| i.rsplit('.').next() == Some(simple.as_str()))
        {
            candidates.push(import.clone());
        }
        if candidates.is_empty() {
            candidates.push(match &self.package {
                Some(p) => format!("{p}.{simple}"),
                None => simple.clone(),
            });
            candidates.extend(self.wildcard_imports.iter().map(|w| format!("{w}.{simple}")));
        }
        candidates.dedup();
        TypeRef {
            name: simple,
            candidates,
        }
    }

    /// Whether a written type plausibly belongs to the analyzed application.
    pub fn is_project_type(&self, written: &str) -> bool {
        let name = base_type_name(written);
        if name.is_empty()
            || PRIMITIVES.contains(&name.as_str())
            || !name
                .rsplit('.')
                .next()
                .is_some_and(|s| s.starts_with(|c: char| c.is_ascii_uppercase()))
        {
            return false;
        }
        if LIBRARY_PREFIXES.iter().any(|p| name.starts_with(p)) {
            return false;
        }
        let simple = name.rsplit('.').next().unwrap_or(&name);
        if let Some(import) = self
            .imports
            .iter()
            .find(|i| i.rsplit('.').next() == Some(simple))
        {
            return !LIBRARY_PREFIXES.iter().any(|p| import.starts_with(p));
        }
        if self.types.iter().any(|t| t.name == simple) {
            return true;
        }
        !LIBRARY_TYPES.contains(&simple)
    }
}

/// Strip generics, array brackets and varargs from a written type.
pub fn base_type_name(written: &str) -> String {
    let base = written.split('<').next().unwrap_or(written);
    base.trim()
        .trim_end_matches("...")
        .trim_end_matches("[]")
        .trim()
        .to_string()
}

fn is_type_declaration(node: Node<'_>) -> bool {
    matches!(node.kind(), "class_declaration" | "interface_declaration")
}

fn read_field(node: Node<'_>, source: &str, ty: &mut JavaType) {
    let Some(field_type) = node.child_by_field_name("type") else {
        return;
    };
    let field_type = base_type_name(node_text(field_type, source));
    let modifiers = find_child_by_kind(node, "modifiers").map_or("", |m| node_text(m, source));
    let constant = node.kind() == "constant_declaration"
        || (modifiers.contains("static") && modifiers.contains("final"));

    let mut cursor = node.walk();
    for declarator in node.children_by_field_name("declarator", &mut cursor) {
        let Some(name) = declarator.child_by_field_name("name") else {
            continue;
        };
        let name = node_text(name, source).to_string();
        let value_node = declarator.child_by_field_name("value");
        if let Some(value) = value_node.filter(|_| constant && field_type == "String") {
            let value = string_value(value, source, &ty.constants);
            if value.is_static() {
                ty.constants.insert(name.clone(), value.text);
            }
        }
        ty.fields.insert(name, field_type.clone());
    }
}

fn read_method(node: Node<'_>, source: &str, owner: &JavaType) -> JavaMethod {
    let name = node
        .child_by_field_name("name")
        .map_or("", |n| node_text(n, source))
        .to_string();
    let mut method = JavaMethod {
        name,
        is_constructor: node.kind() == "constructor_declaration",
        annotations: modifiers_annotations(node, source),
        lines: node.range().into(),
        ..JavaMethod::default()
    };

    if let Some(params) = node.child_by_field_name("parameters") {
        let mut cursor = params.walk();
        for param in params.named_children(&mut cursor) {
            if !matches!(param.kind(), "formal_parameter" | "spread_parameter") {
                continue;
            }
            let ty = param
                .child_by_field_name("type")
                .or_else(|| find_child_by_kind(param, "type_identifier"))
                .map(|t| base_type_name(node_text(t, source)))
                .unwrap_or_default();
            let name = param
                .child_by_field_name("name")
                .or_else(|| find_child_by_kind(param, "variable_declarator"))
                .map(|n| {
                    n.child_by_field_name("name")
                        .map_or_else(|| node_text(n, source), |inner| node_text(inner, source))
                })
                .unwrap_or_default()
                .to_string();
            method.params.push(Param { ty, name });
        }
    }

    if let Some(body) = node.child_by_field_name("body") {
        let mut scope = Scope {
            owner,
            locals: method
                .params
                .iter()
                .map(|p| (p.name.clone(), p.ty.clone()))
                .collect(),
        };
        collect_locals(body, source, &mut scope.locals);
        collect_calls(body, source, &scope, &mut method.calls);
        collect_sql(body, source, &owner.constants, &mut method.sql_strings);
    }
    method
}

/// Variables visible in a method body, for receiver typing.
struct Scope<'a> {
    owner: &'a JavaType,
    locals: BTreeMap<String, String>,
}

impl Scope<'_> {
    fn type_of(&self, name: &str) -> Option<String> {
        self.locals
            .get(name)
            .or_else(|| self.owner.fields.get(name))
            .cloned()
    }
}

fn collect_locals(body: Node<'_>, source: &str, locals: &mut BTreeMap<String, String>) {
    for node in preorder(body) {
        if node.kind() == "enhanced_for_statement" {
            if let (Some(ty), Some(name)) = (
                node.child_by_field_name("type"),
                node.child_by_field_name("name"),
            ) {
                locals.insert(
                    node_text(name, source).to_string(),
                    base_type_name(node_text(ty, source)),
                );
            }
        }
        let declared = node
            .child_by_field_name("type")
            .filter(|_| node.kind() == "local_variable_declaration");
        if let Some(ty) = declared {
            let ty = base_type_name(node_text(ty, source));
            let mut cursor = node.walk();
            for declarator in node.children_by_field_name("declarator", &mut cursor) {
                if let Some(name) = declarator.child_by_field_name("name") {
                    locals.insert(node_text(name, source).to_string(), ty.clone());
                }
            }
        }
    }
}

fn collect_calls(body: Node<'_>, source: &str, scope: &Scope<'_>, calls: &mut Vec<CallSite>) {
    for node in preorder(body) {
        let invoked = node
            .child_by_field_name("name")
            .filter(|_| node.kind() == "method_invocation");
        let Some(name) = invoked else {
            continue;
        };
        let receiver = match node.child_by_field_name("object") {
            None => Receiver::Own,
            Some(obj) => receiver_of(obj, source, scope),
        };
        let args = node
            .child_by_field_name("arguments")
            .map(|list| {
                let mut cursor = list.walk();
                list.named_children(&mut cursor)
                    .filter(|a| !is_comment(*a))
                    .map(|a| arg_value(a, source, &scope.owner.constants))
                    .collect()
            })
            .unwrap_or_default();
        calls.push(CallSite {
            receiver,
            method: node_text(name, source).to_string(),
            args,
            line: row_line(node),
        });
    }
}

fn receiver_of(obj: Node<'_>, source: &str, scope: &Scope<'_>) -> Receiver {
    match obj.kind() {
        "this" => Receiver::Own,
        "identifier" => {
            let name = node_text(obj, source);
            match scope.type_of(name) {
                Some(ty) => Receiver::Variable {
                    name: name.to_string(),
                    ty: Some(ty),
                },
                None if name.starts_with(|c: char| c.is_ascii_uppercase()) => {
                    Receiver::Type(name.to_string())
                }
                None => Receiver::Variable {
                    name: name.to_string(),
                    ty: None,
                },
            }
        }
        "field_access" => {
            let this_field = obj
                .child_by_field_name("object")
                .is_some_and(|o| o.kind() == "this");
            match obj.child_by_field_name("field") {
                Some(field) if this_field => {
                    let name = node_text(field, source);
                    Receiver::Variable {
                        name: name.to_string(),
                        ty: scope.owner.fields.get(name).cloned(),
                    }
                }
                _ => Receiver::Expression,
            }
        }
        "class_literal" => obj
            .named_child(0)
            .map_or(Receiver::Expression, |t| {
                Receiver::ClassLiteral(base_type_name(node_text(t, source)))
            }),
        _ => Receiver::Expression,
    }
}

fn arg_value(node: Node<'_>, source: &str, constants: &BTreeMap<String, String>) -> ArgValue {
    match node.kind() {
        "class_literal" => node.named_child(0).map_or(ArgValue::Other, |t| {
            ArgValue::ClassLiteral(base_type_name(node_text(t, source)))
        }),
        "string_literal" | "text_block" | "binary_expression" => {
            let value = string_value(node, source, constants);
            if node.kind() == "binary_expression" && value.dynamic_parts > 0 && !value_has_literal(node) {
                ArgValue::Other
            } else {
                ArgValue::Str(value)
            }
        }
        "identifier" => constants
            .get(node_text(node, source))
            .map_or(ArgValue::Other, |v| {
                ArgValue::Str(StringValue {
                    text: v.clone(),
                    dynamic_parts: 0,
                })
            }),
        _ => ArgValue::Other,
    }
}

fn value_has_literal(node: Node<'_>) -> bool {
    let mut stack = vec![node];
    while let Some(node) = stack.pop() {
        match node.kind() {
            "string_literal" | "text_block" => return true,
            "binary_expression" | "parenthesized_expression" => push_children(&mut stack, node),
            _ => {}
        }
    }
    false
}

/// Collect top-level string expressions whose text looks like SQL.
fn collect_sql(
    body: Node<'_>,
    source: &str,
    constants: &BTreeMap<String, String>,
    out: &mut Vec<EmbeddedSql>,
) {
    let mut stack = vec![body];
    while let Some(node) = stack.pop() {
        let is_concat = node.kind() == "binary_expression"
            && node
                .child_by_field_name("operator")
                .is_some_and(|op| node_text(op, source) == "+")
            && value_has_literal(node);
        if matches!(node.kind(), "string_literal" | "text_block") || is_concat {
            let value = string_value(node, source, constants);
            if crate::sql::looks_like_sql(&value.text) {
                out.push(EmbeddedSql {
                    value,
                    lines: node.range().into(),
                });
            }
            continue;
        }
        push_children(&mut stack, node);
    }
}

/// Flatten a string literal or `+` concatenation. Known constants are
/// substituted; every other operand becomes a `${name}` placeholder.
pub(crate) fn string_value(
    node: Node<'_>,
    source: &str,
    constants: &BTreeMap<String, String>,
) -> StringValue {
    let mut out = StringValue {
        text: String::new(),
        dynamic_parts: 0,
    };
    // Operands are visited left to right.
    let mut stack = vec![node];
    while let Some(node) = stack.pop() {
        match node.kind() {
            "string_literal" | "text_block" => out.text.push_str(&unquote(node_text(node, source))),
            "binary_expression"
                if node
                    .child_by_field_name("operator")
                    .is_some_and(|op| node_text(op, source) == "+") =>
            {
                stack.extend(node.child_by_field_name("right"));
                stack.extend(node.child_by_field_name("left"));
            }
            "parenthesized_expression" => stack.extend(node.named_child(0)),
            "identifier" if constants.contains_key(node_text(node, source)) => {
                if let Some(v) = constants.get(node_text(node, source)) {
                    out.text.push_str(v);
                }
            }
            "decimal_integer_literal" | "true" | "false" => out.text.push_str(node_text(node, source)),
            _ => {
                let label: String = node_text(node, source)
                    .chars()
                    .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '.')
                    .take(40)
                    .collect();
                out.text.push_str("${");
                out.text.push_str(&label);
                out.text.push('}');
                out.dynamic_parts += 1;
            }
        }
    }
    out
}

/// Strip quotes from a Java string or text block literal and decode the
/// common escapes.
pub fn unquote(literal: &str) -> String {
    let inner = if let Some(block) = literal
        .strip_prefix("\"\"\"")
        .and_then(|s| s.strip_suffix("\"\"\""))
    {
        block
    } else {
        literal
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(literal)
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn modifiers_annotations(node: Node<'_>, source: &str) -> Vec<Annotation> {
    let Some(mods) = find_child_by_kind(node, "modifiers") else {
        return Vec::new();
    };
    let mut out = Vec::new();
    let mut cursor = mods.walk();
    for child in mods.named_children(&mut cursor) {
        if !matches!(child.kind(), "annotation" | "marker_annotation") {
            continue;
        }
        let Some(name) = child.child_by_field_name("name") else {
            continue;
        };
        let name = node_text(name, source);
        let mut annotation = Annotation {
            name: name.rsplit('.').next().unwrap_or(name).to_string(),
            values: BTreeMap::new(),
        };
        if let Some(args) = child.child_by_field_name("arguments") {
            let mut cursor = args.walk();
            for arg in args.named_children(&mut cursor) {
                if arg.kind() == "element_value_pair" {
                    let key = arg
                        .child_by_field_name("key")
                        .map_or("value", |k| node_text(k, source));
                    if let Some(value) = arg.child_by_field_name("value") {
                        let values = annotation.values.entry(key.to_string()).or_default();
                        element_values(value, source, values);
                    }
                } else if !is_comment(arg) {
                    let values = annotation.values.entry("value".to_string()).or_default();
                    element_values(arg, source, values);
                }
            }
        }
        out.push(annotation);
    }
    out
}

fn element_values(node: Node<'_>, source: &str, out: &mut Vec<String>) {
    match node.kind() {
        "element_value_array_initializer" => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                element_values(child, source, out);
            }
        }
        "string_literal" | "binary_expression" => {
            out.push(string_value(node, source, &BTreeMap::new()).text);
        }
        _ if !is_comment(node) => out.push(node_text(node, source).to_string()),
        _ => {}
    }
}

fn collect_type_names(node: Node<'_>, source: &str, out: &mut Vec<String>) {
    match node.kind() {
        "type_identifier" | "scoped_type_identifier" => {
            out.push(node_text(node, source).to_string());
        }
        "generic_type" => {
            if let Some(inner) = node.named_child(0) {
                collect_type_names(inner, source, out);
            }
        }
        _ => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                collect_type_names(child, source, out);
            }
        }
    }
}

fn collect_error_lines(root: Node<'_>, lines: &mut Vec<u32>) {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            let line = row_line(node);
            if !lines.contains(&line) {
                lines.push(line);
            }
            continue;
        }
        if !node.has_error() {
            continue;
        }
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
}

// ── Node helpers ───────────────────────────────────────────────────

fn node_text<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    &source[node.byte_range()]
}

fn find_child_by_kind<'a>(node: Node<'a>, kind: &str) -> Option<Node<'a>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).find(|c| c.kind() == kind)
}

fn first_named_text(node: Node<'_>, source: &str, kinds: &[&str]) -> Option<String> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .find(|c| kinds.contains(&c.kind()))
        .map(|c| node_text(c, source).to_string())
}

/// Named nodes under `root` in document order, `root` first. Uses an
/// explicit stack: expression trees can be thousands of levels deep.
fn preorder(root: Node<'_>) -> impl Iterator<Item = Node<'_>> {
    let mut stack = vec![root];
    std::iter::from_fn(move || {
        let node = stack.pop()?;
        push_children(&mut stack, node);
        Some(node)
    })
}

/// Push the named children of `node` so that the first one pops first.
fn push_children<'t>(stack: &mut Vec<Node<'t>>, node: Node<'t>) {
    let mut cursor = node.walk();
    let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
    stack.extend(children.into_iter().rev());
}

fn is_comment(node: Node<'_>) -> bool {
    matches!(node.kind(), "line_comment" | "block_comment" | "comment")
}

fn row_line(node: Node<'_>) -> u32 {
    LineRange::from(node.range()).start
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVICE: &str = r#"
package com.acme.service.impl;

import com.acme.mapper.UserMapper;
import com.acme.model.User;
import java.util.List;
import org.springframework.stereotype.Service;
import com.acme.common.*;

@Service("userService")
public class UserServiceImpl extends BaseService implements UserService {
    private static final String TABLE = "users";
    private final UserMapper userMapper;

    public UserServiceImpl(UserMapper userMapper) {
        this.userMapper = userMapper;
    }

    @Override
    public List<User> findAll(int page, String q) {
        audit("findAll");
        String sql = "SELECT id, name FROM " + TABLE + " WHERE name LIKE " + q;
        return userMapper.selectAll();
    }

    public void touch() {
        this.userMapper.touch(1L);
        Helper.go();
        UserService.class.getMethod("findAll");
    }
}
"#;

    #[test]
    fn reads_package_imports_and_types() {
        let file = JavaFile::parse(SERVICE).unwrap();
        assert_eq!(file.package.as_deref(), Some("com.acme.service.impl"));
        assert!(file.imports.contains(&"com.acme.mapper.UserMapper".to_string()));
        assert_eq!(file.wildcard_imports, vec!["com.acme.common".to_string()]);
        assert!(file.error_lines.is_empty());

        let ty = &file.types[0];
        assert_eq!(ty.fqcn, "com.acme.service.impl.UserServiceImpl");
        assert!(!ty.is_interface);
        assert_eq!(ty.extends, vec!["BaseService".to_string()]);
        assert_eq!(ty.implements, vec!["UserService".to_string()]);
        assert_eq!(ty.annotation("Service").unwrap().get("value"), ["userService"]);
        assert_eq!(ty.fields["userMapper"], "UserMapper");
        assert_eq!(ty.constants["TABLE"], "users");
        assert!(ty.has_method("findAll", 2));
    }

    #[test]
    fn types_call_receivers() {
        let file = JavaFile::parse(SERVICE).unwrap();
        let ty = &file.types[0];
        let find_all = ty.methods.iter().find(|m| m.name == "findAll").unwrap();
        assert!(find_all.annotation("Override").is_some());
        assert_eq!(find_all.param_types(), "int,String");

        let audit = find_all.calls.iter().find(|c| c.method == "audit").unwrap();
        assert_eq!(audit.receiver, Receiver::Own);
        let select = find_all.calls.iter().find(|c| c.method == "selectAll").unwrap();
        assert_eq!(
            select.receiver,
            Receiver::Variable {
                name: "userMapper".into(),
                ty: Some("UserMapper".into())
            }
        );

        let touch = ty.methods.iter().find(|m| m.name == "touch").unwrap();
        let t = touch.calls.iter().find(|c| c.method == "touch").unwrap();
        assert!(matches!(&t.receiver, Receiver::Variable { ty: Some(ty), .. } if ty == "UserMapper"));
        assert_eq!(t.arity(), 1);
        let go = touch.calls.iter().find(|c| c.method == "go").unwrap();
        assert_eq!(go.receiver, Receiver::Type("Helper".into()));
        let reflect = touch.calls.iter().find(|c| c.method == "getMethod").unwrap();
        assert_eq!(reflect.receiver, Receiver::ClassLiteral("UserService".into()));
        assert_eq!(reflect.args[0].as_str().unwrap().text, "findAll");
    }

    #[test]
    fn flattens_embedded_sql() {
        let file = JavaFile::parse(SERVICE).unwrap();
        let find_all = file.types[0]
            .methods
            .iter()
            .find(|m| m.name == "findAll")
            .unwrap();
        assert_eq!(find_all.sql_strings.len(), 1);
        let sql = &find_all.sql_strings[0].value;
        assert_eq!(sql.text, "SELECT id, name FROM users WHERE name LIKE ${q}");
        assert_eq!(sql.dynamic_parts, 1);
    }

    #[test]
    fn resolves_types_through_imports() {
        let file = JavaFile::parse(SERVICE).unwrap();
        assert_eq!(
            file.resolve_type("UserMapper").candidates,
            vec!["com.acme.mapper.UserMapper".to_string()]
        );
        let same_pkg = file.resolve_type("UserService");
        assert_eq!(same_pkg.candidates[0], "com.acme.service.impl.UserService");
        assert!(same_pkg.candidates.contains(&"com.acme.common.UserService".to_string()));
        assert_eq!(file.resolve_type("List<User>").name, "List");

        assert!(file.is_project_type("UserMapper"));
        assert!(file.is_project_type("BaseService"));
        assert!(!file.is_project_type("List<User>"));
        assert!(!file.is_project_type("String"));
        assert!(!file.is_project_type("int"));
        assert!(!file.is_project_type("Service"));
    }

    #[test]
    fn interfaces_and_nested_types() {
        let src = "package p;\npublic interface A extends B, C<D> {\n  void run(String s);\n  class Inner {}\n}\n";
        let file = JavaFile::parse(src).unwrap();
        assert_eq!(file.types.len(), 2);
        assert!(file.types[0].is_interface);
        assert_eq!(file.types[0].extends, vec!["B".to_string(), "C".to_string()]);
        assert_eq!(file.types[0].methods[0].params[0].name, "s");
        assert_eq!(file.types[1].fqcn, "p.A.Inner");
    }

    #[test]
    fn records_syntax_errors_without_failing() {
        let file = JavaFile::parse("package p;\npublic class Broken {\n  void x( {\n}\n").unwrap();
        assert!(!file.error_lines.is_empty());
        assert_eq!(file.types.len(), 1);
    }

    #[test]
    fn long_concatenation_is_walked_without_recursion() {
        let operands = " + v".repeat(10_000);
        let src = format!(
            "package p;\nclass Big {{\n  void run(String v) {{\n    String sql = \"SELECT id FROM users WHERE a = \"{operands};\n    helper.exec(sql);\n  }}\n}}\n"
        );
        let file = JavaFile::parse(&src).unwrap();
        let run = &file.types[0].methods[0];
        assert_eq!(run.sql_strings.len(), 1);
        let sql = &run.sql_strings[0].value;
        assert_eq!(sql.dynamic_parts, 10_000);
        assert!(sql.text.starts_with("SELECT id FROM users WHERE a = ${v}${v}"));
        assert!(run.calls.iter().any(|c| c.method == "exec"));
    }

    #[test]
    fn operands_keep_source_order() {
        let src = "package p;\nclass C {\n  static final String T = \"users\";\n  void run(int n) {\n    String a = \"SELECT * FROM \" + T + \" WHERE id = \" + (n) + \" LIMIT 1\";\n  }\n}\n";
        let file = JavaFile::parse(src).unwrap();
        let sql = &file.types[0].methods[0].sql_strings[0].value;
        assert_eq!(sql.text, "SELECT * FROM users WHERE id = ${n} LIMIT 1");
        assert_eq!(sql.dynamic_parts, 1);
    }

    #[test]
    fn unquotes_literals() {
        assert_eq!(unquote(r#""a\"b\n""#), "a\"b\n");
        assert_eq!(unquote("\"\"\"\n  SELECT 1\n\"\"\""), "\n  SELECT 1\n");
    }
}
