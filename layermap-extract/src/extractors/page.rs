use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use super::{ExtractOptions, Extractor};
use crate::finding::{Definition, FindingSet, Reference, Target, is_fragment_path, normalize_route};
use crate::markup::{self, LineIndex};
use crate::{ArtifactKind, EdgeKind, LineRange, NodeKind, normalize_path};

fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("page pattern is valid")
}

static INCLUDE_DIRECTIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r#"<%@\s*include\s+file\s*=\s*["']([^"']+)["']"#));

static JSP_INCLUDE_RE: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r#"<(?:jsp:(?:include|forward)|c:import)\b[^>]*?\b(?:page|url)\s*=\s*["']([^"']+)["']"#)
});

static FORM_RE: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?is)<form\b([^>]*)>"));

static HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r#"(?is)<a\b[^>]*?\bhref\s*=\s*["']([^"']+)["']"#));

static C_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r#"<c:url\b[^>]*?\bvalue\s*=\s*["']([^"']+)["']"#));

static SCRIPT_NAV_RE: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r#"\blocation(?:\.href)?\s*=\s*["']([^"']+)["']|\blocation\.(?:assign|replace)\s*\(\s*["']([^"']+)["']"#)
});

static AJAX_RE: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r#"\$\.(ajax|get|post|getJSON)\s*\(\s*["']([^"']+)["']|\bfetch\s*\(\s*["']([^"']+)["']"#)
});

static URL_OPTION_RE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r#"\burl\s*:\s*["']([^"']+)["']"#));

static TYPE_OPTION_RE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r#"(?i)\b(?:type|method)\s*:\s*["'](get|post|put|delete|patch)["']"#));

/// Expressions standing for the web application's context path.
static CONTEXT_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"^(?:\$\{\s*(?:pageContext\.request\.contextPath|pageContext\.servletContext\.contextPath|ctx|ctxPath|contextPath|basePath|base)\s*\}|<%=\s*(?:request\.getContextPath\(\)|path|basePath|ctx)\s*%>)")
});

static EXPRESSION_RE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"\$\{[^}]*\}|#\{[^}]*\}|<%=.*?%>|\{\{.*?\}\}"));

const STATIC_EXTENSIONS: &[&str] = &[
    ".css", ".js", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".pdf", ".woff", ".woff2",
    ".ttf", ".map",
];

const PAGE_EXTENSIONS: &[&str] = &[".jsp", ".jspx", ".html", ".htm"];

/// JSP and HTML pages, and the fragments they include.
#[derive(Debug)]
pub struct PageExtractor {
    options: ExtractOptions,
}

impl PageExtractor {
    pub fn new(options: ExtractOptions) -> Self {
        Self { options }
    }
}

/// A URL as written in a page, reduced to something resolvable.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PageUrl {
    path: String,
    dynamic: bool,
    relative: bool,
}

/// Reduce a raw URL attribute to a route or resource path. `None` for
/// anchors, external and static-resource links, and fully dynamic values.
fn page_url(raw: &str) -> Option<PageUrl> {
    let decoded = markup::decode_entities(raw.trim());
    let stripped = CONTEXT_PREFIX_RE.replace(&decoded, "");
    let lower = stripped.to_ascii_lowercase();
    if stripped.is_empty()
        || stripped.starts_with('#')
        || stripped.starts_with('<')
        || stripped.starts_with("//")
        || lower.contains("://")
        || ["javascript:", "mailto:", "tel:", "data:"]
            .iter()
            .any(|p| lower.starts_with(p))
    {
        return None;
    }
    let dynamic = EXPRESSION_RE.is_match(&stripped);
    let path = EXPRESSION_RE.replace_all(&stripped, "{}").into_owned();
    let path = path.split(['?', '#']).next().unwrap_or("").trim().to_string();
    if !path.chars().any(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    let path_lower = path.to_ascii_lowercase();
    if STATIC_EXTENSIONS.iter().any(|e| path_lower.ends_with(e)) {
        return None;
    }
    Some(PageUrl {
        relative: !path.starts_with('/'),
        path,
        dynamic,
    })
}

fn is_page_link(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    PAGE_EXTENSIONS.iter().any(|e| lower.ends_with(e))
}

struct PageEmitter<'a> {
    findings: FindingSet,
    kind: NodeKind,
    web: String,
    lines: LineIndex,
    options: &'a ExtractOptions,
    seen: HashSet<(EdgeKind, String)>,
}

impl PageEmitter<'_> {
    fn confidence(&self, url: &PageUrl) -> f64 {
        if url.dynamic {
            self.options.dynamic_url_confidence
        } else {
            1.0
        }
    }

    fn push(&mut self, edge: EdgeKind, target: Target, offset: usize, confidence: f64, note: Option<String>) {
        if !self.seen.insert((edge, target.describe())) {
            return;
        }
        let mut reference = Reference::new(
            self.kind,
            &self.web,
            edge,
            target,
            self.lines.line_of(offset),
        )
        .with_confidence(confidence);
        if let Some(note) = note {
            reference = reference.with_note(note);
        }
        self.findings.refer(reference);
    }

    fn include(&mut self, raw: &str, offset: usize) {
        let Some(url) = page_url(raw) else {
            return;
        };
        let path = markup::join_web_path(&self.web, &url.path);
        let confidence = self.confidence(&url);
        self.push(EdgeKind::Includes, Target::Resource { path }, offset, confidence, None);
    }

    fn route(&mut self, raw: &str, method: Option<String>, offset: usize) {
        let Some(url) = page_url(raw) else {
            return;
        };
        if is_page_link(&url.path) {
            return;
        }
        let confidence = self.confidence(&url);
        let note = url.relative.then(|| "relative".to_string());
        self.push(
            EdgeKind::Invokes,
            Target::Route {
                path: normalize_route(&url.path),
                method,
            },
            offset,
            confidence,
            note,
        );
    }
}

impl Extractor for PageExtractor {
    fn artifact(&self) -> ArtifactKind {
        ArtifactKind::Page
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["jsp", "jspx", "jspf", "html", "htm", "inc", "tag", "tagx"]
    }

    fn extract(&self, content: &str, path: &str) -> FindingSet {
        let file = normalize_path(path);
        let web = markup::web_path(&file);
        let kind = if is_fragment_path(&file) {
            NodeKind::Include
        } else {
            NodeKind::Page
        };
        let lines = LineIndex::new(content);
        let mut findings = FindingSet::new(file.clone(), ArtifactKind::Page);
        findings.scope = Some(markup::web_dir(&web));
        let name = web.rsplit('/').next().unwrap_or(&web).to_string();
        findings.define(
            Definition::new(kind, &web, name, LineRange::new(1, lines.line_count()))
                .with_attr("file", file),
        );

        let (text, open_jsp) = markup::blank_regions(content, "<%--", "--%>");
        let (text, open_html) = markup::blank_regions(&text, "<!--", "-->");
        for offset in open_jsp {
            findings.issue(lines.line_of(offset), "unterminated JSP comment");
        }
        for offset in open_html {
            findings.issue(lines.line_of(offset), "unterminated HTML comment");
        }
        let (_, open_scriptlets) = markup::blank_regions(&text, "<%", "%>");
        for offset in open_scriptlets {
            findings.issue(lines.line_of(offset), "unterminated scriptlet or directive");
        }

        let mut emitter = PageEmitter {
            findings,
            kind,
            web,
            lines,
            options: &self.options,
            seen: HashSet::new(),
        };

        for caps in INCLUDE_DIRECTIVE_RE.captures_iter(&text) {
            if let (Some(whole), Some(file)) = (caps.get(0), caps.get(1)) {
                emitter.include(file.as_str(), whole.start());
            }
        }
        for caps in JSP_INCLUDE_RE.captures_iter(&text) {
            if let (Some(whole), Some(page)) = (caps.get(0), caps.get(1)) {
                emitter.include(page.as_str(), whole.start());
            }
        }
        for caps in FORM_RE.captures_iter(&text) {
            let (Some(whole), Some(attrs)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let attrs = markup::attributes(attrs.as_str());
            if let Some(action) = attrs.get("action") {
                let method = attrs
                    .get("method")
                    .map_or_else(|| "GET".to_string(), |m| m.to_ascii_uppercase());
                emitter.route(action, Some(method), whole.start());
            }
        }
        for caps in HREF_RE.captures_iter(&text) {
            if let (Some(whole), Some(href)) = (caps.get(0), caps.get(1)) {
                emitter.route(href.as_str(), Some("GET".to_string()), whole.start());
            }
        }
        for caps in C_URL_RE.captures_iter(&text) {
            if let (Some(whole), Some(value)) = (caps.get(0), caps.get(1)) {
                emitter.route(value.as_str(), None, whole.start());
            }
        }
        for caps in SCRIPT_NAV_RE.captures_iter(&text) {
            let url = caps.get(1).or_else(|| caps.get(2));
            if let (Some(whole), Some(url)) = (caps.get(0), url) {
                emitter.route(url.as_str(), Some("GET".to_string()), whole.start());
            }
        }
        for caps in AJAX_RE.captures_iter(&text) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let method = caps.get(1).and_then(|m| match m.as_str() {
                "post" => Some("POST".to_string()),
                "get" | "getJSON" => Some("GET".to_string()),
                _ => None,
            });
            if let Some(url) = caps.get(2).or_else(|| caps.get(3)) {
                emitter.route(url.as_str(), method, whole.start());
            }
        }
        for caps in URL_OPTION_RE.captures_iter(&text) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            // The verb of `$.ajax({url: .., type: ..})` sits in the same object literal.
            let window_end = (whole.end() + 200).min(text.len());
            let window_start = whole.start().saturating_sub(200);
            let window = text.get(window_start..window_end).unwrap_or("");
            let method = TYPE_OPTION_RE
                .captures(window)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_ascii_uppercase());
            if let Some(url) = caps.get(1) {
                emitter.route(url.as_str(), method, whole.start());
            }
        }

        emitter.findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST_JSP: &str = r#"<%@ page contentType="text/html;charset=UTF-8" %>
<%@ include file="../common/header.jspf" %>
<html>
<body>
<%-- <a href="/legacy/old.do">old</a> --%>
<form action="${pageContext.request.contextPath}/user/save.do" method="post">
  <input name="name"/>
</form>
<a href="<c:url value='/user/list.do'/>">list</a>
<a href="${ctx}/user/${user.id}/edit.do">edit</a>
<a href="/static/app.css">css</a>
<a href="detail.jsp">detail</a>
<jsp:include page="/WEB-INF/views/common/footer.jsp"/>
<script>
  $.post("/user/delete.do", {id: 1});
  $.ajax({
    url: '/user/search.do',
    type: 'GET'
  });
  function go() { location.href = 'list.do'; }
</script>
</body>
</html>
"#;

    fn extract() -> FindingSet {
        PageExtractor::new(ExtractOptions::default())
            .extract(LIST_JSP, "src/main/webapp/WEB-INF/views/user/list.jsp")
    }

    fn route_targets(findings: &FindingSet) -> Vec<(String, Option<String>, f64)> {
        findings
            .references
            .iter()
            .filter_map(|r| match &r.target {
                Target::Route { path, method } => Some((path.clone(), method.clone(), r.confidence)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn defines_the_page_by_web_path() {
        let findings = extract();
        let page = &findings.definitions[0];
        assert_eq!(page.kind, NodeKind::Page);
        assert_eq!(page.signature, "/WEB-INF/views/user/list.jsp");
        assert_eq!(page.name, "list.jsp");
        assert_eq!(findings.scope.as_deref(), Some("/WEB-INF/views/user"));
        assert!(findings.issues.is_empty());
    }

    #[test]
    fn includes_resolve_relative_to_the_page() {
        let findings = extract();
        let includes: Vec<_> = findings
            .references
            .iter()
            .filter(|r| r.edge == EdgeKind::Includes)
            .map(|r| r.target.clone())
            .collect();
        assert_eq!(
            includes,
            [
                Target::Resource {
                    path: "/WEB-INF/views/common/header.jspf".into()
                },
                Target::Resource {
                    path: "/WEB-INF/views/common/footer.jsp".into()
                },
            ]
        );
    }

    #[test]
    fn links_and_scripts_invoke_routes() {
        let findings = extract();
        let routes = route_targets(&findings);
        let paths: Vec<&str> = routes.iter().map(|(p, _, _)| p.as_str()).collect();
        assert!(paths.contains(&"/user/save.do"));
        assert!(paths.contains(&"/user/list.do"));
        assert!(paths.contains(&"/user/{}/edit.do"));
        assert!(paths.contains(&"/user/delete.do"));
        assert!(paths.contains(&"/user/search.do"));
        assert!(paths.contains(&"/list.do"));
        assert!(!paths.iter().any(|p| p.contains("legacy")), "commented out");
        assert!(!paths.iter().any(|p| p.ends_with(".css") || p.ends_with(".jsp")));

        let save = routes.iter().find(|(p, _, _)| p == "/user/save.do").unwrap();
        assert_eq!(save.1.as_deref(), Some("POST"));
        assert!((save.2 - 1.0).abs() < 1e-9, "context path is not dynamic");
        let edit = routes.iter().find(|(p, _, _)| p == "/user/{}/edit.do").unwrap();
        assert!((edit.2 - 0.6).abs() < 1e-9);
        let search = routes.iter().find(|(p, _, _)| p == "/user/search.do").unwrap();
        assert_eq!(search.1.as_deref(), Some("GET"));
        let delete = routes.iter().find(|(p, _, _)| p == "/user/delete.do").unwrap();
        assert_eq!(delete.1.as_deref(), Some("POST"));
    }

    #[test]
    fn fragments_are_includes_and_problems_are_reported() {
        let findings = PageExtractor::new(ExtractOptions::default()).extract(
            "<div>\n<% if (x) { \n<a href=\"/a.do\">a</a>",
            "WebContent/common/menu.jspf",
        );
        assert_eq!(findings.definitions[0].kind, NodeKind::Include);
        assert_eq!(findings.definitions[0].signature, "/common/menu.jspf");
        assert_eq!(findings.issues.len(), 1);
        assert_eq!(findings.issues[0].line, 2);
    }

    #[test]
    fn reduces_urls() {
        assert_eq!(page_url("#top"), None);
        assert_eq!(page_url("https://example.com/x"), None);
        assert_eq!(page_url("${next}"), None);
        assert_eq!(
            page_url("<%=request.getContextPath()%>/a/b.do?x=1"),
            Some(PageUrl {
                path: "/a/b.do".into(),
                dynamic: false,
                relative: false
            })
        );
    }
}
