//! Text helpers shared by the markup-based extractors (pages, XML mappers).

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("attribute pattern is valid")
});

/// Maps byte offsets to 1-based line numbers.
#[derive(Debug, Clone)]
pub struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    pub fn line_of(&self, offset: usize) -> u32 {
        let idx = match self.starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        u32::try_from(idx + 1).unwrap_or(u32::MAX)
    }

    pub fn line_count(&self) -> u32 {
        u32::try_from(self.starts.len()).unwrap_or(u32::MAX)
    }
}

/// Blank out every `open ... close` region, keeping newlines so that line
/// numbers stay valid. Returns the offsets of regions that were never closed.
pub fn blank_regions(text: &str, open: &str, close: &str) -> (String, Vec<usize>) {
    let mut out = String::with_capacity(text.len());
    let mut unterminated = Vec::new();
    let mut rest = text;
    let mut consumed = 0;
    while let Some(start) = rest.find(open) {
        out.push_str(&rest[..start]);
        let after_open = start + open.len();
        if let Some(end) = rest[after_open..].find(close) {
            let region_end = after_open + end + close.len();
            out.extend(blank(&rest[start..region_end]));
            consumed += region_end;
            rest = &rest[region_end..];
        } else {
            unterminated.push(consumed + start);
            out.extend(blank(&rest[start..]));
            return (out, unterminated);
        }
    }
    out.push_str(rest);
    (out, unterminated)
}

fn blank(region: &str) -> impl Iterator<Item = char> + '_ {
    region
        .chars()
        .map(|c| if c == '\n' { '\n' } else { ' ' })
}

/// Parse `key="value"` pairs out of a tag's attribute text.
pub fn attributes(tag_text: &str) -> BTreeMap<String, String> {
    ATTR_RE
        .captures_iter(tag_text)
        .filter_map(|caps| {
            let key = caps.get(1)?.as_str().to_string();
            let value = caps.get(2).or_else(|| caps.get(3))?.as_str();
            Some((key, decode_entities(value)))
        })
        .collect()
}

/// Decode the predefined XML entities and numeric character references.
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').filter(|&semi| semi <= 10).and_then(|semi| {
            let entity = &tail[1..semi];
            let ch = match entity {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|c| (c, semi + 1))
        });
        match decoded {
            Some((c, len)) => {
                out.push(c);
                rest = &tail[len..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Web-root-relative path of a page file: everything after the web
/// application root (`webapp/`, `WebContent/`), or from `WEB-INF/` on.
pub fn web_path(file_path: &str) -> String {
    let path = crate::normalize_path(file_path);
    for root in ["/webapp/", "/WebContent/", "/WebRoot/", "/web/"] {
        if let Some(idx) = path.find(root) {
            return format!("/{}", &path[idx + root.len()..]);
        }
    }
    for root in ["webapp/", "WebContent/", "WebRoot/"] {
        if let Some(rest) = path.strip_prefix(root) {
            return format!("/{rest}");
        }
    }
    if let Some(idx) = path.find("/WEB-INF/") {
        return path[idx..].to_string();
    }
    if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    }
}

/// Resolve `target` relative to the directory of `base` (both web paths),
/// collapsing `.` and `..` segments.
pub fn join_web_path(base: &str, target: &str) -> String {
    let combined = if target.starts_with('/') {
        target.to_string()
    } else {
        let dir = base.rsplit_once('/').map_or("", |(d, _)| d);
        format!("{dir}/{target}")
    };
    let mut segments: Vec<&str> = Vec::new();
    for seg in combined.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    format!("/{}", segments.join("/"))
}

/// Directory portion of a web path, used as the resolution scope.
pub fn web_dir(path: &str) -> String {
    match path.rsplit_once('/') {
        Some(("", _)) | None => "/".to_string(),
        Some((dir, _)) => dir.to_string(),
    }
}
