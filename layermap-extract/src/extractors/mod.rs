mod component;
pub mod controller;
pub mod mapper;
pub mod page;
pub mod schema;
pub mod service;
pub mod sql;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::finding::FindingSet;
use crate::ArtifactKind;

/// Confidence knobs shared by all extractors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractOptions {
    /// Confidence removed per dynamic SQL fragment.
    pub dynamic_sql_penalty: f64,
    /// Lowest confidence a dynamic SQL match can drop to.
    pub min_dynamic_confidence: f64,
    /// Confidence of reflection-bound method references.
    pub reflection_confidence: f64,
    /// Confidence of page links whose URL contains an expression.
    pub dynamic_url_confidence: f64,
    /// Confidence of statement ids passed as strings to a SQL session.
    pub statement_call_confidence: f64,
    /// Confidence of calls on a variable whose type is not declared in view.
    pub unknown_receiver_confidence: f64,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            dynamic_sql_penalty: 0.15,
            min_dynamic_confidence: 0.1,
            reflection_confidence: 0.5,
            dynamic_url_confidence: 0.6,
            statement_call_confidence: 0.9,
            unknown_receiver_confidence: 0.7,
        }
    }
}

impl ExtractOptions {
    /// Confidence of a SQL match given the dynamic fragments in its statement.
    pub fn dynamic_confidence(&self, fragments: usize) -> f64 {
        let fragments = u32::try_from(fragments).unwrap_or(u32::MAX);
        let penalty = self.dynamic_sql_penalty * f64::from(fragments);
        (1.0 - penalty).clamp(self.min_dynamic_confidence, 1.0)
    }
}

/// Capability implemented by each artifact extractor.
///
/// Extraction is pure: no shared state, no I/O, and malformed input
/// produces [`ParseIssue`](crate::ParseIssue)s instead of errors.
pub trait Extractor: Send + Sync + std::fmt::Debug {
    /// The artifact family this extractor handles.
    fn artifact(&self) -> ArtifactKind;

    /// File extensions this extractor may handle.
    fn extensions(&self) -> &'static [&'static str];

    /// Whether this extractor claims the file. The default accepts any file
    /// with a matching extension.
    fn accepts(&self, path: &str, _content: &str) -> bool {
        has_extension(path, self.extensions())
    }

    /// Extract findings from one file.
    fn extract(&self, content: &str, path: &str) -> FindingSet;
}

pub(crate) fn has_extension(path: &str, extensions: &[&str]) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}

pub(crate) fn file_stem(path: &str) -> &str {
    Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
}

/// Registry of the six extractors.
///
/// Classification order matters: mapper before controller before service,
/// since a DAO class can also look like a service, and schema before SQL,
/// since DDL-only scripts are claimed by the schema extractor.
#[derive(Debug)]
pub struct ExtractorRegistry {
    extractors: HashMap<ArtifactKind, Arc<dyn Extractor>>,
    order: Vec<ArtifactKind>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::with_options(ExtractOptions::default())
    }

    pub fn with_options(options: ExtractOptions) -> Self {
        let mut reg = Self {
            extractors: HashMap::new(),
            order: Vec::new(),
        };
        reg.register(Arc::new(page::PageExtractor::new(options)));
        reg.register(Arc::new(mapper::MapperExtractor::new(options)));
        reg.register(Arc::new(controller::ControllerExtractor::new(options)));
        reg.register(Arc::new(service::ServiceExtractor::new(options)));
        reg.register(Arc::new(schema::SchemaExtractor::new()));
        reg.register(Arc::new(sql::SqlExtractor::new(options)));
        reg
    }

    fn register(&mut self, extractor: Arc<dyn Extractor>) {
        self.order.push(extractor.artifact());
        self.extractors.insert(extractor.artifact(), extractor);
    }

    /// Look up the extractor for an artifact kind.
    pub fn get(&self, artifact: ArtifactKind) -> Option<Arc<dyn Extractor>> {
        self.extractors.get(&artifact).cloned()
    }

    /// Decide which artifact kind a file is, from its path and content.
    pub fn classify(&self, path: &str, content: &str) -> Option<ArtifactKind> {
        self.order
            .iter()
            .copied()
            .find(|kind| {
                self.extractors
                    .get(kind)
                    .is_some_and(|e| e.accepts(path, content))
            })
    }

    /// Classify and extract in one step. `None` when no extractor claims the file.
    pub fn extract(&self, path: &str, content: &str) -> Option<FindingSet> {
        let kind = self.classify(path, content)?;
        Some(self.get(kind)?.extract(content, path))
    }

    pub fn artifacts(&self) -> &[ArtifactKind] {
        &self.order
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_confidence_is_proportional_and_floored() {
        let opts = ExtractOptions::default();
        assert!((opts.dynamic_confidence(0) - 1.0).abs() < 1e-9);
        assert!((opts.dynamic_confidence(2) - 0.7).abs() < 1e-9);
        assert!((opts.dynamic_confidence(50) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn classifies_by_path_and_content() {
        let reg = ExtractorRegistry::new();
        assert_eq!(
            reg.classify("src/main/webapp/index.jsp", "<html/>"),
            Some(ArtifactKind::Page)
        );
        assert_eq!(
            reg.classify(
                "src/main/java/com/acme/web/UserController.java",
                "@Controller public class UserController {}"
            ),
            Some(ArtifactKind::Controller)
        );
        assert_eq!(
            reg.classify(
                "src/main/java/com/acme/service/UserService.java",
                "public interface UserService {}"
            ),
            Some(ArtifactKind::Service)
        );
        assert_eq!(
            reg.classify(
                "src/main/java/com/acme/mapper/UserMapper.java",
                "@Mapper public interface UserMapper {}"
            ),
            Some(ArtifactKind::Mapper)
        );
        assert_eq!(
            reg.classify(
                "src/main/resources/mapper/UserMapper.xml",
                "<mapper namespace=\"com.acme.UserMapper\"></mapper>"
            ),
            Some(ArtifactKind::Sql)
        );
        assert_eq!(
            reg.classify("db/reports.sql", "SELECT * FROM users;"),
            Some(ArtifactKind::Sql)
        );
        assert_eq!(
            reg.classify("db/schema.sql", "CREATE TABLE users (id INT);"),
            Some(ArtifactKind::Schema)
        );
        assert_eq!(
            reg.classify("src/main/java/com/acme/model/User.java", "public class User {}"),
            None
        );
        assert_eq!(reg.classify("README.md", "# hi"), None);
    }

    #[test]
    fn every_artifact_has_an_extractor() {
        let reg = ExtractorRegistry::default();
        for kind in ArtifactKind::ALL {
            let extractor = reg.get(kind).expect("registered");
            assert_eq!(extractor.artifact(), kind);
        }
        assert_eq!(reg.artifacts().len(), ArtifactKind::ALL.len());
    }
}
