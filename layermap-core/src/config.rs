use std::path::{Path, PathBuf};

use layermap_extract::ExtractOptions;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Directory holding layermap state inside an analyzed project.
pub const STATE_DIR: &str = ".layermap";

/// Config file name inside [`STATE_DIR`].
pub const CONFIG_FILE: &str = "config.toml";

/// Top-level layermap configuration, matching `.layermap/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayermapConfig {
    #[serde(default)]
    pub resolver: ResolverSection,
    #[serde(default)]
    pub query: QuerySection,
    #[serde(default)]
    pub extraction: ExtractionSection,
    #[serde(default)]
    pub persistence: PersistenceSection,
}

impl LayermapConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Load `<root>/.layermap/config.toml`, or defaults when it is absent.
    pub fn load_or_default(root: &Path) -> Result<Self, ConfigError> {
        let path = Self::path_in(root);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn path_in(root: &Path) -> PathBuf {
        root.join(STATE_DIR).join(CONFIG_FILE)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Check value ranges and glob syntax.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.resolver;
        unit_interval("resolver.name_match_weight", r.name_match_weight)?;
        unit_interval("resolver.fuzzy_match_weight", r.fuzzy_match_weight)?;
        unit_interval("resolver.min_fuzzy_similarity", r.min_fuzzy_similarity)?;
        unit_interval("resolver.stub_confidence_cap", r.stub_confidence_cap)?;
        unit_interval("resolver.ambiguity_cap", r.ambiguity_cap)?;
        if r.ambiguity_cap >= 0.5 {
            return Err(ConfigError::Invalid(
                "resolver.ambiguity_cap must be below 0.5".into(),
            ));
        }

        let q = &self.query;
        if q.max_cycle_length < 1 {
            return Err(ConfigError::Invalid(
                "query.max_cycle_length must be at least 1".into(),
            ));
        }
        if q.max_cycles == 0 {
            return Err(ConfigError::Invalid("query.max_cycles must be positive".into()));
        }
        if !(0.0..=1.0).contains(&q.min_confidence) {
            return Err(ConfigError::Invalid(
                "query.min_confidence must be within [0, 1]".into(),
            ));
        }

        let c = &self.extraction.confidence;
        unit_interval("extraction.confidence.dynamic_sql_penalty", c.dynamic_sql_penalty)?;
        unit_interval("extraction.confidence.min_dynamic_confidence", c.min_dynamic_confidence)?;
        unit_interval("extraction.confidence.reflection_confidence", c.reflection_confidence)?;
        unit_interval("extraction.confidence.dynamic_url_confidence", c.dynamic_url_confidence)?;
        unit_interval(
            "extraction.confidence.statement_call_confidence",
            c.statement_call_confidence,
        )?;
        unit_interval(
            "extraction.confidence.unknown_receiver_confidence",
            c.unknown_receiver_confidence,
        )?;

        for pattern in self
            .extraction
            .include_patterns
            .iter()
            .chain(&self.extraction.exclude_patterns)
        {
            glob::Pattern::new(pattern)
                .map_err(|e| ConfigError::Invalid(format!("glob {pattern:?}: {e}")))?;
        }
        Ok(())
    }
}

fn unit_interval(name: &str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{name} must be within (0, 1], got {value}"
        )))
    }
}

/// How ties that survive the scope preference are broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Most recently defined candidate, then lexical order.
    #[default]
    ScopeThenRecency,
    /// Lexical order of signatures only. Makes results independent of the
    /// order in which files were analyzed.
    ScopeThenLexical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverSection {
    /// Multiplier for unique matches that ignore the signature.
    pub name_match_weight: f64,
    /// Multiplier for heuristic matches, applied with the similarity.
    pub fuzzy_match_weight: f64,
    /// Heuristic matches below this similarity are discarded.
    pub min_fuzzy_similarity: f64,
    /// Upper bound for genuinely ambiguous resolutions.
    pub ambiguity_cap: f64,
    /// Upper bound for edges into stubs.
    pub stub_confidence_cap: f64,
    pub tie_break: TieBreak,
}

impl Default for ResolverSection {
    fn default() -> Self {
        Self {
            name_match_weight: 0.8,
            fuzzy_match_weight: 0.5,
            min_fuzzy_similarity: 0.3,
            ambiguity_cap: 0.45,
            stub_confidence_cap: 0.4,
            tie_break: TieBreak::ScopeThenRecency,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySection {
    /// Longest cycle reported by cycle detection.
    pub max_cycle_length: usize,
    /// Cycle detection stops after this many cycles.
    pub max_cycles: usize,
    /// Default depth bound for impact analysis; unbounded when absent.
    pub impact_depth: Option<usize>,
    /// Default confidence floor for traversals.
    pub min_confidence: f64,
}

impl Default for QuerySection {
    fn default() -> Self {
        Self {
            max_cycle_length: 8,
            max_cycles: 1000,
            impact_depth: None,
            min_confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSection {
    /// When non-empty, only matching paths are analyzed.
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub confidence: ExtractOptions,
}

impl Default for ExtractionSection {
    fn default() -> Self {
        Self {
            include_patterns: Vec::new(),
            exclude_patterns: vec![
                "**/node_modules/**".into(),
                "**/target/**".into(),
                "**/build/**".into(),
                "**/.git/**".into(),
            ],
            confidence: ExtractOptions::default(),
        }
    }
}

/// Storage backend for the persisted graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PersistFormat {
    #[default]
    Json,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceSection {
    pub format: PersistFormat,
    /// Graph file, relative to the project root.
    pub path: String,
}

impl Default for PersistenceSection {
    fn default() -> Self {
        Self {
            format: PersistFormat::Json,
            path: format!("{STATE_DIR}/graph.json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = LayermapConfig::default();
        config.validate().unwrap();
        assert_eq!(config.resolver.tie_break, TieBreak::ScopeThenRecency);
        assert_eq!(config.query.max_cycle_length, 8);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = LayermapConfig::from_toml_str(
            r#"
[resolver]
ambiguity_cap = 0.3
tie_break = "scope_then_lexical"

[extraction.confidence]
reflection_confidence = 0.4

[persistence]
format = "sqlite"
path = "graph.db"
"#,
        )
        .unwrap();
        assert!((config.resolver.ambiguity_cap - 0.3).abs() < f64::EPSILON);
        assert!((config.resolver.name_match_weight - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.resolver.tie_break, TieBreak::ScopeThenLexical);
        assert!((config.extraction.confidence.reflection_confidence - 0.4).abs() < f64::EPSILON);
        assert!((config.extraction.confidence.dynamic_sql_penalty - 0.15).abs() < f64::EPSILON);
        assert_eq!(config.persistence.format, PersistFormat::Sqlite);
        assert_eq!(config.query.max_cycles, 1000);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let err = LayermapConfig::from_toml_str("[resolver]\nambiguity_cap = 0.7\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let err = LayermapConfig::from_toml_str("[resolver]\nname_match_weight = 0.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let err = LayermapConfig::from_toml_str("[extraction]\nexclude_patterns = [\"[\"]\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let err = LayermapConfig::from_toml_str("resolver = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn round_trips_through_toml() {
        let config = LayermapConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(LayermapConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn loads_from_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            LayermapConfig::load_or_default(dir.path()).unwrap(),
            LayermapConfig::default()
        );
        let path = LayermapConfig::path_in(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[query]\nmax_cycle_length = 4\n").unwrap();
        let config = LayermapConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.query.max_cycle_length, 4);
        assert!(matches!(
            LayermapConfig::load(&dir.path().join("missing.toml")),
            Err(ConfigError::NotFound(_))
        ));
    }
}
