use std::sync::LazyLock;

use regex::Regex;

use super::component::{Profile, extract_java};
use super::{ExtractOptions, Extractor, file_stem, has_extension};
use crate::finding::FindingSet;
use crate::{ArtifactKind, NodeKind};

static MAPPER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@(?:Mapper|Repository)\b|extends\s+SqlSessionDaoSupport\b|\bSqlSessionTemplate\b")
        .expect("mapper pattern is valid")
});

const NAME_SUFFIXES: &[&str] = &["Mapper", "Dao", "DAO", "DaoImpl", "Repository", "RepositoryImpl"];

const PROFILE: Profile = Profile {
    artifact: ArtifactKind::Mapper,
    type_kind: NodeKind::MapperInterface,
    method_kind: NodeKind::MapperMethod,
    call_kinds: &[NodeKind::MapperMethod],
    routes: false,
    bind_statements: true,
};

/// Data-access mappers.
///
/// Interface methods are bound to the statement `<fqcn>.<method>`, which is
/// defined either by an XML mapper with that namespace or inline through
/// `@Select`-style annotations. DAO classes reach statements through
/// `SqlSession` calls and embedded SQL strings.
#[derive(Debug)]
pub struct MapperExtractor {
    options: ExtractOptions,
}

impl MapperExtractor {
    pub fn new(options: ExtractOptions) -> Self {
        Self { options }
    }
}

impl Extractor for MapperExtractor {
    fn artifact(&self) -> ArtifactKind {
        ArtifactKind::Mapper
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["java"]
    }

    fn accepts(&self, path: &str, content: &str) -> bool {
        if !has_extension(path, self.extensions()) {
            return false;
        }
        let stem = file_stem(path);
        MAPPER_RE.is_match(content) || NAME_SUFFIXES.iter().any(|s| stem.ends_with(s))
    }

    fn extract(&self, content: &str, path: &str) -> FindingSet {
        extract_java(content, path, PROFILE, &self.options)
    }
}
