use std::sync::LazyLock;

use regex::Regex;

use super::component::{Profile, extract_java};
use super::{ExtractOptions, Extractor, file_stem, has_extension};
use crate::finding::FindingSet;
use crate::{ArtifactKind, NodeKind};

static SERVICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@(?:Service|Component|Transactional)\b").expect("service pattern is valid")
});

const NAME_SUFFIXES: &[&str] = &["Service", "ServiceImpl", "Manager", "ManagerImpl", "Facade"];

const PROFILE: Profile = Profile {
    artifact: ArtifactKind::Service,
    type_kind: NodeKind::Service,
    method_kind: NodeKind::ServiceMethod,
    call_kinds: &[NodeKind::ServiceMethod, NodeKind::MapperMethod],
    routes: false,
    bind_statements: false,
};

/// Service interfaces and implementations.
///
/// An implementation is linked to its interface with an `Implements` edge
/// from the interface, and every `@Override` method likewise from the
/// interface member, so impact on an interface member reaches callers
/// through the implementation.
#[derive(Debug)]
pub struct ServiceExtractor {
    options: ExtractOptions,
}

impl ServiceExtractor {
    pub fn new(options: ExtractOptions) -> Self {
        Self { options }
    }
}

impl Extractor for ServiceExtractor {
    fn artifact(&self) -> ArtifactKind {
        ArtifactKind::Service
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["java"]
    }

    fn accepts(&self, path: &str, content: &str) -> bool {
        if !has_extension(path, self.extensions()) {
            return false;
        }
        let stem = file_stem(path);
        SERVICE_RE.is_match(content) || NAME_SUFFIXES.iter().any(|s| stem.ends_with(s))
    }

    fn extract(&self, content: &str, path: &str) -> FindingSet {
        extract_java(content, path, PROFILE, &self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EdgeKind, Target};

    const IMPL: &str = r#"
package com.acme.service.impl;

import com.acme.mapper.UserMapper;
import com.acme.service.UserService;
import org.apache.ibatis.session.SqlSession;

@Service
public class UserServiceImpl implements UserService {
    private UserMapper userMapper;
    private SqlSession sqlSession;

    @Override
    public List<User> findAll() {
        return userMapper.selectAll();
    }

    public int count() {
        return sqlSession.selectOne("com.acme.mapper.UserMapper.count");
    }

    public List<Map> report(String month) {
        String sql = "SELECT u.id, u.name FROM users u JOIN orders_" + month + " o ON o.user_id = u.id";
        return jdbc(sql);
    }
}
"#;

    fn extract() -> FindingSet {
        ServiceExtractor::new(ExtractOptions::default()).extract(
            IMPL,
            "src/main/java/com/acme/service/impl/UserServiceImpl.java",
        )
    }

    #[test]
    fn links_implementation_to_interface() {
        let findings = extract();
        let implements: Vec<_> = findings
            .references
            .iter()
            .filter(|r| r.edge == EdgeKind::Implements)
            .collect();
        assert_eq!(implements.len(), 2);
        assert!(implements.iter().all(|r| r.inverted));
        assert!(implements.iter().any(|r| matches!(
            &r.target,
            Target::Type { type_ref, .. } if type_ref.primary() == "com.acme.service.UserService"
        )));
        assert!(implements.iter().any(|r| matches!(
            &r.target,
            Target::Member { member, arity: Some(0), .. } if member == "findAll"
        )));
    }

    #[test]
    fn statement_calls_through_sql_session() {
        let findings = extract();
        let exec = findings
            .references
            .iter()
            .find(|r| {
                r.edge == EdgeKind::ExecutesSql
                    && r.from == "com.acme.service.impl.UserServiceImpl.count/0"
            })
            .unwrap();
        assert_eq!(
            exec.target,
            Target::Statement {
                id: "com.acme.mapper.UserMapper.count".into()
            }
        );
        assert!((exec.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn embedded_sql_becomes_a_statement() {
        let findings = extract();
        let stmt = findings
            .definition("com.acme.service.impl.UserServiceImpl.report#sql1")
            .unwrap();
        assert_eq!(stmt.kind, NodeKind::SqlStatement);
        assert_eq!(stmt.attributes["dynamic_fragments"], "1");
        let reads: Vec<_> = findings
            .references
            .iter()
            .filter(|r| r.edge == EdgeKind::ReadsTable)
            .map(|r| r.target.clone())
            .collect();
        assert!(reads.contains(&Target::Table {
            name: "users".into()
        }));
        assert!(reads.contains(&Target::TablePattern {
            pattern: "orders_${month}".into()
        }));
    }

    #[test]
    fn accepts_services() {
        let ex = ServiceExtractor::new(ExtractOptions::default());
        assert!(ex.accepts("s/OrderManager.java", "class OrderManager {}"));
        assert!(ex.accepts("s/Billing.java", "@Service public class Billing {}"));
        assert!(!ex.accepts("s/Billing.java", "public class Billing {}"));
    }
}
