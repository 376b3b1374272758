// Integration test utilities and fixtures for layermap.

use std::sync::Once;

use layermap_core::config::{LayermapConfig, TieBreak};
use layermap_core::hash;
use layermap_core::pipeline::{Analyzer, SourceFile};
use layermap_core::types::NodeId;
use layermap_extract::NodeKind;
use tracing_subscriber::EnvFilter;

pub const SCHEMA: &str = "db/schema.sql";
pub const MAPPER: &str = "src/main/java/com/acme/mapper/UserMapper.java";
pub const MAPPER_XML: &str = "src/main/resources/mapper/UserMapper.xml";
pub const SERVICE: &str = "src/main/java/com/acme/service/UserService.java";
pub const CONTROLLER: &str = "src/main/java/com/acme/web/UserController.java";
pub const PAGE: &str = "src/main/webapp/WEB-INF/views/user/list.jsp";
pub const ALPHA: &str = "src/main/java/com/acme/cycle/AlphaService.java";
pub const BETA: &str = "src/main/java/com/acme/cycle/BetaService.java";

pub const CONTROLLER_METHOD: &str = "com.acme.web.UserController.list/1";
pub const SERVICE_METHOD: &str = "com.acme.service.UserService.findAll/0";
pub const MAPPER_METHOD: &str = "com.acme.mapper.UserMapper.selectAll/0";
pub const STATEMENT: &str = "com.acme.mapper.UserMapper.selectAll";
pub const INSERT_METHOD: &str = "com.acme.mapper.UserMapper.insert/1";
pub const INSERT_STATEMENT: &str = "com.acme.mapper.UserMapper.insert";

const SCHEMA_SRC: &str = "\
CREATE TABLE users (
  id BIGINT PRIMARY KEY,
  name VARCHAR(64) NOT NULL
);

CREATE TABLE orders (
  id BIGINT PRIMARY KEY,
  user_id BIGINT NOT NULL
);
";

const MAPPER_SRC: &str = r"package com.acme.mapper;

import java.util.List;
import com.acme.model.User;

@Mapper
public interface UserMapper {
    List<User> selectAll();

    int insert(User user);
}
";

const MAPPER_XML_SRC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<mapper namespace="com.acme.mapper.UserMapper">
  <select id="selectAll" resultType="User">
    SELECT id, name FROM users
  </select>
  <insert id="insert" parameterType="User">
    INSERT INTO users (id, name) VALUES (#{id}, #{name})
  </insert>
</mapper>
"#;

const SERVICE_SRC: &str = r"package com.acme.service;

import java.util.List;
import com.acme.mapper.UserMapper;
import com.acme.model.User;

@Service
public class UserService {
    @Autowired
    private UserMapper userMapper;

    public List<User> findAll() {
        return userMapper.selectAll();
    }
}
";

const CONTROLLER_SRC: &str = r#"package com.acme.web;

import com.acme.service.UserService;
import org.springframework.stereotype.Controller;
import org.springframework.ui.Model;
import org.springframework.web.bind.annotation.GetMapping;
import org.springframework.web.bind.annotation.RequestMapping;

@Controller
@RequestMapping("/user")
public class UserController {
    @Autowired
    private UserService userService;

    @GetMapping("/list.do")
    public String list(Model model) {
        model.addAttribute("users", userService.findAll());
        return "user/list";
    }
}
"#;

const PAGE_SRC: &str = r#"<%@ page contentType="text/html;charset=UTF-8" %>
<html>
<body>
<a href="<c:url value='/user/list.do'/>">users</a>
</body>
</html>
"#;

const ALPHA_SRC: &str = r"package com.acme.cycle;

@Service
public class AlphaService {
    @Autowired
    private BetaService betaService;

    public void ping() {
        betaService.pong();
    }
}
";

const BETA_SRC: &str = r"package com.acme.cycle;

@Service
public class BetaService {
    @Autowired
    private AlphaService alphaService;

    public void pong() {
        alphaService.ping();
    }
}
";

/// Install a `tracing` subscriber filtered by `RUST_LOG`, once per process.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// The layered user-listing application: page → controller → service →
/// mapper → statement → table.
pub fn user_app() -> Vec<SourceFile> {
    vec![
        SourceFile::new(SCHEMA, SCHEMA_SRC),
        SourceFile::new(MAPPER, MAPPER_SRC),
        SourceFile::new(MAPPER_XML, MAPPER_XML_SRC),
        SourceFile::new(SERVICE, SERVICE_SRC),
        SourceFile::new(CONTROLLER, CONTROLLER_SRC),
        SourceFile::new(PAGE, PAGE_SRC),
    ]
}

/// Two services that call each other.
pub fn cyclic_services() -> Vec<SourceFile> {
    vec![
        SourceFile::new(ALPHA, ALPHA_SRC),
        SourceFile::new(BETA, BETA_SRC),
    ]
}

/// One fixture file by path.
pub fn file(files: &[SourceFile], path: &str) -> SourceFile {
    files
        .iter()
        .find(|f| f.path == path)
        .cloned()
        .unwrap_or_else(|| panic!("no fixture file {path}"))
}

/// The service with a second query method, so its content key changes.
pub fn service_v2() -> SourceFile {
    let source = SERVICE_SRC.replace(
        "    public List<User> findAll() {",
        "    public int count() {\n        return 0;\n    }\n\n    public List<User> findAll() {",
    );
    SourceFile::new(SERVICE, source)
}

pub fn config(tie_break: TieBreak) -> LayermapConfig {
    let mut config = LayermapConfig::default();
    config.resolver.tie_break = tie_break;
    config
}

pub fn analyzer(tie_break: TieBreak) -> Analyzer {
    init_tracing();
    Analyzer::new(config(tie_break)).expect("default config is valid")
}

pub fn method_id(signature: &str) -> NodeId {
    hash::node_id(NodeKind::ServiceMethod, signature)
}

pub fn statement_id(signature: &str) -> NodeId {
    hash::node_id(NodeKind::SqlStatement, signature)
}

pub fn table_id(name: &str) -> NodeId {
    hash::node_id(NodeKind::Table, name)
}
