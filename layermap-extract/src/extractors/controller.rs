use std::sync::LazyLock;

use regex::Regex;

use super::component::{Profile, extract_java};
use super::{ExtractOptions, Extractor, file_stem, has_extension};
use crate::finding::FindingSet;
use crate::{ArtifactKind, NodeKind};

static CONTROLLER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@(?:Rest)?Controller\b|@RequestMapping\b|@(?:Get|Post|Put|Delete|Patch)Mapping\b")
        .expect("controller pattern is valid")
});

const PROFILE: Profile = Profile {
    artifact: ArtifactKind::Controller,
    type_kind: NodeKind::Controller,
    method_kind: NodeKind::ControllerMethod,
    call_kinds: &[
        NodeKind::ServiceMethod,
        NodeKind::MapperMethod,
        NodeKind::ControllerMethod,
    ],
    routes: true,
    bind_statements: false,
};

/// Web controllers: request-mapped classes and their handler methods.
#[derive(Debug)]
pub struct ControllerExtractor {
    options: ExtractOptions,
}

impl ControllerExtractor {
    pub fn new(options: ExtractOptions) -> Self {
        Self { options }
    }
}

impl Extractor for ControllerExtractor {
    fn artifact(&self) -> ArtifactKind {
        ArtifactKind::Controller
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["java"]
    }

    fn accepts(&self, path: &str, content: &str) -> bool {
        if !has_extension(path, self.extensions()) {
            return false;
        }
        let stem = file_stem(path);
        CONTROLLER_RE.is_match(content) || stem.ends_with("Controller") || stem.ends_with("Action")
    }

    fn extract(&self, content: &str, path: &str) -> FindingSet {
        extract_java(content, path, PROFILE, &self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EdgeKind, Target};

    const SOURCE: &str = r#"
package com.acme.web;

import com.acme.service.UserService;
import org.springframework.stereotype.Controller;
import org.springframework.ui.Model;
import org.springframework.web.bind.annotation.*;

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

    @PostMapping("/save.do")
    public String save(User user) {
        userService.save(user);
        return "redirect:/user/list.do";
    }
}
"#;

    fn extract() -> FindingSet {
        ControllerExtractor::new(ExtractOptions::default())
            .extract(SOURCE, "src/main/java/com/acme/web/UserController.java")
    }

    #[test]
    fn defines_controller_and_handlers() {
        let findings = extract();
        assert_eq!(findings.artifact, ArtifactKind::Controller);
        assert_eq!(findings.scope.as_deref(), Some("com.acme.web"));
        assert!(findings.defines(NodeKind::Controller, "com.acme.web.UserController"));
        let list = findings
            .definition("com.acme.web.UserController.list/1")
            .unwrap();
        assert_eq!(list.kind, NodeKind::ControllerMethod);
        assert_eq!(list.attributes["routes"], "/user/list.do");
        assert_eq!(list.owner.as_deref(), Some("com.acme.web.UserController"));
    }

    #[test]
    fn calls_through_injected_services() {
        let findings = extract();
        let calls: Vec<_> = findings
            .references
            .iter()
            .filter(|r| r.edge == EdgeKind::Invokes)
            .collect();
        assert_eq!(calls.len(), 2, "library calls like model.addAttribute are skipped");
        let Target::Member {
            owner: Some(owner),
            member,
            arity,
            kinds,
        } = &calls[0].target
        else {
            panic!("expected member target");
        };
        assert_eq!(owner.candidates, ["com.acme.service.UserService"]);
        assert_eq!(member, "findAll");
        assert_eq!(*arity, Some(0));
        assert_eq!(kinds[0], NodeKind::ServiceMethod);
        assert_eq!(calls[0].from, "com.acme.web.UserController.list/1");
    }

    #[test]
    fn accepts_by_annotation_or_name() {
        let ex = ControllerExtractor::new(ExtractOptions::default());
        assert!(ex.accepts("a/LoginAction.java", "public class LoginAction {}"));
        assert!(ex.accepts("a/Api.java", "@RestController class Api {}"));
        assert!(!ex.accepts("a/User.java", "public class User {}"));
        assert!(!ex.accepts("a/UserController.kt", "@Controller class X"));
    }
}
