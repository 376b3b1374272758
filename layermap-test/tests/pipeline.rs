// End-to-end analysis tests over small layered applications.

use anyhow::Result;
use layermap_core::config::{PersistFormat, TieBreak};
use layermap_core::hash;
use layermap_core::persist::{GraphPersistence, JsonFile, SqliteFile};
use layermap_core::query::{
    CycleLimits, Direction, EdgeFilter, NodeQuery, find_cycles, find_nodes, impact, shortest_path,
    stats,
};
use layermap_core::{Analyzer, CancelToken, FileStatus, LayermapError, SourceFile};
use layermap_extract::{EdgeKind, NodeKind};
use layermap_test::{
    ALPHA, BETA, CONTROLLER, CONTROLLER_METHOD, INSERT_METHOD, INSERT_STATEMENT, MAPPER_METHOD,
    PAGE, SERVICE, SERVICE_METHOD, STATEMENT, analyzer, config, cyclic_services, file,
    init_tracing, method_id, service_v2, statement_id, table_id, user_app,
};

fn analyzed(tie_break: TieBreak) -> Result<Analyzer> {
    let analyzer = analyzer(tie_break);
    let summary = analyzer.update(user_app(), &[], &CancelToken::new())?;
    assert_eq!(summary.failed(), 0, "{:?}", summary.files);
    Ok(analyzer)
}

#[test]
fn table_change_reaches_controller_through_every_tier() -> Result<()> {
    let analyzer = analyzed(TieBreak::default())?;
    let graph = analyzer.snapshot();

    let users = table_id("users");
    let list = method_id(CONTROLLER_METHOD);
    let result = impact(&graph, users, Direction::Forward, &EdgeFilter::default())?;

    let statement = result.get(statement_id(STATEMENT)).expect("statement is affected");
    assert_eq!(statement.distance, 1);
    assert_eq!(result.get(method_id(MAPPER_METHOD)).map(|e| e.distance), Some(2));
    assert_eq!(result.get(method_id(SERVICE_METHOD)).map(|e| e.distance), Some(3));
    let controller = result.get(list).expect("controller method is affected");
    assert_eq!(controller.distance, 4);
    assert!((controller.confidence - 1.0).abs() < 1e-9);
    assert!(!result.contains(table_id("orders")));

    let path = shortest_path(&graph, list, users, &EdgeFilter::default())?;
    assert_eq!(path.hops(), 4);
    assert_eq!(path.nodes.first(), Some(&list));
    assert_eq!(path.nodes.last(), Some(&users));
    assert_eq!(path.nodes[2], method_id(MAPPER_METHOD));

    let reads = EdgeFilter::default().with_kinds([EdgeKind::ReadsTable]);
    let tables = impact(&graph, statement_id(STATEMENT), Direction::Backward, &reads)?;
    assert_eq!(tables.len(), 1);
    assert!(tables.contains(users));
    Ok(())
}

#[test]
fn depth_bound_cuts_impact() -> Result<()> {
    let analyzer = analyzed(TieBreak::default())?;
    let graph = analyzer.snapshot();

    let bounded = EdgeFilter::default().with_max_depth(2);
    let result = impact(&graph, table_id("users"), Direction::Forward, &bounded)?;
    assert!(result.contains(method_id(MAPPER_METHOD)));
    assert!(!result.contains(method_id(SERVICE_METHOD)));
    Ok(())
}

#[test]
fn reanalyzing_same_content_publishes_nothing() -> Result<()> {
    let analyzer = analyzed(TieBreak::default())?;
    let before = analyzer.snapshot();

    let summary = analyzer.update(user_app(), &[], &CancelToken::new())?;
    assert_eq!(summary.version, before.version());
    assert_eq!(summary.count(|s| *s == FileStatus::Unchanged), user_app().len());
    assert!(analyzer.snapshot().same_content(&before));
    Ok(())
}

#[test]
fn batches_in_any_order_match_a_rebuild() -> Result<()> {
    let files = user_app();
    let cancel = CancelToken::new();

    let incremental = analyzer(TieBreak::ScopeThenLexical);
    for batch in [&files[4..], &files[2..4], &files[..2]] {
        incremental.update(batch.to_vec(), &[], &cancel)?;
    }

    let rebuilt = analyzer(TieBreak::ScopeThenLexical);
    rebuilt.rebuild(files, &cancel)?;

    let (a, b) = (incremental.snapshot(), rebuilt.snapshot());
    assert_eq!(a.node_count(), b.node_count());
    assert_eq!(a.edge_count(), b.edge_count());
    assert!(a.same_content(&b));
    Ok(())
}

/// Every ordering of `0..n`, generated with Heap's algorithm.
fn orderings(n: usize) -> Vec<Vec<usize>> {
    let mut order: Vec<usize> = (0..n).collect();
    let mut counters = vec![0; n];
    let mut out = vec![order.clone()];
    let mut i = 1;
    while i < n {
        if counters[i] < i {
            let swap_with = if i % 2 == 0 { 0 } else { counters[i] };
            order.swap(swap_with, i);
            out.push(order.clone());
            counters[i] += 1;
            i = 1;
        } else {
            counters[i] = 0;
            i += 1;
        }
    }
    out
}

#[test]
fn every_arrival_order_matches_a_rebuild() -> Result<()> {
    let files = user_app();
    let cancel = CancelToken::new();
    let rebuilt = analyzer(TieBreak::ScopeThenLexical);
    rebuilt.rebuild(files.clone(), &cancel)?;
    let expected = rebuilt.snapshot();

    let all = orderings(files.len());
    assert_eq!(all.len(), 720);
    for order in all {
        let incremental = analyzer(TieBreak::ScopeThenLexical);
        for &i in &order {
            incremental.update(vec![files[i].clone()], &[], &cancel)?;
        }
        assert!(
            incremental.snapshot().same_content(&expected),
            "arrival order {order:?} diverges from a rebuild"
        );
    }
    Ok(())
}

#[test]
fn removing_and_restoring_any_file_matches_a_rebuild() -> Result<()> {
    let files = user_app();
    let cancel = CancelToken::new();
    let rebuilt = analyzer(TieBreak::ScopeThenLexical);
    rebuilt.rebuild(files.clone(), &cancel)?;
    let expected = rebuilt.snapshot();

    let incremental = analyzer(TieBreak::ScopeThenLexical);
    incremental.update(files.clone(), &[], &cancel)?;
    for source in &files {
        let summary = incremental.update(Vec::new(), &[source.path.clone()], &cancel)?;
        assert_eq!(
            summary.outcome(&source.path).map(|o| &o.status),
            Some(&FileStatus::Removed)
        );
        assert!(incremental.snapshot().file_key(&source.path).is_none());

        incremental.update(vec![source.clone()], &[], &cancel)?;
        assert!(
            incremental.snapshot().same_content(&expected),
            "restoring {} diverges from a rebuild",
            source.path
        );
    }
    Ok(())
}

#[test]
fn inserting_statement_is_affected_by_its_table() -> Result<()> {
    let analyzer = analyzed(TieBreak::default())?;
    let graph = analyzer.snapshot();

    let users = table_id("users");
    let insert = statement_id(INSERT_STATEMENT);
    let result = impact(&graph, users, Direction::Forward, &EdgeFilter::default())?;
    assert_eq!(result.get(insert).map(|e| e.distance), Some(1));
    assert_eq!(result.get(method_id(INSERT_METHOD)).map(|e| e.distance), Some(2));

    let writes = EdgeFilter::default().with_kinds([EdgeKind::WritesTable]);
    let written = impact(&graph, insert, Direction::Backward, &writes)?;
    assert_eq!(written.len(), 1);
    assert!(written.contains(users));
    let reads = EdgeFilter::default().with_kinds([EdgeKind::ReadsTable]);
    assert!(impact(&graph, insert, Direction::Backward, &reads)?.is_empty());

    let columns = find_nodes(&graph, &NodeQuery::default().kind(NodeKind::Column));
    let name = columns
        .iter()
        .find(|c| c.signature == "users.name")
        .expect("schema column");
    let one_hop = EdgeFilter::default().with_max_depth(1);
    let touching = impact(&graph, name.id, Direction::Forward, &one_hop)?;
    assert!(touching.contains(insert));
    assert!(touching.contains(statement_id(STATEMENT)));
    Ok(())
}

#[test]
fn stub_is_promoted_when_its_definition_arrives() -> Result<()> {
    let files = user_app();
    let cancel = CancelToken::new();
    let analyzer = analyzer(TieBreak::default());

    let without_service: Vec<SourceFile> =
        files.iter().filter(|f| f.path != SERVICE).cloned().collect();
    analyzer.update(without_service, &[], &cancel)?;

    let list = method_id(CONTROLLER_METHOD);
    let find_all = method_id(SERVICE_METHOD);
    let edge_id = hash::edge_id(list, find_all, EdgeKind::Invokes);
    let graph = analyzer.snapshot();
    let stub = graph.node(find_all).expect("call target is a placeholder");
    assert!(stub.is_stub());
    assert_eq!(stub.expected_kind().map(NodeKind::identity_namespace), Some("method"));
    let weak = graph.edge(edge_id).expect("edge into the stub");
    assert!(weak.confidence <= analyzer.config().resolver.stub_confidence_cap);

    let summary = analyzer.update(vec![file(&files, SERVICE)], &[], &cancel)?;
    assert_eq!(
        summary.outcome(CONTROLLER).map(|o| &o.status),
        Some(&FileStatus::Reresolved)
    );
    let graph = analyzer.snapshot();
    let promoted = graph.node(find_all).expect("definition replaces the stub");
    assert_eq!(promoted.kind, NodeKind::ServiceMethod);
    let strong = graph.edge(edge_id).expect("same edge survives promotion");
    assert!((strong.confidence - 1.0).abs() < 1e-9);
    Ok(())
}

#[test]
fn removing_a_definition_demotes_its_callers() -> Result<()> {
    let analyzer = analyzed(TieBreak::default())?;
    let cancel = CancelToken::new();

    let summary = analyzer.update(Vec::new(), &[SERVICE.to_string()], &cancel)?;
    assert_eq!(
        summary.outcome(SERVICE).map(|o| &o.status),
        Some(&FileStatus::Removed)
    );

    let graph = analyzer.snapshot();
    assert!(graph.file_key(SERVICE).is_none());
    let find_all = graph.node(method_id(SERVICE_METHOD)).expect("caller keeps a placeholder");
    assert!(find_all.is_stub());
    let edge = hash::edge_id(method_id(CONTROLLER_METHOD), find_all.id, EdgeKind::Invokes);
    assert!(graph.edge(edge).is_some_and(|e| e.confidence < 1.0));
    Ok(())
}

fn assert_round_trip(backend: &dyn GraphPersistence) -> Result<()> {
    let source = analyzed(TieBreak::default())?;
    source.save_to(backend)?;
    assert!(backend.exists());

    let restored = analyzer(TieBreak::default());
    let graph = restored.load_from(backend)?;
    assert!(graph.same_content(&source.snapshot()));
    assert_eq!(graph.version(), source.snapshot().version());

    // Nothing is cached after a load, so dependents of a change are reported.
    let summary = restored.update(vec![service_v2()], &[], &CancelToken::new())?;
    assert_eq!(
        summary.outcome(SERVICE).map(|o| &o.status),
        Some(&FileStatus::Applied)
    );
    assert!(summary.needs_reanalysis.iter().any(|p| p == CONTROLLER));
    Ok(())
}

#[test]
fn json_round_trip_restores_the_graph() -> Result<()> {
    let dir = tempfile::tempdir()?;
    assert_round_trip(&JsonFile::new(dir.path().join("graph.json")))
}

#[test]
fn sqlite_round_trip_restores_the_graph() -> Result<()> {
    let dir = tempfile::tempdir()?;
    assert_round_trip(&SqliteFile::new(dir.path().join("graph.db")))
}

#[test]
fn configured_backend_is_used_for_save_and_load() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let mut config = config(TieBreak::default());
    config.persistence.format = PersistFormat::Sqlite;
    config.persistence.path = "state/graph.db".into();

    let source = Analyzer::new(config.clone())?;
    source.update(user_app(), &[], &CancelToken::new())?;
    source.save(dir.path())?;
    assert!(dir.path().join("state/graph.db").exists());

    let restored = Analyzer::new(config)?;
    let graph = restored.load(dir.path())?;
    assert!(graph.same_content(&source.snapshot()));
    Ok(())
}

#[test]
fn mutual_calls_form_one_cycle() -> Result<()> {
    let analyzer = analyzer(TieBreak::default());
    analyzer.update(cyclic_services(), &[], &CancelToken::new())?;
    let graph = analyzer.snapshot();

    let report = find_cycles(&graph, &EdgeFilter::default(), CycleLimits::default());
    assert!(!report.truncated);
    assert_eq!(report.cycles.len(), 1);
    let cycle = &report.cycles[0];
    assert_eq!(cycle.len(), 2);
    assert!(cycle.contains(method_id("com.acme.cycle.AlphaService.ping/0")));
    assert!(cycle.contains(method_id("com.acme.cycle.BetaService.pong/0")));

    let services = find_nodes(&graph, &NodeQuery::default().kind(NodeKind::Service));
    let mut paths: Vec<_> = services.iter().filter_map(|n| n.source_file.as_deref()).collect();
    paths.sort_unstable();
    assert_eq!(paths, [ALPHA, BETA]);
    Ok(())
}

#[test]
fn layered_app_has_no_cycles() -> Result<()> {
    let analyzer = analyzed(TieBreak::default())?;
    let report = find_cycles(&analyzer.snapshot(), &EdgeFilter::default(), CycleLimits::default());
    assert!(report.cycles.is_empty());
    Ok(())
}

#[test]
fn malformed_file_becomes_markers_and_batch_still_applies() -> Result<()> {
    let analyzer = analyzer(TieBreak::default());
    let broken = "src/main/java/com/acme/service/BrokenService.java";
    let mut files = user_app();
    files.push(SourceFile::new(
        broken,
        "package com.acme.service;\n@Service\npublic class BrokenService {\n    public void run( {\n}\n",
    ));

    let summary = analyzer.update(files, &[], &CancelToken::new())?;
    assert_eq!(summary.failed(), 0);
    let outcome = summary.outcome(broken).expect("broken file is reported");
    assert_eq!(outcome.status, FileStatus::Applied);
    assert!(outcome.issues > 0);
    assert_eq!(summary.applied(), user_app().len() + 1);

    let graph = analyzer.snapshot();
    let counts = stats(&graph);
    assert!(counts.markers > 0);
    let markers = find_nodes(&graph, &NodeQuery::default().source_file(broken));
    assert!(markers.iter().any(|n| n.is_marker()));
    assert!(graph.contains_node(method_id(CONTROLLER_METHOD)));
    Ok(())
}

#[test]
fn cancelled_batch_leaves_published_graph_alone() -> Result<()> {
    let analyzer = analyzed(TieBreak::default())?;
    let before = analyzer.snapshot();

    let cancel = CancelToken::new();
    cancel.cancel();
    let result = analyzer.update(vec![service_v2()], &[], &cancel);
    assert!(matches!(result, Err(LayermapError::Cancelled)));

    let after = analyzer.snapshot();
    assert_eq!(after.version(), before.version());
    assert!(after.same_content(&before));
    Ok(())
}

#[test]
fn page_links_reach_the_controller() -> Result<()> {
    let analyzer = analyzed(TieBreak::default())?;
    let graph = analyzer.snapshot();

    let pages = find_nodes(&graph, &NodeQuery::default().source_file(PAGE).kind(NodeKind::Page));
    let page = pages.first().expect("page node");
    let invokes = EdgeFilter::default().with_kinds([EdgeKind::Invokes]).with_max_depth(1);
    let reached = impact(&graph, page.id, Direction::Backward, &invokes)?;
    assert!(reached.contains(method_id(CONTROLLER_METHOD)));
    Ok(())
}

#[test]
fn summary_serializes_with_tagged_statuses() -> Result<()> {
    let analyzer = analyzer(TieBreak::default());
    let mut files = user_app();
    files.push(SourceFile::new("README.md", "# users"));
    let summary = analyzer.update(files, &[], &CancelToken::new())?;

    let json = serde_json::to_value(&summary)?;
    let outcomes = json["files"].as_array().expect("files array");
    let readme = outcomes
        .iter()
        .find(|o| o["path"] == "README.md")
        .expect("skipped file is reported");
    assert_eq!(readme["status"]["status"], "skipped");
    assert!(readme["status"]["reason"].is_string());
    let service = outcomes.iter().find(|o| o["path"] == SERVICE).expect("service outcome");
    assert_eq!(service["status"]["status"], "applied");
    Ok(())
}
