//! End-to-end queries over sidecar workspaces.

use std::fs;
use std::path::Path;

use serde_json::{Value, json};
use sextant::sidecar::{SidecarDiscovery, SidecarExtractor};
use sextant::{
    BatchOptions, ChainRequest, Config, Direction, EdgeKind, Error, ExtractorRegistry,
    ImpactRequest, NodeKind, Sextant,
};
use tempfile::TempDir;

fn registry() -> ExtractorRegistry {
    SidecarExtractor::all().fold(ExtractorRegistry::new(), |registry, extractor| {
        registry.with(extractor)
    })
}

fn write_fact(root: &Path, file: &str, name: &str, references: &[Value]) {
    let path = root.join(file);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create fact dir");
    }
    let doc = json!({ "name": name, "references": references });
    fs::write(&path, serde_json::to_vec_pretty(&doc).expect("encode fact")).expect("write fact");
}

fn reference(target: &str, kind: &str, edge: &str) -> Value {
    json!({ "target_name": target, "target_kind_hint": kind, "edge_kind": edge })
}

fn open(dir: &TempDir) -> Sextant {
    Sextant::open(dir.path(), Config::default(), registry()).expect("open workspace")
}

fn index(sextant: &Sextant) -> sextant::BatchReport {
    sextant
        .index_workspace(&SidecarDiscovery, &BatchOptions::default())
        .expect("index workspace")
}

/// Controllers, services and one mapper with a fan-in.
fn layered_workspace() -> TempDir {
    let dir = TempDir::new().expect("create temp dir");
    let root = dir.path();
    write_fact(
        root,
        "web/UserController.controller.json",
        "UserController",
        &[reference("UserService", "service", "CALLS")],
    );
    write_fact(
        root,
        "web/AdminController.controller.json",
        "AdminController",
        &[reference("UserService", "service", "CALLS")],
    );
    write_fact(
        root,
        "views/user_list.view.json",
        "user/list",
        &[reference("UserController", "controller", "RENDERS")],
    );
    write_fact(
        root,
        "svc/UserService.service.json",
        "UserService",
        &[reference("UserMapper", "mapper", "CALLS")],
    );
    write_fact(
        root,
        "svc/AdminService.service.json",
        "AdminService",
        &[reference("UserMapper", "mapper", "CALLS")],
    );
    write_fact(
        root,
        "svc/CacheService.service.json",
        "CacheService",
        &[reference("UserMapper", "mapper", "CALLS")],
    );
    write_fact(
        root,
        "dao/UserMapper.mapper.json",
        "UserMapper",
        &[reference("users", "table", "QUERIES")],
    );
    dir
}

// === Chains ===

#[test]
fn single_chain_through_fan_in() {
    let dir = layered_workspace();
    let sextant = open(&dir);
    index(&sextant);

    let result = sextant
        .find_chain(&ChainRequest::between("UserController", "UserMapper").max_depth(10))
        .expect("find chain");

    assert_eq!(result.total_chains, 1);
    let chain = &result.chains[0];
    assert_eq!(chain.path, ["UserController", "UserService", "UserMapper"]);
    assert_eq!(chain.depth, 2);
    assert_eq!(
        chain.node_types,
        [NodeKind::Controller, NodeKind::Service, NodeKind::Mapper]
    );
    assert_eq!(chain.edge_types, [EdgeKind::Calls, EdgeKind::Calls]);
}

#[test]
fn chain_without_end_lists_neighbors() {
    let dir = layered_workspace();
    let sextant = open(&dir);
    index(&sextant);

    let result = sextant
        .find_chain(&ChainRequest::neighbors("UserMapper"))
        .expect("neighbors");

    assert_eq!(result.total_chains, 1);
    assert_eq!(result.chains[0].path, ["UserMapper", "users"]);
    assert_eq!(result.chains[0].node_types[1], NodeKind::Table);
}

#[test]
fn chain_errors_leave_snapshot_untouched() {
    let dir = layered_workspace();
    let sextant = open(&dir);
    index(&sextant);
    let before = sextant.snapshot().expect("snapshot");

    let missing = sextant.find_chain(&ChainRequest::between("UserController", "Nope"));
    assert!(matches!(missing, Err(Error::NotFound(id)) if id == "Nope"));

    let too_deep = sextant.find_chain(
        &ChainRequest::between("UserController", "UserMapper").max_depth(21),
    );
    assert!(matches!(
        too_deep,
        Err(Error::Validation { parameter: "max_depth", .. })
    ));

    let after = sextant.snapshot().expect("snapshot");
    assert!(std::sync::Arc::ptr_eq(&before, &after));
}

// === Impact ===

#[test]
fn upstream_impact_groups_by_distance() {
    let dir = layered_workspace();
    let sextant = open(&dir);
    index(&sextant);

    let impact = sextant
        .impact(
            &ImpactRequest::new("UserService")
                .direction(Direction::Upstream)
                .max_depth(5),
        )
        .expect("impact");

    let upstream = impact.upstream.as_ref().expect("upstream levels");
    assert_eq!(upstream.level(1), ["AdminController", "UserController"]);
    assert_eq!(upstream.level(2), ["user/list"]);
    assert_eq!(impact.total_upstream, 3);
    assert!(impact.downstream.is_none());
}

#[test]
fn impact_serializes_to_query_surface_shape() {
    let dir = layered_workspace();
    let sextant = open(&dir);
    index(&sextant);

    let impact = sextant
        .impact(&ImpactRequest::new("UserService"))
        .expect("impact");

    let value = serde_json::to_value(&impact).expect("serialize impact");
    assert_eq!(
        value,
        json!({
            "target_node": "UserService",
            "upstream": {
                "level_1": ["AdminController", "UserController"],
                "level_2": ["user/list"],
            },
            "downstream": {
                "level_1": ["UserMapper"],
                "level_2": ["users"],
            },
            "total_upstream": 3,
            "total_downstream": 2,
        })
    );
}

// === Graph shape ===

#[test]
fn unresolved_references_become_placeholders() {
    let dir = layered_workspace();
    let sextant = open(&dir);
    index(&sextant);
    let graph = sextant.snapshot().expect("snapshot");

    let table = graph.node("users").expect("placeholder node");
    assert!(table.is_unresolved());
    assert_eq!(table.kind, NodeKind::Table);

    let mapper = graph.node("UserMapper").expect("analyzed node");
    assert!(!mapper.is_unresolved());
    assert_eq!(graph.stats().unresolved, 1);
}

#[test]
fn cycles_are_reported_once() {
    let dir = TempDir::new().expect("create temp dir");
    let root = dir.path();
    write_fact(root, "a.service.json", "A", &[reference("B", "service", "CALLS")]);
    write_fact(root, "b.service.json", "B", &[reference("C", "service", "CALLS")]);
    write_fact(root, "c.service.json", "C", &[reference("A", "service", "CALLS")]);
    write_fact(root, "d.service.json", "D", &[reference("A", "service", "CALLS")]);

    let sextant = open(&dir);
    index(&sextant);
    let cycles = sextant.cycles().expect("cycles");

    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].nodes, ["A", "B", "C"]);
}

// === Indexing ===

#[test]
fn broken_file_is_reported_not_fatal() {
    let dir = layered_workspace();
    fs::write(dir.path().join("svc/Broken.service.json"), "{ not json").expect("write broken");

    let sextant = open(&dir);
    let report = index(&sextant);

    assert!(report.success);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].path.ends_with("svc/Broken.service.json"));
    assert_eq!(report.components.len(), 7);
}

#[test]
fn unchanged_workspace_keeps_snapshot() {
    let dir = layered_workspace();
    let sextant = open(&dir);

    let first = index(&sextant);
    assert!(first.stats.graph_rebuilt);
    assert_eq!(first.stats.extracted, 7);
    let snapshot = sextant.snapshot().expect("snapshot");

    let second = index(&sextant);
    assert!(!second.stats.graph_rebuilt);
    assert_eq!(second.stats.cache_hits, 7);
    assert_eq!(second.stats.extracted, 0);
    assert!(std::sync::Arc::ptr_eq(
        &snapshot,
        &sextant.snapshot().expect("snapshot")
    ));
}

#[test]
fn changed_file_rebuilds_graph() {
    let dir = layered_workspace();
    let sextant = open(&dir);
    index(&sextant);

    write_fact(
        dir.path(),
        "svc/AdminService.service.json",
        "AdminService",
        &[
            reference("UserMapper", "mapper", "CALLS"),
            reference("AuditMapper", "mapper", "CALLS"),
        ],
    );
    let report = index(&sextant);

    assert!(report.stats.graph_rebuilt);
    assert_eq!(report.stats.extracted, 1);
    let graph = sextant.snapshot().expect("snapshot");
    assert_eq!(graph.successors("AdminService"), ["AuditMapper", "UserMapper"]);
}

#[test]
fn persisted_cache_survives_reopen() {
    let dir = layered_workspace();

    let first = open(&dir);
    index(&first);
    let stats = first.shutdown();
    assert_eq!(stats.extractions, 7);

    let second = open(&dir);
    let report = index(&second);
    assert_eq!(report.stats.cache_hits, 7);
    assert_eq!(report.stats.extracted, 0);
    assert!(dir.path().join(".sextant/cache").is_dir());
}

#[test]
fn conflicting_claims_surface_as_warnings() {
    let dir = TempDir::new().expect("create temp dir");
    let root = dir.path();
    write_fact(root, "a/Shared.service.json", "Shared", &[]);
    fs::create_dir_all(root.join("b")).expect("create dir");
    fs::write(
        root.join("b/Shared.controller.json"),
        serde_json::to_vec(&json!({
            "name": "Shared",
            "attributes": { "route": "/shared" },
        }))
        .expect("encode"),
    )
    .expect("write");

    let sextant = open(&dir);
    let report = index(&sextant);

    let graph = sextant.snapshot().expect("snapshot");
    assert_eq!(graph.node("Shared").expect("node").kind, NodeKind::Controller);
    assert_eq!(graph.warnings().len(), 1);
    assert!(report.warnings.iter().any(|w| w.contains("Shared")));
}
