//! Extraction integration tests
//!
//! Runs every strategy against the topotest modules under
//! `tests/fixtures/topotests` on the real filesystem.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use topoextract::export::{normalize, rich, simple, Shape};
use topoextract::extractors::{
    DynamicExtractor, ExtractionError, ExtractionOutcome, ExtractorRegistry, FailureKind,
    SourceFile, Strategy, SyntaxExtractor, TextExtractor, TopologyExtractor,
};
use topoextract::fs::{FileSystem, RealFileSystem};
use topoextract::graph::Graph;
use topoextract::runtime::RuntimeSettings;
use yare::parameterized;

fn fixture(rel: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/topotests")
        .join(rel)
}

fn load(rel: &str) -> SourceFile {
    SourceFile::load(&RealFileSystem::new(), &fixture(rel)).expect("fixture readable")
}

/// Extractor for `strategy`, with a scratch rundir that lives as long as the guard
fn extractor(strategy: Strategy) -> (TempDir, Box<dyn TopologyExtractor>) {
    let rundir = TempDir::new().expect("temp dir");
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem::new());
    let extractor: Box<dyn TopologyExtractor> = match strategy {
        Strategy::Dynamic => Box::new(DynamicExtractor::new(
            fs,
            RuntimeSettings::with_rundir(rundir.path()),
        )),
        Strategy::Syntax => Box::new(SyntaxExtractor::new()),
        Strategy::Text => Box::new(TextExtractor::new()),
    };
    (rundir, extractor)
}

fn node_names(graph: &Graph) -> BTreeSet<String> {
    graph.nodes().map(|n| n.name.clone()).collect()
}

fn names(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[parameterized(
    direct_calls = { "bgp_direct/test_bgp_direct.py", &["r1", "r2", "r3", "s1"] },
    range_loop = { "ospf_loop/test_ospf_loop.py", &["r1", "r2", "r3", "r4", "s1", "s2", "s3"] },
    list_loop = { "isis_list/test_isis_list.py", &["rt1", "rt2", "rt3", "s1", "s2"] },
)]
fn strategies_agree_on_node_set(rel: &str, expected: &[&str]) {
    let source = load(rel);
    for strategy in Strategy::DEFAULT_ORDER {
        let (_rundir, extractor) = extractor(strategy);
        let graph = extractor
            .extract(&source)
            .unwrap_or_else(|e| panic!("{} failed on {}: {}", strategy, rel, e));
        assert_eq!(node_names(&graph), names(expected), "strategy {}", strategy);
    }
}

#[parameterized(
    dynamic = { Strategy::Dynamic },
    syntax = { Strategy::Syntax },
    text = { Strategy::Text },
)]
fn chain_adjacency(strategy: Strategy) {
    let (_rundir, extractor) = extractor(strategy);
    let graph = extractor.extract(&load("ospf_loop/test_ospf_loop.py")).unwrap();

    let json = serde_json::to_value(simple(&graph)).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "r1": ["s1"],
            "r2": ["s1", "s2"],
            "r3": ["s2", "s3"],
            "r4": ["s3"],
        })
    );
}

#[test]
fn dynamic_keeps_named_interfaces() {
    let (_rundir, extractor) = extractor(Strategy::Dynamic);
    let graph = extractor.extract(&load("isis_list/test_isis_list.py")).unwrap();

    let topo = rich(&graph, "test_isis_list");
    assert_eq!(topo.routers["rt1"].links["s1"].interface, "eth-sw1");
    assert_eq!(topo.routers["rt2"].links["s2"].interface, "eth-rt3");
    assert_eq!(topo.switches["s2"].links["rt3"].peer_interface, "eth-rt2");
    assert_eq!(topo.switches["s1"].links["rt1"].interface, "s1-eth0");
}

#[test]
fn dynamic_captures_setup_module_topology() {
    let (_rundir, extractor) = extractor(Strategy::Dynamic);
    let graph = extractor.extract(&load("setup_only/test_setup_only.py")).unwrap();

    assert_eq!(
        node_names(&graph),
        names(&["r1", "r2", "r3", "r4", "s1", "s2"])
    );
    let topo = rich(&graph, "test_setup_only");
    assert_eq!(topo.routers["r3"].links["s2"].interface, "eth-uplink");
    assert_eq!(topo.switches["s2"].links["r3"].interface, "s2-r3-eth0");
}

#[test]
fn dynamic_runs_fixture_generator() {
    let (_rundir, extractor) = extractor(Strategy::Dynamic);
    let graph = extractor.extract(&load("fixture_gen/test_fixture_gen.py")).unwrap();

    let topo = rich(&graph, "test_fixture_gen");
    assert_eq!(topo.routers["r1"].links["r2"].interface, "r1-eth0");
    assert_eq!(topo.routers["r1"].links["sw1"].interface, "r1-eth1");
    assert_eq!(topo.metadata.total_switches, 1);

    let adjacency = simple(&graph);
    assert_eq!(adjacency["r1"], vec!["sw1".to_string()]);
}

#[test]
fn dynamic_handles_module_level_dict_topology() {
    let (_rundir, extractor) = extractor(Strategy::Dynamic);
    let graph = extractor.extract(&load("dict_topo/test_dict_topo.py")).unwrap();

    let json = serde_json::to_value(simple(&graph)).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"r1": ["s1"], "r2": ["s1", "s2"], "r3": ["s2"]})
    );
}

#[test]
fn dynamic_creates_log_directory_under_rundir() {
    let (rundir, extractor) = extractor(Strategy::Dynamic);
    extractor.extract(&load("dict_topo/test_dict_topo.py")).unwrap();
    assert!(rundir.path().join("test_dict_topo").is_dir());
}

#[parameterized(
    dynamic = { Strategy::Dynamic },
    syntax = { Strategy::Syntax },
    text = { Strategy::Text },
)]
fn missing_builder_is_discovery_failure(strategy: Strategy) {
    let (_rundir, extractor) = extractor(strategy);
    let err = extractor
        .extract(&load("no_builder/test_no_builder.py"))
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::Discovery);
}

#[test]
fn static_strategies_miss_setup_only_topology() {
    let source = load("setup_only/test_setup_only.py");
    for strategy in [Strategy::Syntax, Strategy::Text] {
        let (_rundir, extractor) = extractor(strategy);
        assert_eq!(
            extractor.extract(&source).unwrap_err(),
            ExtractionError::NoBuilderFunction
        );
    }
}

#[test]
fn registry_falls_back_to_text_for_broken_source() {
    let rundir = TempDir::new().unwrap();
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem::new());
    let registry =
        ExtractorRegistry::with_defaults(fs.clone(), RuntimeSettings::with_rundir(rundir.path()));

    let (_, outcome) = registry
        .extract_path(fs.as_ref(), &fixture("broken/test_broken.py"))
        .unwrap();
    match outcome {
        ExtractionOutcome::Extracted { strategy, graph } => {
            assert_eq!(strategy, Strategy::Text);
            assert!(graph.contains("r1"));
        }
        other => panic!("expected text extraction, got {:?}", other),
    }
}

#[test]
fn registry_reports_each_failed_strategy() {
    let rundir = TempDir::new().unwrap();
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem::new());
    let registry =
        ExtractorRegistry::with_defaults(fs.clone(), RuntimeSettings::with_rundir(rundir.path()));

    let (_, outcome) = registry
        .extract_path(fs.as_ref(), &fixture("no_builder/test_no_builder.py"))
        .unwrap();
    assert_eq!(
        outcome.error_message().unwrap(),
        "dynamic: no recognized entry point; syntax: no builder function found; \
         text: no builder function found"
    );
}

#[test]
fn repeated_dynamic_extraction_is_identical() {
    let (_rundir, extractor) = extractor(Strategy::Dynamic);
    let source = load("bgp_direct/test_bgp_direct.py");

    let first = extractor.extract(&source).unwrap();
    let second = extractor.extract(&source).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        normalize(&first, Shape::Rich, "test_bgp_direct").to_json().unwrap(),
        normalize(&second, Shape::Rich, "test_bgp_direct").to_json().unwrap()
    );
}

#[test]
fn exported_json_is_stable_across_strategies() {
    let source = load("bgp_direct/test_bgp_direct.py");
    let outputs: BTreeSet<String> = Strategy::DEFAULT_ORDER
        .iter()
        .map(|strategy| {
            let (_rundir, extractor) = extractor(*strategy);
            let graph = extractor.extract(&source).unwrap();
            normalize(&graph, Shape::Simple, "test_bgp_direct")
                .to_json()
                .unwrap()
        })
        .collect();
    assert_eq!(outputs.len(), 1);
}
