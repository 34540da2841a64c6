//! CLI integration tests
//!
//! These run the built binary and check:
//! - Command parsing and help text
//! - Output formats
//! - Exit codes for extracted, empty and failed files
//! - Batch output layout and summary

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn topoextract_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_topoextract"))
}

fn fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/topotests")
}

/// Runs the binary with a private rundir and without inherited configuration
fn run(args: &[&str], rundir: &Path) -> Output {
    Command::new(topoextract_bin())
        .args(args)
        .env("TOPOEXTRACT_RUNDIR", rundir)
        .env_remove("TOPOEXTRACT_STRATEGIES")
        .env_remove("TOPOEXTRACT_SHAPE")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute topoextract")
}

fn copy_fixture(rel: &str, root: &Path) -> PathBuf {
    let target = root.join(rel);
    fs::create_dir_all(target.parent().unwrap()).unwrap();
    fs::copy(fixtures().join(rel), &target).unwrap();
    target
}

#[test]
fn test_cli_help() {
    let dir = TempDir::new().unwrap();
    let output = run(&["--help"], dir.path());

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("topoextract"));
    assert!(stdout.contains("extract"));
    assert!(stdout.contains("batch"));
}

#[test]
fn test_cli_version() {
    let dir = TempDir::new().unwrap();
    let output = run(&["--version"], dir.path());

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("topoextract"));
}

#[test]
fn test_extract_simple_json() {
    let dir = TempDir::new().unwrap();
    let file = fixtures().join("bgp_direct/test_bgp_direct.py");
    let output = run(
        &["-q", "extract", file.to_str().unwrap(), "--shape", "simple"],
        dir.path(),
    );

    assert_eq!(output.status.code(), Some(0));
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"r1": ["s1"], "r2": ["s1"], "r3": ["s1"]})
    );
}

#[test]
fn test_extract_rich_metadata() {
    let dir = TempDir::new().unwrap();
    let file = fixtures().join("dict_topo/test_dict_topo.py");
    let output = run(&["-q", "extract", file.to_str().unwrap()], dir.path());

    assert_eq!(output.status.code(), Some(0));
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["metadata"]["exported_from"], "test_dict_topo");
    assert_eq!(json["metadata"]["total_routers"], 3);
    assert_eq!(json["switches"]["s2"]["links"]["r3"]["interface"], "s2-r3-eth0");
}

#[test]
fn test_extract_is_byte_identical_across_runs() {
    let dir = TempDir::new().unwrap();
    let file = fixtures().join("ospf_loop/test_ospf_loop.py");
    let first = run(&["-q", "extract", file.to_str().unwrap()], dir.path());
    let second = run(&["-q", "extract", file.to_str().unwrap()], dir.path());

    assert_eq!(first.status.code(), Some(0));
    assert_eq!(first.stdout, second.stdout);
    assert!(first.stdout.ends_with(b"}\n"));
}

#[test]
fn test_extract_yaml_and_human() {
    let dir = TempDir::new().unwrap();
    let file = fixtures().join("isis_list/test_isis_list.py");

    let yaml = run(
        &["-q", "extract", file.to_str().unwrap(), "--format", "yaml"],
        dir.path(),
    );
    assert_eq!(yaml.status.code(), Some(0));
    let parsed: serde_yaml::Value = serde_yaml::from_slice(&yaml.stdout).unwrap();
    assert_eq!(parsed["routers"]["rt1"]["type"], "router");

    let human = run(
        &["-q", "extract", file.to_str().unwrap(), "--format", "human"],
        dir.path(),
    );
    let stdout = String::from_utf8_lossy(&human.stdout);
    assert!(stdout.contains("Topology: test_isis_list"));
    assert!(stdout.contains("Routers:  3"));
}

#[test]
fn test_extract_to_file() {
    let dir = TempDir::new().unwrap();
    let file = fixtures().join("bgp_direct/test_bgp_direct.py");
    let out = dir.path().join("bgp.json");
    let output = run(
        &[
            "-q",
            "extract",
            file.to_str().unwrap(),
            "-o",
            out.to_str().unwrap(),
        ],
        dir.path(),
    );

    assert_eq!(output.status.code(), Some(0));
    assert!(output.stdout.is_empty());
    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out).unwrap()).unwrap();
    assert_eq!(json["metadata"]["total_switches"], 1);
}

#[test]
fn test_extract_empty_topology_exit_code() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("test_empty.py");
    fs::write(&file, "def build_topo(tgen):\n    pass\n").unwrap();

    let output = run(&["-q", "extract", file.to_str().unwrap()], dir.path());
    assert_eq!(output.status.code(), Some(2));
    assert!(output.stdout.is_empty());
}

#[test]
fn test_extract_failure_exit_code() {
    let dir = TempDir::new().unwrap();
    let file = fixtures().join("no_builder/test_no_builder.py");
    let output = run(&["-q", "extract", file.to_str().unwrap()], dir.path());

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no recognized entry point"));
}

#[test]
fn test_extract_strategy_flag() {
    let dir = TempDir::new().unwrap();
    let file = fixtures().join("setup_only/test_setup_only.py");

    let dynamic = run(&["-q", "extract", file.to_str().unwrap()], dir.path());
    assert_eq!(dynamic.status.code(), Some(0));

    let text_only = run(
        &["-q", "extract", file.to_str().unwrap(), "--strategy", "text"],
        dir.path(),
    );
    assert_eq!(text_only.status.code(), Some(1));
}

#[test]
fn test_invalid_strategy_env_is_reported() {
    let dir = TempDir::new().unwrap();
    let file = fixtures().join("bgp_direct/test_bgp_direct.py");
    let output = Command::new(topoextract_bin())
        .args(["-q", "extract", file.to_str().unwrap()])
        .env("TOPOEXTRACT_RUNDIR", dir.path())
        .env("TOPOEXTRACT_STRATEGIES", "text,text")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid strategy list"));
}

#[test]
fn test_missing_file() {
    let dir = TempDir::new().unwrap();
    let output = run(&["-q", "extract", "/nonexistent/test_x.py"], dir.path());
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_batch_into_output_dir() {
    let work = TempDir::new().unwrap();
    let root = work.path().join("topotests");
    for rel in [
        "bgp_direct/test_bgp_direct.py",
        "dict_topo/test_dict_topo.py",
        "no_builder/test_no_builder.py",
        "lib/test_helpers.py",
    ] {
        copy_fixture(rel, &root);
    }
    let out = work.path().join("out");
    let summary = work.path().join("summary.json");

    let output = run(
        &[
            "-q",
            "batch",
            root.to_str().unwrap(),
            "--output-dir",
            out.to_str().unwrap(),
            "--summary",
            summary.to_str().unwrap(),
        ],
        work.path(),
    );

    assert_eq!(output.status.code(), Some(0));
    assert!(out.join("bgp_direct.json").exists());
    assert!(out.join("dict_topo.json").exists());
    assert!(!out.join("helpers.json").exists());

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(summary).unwrap()).unwrap();
    assert_eq!(json["total"], 3);
    assert_eq!(json["success"].as_array().unwrap().len(), 2);
    assert_eq!(json["failed"].as_array().unwrap().len(), 1);
    assert_eq!(json["success"][0]["sha256"].as_str().unwrap().len(), 64);
}

#[test]
fn test_batch_writes_next_to_tests() {
    let work = TempDir::new().unwrap();
    let test = copy_fixture("ospf_loop/test_ospf_loop.py", work.path());

    let output = run(&["-q", "batch", work.path().to_str().unwrap()], work.path());

    assert_eq!(output.status.code(), Some(0));
    let sibling = test.parent().unwrap().join("exported_topology.json");
    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(sibling).unwrap()).unwrap();
    assert_eq!(json["metadata"]["total_routers"], 4);
}

#[test]
fn test_batch_filter_and_limit() {
    let work = TempDir::new().unwrap();
    let root = work.path().join("topotests");
    copy_fixture("bgp_direct/test_bgp_direct.py", &root);
    copy_fixture("ospf_loop/test_ospf_loop.py", &root);
    let out = work.path().join("out");

    let output = run(
        &[
            "-q",
            "batch",
            root.to_str().unwrap(),
            "--output-dir",
            out.to_str().unwrap(),
            "--filter",
            "ospf,isis",
            "--limit",
            "1",
        ],
        work.path(),
    );

    assert_eq!(output.status.code(), Some(0));
    assert!(out.join("ospf_loop.json").exists());
    assert!(!out.join("bgp_direct.json").exists());
}

#[test]
fn test_batch_with_nothing_exported_fails() {
    let work = TempDir::new().unwrap();
    copy_fixture("no_builder/test_no_builder.py", work.path());

    let output = run(&["-q", "batch", work.path().to_str().unwrap()], work.path());
    assert_eq!(output.status.code(), Some(1));
}
