//! CLI subprocess integration tests.
//!
//! These run the `stratus` binary against the mock backend and a file-based
//! install tree, checking exit codes and JSON output.

use std::path::{Path, PathBuf};
use std::process::Command;

fn stratus_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_stratus"))
}

/// A Fedora tree laid out on disk, plus a build file pointing at it.
fn write_tree_build(dir: &Path) -> PathBuf {
    let tree = dir.join("tree");
    std::fs::create_dir_all(tree.join("images/pxeboot")).unwrap();
    std::fs::write(tree.join("images/pxeboot/vmlinuz"), b"kernel").unwrap();
    std::fs::write(tree.join("images/pxeboot/initrd.img"), b"initrd").unwrap();
    std::fs::write(dir.join("fedora20.ks"), "cdrom\nreboot\n").unwrap();

    let path = dir.join("stratus.toml");
    std::fs::write(
        &path,
        format!(
            r#"config_version = 1

[os]
short_id = "fedora20"

[install]
type = "tree"
location = "{}/"
script = "fedora20.ks"
direct_boot = true

[image]
name = "fedora20-x86_64"

[cloud]
backend = "mock"
"#,
            tree.display()
        ),
    )
    .unwrap();
    path
}

#[test]
fn cli_version_exits_zero() {
    let output = stratus_bin().arg("--version").output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("stratus"));
}

#[test]
fn cli_cache_list_json_on_empty_cache() {
    let dir = tempfile::tempdir().unwrap();
    let output = stratus_bin()
        .args(["cache", "list", "--json", "--cache-dir"])
        .arg(dir.path().join("cache"))
        .output()
        .unwrap();
    assert!(output.status.success());
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed, serde_json::json!([]));
}

#[test]
fn cli_build_missing_config_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = stratus_bin()
        .arg("build")
        .arg(dir.path().join("absent.toml"))
        .arg("--cache-dir")
        .arg(dir.path().join("cache"))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn cli_cache_fetch_without_source_is_cache_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = stratus_bin()
        .args(["cache", "fetch", "install-iso", "--os", "fedora20", "--cache-dir"])
        .arg(dir.path().join("cache"))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn cli_build_no_wait_launches_on_mock() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_tree_build(dir.path());
    let cache = dir.path().join("cache");

    let output = stratus_bin()
        .arg("build")
        .arg(&config)
        .args(["--no-wait", "--json", "--cache-dir"])
        .arg(&cache)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["status"], "RUNNING");
    assert_eq!(report["image_name"], "fedora20-x86_64");
    assert!(report["instance_id"].is_string());

    let listed = stratus_bin()
        .args(["cache", "list", "--json", "--cache-dir"])
        .arg(&cache)
        .output()
        .unwrap();
    let rows: serde_json::Value = serde_json::from_slice(&listed.stdout).unwrap();
    let objects: Vec<_> = rows
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["object"].as_str().unwrap().to_owned())
        .collect();
    assert!(objects.contains(&"install-url-kernel".to_owned()));
    assert!(objects.contains(&"install-url-initrd".to_owned()));
}
