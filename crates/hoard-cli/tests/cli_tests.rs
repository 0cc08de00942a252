#![allow(missing_docs)]

use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

/// Test context with an isolated home and store directory
struct TestContext {
    temp_dir: TempDir,
    store_dir: PathBuf,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let store_dir = temp_dir.path().join("store");
        Self {
            temp_dir,
            store_dir,
        }
    }

    fn hoard_cmd(&self) -> Command {
        let bin_path = env!("CARGO_BIN_EXE_hoard");
        let mut cmd = Command::new(bin_path);
        cmd.env("HOME", self.temp_dir.path());
        cmd.env("HOARD_STORE_DIR", &self.store_dir);
        cmd
    }
}

#[test]
fn test_help_command() {
    let ctx = TestContext::new();
    let output = ctx
        .hoard_cmd()
        .arg("--help")
        .output()
        .expect("failed to run hoard");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage:"));
}

#[test]
fn test_store_path_uses_env() {
    let ctx = TestContext::new();
    let output = ctx
        .hoard_cmd()
        .args(["store", "path"])
        .output()
        .expect("failed to run hoard");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), ctx.store_dir.display().to_string());
}

#[test]
fn test_prune_creates_connection_table() {
    let ctx = TestContext::new();
    let output = ctx
        .hoard_cmd()
        .args(["store", "prune"])
        .output()
        .expect("failed to run hoard");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Removed 0 packages"));
    assert!(ctx.store_dir.join("connections.json").exists());
}

#[test]
fn test_usages_print_json() {
    let ctx = TestContext::new();
    let output = ctx
        .hoard_cmd()
        .args(["store", "usages", "left-pad"])
        .output()
        .expect("failed to run hoard");
    assert!(output.status.success());
    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("usages output is JSON");
    assert!(parsed.get("left-pad").is_some());
}

#[test]
fn test_config_reports_store() {
    let ctx = TestContext::new();
    let output = ctx
        .hoard_cmd()
        .arg("config")
        .output()
        .expect("failed to run hoard");
    assert!(output.status.success());
    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("config output is JSON");
    assert_eq!(
        parsed["store"].as_str(),
        Some(ctx.store_dir.to_str().expect("utf-8 path"))
    );
}
