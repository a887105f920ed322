//! CLI integration tests for palisade
//!
//! Tests the palisade CLI commands end-to-end using assert_cmd. Each test
//! points PALISADE_CONFIG_DIR at its own temp directory so registries never
//! leak between tests.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a command scoped to an isolated config directory
fn palisade_cmd(config_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("palisade").unwrap();
    cmd.env("PALISADE_CONFIG_DIR", config_dir.path());
    cmd
}

#[test]
fn test_help_lists_commands() {
    let tmp = TempDir::new().unwrap();
    palisade_cmd(&tmp)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("discover"))
        .stdout(predicate::str::contains("enable"))
        .stdout(predicate::str::contains("grant"));
}

#[test]
fn test_list_with_empty_registry() {
    let tmp = TempDir::new().unwrap();
    palisade_cmd(&tmp)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("no plugins known"));
}

#[test]
fn test_discover_creates_default_config_and_finds_nothing() {
    let tmp = TempDir::new().unwrap();
    palisade_cmd(&tmp)
        .arg("discover")
        .assert()
        .success()
        .stdout(predicate::str::contains("no plugins known"));

    // discover bootstraps an empty plugins.json
    let config_file = tmp.path().join("plugins.json");
    assert_eq!(fs::read_to_string(config_file).unwrap(), "{}");
}

#[test]
fn test_discover_then_enable_round_trip() {
    let tmp = TempDir::new().unwrap();

    // stage one plugin on disk
    let plugin_dir = tmp.path().join("plugins").join("@acme/foo");
    fs::create_dir_all(&plugin_dir).unwrap();
    fs::write(
        plugin_dir.join("package.json"),
        r#"{"name": "@acme/foo", "version": "1.0.0", "description": "demo plugin"}"#,
    )
    .unwrap();
    fs::write(tmp.path().join("plugins.json"), r#"{"@acme/foo": "1.0.0"}"#).unwrap();

    palisade_cmd(&tmp)
        .arg("discover")
        .assert()
        .success()
        .stdout(predicate::str::contains("@acme/foo"))
        .stdout(predicate::str::contains("installed"));

    palisade_cmd(&tmp)
        .args(["enable", "@acme/foo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("enabled"));

    palisade_cmd(&tmp)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("enabled"));
}

#[test]
fn test_enable_unknown_plugin_fails() {
    let tmp = TempDir::new().unwrap();
    palisade_cmd(&tmp)
        .args(["enable", "@acme/ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not registered"));
}

#[test]
fn test_grant_and_grants_listing() {
    let tmp = TempDir::new().unwrap();

    let plugin_dir = tmp.path().join("plugins").join("@acme/foo");
    fs::create_dir_all(&plugin_dir).unwrap();
    fs::write(
        plugin_dir.join("package.json"),
        r#"{"name": "@acme/foo", "version": "1.0.0"}"#,
    )
    .unwrap();
    fs::write(tmp.path().join("plugins.json"), r#"{"@acme/foo": "1.0.0"}"#).unwrap();

    palisade_cmd(&tmp).arg("discover").assert().success();

    palisade_cmd(&tmp)
        .args(["grant", "@acme/foo", "db/SELECT"])
        .assert()
        .success();

    palisade_cmd(&tmp)
        .args(["grants", "@acme/foo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("db/SELECT"))
        .stdout(predicate::str::contains("live"));

    palisade_cmd(&tmp)
        .args(["revoke", "@acme/foo", "db/SELECT"])
        .assert()
        .success();

    palisade_cmd(&tmp)
        .args(["grants", "@acme/foo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("revoked"));
}

#[test]
fn test_config_init_then_show() {
    let tmp = TempDir::new().unwrap();

    palisade_cmd(&tmp)
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));

    assert!(tmp.path().join("config.toml").exists());

    palisade_cmd(&tmp)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("registry url"))
        .stdout(predicate::str::contains("unpkg.com"));
}

#[test]
fn test_doctor_reports_ok() {
    let tmp = TempDir::new().unwrap();
    palisade_cmd(&tmp)
        .arg("doctor")
        .assert()
        .success()
        .stdout(predicate::str::contains("ok"));
}
