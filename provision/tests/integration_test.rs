// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for the radius-provision binary

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;
use tempfile::tempdir;

fn cli() -> Command {
    let mut cmd = Command::cargo_bin("radius-provision").unwrap();
    for key in [
        "RADIUS_PROVISION_CONFIG",
        "RADIUS_DB_NAME",
        "RADIUS_DB_USER",
        "RADIUS_DB_PASSWORD",
        "RADIUS_SHARED_SECRET",
    ] {
        cmd.env_remove(key);
    }
    cmd
}

/// Test the help output
#[test]
fn test_help_command() {
    let mut cmd = cli();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("FreeRADIUS"))
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--config"));
}

/// Dry run needs no privileges and prints every stage
#[test]
fn test_dry_run_prints_plan() {
    let mut cmd = cli();
    cmd.arg("--dry-run");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("STEP 1: Installing PostgreSQL"))
        .stdout(predicate::str::contains("STEP 10: Testing RADIUS Authentication"))
        .stdout(predicate::str::contains("[DRY RUN] Would run: apt update -y"))
        .stdout(predicate::str::contains("CREATE DATABASE gildesecops;"));
}

/// Values from the config file flow into the plan
#[test]
fn test_dry_run_uses_config_file() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("radius-provision.toml");
    std::fs::write(
        &config_path,
        r#"
[database]
name = "radius_lab"
user = "lab_role"
reset = false

[test_user]
username = "alice"
password = "wonderland"
"#,
    )
    .unwrap();

    let mut cmd = cli();
    cmd.arg("--config").arg(&config_path).arg("--dry-run");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("CREATE DATABASE radius_lab;"))
        .stdout(predicate::str::contains("Adding test user: alice"))
        .stdout(predicate::str::contains("DROP DATABASE").not());
}

/// Environment overrides win over defaults
#[test]
fn test_env_overrides_secret() {
    let mut cmd = cli();
    cmd.env("RADIUS_SHARED_SECRET", "FromEnvironment")
        .args(["--dry-run", "--format", "json"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("secret = FromEnvironment"));
}

/// JSON dry run is a machine-readable plan
#[test]
fn test_dry_run_json() {
    let mut cmd = cli();
    cmd.args(["--dry-run", "--format", "json"]);
    let output = cmd.output().unwrap();
    assert!(output.status.success());

    let plan: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let stages = plan["stages"].as_array().unwrap();
    assert_eq!(stages.len(), 10);
    assert_eq!(stages[0]["heading"], "Installing PostgreSQL");
}

/// Invalid values are rejected before anything runs
#[test]
fn test_invalid_config_fails() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("radius-provision.toml");
    std::fs::write(&config_path, "[database]\nname = \"bad-name\"\n").unwrap();

    let mut cmd = cli();
    cmd.arg("-c").arg(&config_path).arg("--dry-run");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Invalid configuration"));
}

/// A secret the clients.conf edit cannot apply cleanly is refused up front
#[test]
fn test_conflicting_secret_fails_before_planning() {
    let mut cmd = cli();
    cmd.env("RADIUS_SHARED_SECRET", "testing123Prod").arg("--dry-run");
    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("STEP 1").not())
        .stderr(predicate::str::contains("Invalid configuration"))
        .stderr(predicate::str::contains("secret = testing123"));
}

/// Malformed TOML is reported as such
#[test]
fn test_malformed_config_fails() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("radius-provision.toml");
    std::fs::write(&config_path, "[database\nname = ").unwrap();

    let mut cmd = cli();
    cmd.arg("-c").arg(&config_path).arg("--dry-run");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("TOML parse error"));
}

/// Unknown output formats are a usage error
#[test]
fn test_unknown_format_fails() {
    let mut cmd = cli();
    cmd.args(["--dry-run", "--format", "yaml"]);
    cmd.assert().failure();
}
