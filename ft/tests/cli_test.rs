//! End-to-end tests for the `ft` binary

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// `ft` isolated from the user's config and log directories
fn ft(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("ft").unwrap();
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("XDG_DATA_HOME", home.path().join("data"));
    cmd
}

const SUM_PROGRAM: &str = r#"
computation:
  call:
    function: {intrinsic: federated_sum}
    argument:
      call:
        function: {intrinsic: federated_value_at_clients}
        argument:
          literal:
            value: {int32: 3}
            type_signature: {tensor: int32}
"#;

#[test]
fn test_topology_from_fanout_flag() {
    let home = TempDir::new().unwrap();
    ft(&home)
        .args(["--fanout", "2,3,2", "topology"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Clients: 12"))
        .stdout(predicate::str::contains("Depth: 3"));
}

#[test]
fn test_topology_defaults_to_reference_tree() {
    let home = TempDir::new().unwrap();
    ft(&home)
        .arg("topology")
        .assert()
        .success()
        .stdout(predicate::str::contains("Clients: 12"));
}

#[test]
fn test_local_config_file_sets_topology() {
    let home = TempDir::new().unwrap();
    fs::write(
        home.path().join(".fedtree.yml"),
        "topology:\n  tree:\n    composing:\n      - leaf: 3\n      - composing:\n          - leaf: 2\n",
    )
    .unwrap();

    ft(&home)
        .arg("topology")
        .assert()
        .success()
        .stdout(predicate::str::contains("Clients: 5"))
        .stdout(predicate::str::contains("leaf (3 clients)"));
}

#[test]
fn test_fanout_with_empty_tier_rejected() {
    let home = TempDir::new().unwrap();
    ft(&home).args(["--fanout", "2,0,2", "topology"]).assert().failure();
}

#[test]
fn test_demo_passes() {
    let home = TempDir::new().unwrap();
    ft(&home)
        .args(["--fanout", "2,3,2", "demo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("✗").not());
}

#[test]
fn test_run_program_prints_json() {
    let home = TempDir::new().unwrap();
    let path = home.path().join("sum.yml");
    fs::write(&path, SUM_PROGRAM).unwrap();

    ft(&home)
        .args(["--fanout", "4,2", "run"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("24"));
}

#[test]
fn test_run_missing_program_fails() {
    let home = TempDir::new().unwrap();
    ft(&home)
        .args(["run", "does-not-exist.yml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does-not-exist.yml"));
}
