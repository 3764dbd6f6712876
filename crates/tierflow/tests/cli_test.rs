#![allow(deprecated)] // Command::cargo_bin

mod common;

use assert_cmd::Command;
use common::TestProject;
use predicates::prelude::*;

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("tier").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("three-tier network"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("apply"))
        .stdout(predicate::str::contains("export"));
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("tier").unwrap();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tierflow"));
}

#[test]
fn test_apply_help() {
    let mut cmd = Command::cargo_bin("tier").unwrap();
    cmd.args(["apply", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[STAGE]"))
        .stdout(predicate::str::contains("--yes"));
}

#[test]
fn test_invalid_command() {
    let mut cmd = Command::cargo_bin("tier").unwrap();
    cmd.arg("invalid-command").assert().failure();
}

#[test]
fn test_validate_without_project() {
    let empty = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("tier").unwrap();
    cmd.current_dir(empty.path())
        .env_remove("TIERFLOW_PROJECT_ROOT")
        .env("TIERFLOW_CONFIG_PATH", empty.path().join("no-config.yaml"))
        .arg("validate")
        .assert()
        .failure();
}

#[test]
fn test_validate_two_zones() {
    let project = TestProject::two_zones();
    project
        .tier()
        .args(["validate", "dev"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Topology is valid"))
        .stdout(predicate::str::contains("Stage: dev"))
        .stdout(predicate::str::contains("across 2 zones"));
}

#[test]
fn test_validate_rejects_single_zone() {
    let project = TestProject::new();
    let single = common::TWO_ZONES.replace(
        r#"    zone "ap-northeast-1c" {
        public "10.0.2.0/24"
        private "10.0.12.0/24"
    }
"#,
        "",
    );
    project.write_topology(&single);

    project
        .tier()
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Topology is invalid"));
}

#[test]
fn test_stage_from_environment() {
    let project = TestProject::two_zones();
    project
        .tier()
        .env("TIERFLOW_STAGE", "dev")
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Stage: dev"));
}

#[test]
fn test_graph_dot() {
    let project = TestProject::two_zones();
    project
        .tier()
        .args(["graph", "--dot"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("digraph topology {"))
        .stdout(predicate::str::contains("cluster_data"));
}

#[test]
fn test_graph_lists_creation_order() {
    let project = TestProject::two_zones();
    project
        .tier()
        .arg("graph")
        .assert()
        .success()
        .stdout(predicate::str::contains("network.main"))
        .stdout(predicate::str::contains("database.main ←"));
}

#[test]
fn test_plan_on_fresh_project() {
    let project = TestProject::two_zones();
    project
        .tier()
        .args(["plan", "dev"])
        .assert()
        .success()
        .stdout(predicate::str::contains("+ network.main"))
        .stdout(predicate::str::contains("to create, 0 to update, 0 to delete"));
}

#[test]
fn test_apply_declined_changes_nothing() {
    let project = TestProject::two_zones();
    project
        .tier()
        .args(["apply", "dev"])
        .write_stdin("n\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Apply cancelled"));

    assert!(!project.path().join(".tierflow/state/dev.json").exists());
}

#[test]
fn test_apply_outputs_destroy_lifecycle() {
    let project = TestProject::two_zones();

    project
        .tier()
        .args(["apply", "dev", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Apply complete"))
        .stdout(predicate::str::contains("web_lb_dns_name"));
    assert!(project.path().join(".tierflow/state/dev.json").exists());
    assert!(project.path().join(".tierflow/local/dev.json").exists());

    project
        .tier()
        .args(["plan", "dev"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No changes"));

    let output = project
        .tier()
        .args(["outputs", "dev", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let values: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(
        values["web_lb_dns_name"]
            .as_str()
            .unwrap()
            .starts_with("shop-dev-web-")
    );
    assert!(values["db_endpoint"].as_str().unwrap().ends_with(":5432"));
    assert_eq!(values["public_subnet_ids"].as_array().unwrap().len(), 2);

    project
        .tier()
        .args(["destroy", "dev", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Destroy complete"));

    project
        .tier()
        .args(["outputs", "dev"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No outputs yet"));
}

#[test]
fn test_destroy_empty_stage() {
    let project = TestProject::two_zones();
    project
        .tier()
        .args(["destroy", "dev", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to destroy"));
}

#[test]
fn test_export_writes_terraform() {
    let project = TestProject::two_zones();
    let out = project.path().join("tf");

    project
        .tier()
        .args(["export", "dev", "--out"])
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("main.tf.json"));

    let content = std::fs::read_to_string(out.join("main.tf.json")).unwrap();
    let document: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(
        document["provider"]["aws"]["region"],
        "ap-northeast-1"
    );
    assert!(document["resource"]["aws_db_instance"]["main"].is_object());
    assert_eq!(
        document["output"]["db_endpoint"]["value"],
        "${aws_db_instance.main.endpoint}"
    );
}
