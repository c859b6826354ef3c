//! CLI integration tests

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;

/// Build command for the topoguard-cli binary (finds it in target/debug when run via cargo test).
fn topoguard_cli() -> Command {
    cargo_bin_cmd!("topoguard-cli")
}

/// Path to topoguard library test fixtures (relative to workspace).
fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("topoguard")
        .join("tests")
        .join("fixtures")
}

fn replay_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::copy(
        fixtures_dir().join("vdiv_midpoint.txt"),
        dir.path().join("VDIV_BUS_SENSE.1.txt"),
    )
    .unwrap();
    dir
}

#[test]
fn test_cli_help() {
    let mut cmd = topoguard_cli();

    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("netlists"));
}

#[test]
fn test_cli_version() {
    let mut cmd = topoguard_cli();

    cmd.arg("--version");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_cli_verify_pass() {
    let mut cmd = topoguard_cli();

    cmd.arg("verify")
        .arg(fixtures_dir().join("vdiv_midpoint.txt"))
        .arg("--task")
        .arg("VDIV_BUS_SENSE");

    cmd.assert()
        .code(0)
        .stdout(predicate::str::contains("Verdict: PASS"))
        .stdout(predicate::str::contains("Verification PASSED."));
}

#[test]
fn test_cli_verify_fail() {
    let mut cmd = topoguard_cli();

    cmd.arg("verify")
        .arg(fixtures_dir().join("vdiv_tapped_at_vin.txt"))
        .arg("--task")
        .arg("1");

    cmd.assert()
        .code(1)
        .stdout(predicate::str::contains("Verdict: FAIL"))
        .stdout(predicate::str::contains("PortMismatch"))
        .stdout(predicate::str::contains("Suggested fix"));
}

#[test]
fn test_cli_verify_json_output() {
    let mut cmd = topoguard_cli();

    cmd.arg("verify")
        .arg(fixtures_dir().join("hb_seven_caps.net"))
        .arg("--task")
        .arg("HB_TO2473_STAGE")
        .arg("--format")
        .arg("json");

    let output = cmd.output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["pass"], false);
    let kinds: Vec<&str> = json["violations"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v["kind"].as_str())
        .collect();
    assert!(kinds.contains(&"InsufficientDecoupling"), "{:?}", kinds);
}

#[test]
fn test_cli_verify_weak_mode() {
    let mut cmd = topoguard_cli();

    cmd.arg("verify")
        .arg(fixtures_dir().join("vdiv_tapped_at_vin.txt"))
        .arg("--task")
        .arg("VDIV_BUS_SENSE")
        .arg("--mode")
        .arg("weak");

    cmd.assert()
        .code(1)
        .stdout(predicate::str::contains("Issues: PortMismatch"))
        .stdout(predicate::str::contains("Suggested fix").not());
}

#[test]
fn test_cli_verify_errors_exit_2() {
    let mut cmd = topoguard_cli();
    cmd.arg("verify")
        .arg(fixtures_dir().join("vdiv_midpoint.txt"))
        .arg("--task")
        .arg("NOT_A_TASK");
    cmd.assert()
        .code(2)
        .stderr(predicate::str::contains("Error"));

    let mut cmd = topoguard_cli();
    cmd.arg("verify").arg("does_not_exist.txt").arg("--task").arg("1");
    cmd.assert().code(2);
}

#[test]
fn test_cli_tasks_command() {
    let mut cmd = topoguard_cli();

    cmd.arg("tasks");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("VDIV_BUS_SENSE"))
        .stdout(predicate::str::contains("HB_TO2473_STAGE"));
}

#[test]
fn test_cli_tasks_verbose() {
    let mut cmd = topoguard_cli();

    cmd.arg("tasks").arg("--verbose");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("decoupling: >= 8"))
        .stdout(predicate::str::contains("symmetry: gate_arms"));
}

#[test]
fn test_cli_run_with_replay_and_report() {
    let replay = replay_dir();
    let out = tempfile::tempdir().unwrap();

    let mut cmd = topoguard_cli();
    cmd.arg("run")
        .arg("--tasks")
        .arg("1")
        .arg("--modes")
        .arg("full,none")
        .arg("--trials")
        .arg("2")
        .arg("--parallel")
        .arg("2")
        .arg("--output")
        .arg(out.path())
        .arg("--replay")
        .arg(replay.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("4 trial(s): 4 passed, 0 failed, 0 errored"))
        .stderr(predicate::str::contains("verdict=PASS"));

    let trials = out.path().join("trials.jsonl");
    assert!(trials.exists());
    assert!(out.path().join("summary.csv").exists());
    assert!(out.path().join("results.json").exists());

    let mut cmd = topoguard_cli();
    cmd.arg("report").arg(&trials).arg("--k").arg("2");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("pass@2"))
        .stdout(predicate::str::contains("VDIV_BUS_SENSE"));
}

#[test]
fn test_cli_run_rejects_unknown_task() {
    let replay = replay_dir();
    let out = tempfile::tempdir().unwrap();

    let mut cmd = topoguard_cli();
    cmd.arg("run")
        .arg("--tasks")
        .arg("NOT_A_TASK")
        .arg("--output")
        .arg(out.path())
        .arg("--replay")
        .arg(replay.path());

    cmd.assert()
        .code(2)
        .stderr(predicate::str::contains("unknown task id"));
}

#[test]
fn test_cli_run_without_api_key() {
    let out = tempfile::tempdir().unwrap();

    let mut cmd = topoguard_cli();
    cmd.env_remove("OPENAI_API_KEY")
        .arg("run")
        .arg("--tasks")
        .arg("1")
        .arg("--output")
        .arg(out.path());

    cmd.assert()
        .code(2)
        .stderr(predicate::str::contains("OPENAI_API_KEY"));
}
