//! Exit statuses and output of the `causa` binary.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn causa() -> Command {
    let mut cmd = Command::cargo_bin("causa").unwrap();
    cmd.env_remove("CAUSA_CONFIG").env("NO_COLOR", "1");
    cmd
}

/// Run a short honest episode with seed 7 and return its audit log path.
fn recorded_session(dir: &Path) -> PathBuf {
    let path = dir.join("session.jsonl");
    causa()
        .args(["run", "honest-mci_minimal", "--steps", "3", "--seed", "7", "--audit"])
        .arg(&path)
        .assert()
        .success();
    path
}

fn rewrite_lines(path: &Path, edit: impl FnOnce(&mut Vec<&str>)) {
    let contents = std::fs::read_to_string(path).unwrap();
    let mut lines: Vec<&str> = contents.lines().collect();
    edit(&mut lines);
    let mut out = lines.join("\n");
    out.push('\n');
    std::fs::write(path, out).unwrap();
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[test]
fn scenarios_lists_the_catalogue() {
    causa()
        .arg("scenarios")
        .assert()
        .success()
        .stdout(predicate::str::contains("pseudo-mci_latent-salted"));
}

#[test]
fn run_prints_a_json_report() {
    causa()
        .args(["--output", "json", "run", "pseudo-mci_minimal", "--steps", "4"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"scenario\": \"pseudo-mci_minimal\""))
        .stdout(predicate::str::contains("I1_COUNTERFACTUALS"));
}

#[test]
fn unknown_scenario_is_an_error() {
    causa()
        .args(["run", "nobody-full"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("nobody-full"));
}

#[test]
fn usage_errors_exit_one() {
    causa().arg("verify-audit").assert().code(1);
    causa().args(["replay", "x.jsonl"]).assert().code(1);
}

#[test]
fn config_shows_file_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("causa.toml");
    std::fs::write(&path, "[harness]\nsteps = 21\n").unwrap();

    causa()
        .arg("--config")
        .arg(&path)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("steps = 21"));
}

// ---------------------------------------------------------------------------
// Verify and replay
// ---------------------------------------------------------------------------

#[test]
fn recorded_session_verifies_and_replays() {
    let dir = tempfile::tempdir().unwrap();
    let log = recorded_session(dir.path());

    causa()
        .arg("verify-audit")
        .arg(&log)
        .assert()
        .success()
        .stdout(predicate::str::contains("intact"));

    causa()
        .args(["replay", "--seed", "7"])
        .arg(&log)
        .assert()
        .success()
        .stdout(predicate::str::contains("reproduced"));
}

#[test]
fn removed_entry_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let log = recorded_session(dir.path());
    rewrite_lines(&log, |lines| {
        lines.remove(2);
    });

    causa().arg("verify-audit").arg(&log).assert().code(2);
    causa()
        .args(["replay", "--seed", "7"])
        .arg(&log)
        .assert()
        .code(2);
}

#[test]
fn missing_seal_needs_allow_unsealed() {
    let dir = tempfile::tempdir().unwrap();
    let log = recorded_session(dir.path());
    rewrite_lines(&log, |lines| {
        lines.pop();
    });

    causa()
        .arg("verify-audit")
        .arg(&log)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("not sealed"));
    causa()
        .args(["verify-audit", "--allow-unsealed"])
        .arg(&log)
        .assert()
        .success();
}

#[test]
fn wrong_seed_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let log = recorded_session(dir.path());

    causa()
        .args(["replay", "--seed", "8"])
        .arg(&log)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("run seed"));
}

#[test]
fn missing_log_is_an_error() {
    causa()
        .args(["verify-audit", "/nonexistent/causa/session.jsonl"])
        .assert()
        .code(1);
}
