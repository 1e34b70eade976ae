//! CLI integration tests

use std::process::{Command, Output};

fn qtm(args: &[&str]) -> Output {
    Command::new("cargo")
        .args(["run", "-q", "-p", "qtm-cli", "--"])
        .args(args)
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = qtm(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("queue-time monitor"), "Should show app name");
    for command in ["collect", "report", "status", "start", "cancel", "stats", "store"] {
        assert!(stdout.contains(command), "Should show {} command", command);
    }
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = qtm(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("qtm"), "Should show binary name");
}

/// Test collect command help
#[test]
fn test_collect_help() {
    let output = qtm(&["collect", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Collect help should succeed");
    assert!(stdout.contains("--duration"), "Should show duration option");
    assert!(stdout.contains("--interval"), "Should show interval option");
    assert!(stdout.contains("--exclude"), "Should show exclude option");
    assert!(stdout.contains("--kubeconfig"), "Should show kubeconfig option");
    assert!(stdout.contains("--raw"), "Should show raw option");
}

/// Test report command help
#[test]
fn test_report_help() {
    let output = qtm(&["report", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Report help should succeed");
    assert!(stdout.contains("--history"), "Should show history option");
    assert!(stdout.contains("--output"), "Should show output option");
    assert!(stdout.contains("--top"), "Should show top option");
    assert!(stdout.contains("--days"), "Should show days option");
}

/// Test start command help
#[test]
fn test_start_help() {
    let output = qtm(&["start", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Start help should succeed");
    assert!(stdout.contains("--duration"), "Should show duration option");
    assert!(stdout.contains("--interval"), "Should show interval option");
}

/// Test stats command help
#[test]
fn test_stats_help() {
    let output = qtm(&["stats", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Stats help should succeed");
    assert!(stdout.contains("--top"), "Should show top option");
    assert!(stdout.contains("--raw"), "Should show raw option");
}

/// Test that start requires its parameters
#[test]
fn test_start_requires_duration() {
    let output = qtm(&["start", "--interval", "60"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "Start without duration should fail");
    assert!(stderr.contains("--duration"), "Should name the missing option");
}

/// Test that collect rejects a zero interval before touching the cluster
#[test]
fn test_collect_rejects_zero_interval() {
    let dir = tempfile::TempDir::new().unwrap();
    let history = dir.path().join("history.csv");
    let output = qtm(&[
        "collect",
        "--duration",
        "5",
        "--interval",
        "0",
        "--history",
        history.to_str().unwrap(),
    ]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "Zero interval should fail");
    assert!(stderr.contains("interval"), "Should explain the bad interval");
    assert!(!history.exists(), "History should not be created");
}
