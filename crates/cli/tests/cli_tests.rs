//! CLI integration tests

use std::process::{Command, Output};

fn wsctl(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_wsctl"))
        .args(args)
        .env_remove("WSCTL_API_URL")
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = wsctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("Worker Autoscaler"), "Should show app name");
    assert!(stdout.contains("status"), "Should show status command");
    assert!(stdout.contains("trigger"), "Should show trigger command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = wsctl(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("wsctl"), "Should show binary name");
}

#[test]
fn test_status_help() {
    let output = wsctl(&["status", "--help"]);

    assert!(output.status.success(), "Status help should succeed");
}

#[test]
fn test_trigger_help() {
    let output = wsctl(&["trigger", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Trigger help should succeed");
    assert!(stdout.contains("--force"), "Should show force option");
}

#[test]
fn test_format_option() {
    let output = wsctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("--format"), "Should show format option");
    assert!(stdout.contains("table"), "Should list table format");
    assert!(stdout.contains("json"), "Should list json format");
}

#[test]
fn test_api_url_option() {
    let output = wsctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("--api-url"), "Should show api-url option");
    assert!(stdout.contains("WSCTL_API_URL"), "Should show env var");
}

#[test]
fn test_invalid_command() {
    let output = wsctl(&["invalid-command"]);

    assert!(!output.status.success(), "Invalid command should fail");
}

#[test]
fn test_invalid_format() {
    let output = wsctl(&["--format", "yaml", "status"]);

    assert!(!output.status.success(), "Unknown format should fail");
}

#[test]
fn test_unreachable_api_fails() {
    let output = wsctl(&["--api-url", "http://127.0.0.1:9", "status"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "Unreachable API should fail");
    assert!(
        stderr.contains("Failed to send request"),
        "Should report the connection failure"
    );
}
