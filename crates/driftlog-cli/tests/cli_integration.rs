//! CLI Integration Tests
//!
//! These verify the command wiring between the CLI and driftlog-core
//! end-to-end against a temporary data directory.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// ============================================================================
// Test Utilities
// ============================================================================

/// Create a CLI command with a temporary data directory
fn cli_cmd(data_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("driftlog").expect("Failed to find driftlog binary");
    cmd.arg("--data-dir").arg(data_dir.path());
    cmd
}

/// Extract an event ID from `event create` output ("  ID: <id>")
fn extract_event_id(output: &str) -> Option<String> {
    for line in output.lines() {
        if let Some(id) = line.strip_prefix("  ID: ") {
            return Some(id.trim().to_string());
        }
    }
    None
}

// ============================================================================
// Info & Identity
// ============================================================================

#[test]
fn test_info_command() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .arg("info")
        .assert()
        .success()
        .stdout(predicate::str::contains("driftlog v0.1.0"))
        .stdout(predicate::str::contains("Events: 0"));
}

#[test]
fn test_identity_init_is_stable() {
    let data_dir = TempDir::new().unwrap();

    let first = cli_cmd(&data_dir)
        .args(["identity", "init"])
        .assert()
        .success();
    let first_out = String::from_utf8(first.get_output().stdout.clone()).unwrap();

    let second = cli_cmd(&data_dir)
        .args(["identity", "show"])
        .assert()
        .success();
    let second_out = String::from_utf8(second.get_output().stdout.clone()).unwrap();

    assert_eq!(first_out, second_out, "Identity must persist across runs");
}

#[test]
fn test_identity_show_without_init_fails() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["identity", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("identity init"));
}

// ============================================================================
// Events
// ============================================================================

#[test]
fn test_event_create_and_list() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["event", "create", r#"{"t":"note","body":"hello"}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains("Timestamp: 1"));

    cli_cmd(&data_dir)
        .args(["event", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello"));

    cli_cmd(&data_dir)
        .args(["event", "count"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Total: 1"));
}

#[test]
fn test_event_create_rejects_non_object_payload() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["event", "create", r#"[1,2,3]"#])
        .assert()
        .failure()
        .stderr(predicate::str::contains("JSON object"));
}

#[test]
fn test_event_show_round_trip() {
    let data_dir = TempDir::new().unwrap();

    let created = cli_cmd(&data_dir)
        .args(["event", "create", r#"{"t":"note"}"#])
        .assert()
        .success();
    let out = String::from_utf8(created.get_output().stdout.clone()).unwrap();
    let event_id = extract_event_id(&out).expect("Create should print the event ID");

    cli_cmd(&data_dir)
        .args(["event", "show", &event_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Timestamp: 1"))
        .stdout(predicate::str::contains("note"));
}

#[test]
fn test_timestamps_increment_across_runs() {
    let data_dir = TempDir::new().unwrap();

    for expected in 1..=3 {
        cli_cmd(&data_dir)
            .args(["event", "create", r#"{"t":"x"}"#])
            .assert()
            .success()
            .stdout(predicate::str::contains(format!("Timestamp: {}", expected)));
    }

    cli_cmd(&data_dir)
        .arg("watermarks")
        .assert()
        .success()
        .stdout(predicate::str::contains(": 3"));
}

// ============================================================================
// Admin
// ============================================================================

#[test]
fn test_admin_clear() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["event", "create", r#"{"t":"x"}"#])
        .assert()
        .success();

    cli_cmd(&data_dir)
        .args(["admin", "clear"])
        .assert()
        .success();

    cli_cmd(&data_dir)
        .args(["event", "count"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Total: 0"));
}

#[test]
fn test_projection_list_empty() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["projection", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No snapshots."));
}
