//! CLI integration tests for legacy-pg-migrate.
//!
//! These tests verify command-line argument parsing, help output,
//! the offline `plan` command and exit codes for configuration errors.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the legacy-pg-migrate binary.
fn cmd() -> Command {
    Command::cargo_bin("legacy-pg-migrate").unwrap()
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("migrate-table"))
        .stdout(predicate::str::contains("verify"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("history"))
        .stdout(predicate::str::contains("health-check"));
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--entities"))
        .stdout(predicate::str::contains("--workers"))
        .stdout(predicate::str::contains("--skip-relationships"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("legacy-pg-migrate"));
}

#[test]
fn test_global_flags_have_defaults() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"));
}

#[test]
fn test_history_limit_default() {
    cmd()
        .args(["history", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[default: 20]"));
}

// =============================================================================
// Plan (no I/O)
// =============================================================================

#[test]
fn test_plan_puts_parents_first() {
    let output = cmd().arg("plan").assert().success().get_output().stdout.clone();
    let text = String::from_utf8(output).unwrap();

    let position = |name: &str| {
        text.find(&format!(" {} ", name))
            .unwrap_or_else(|| panic!("{} missing from plan:\n{}", name, text))
    };
    assert!(position("institution") < position("unit"));
    assert!(position("institution") < position("user"));
    assert!(text.contains("Relationships:"));
}

#[test]
fn test_plan_json() {
    let output = cmd()
        .args(["--output-json", "plan", "--entities", "role,institution"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let order: Vec<&str> = json["order"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert_eq!(order.len(), 2);
    assert!(order.contains(&"role"));
    assert!(order.contains(&"institution"));
}

#[test]
fn test_plan_unknown_entity_exits_with_code_2() {
    cmd()
        .args(["plan", "--entities", "spaceship"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("spaceship"));
}

// =============================================================================
// Exit Code Tests - Config Errors
// =============================================================================

#[test]
fn test_missing_config_file_exits_with_code_1() {
    // A missing file is an IO error, not a config error.
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "health-check"])
        .assert()
        .code(1);
}

#[test]
fn test_invalid_yaml_exits_with_code_2() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(2);
}

#[test]
fn test_missing_required_fields_exits_with_code_2() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "source:").unwrap();
    writeln!(file, "  host: localhost").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(2);
}

#[test]
fn test_invalid_log_format_is_rejected() {
    cmd()
        .args(["--log-format", "xml", "plan"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid log format"));
}

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}
