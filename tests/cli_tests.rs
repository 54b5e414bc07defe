//! CLI integration tests for the initguard binary
//!
//! Every test runs the compiled binary inside its own temporary directory
//! with an explicit `--log-dir`, so no state leaks between tests.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Get a Command for the initguard binary, rooted in `dir`
#[allow(deprecated)]
fn initguard_cmd(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("initguard").expect("Failed to find initguard binary");
    cmd.current_dir(dir)
        .env_remove("RUST_LOG")
        .arg("--no-color")
        .arg("--log-dir")
        .arg(dir.join("logs"));
    cmd
}

fn json_stdout(cmd: &mut Command) -> serde_json::Value {
    let output = cmd.output().expect("binary runs");
    assert!(output.status.success(), "command failed: {:?}", output);
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

// ============================================================================
// Global flags
// ============================================================================

#[test]
fn test_version_flag() {
    let dir = TempDir::new().unwrap();
    initguard_cmd(dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_help_lists_commands() {
    let dir = TempDir::new().unwrap();
    initguard_cmd(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("analyze"))
        .stdout(predicate::str::contains("recovery"))
        .stdout(predicate::str::contains("diagnose"));
}

#[test]
fn test_missing_config_file_fails() {
    let dir = TempDir::new().unwrap();
    initguard_cmd(dir.path())
        .args(["--config", "absent.toml", "analyze"])
        .assert()
        .code(1)
        .stderr(predicate::str::starts_with("Error:"));
}

#[test]
fn test_invalid_config_value_fails() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("initguard.toml"), "[history]\ncapacity = 0\n").unwrap();
    initguard_cmd(dir.path())
        .arg("analyze")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("history.capacity"));
}

// ============================================================================
// analyze / diagnose
// ============================================================================

#[test]
fn test_analyze_without_history() {
    let dir = TempDir::new().unwrap();
    initguard_cmd(dir.path())
        .arg("analyze")
        .assert()
        .success()
        .stdout(predicate::str::contains("No errors recorded."));
}

#[test]
fn test_diagnose_then_analyze() {
    let dir = TempDir::new().unwrap();
    initguard_cmd(dir.path())
        .args([
            "diagnose",
            "could not connect to server: Connection refused",
            "--backend",
            "postgresql",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("CONNECTION_REFUSED"))
        .stdout(predicate::str::contains("Severity: critical"));

    let analysis = json_stdout(initguard_cmd(dir.path()).args(["analyze", "--format", "json"]));
    assert_eq!(analysis["error_summary"]["total_errors"], 1);
    assert_eq!(
        analysis["error_summary"]["most_common_error"],
        "CONNECTION_REFUSED"
    );
    assert_eq!(analysis["recommendations"][0]["category"], "severity");
}

#[test]
fn test_diagnose_auto_recover_missing_url() {
    let dir = TempDir::new().unwrap();
    let result = json_stdout(initguard_cmd(dir.path()).args([
        "diagnose",
        "DATABASE_URL missing",
        "--auto-recover",
        "--format",
        "json",
    ]));
    assert_eq!(result["code"], "MISSING_DATABASE_URL");
    assert_eq!(result["recovery"]["success"], true);
    let url = result["recovery"]["details"]["database_url"].as_str().unwrap();
    assert!(url.starts_with("sqlite:///"));
    assert!(url.ends_with("app.db"));
}

#[test]
fn test_analyze_accepts_largest_window() {
    let dir = TempDir::new().unwrap();
    initguard_cmd(dir.path())
        .args(["diagnose", "no space left on device"])
        .assert()
        .success();
    let analysis = json_stdout(initguard_cmd(dir.path()).args([
        "analyze",
        "--hours",
        "4294967295",
        "--format",
        "json",
    ]));
    assert_eq!(analysis["error_summary"]["total_errors"], 1);
}

#[test]
fn test_analyze_text_shows_repeated_errors() {
    let dir = TempDir::new().unwrap();
    for _ in 0..3 {
        initguard_cmd(dir.path())
            .args(["diagnose", "no space left on device"])
            .assert()
            .success();
    }
    initguard_cmd(dir.path())
        .args(["analyze", "--hours", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Total errors:       3"))
        .stdout(predicate::str::contains("DISK_FULL x3"));
}

// ============================================================================
// recovery
// ============================================================================

#[test]
fn test_recovery_lists_all_codes() {
    let dir = TempDir::new().unwrap();
    initguard_cmd(dir.path())
        .arg("recovery")
        .assert()
        .success()
        .stdout(predicate::str::contains("CONNECTION_REFUSED"))
        .stdout(predicate::str::contains("DATABASE_FILE_LOCKED"))
        .stdout(predicate::str::contains("UNKNOWN"));
}

#[test]
fn test_recovery_for_single_code() {
    let dir = TempDir::new().unwrap();
    initguard_cmd(dir.path())
        .args(["recovery", "--error-code", "1602"])
        .assert()
        .success()
        .stdout(predicate::str::contains("DATABASE_FILE_LOCKED (1602)"))
        .stdout(predicate::str::contains("Steps:"));
}

#[test]
fn test_recovery_rejects_unknown_code() {
    let dir = TempDir::new().unwrap();
    initguard_cmd(dir.path())
        .args(["recovery", "--error-code", "NOT_A_CODE"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Error:"))
        .stderr(predicate::str::contains("NOT_A_CODE"));
}

// ============================================================================
// report / export / clear
// ============================================================================

#[test]
fn test_export_writes_report() {
    let dir = TempDir::new().unwrap();
    initguard_cmd(dir.path())
        .args(["diagnose", "database is locked", "--backend", "sqlite"])
        .assert()
        .success();

    initguard_cmd(dir.path())
        .args(["export", "out/report.json", "--hours", "24"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported 1 error(s)"));

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("out/report.json")).unwrap())
            .unwrap();
    assert_eq!(report["report_metadata"]["total_errors_analyzed"], 1);
    assert_eq!(report["report_metadata"]["include_stack_traces"], false);
    assert_eq!(
        report["error_summary"]["error_counts"]["DATABASE_FILE_LOCKED"],
        1
    );
    assert_eq!(report["log_files"].as_array().unwrap().len(), 1);
}

#[test]
fn test_report_to_stdout_and_file() {
    let dir = TempDir::new().unwrap();
    let report = json_stdout(initguard_cmd(dir.path()).args(["report", "--hours", "12"]));
    assert_eq!(report["report_metadata"]["time_period_hours"], 12);

    initguard_cmd(dir.path())
        .args(["report", "--output", "troubleshooting.json", "--include-traces"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Report written to"));
    let written: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(dir.path().join("troubleshooting.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(written["report_metadata"]["include_stack_traces"], true);
}

#[test]
fn test_clear_removes_history() {
    let dir = TempDir::new().unwrap();
    initguard_cmd(dir.path())
        .args(["diagnose", "migration failed"])
        .assert()
        .success();

    initguard_cmd(dir.path())
        .arg("clear")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 log file(s) removed"));

    initguard_cmd(dir.path())
        .arg("analyze")
        .assert()
        .success()
        .stdout(predicate::str::contains("No errors recorded."));
}
