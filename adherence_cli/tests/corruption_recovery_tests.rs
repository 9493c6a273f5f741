//! Corruption recovery tests for medtrack.
//!
//! These tests verify the system handles:
//! - Corrupted collection files without overwriting them
//! - Corrupted or invalid configuration
//! - Corrupted notification outbox lines

use assert_cmd::Command;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn cli(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("medtrack"));
    cmd.arg("--data-dir")
        .arg(dir)
        .arg("--config")
        .arg(dir.join("config.toml"))
        .arg("--now")
        .arg("2025-03-01T00:00:00Z");
    cmd
}

fn setup_test_dir() -> TempDir {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    fs::write(dir.path().join("config.toml"), "").unwrap();
    dir
}

fn add_prescription(dir: &Path) -> assert_cmd::assert::Assert {
    cli(dir)
        .args([
            "prescription", "add",
            "--id", "rx1",
            "--patient", "patient1",
            "--medication", "Metformin",
            "--dosage", "500mg",
            "--times", "08:00",
            "--start", "2025-03-01",
            "--end", "2025-03-03",
        ])
        .assert()
}

#[test]
fn test_corrupted_log_collection_is_not_overwritten() {
    let temp_dir = setup_test_dir();
    let dir = temp_dir.path();
    fs::create_dir_all(dir.join("store")).unwrap();

    let logs_path = dir.join("store/medication_logs.json");
    fs::write(&logs_path, "{ invalid json }}}}").expect("Failed to write corrupted logs");

    add_prescription(dir).failure();
    cli(dir).arg("sweep").assert().failure();

    // History is left for manual recovery rather than replaced
    assert_eq!(fs::read_to_string(&logs_path).unwrap(), "{ invalid json }}}}");
}

#[test]
fn test_empty_collection_file_is_treated_as_empty() {
    let temp_dir = setup_test_dir();
    let dir = temp_dir.path();
    fs::create_dir_all(dir.join("store")).unwrap();
    fs::write(dir.join("store/medication_logs.json"), "").unwrap();

    add_prescription(dir).success();
}

#[test]
fn test_invalid_config_file() {
    let temp_dir = setup_test_dir();
    let dir = temp_dir.path();
    fs::write(dir.join("config.toml"), "[sweep\ngrace_minutes = ").unwrap();

    cli(dir)
        .arg("sweep")
        .assert()
        .failure()
        .stderr(predicates::str::contains("Toml"));
}

#[test]
fn test_config_with_invalid_values() {
    let temp_dir = setup_test_dir();
    let dir = temp_dir.path();
    fs::write(dir.join("config.toml"), "[store]\nbatch_limit = 0\n").unwrap();

    cli(dir)
        .arg("sweep")
        .assert()
        .failure()
        .stderr(predicates::str::contains("batch_limit"));
}

#[test]
fn test_missing_config_file() {
    let temp_dir = setup_test_dir();
    let dir = temp_dir.path();
    fs::remove_file(dir.join("config.toml")).unwrap();

    cli(dir).arg("sweep").assert().failure();
}

#[test]
fn test_corrupted_outbox_does_not_block_notifications() {
    let temp_dir = setup_test_dir();
    let dir = temp_dir.path();
    fs::write(dir.join("outbox.jsonl"), "{ partial line\n").unwrap();

    cli(dir)
        .args(["user", "add", "patient1", "--push-address", "token-1"])
        .assert()
        .success();
    add_prescription(dir).success();

    let contents = fs::read_to_string(dir.join("outbox.jsonl")).unwrap();
    assert_eq!(contents.lines().count(), 2);
    assert!(contents.lines().last().unwrap().contains("prescription-created"));
}
