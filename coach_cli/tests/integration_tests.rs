//! Integration tests for the blockcoach binary.
//!
//! These tests verify end-to-end behavior including:
//! - Scripted session runs and work log output
//! - Schedule-driven runs
//! - History lookup and CSV rollup

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Helper to create a test data directory
fn setup_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Helper to get the path to the CLI binary
fn cli() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("blockcoach"))
}

fn run_session(data_dir: &Path, session: &str) {
    cli()
        .arg("run")
        .arg("--session")
        .arg(session)
        .arg("--data-dir")
        .arg(data_dir)
        .arg("--auto-complete")
        .assert()
        .success()
        .stdout(predicate::str::contains("Session logged"));
}

fn log_lines(data_dir: &Path) -> Vec<serde_json::Value> {
    fs::read_to_string(data_dir.join("worklog.jsonl"))
        .expect("Failed to read work log")
        .lines()
        .map(|l| serde_json::from_str(l).expect("Invalid JSON line"))
        .collect()
}

#[test]
fn test_cli_help() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Block-based strength session coach"));
}

#[test]
fn test_sessions_lists_catalog() {
    cli()
        .arg("sessions")
        .assert()
        .success()
        .stdout(predicate::str::contains("strength_mixed"))
        .stdout(predicate::str::contains("easy_run"))
        .stdout(predicate::str::contains("[E] BURN - Swing EMOM"));
}

#[test]
fn test_timeline_applies_duration_override() {
    cli()
        .args(["timeline", "--session", "strength_mixed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0. PLANNING"))
        .stdout(predicate::str::contains("[T, cap 4:00]"))
        .stdout(predicate::str::contains("[E, 6 rounds]"))
        .stdout(predicate::str::contains("SUMMARY"));

    cli()
        .args([
            "timeline",
            "--session",
            "strength_mixed",
            "--module",
            "burn_emom",
            "--duration",
            "8",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("BURN - Swing EMOM [T, cap 8:00]"));
}

#[test]
fn test_unknown_session_fails() {
    let temp_dir = setup_test_dir();

    cli()
        .args(["run", "--session", "nope", "--auto-complete"])
        .arg("--data-dir")
        .arg(temp_dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown session"));
}

#[test]
fn test_dry_run_does_not_log() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();

    cli()
        .args(["run", "--session", "lower_body", "--dry-run"])
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("Dry run"));

    assert!(!data_dir.join("worklog.jsonl").exists());
}

#[test]
fn test_auto_complete_logs_blocks_and_session_record() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();

    run_session(&data_dir, "strength_mixed");

    let lines = log_lines(&data_dir);
    let blocks = lines.iter().filter(|l| l.get("block").is_some()).count();
    let sessions: Vec<_> = lines.iter().filter_map(|l| l.get("session")).collect();
    assert_eq!(blocks, 4);
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["session_id"], "strength_mixed");

    // Coach messages are queued in the outbox
    let outbox = fs::read_to_string(data_dir.join("outbox.jsonl")).expect("No outbox");
    assert!(outbox.contains("strength_mixed"));
}

#[test]
fn test_scheduled_session_is_marked_completed() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();

    cli()
        .args(["schedule", "add", "--session", "lower_body"])
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("Scheduled lower_body"));

    cli()
        .args(["run", "--auto-complete"])
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("Scheduled for today: lower_body"));

    let schedule: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(data_dir.join("schedule.json")).unwrap())
            .unwrap();
    let entry = &schedule["entries"][0];
    assert_eq!(entry["status"], "completed");
    assert!(entry["summary"].as_str().unwrap().contains("Lower Body"));

    // Nothing left to run today
    cli()
        .args(["run", "--auto-complete"])
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .failure()
        .stderr(predicate::str::contains("nothing pending"));
}

#[test]
fn test_pure_cardio_session_uses_cardio_record() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();
    fs::write(
        data_dir.join("cardio.json"),
        r#"{ "avg_hr": 145, "max_hr": 160, "pace": "5:35 /km", "distance_km": 6.1 }"#,
    )
    .unwrap();

    cli()
        .args(["run", "--session", "easy_run", "--auto-complete"])
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("Pace: 5:35 /km"))
        .stdout(predicate::str::contains("Efficiency: 100%"));

    // The record is consumed by the run
    assert!(!data_dir.join("cardio.json").exists());
    let archived = fs::read_dir(&data_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".json.used"))
        .count();
    assert_eq!(archived, 1);
}

#[test]
fn test_strength_session_ignores_cardio_record() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();
    fs::write(
        data_dir.join("cardio.json"),
        r#"{ "avg_hr": 175, "pace": "5:10 /km", "distance_km": 5.0 }"#,
    )
    .unwrap();

    cli()
        .args(["run", "--session", "strength_mixed", "--auto-complete"])
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("Pace:").not())
        .stdout(predicate::str::contains("175 bpm").not());

    // Left in place for the next cardio session
    assert!(data_dir.join("cardio.json").exists());
}

#[test]
fn test_scripted_time_cap_blocks_hold_the_load() {
    let temp_dir = setup_test_dir();

    cli()
        .args(["run", "--session", "lower_body", "--auto-complete"])
        .arg("--data-dir")
        .arg(temp_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("40 reps on DB Reverse Lunge, right in the target zone"))
        .stdout(predicate::str::contains("A slightly lighter load").not());
}

#[test]
fn test_history_shows_latest_result() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();

    cli()
        .args(["history", "--module", "build_push"])
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("No history for build_push"));

    run_session(&data_dir, "strength_mixed");

    cli()
        .args(["history", "--session", "strength_mixed"])
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("build_push - BUILD - Upper push [T]"))
        .stdout(predicate::str::contains("Push-up: 40 reps"))
        .stdout(predicate::str::contains("Kettlebell Swing: 72 reps"));
}

#[test]
fn test_history_survives_rollup() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();

    run_session(&data_dir, "lower_body");

    cli()
        .arg("rollup")
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("Rolled up 3 block results"));

    assert!(!data_dir.join("worklog.jsonl").exists());
    let csv = fs::read_to_string(data_dir.join("worklog.csv")).expect("Failed to read CSV");
    assert!(csv.starts_with("result_id,run_id"));

    cli()
        .args(["history", "--module", "base_squat_emom"])
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("Goblet Squat: 32 reps"));
}

#[test]
fn test_rollup_without_log() {
    let temp_dir = setup_test_dir();

    cli()
        .arg("rollup")
        .arg("--data-dir")
        .arg(temp_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing to roll up"));
}

#[test]
fn test_rollup_with_cleanup() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();

    run_session(&data_dir, "lower_body");

    cli()
        .args(["rollup", "--cleanup"])
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleaned up 1 processed log"));

    let processed = fs::read_dir(&data_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".processed"))
        .count();
    assert_eq!(processed, 0);
}
