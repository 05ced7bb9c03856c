//! CSV rollup: archive the JSONL work log into a flat CSV.
//!
//! One row per exercise of every block result. The adjustment recommended for
//! the exercise by the matching session record is carried in the row so
//! history lookups keep working after the log is archived.

use crate::worklog::{read_entries, LogEntry, SessionRecord};
use crate::{Result, WorkResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::Path;
use uuid::Uuid;

/// A row in the CSV archive
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct ArchiveRow {
    pub result_id: String,
    pub run_id: String,
    pub finalized_at: String,
    pub step_index: usize,
    pub module_id: String,
    pub module_stable_id: String,
    pub block_name: String,
    pub protocol: String,
    pub exercise_index: usize,
    pub exercise_id: String,
    pub exercise_stable_id: String,
    pub exercise_name: String,
    pub loadable: bool,
    pub energy: bool,
    /// Credited reps (derived for EMOM, summed sets for LIBRE)
    pub reps: u32,
    pub weight_kg: Option<f64>,
    pub heart_rate: Option<u16>,
    pub elapsed_seconds: u32,
    pub planned_rounds: Option<u32>,
    pub target_reps_per_round: Option<u32>,
    pub successful_rounds: u32,
    pub failed_rounds: u32,
    pub rpe: Option<u8>,
    pub skipped: bool,
    pub adjustment: Option<f64>,
}

impl ArchiveRow {
    fn rows_for(result: &WorkResult, record: Option<&SessionRecord>) -> Vec<ArchiveRow> {
        let adjustments = record
            .map(|r| r.adjustments_for(&result.module_stable_id))
            .unwrap_or_default();

        result
            .exercises
            .iter()
            .enumerate()
            .map(|(idx, log)| ArchiveRow {
                result_id: result.id.to_string(),
                run_id: result.run_id.to_string(),
                finalized_at: result.finalized_at.to_rfc3339(),
                step_index: result.step_index,
                module_id: result.module_id.clone(),
                module_stable_id: result.module_stable_id.clone(),
                block_name: result.block_name.clone(),
                protocol: result.protocol.code().to_string(),
                exercise_index: idx,
                exercise_id: log.exercise_id.clone(),
                exercise_stable_id: log.exercise_stable_id.clone(),
                exercise_name: log.name.clone(),
                loadable: log.loadable,
                energy: log.energy,
                reps: result.credited_reps(idx),
                weight_kg: log
                    .weight_kg
                    .or_else(|| log.sets.iter().rev().find_map(|s| s.weight_kg)),
                heart_rate: log.heart_rate,
                elapsed_seconds: result.elapsed_seconds,
                planned_rounds: result.planned_rounds,
                target_reps_per_round: result.target_reps_per_round.get(idx).copied().flatten(),
                successful_rounds: result.successful_rounds(),
                failed_rounds: result.failed_rounds(),
                rpe: result.feedback.as_ref().map(|f| f.rpe),
                skipped: result.skipped,
                adjustment: adjustments
                    .iter()
                    .find(|a| a.exercise_stable_id == log.exercise_stable_id)
                    .map(|a| a.adjustment),
            })
            .collect()
    }
}

/// Roll the work log into the CSV archive and rename the log
///
/// The CSV is fsynced before the log is renamed to `.jsonl.processed`; the
/// processed file is kept for manual recovery. Returns the number of block
/// results archived.
pub fn worklog_to_csv_and_archive(log_path: &Path, csv_path: &Path) -> Result<usize> {
    let entries = read_entries(log_path)?;

    if entries.is_empty() {
        tracing::info!("No entries in work log to roll up");
        return Ok(0);
    }

    let records: HashMap<Uuid, &SessionRecord> = entries
        .iter()
        .filter_map(|e| match e {
            LogEntry::Session(s) => Some((s.run_id, s)),
            LogEntry::Block(_) => None,
        })
        .collect();

    if let Some(parent) = csv_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new().create(true).append(true).open(csv_path)?;
    let needs_headers = file.metadata()?.len() == 0;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(needs_headers)
        .from_writer(file);

    let mut result_count = 0;
    for entry in &entries {
        if let LogEntry::Block(result) = entry {
            for row in ArchiveRow::rows_for(result, records.get(&result.run_id).copied()) {
                writer.serialize(row)?;
            }
            result_count += 1;
        }
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    file.sync_all()?;

    tracing::info!("Wrote {} block results to CSV", result_count);

    let processed_path = log_path.with_extension("jsonl.processed");
    std::fs::rename(log_path, &processed_path)?;
    tracing::info!("Archived work log to {:?}", processed_path);

    Ok(result_count)
}

/// Read every row of the CSV archive; malformed rows are skipped
pub(crate) fn read_archive(csv_path: &Path) -> Result<Vec<ArchiveRow>> {
    if !csv_path.exists() {
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(csv_path)?;

    let mut rows = Vec::new();
    for result in reader.deserialize::<ArchiveRow>() {
        match result {
            Ok(row) => rows.push(row),
            Err(e) => tracing::warn!("Failed to deserialize archive row: {}", e),
        }
    }
    Ok(rows)
}

/// Remove processed work logs from a directory
pub fn cleanup_processed_logs(dir: &Path) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut count = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map(|ext| ext == "processed").unwrap_or(false) {
            std::fs::remove_file(&path)?;
            tracing::debug!("Removed processed log: {:?}", path);
            count += 1;
        }
    }

    if count > 0 {
        tracing::info!("Cleaned up {} processed work logs", count);
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worklog::JsonlWorkLog;
    use crate::{
        ExerciseLog, ExerciseRef, Insight, InsightKind, InsightReason, Protocol, SessionMetrics,
    };
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::fs::File;

    fn result(run_id: Uuid) -> WorkResult {
        let log = |stable: &str, reps: u32| ExerciseLog {
            exercise_id: format!("id_{}", stable),
            exercise_stable_id: stable.into(),
            name: stable.into(),
            loadable: true,
            energy: false,
            reps,
            weight_kg: Some(40.0),
            heart_rate: None,
            note: None,
            sets: vec![],
        };
        WorkResult {
            id: Uuid::new_v4(),
            run_id,
            step_index: 2,
            module_id: "m".into(),
            module_stable_id: "build_push".into(),
            block_name: "BUILD push".into(),
            protocol: Protocol::TimeCap,
            exercises: vec![log("press", 52), log("dip", 35)],
            elapsed_seconds: 240,
            planned_rounds: None,
            target_reps_per_round: vec![],
            rounds: BTreeMap::new(),
            feedback: None,
            skipped: false,
            finalized_at: Utc::now(),
        }
    }

    fn record(run_id: Uuid) -> SessionRecord {
        SessionRecord {
            run_id,
            session_id: "s".into(),
            schedule_entry_id: None,
            completed_at: Utc::now(),
            metrics: SessionMetrics::default(),
            insights: vec![Insight {
                kind: InsightKind::Up,
                reason: InsightReason::AboveCeiling,
                module_stable_id: Some("build_push".into()),
                exercise: Some(ExerciseRef {
                    stable_id: "press".into(),
                    name: "press".into(),
                }),
                athlete_message: String::new(),
                coach_message: String::new(),
                adjustment: 0.05,
            }],
        }
    }

    #[test]
    fn test_rollup_writes_row_per_exercise_and_archives_log() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_path = temp_dir.path().join("worklog.jsonl");
        let csv_path = temp_dir.path().join("worklog.csv");

        let run_id = Uuid::new_v4();
        let log = JsonlWorkLog::new(&log_path);
        log.append(&LogEntry::Block(result(run_id))).unwrap();
        log.append(&LogEntry::Session(record(run_id))).unwrap();

        let count = worklog_to_csv_and_archive(&log_path, &csv_path).unwrap();
        assert_eq!(count, 1);
        assert!(!log_path.exists());
        assert!(temp_dir.path().join("worklog.jsonl.processed").exists());

        let rows = read_archive(&csv_path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].exercise_stable_id, "press");
        assert_eq!(rows[0].adjustment, Some(0.05));
        assert_eq!(rows[1].adjustment, None);
        assert_eq!(rows[1].reps, 35);
    }

    #[test]
    fn test_rollup_appends_without_duplicate_headers() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_path = temp_dir.path().join("worklog.jsonl");
        let csv_path = temp_dir.path().join("worklog.csv");

        for _ in 0..2 {
            JsonlWorkLog::new(&log_path)
                .append(&LogEntry::Block(result(Uuid::new_v4())))
                .unwrap();
            assert_eq!(worklog_to_csv_and_archive(&log_path, &csv_path).unwrap(), 1);
        }

        let reader = csv::Reader::from_path(&csv_path).unwrap();
        assert_eq!(reader.into_records().count(), 4);
    }

    #[test]
    fn test_empty_log() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_path = temp_dir.path().join("worklog.jsonl");
        File::create(&log_path).unwrap();

        let count =
            worklog_to_csv_and_archive(&log_path, &temp_dir.path().join("worklog.csv")).unwrap();
        assert_eq!(count, 0);
        assert!(log_path.exists());
    }

    #[test]
    fn test_cleanup_processed_logs() {
        let temp_dir = tempfile::tempdir().unwrap();
        File::create(temp_dir.path().join("a.jsonl.processed")).unwrap();
        File::create(temp_dir.path().join("b.jsonl.processed")).unwrap();
        File::create(temp_dir.path().join("worklog.jsonl")).unwrap();

        assert_eq!(cleanup_processed_logs(temp_dir.path()).unwrap(), 2);
        assert!(temp_dir.path().join("worklog.jsonl").exists());
    }
}
