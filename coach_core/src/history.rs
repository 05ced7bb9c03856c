//! History lookup: the latest finalized result for a module.
//!
//! Results are read from the live JSONL work log and, optionally, from the
//! CSV archive. Entries present in both are de-duplicated by result id. The
//! adjustments recommended after that result are joined from the session
//! record of the same run (or from the archive row when the log is gone).

use crate::csv_rollup::{read_archive, ArchiveRow};
use crate::worklog::{read_entries, LogEntry, SessionRecord};
use crate::{
    Error, ExerciseAdjustment, ExerciseLog, HistoricalLog, HistoryIndex, Module, Protocol, Result,
    RoundOutcome, WorkResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// History-lookup capability
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn latest_for_module(&self, module_stable_id: &str) -> Result<Option<HistoricalLog>>;
}

/// History backed by the work log and its CSV archive
#[derive(Clone, Debug)]
pub struct FileHistory {
    log_path: PathBuf,
    archive_path: Option<PathBuf>,
}

impl FileHistory {
    pub fn new(log_path: impl Into<PathBuf>, archive_path: Option<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
            archive_path,
        }
    }

    /// Blocking lookup
    pub fn find_latest(&self, module_stable_id: &str) -> Result<Option<HistoricalLog>> {
        find_latest(&self.log_path, self.archive_path.as_deref(), module_stable_id)
    }
}

#[async_trait]
impl HistorySource for FileHistory {
    async fn latest_for_module(&self, module_stable_id: &str) -> Result<Option<HistoricalLog>> {
        let this = self.clone();
        let stable_id = module_stable_id.to_string();
        tokio::task::spawn_blocking(move || this.find_latest(&stable_id))
            .await
            .map_err(|e| Error::Collaborator(format!("History lookup task failed: {}", e)))?
    }
}

/// A candidate result with the adjustments recorded alongside it
struct Candidate {
    result: WorkResult,
    adjustments: Option<Vec<ExerciseAdjustment>>,
}

fn find_latest(
    log_path: &Path,
    archive_path: Option<&Path>,
    module_stable_id: &str,
) -> Result<Option<HistoricalLog>> {
    let entries = read_entries(log_path)?;

    let mut records: HashMap<Uuid, SessionRecord> = HashMap::new();
    let mut candidates = Vec::new();
    let mut seen_ids = HashSet::new();

    for entry in entries {
        match entry {
            LogEntry::Session(record) => {
                records.insert(record.run_id, record);
            }
            LogEntry::Block(result) => {
                if result.module_stable_id == module_stable_id && seen_ids.insert(result.id) {
                    candidates.push(Candidate {
                        result,
                        adjustments: None,
                    });
                }
            }
        }
    }
    let log_count = candidates.len();

    if let Some(archive) = archive_path {
        for candidate in archived_results(&read_archive(archive)?, module_stable_id) {
            if seen_ids.insert(candidate.result.id) {
                candidates.push(candidate);
            } else if let Some(existing) = candidates
                .iter_mut()
                .find(|c| c.result.id == candidate.result.id)
            {
                // Keep the log copy but remember the archived adjustments
                existing.adjustments = existing.adjustments.take().or(candidate.adjustments);
            }
        }
        tracing::debug!(
            "History for {}: {} results from log, {} from archive",
            module_stable_id,
            log_count,
            candidates.len() - log_count
        );
    }

    let latest = candidates
        .into_iter()
        .filter(|c| !c.result.skipped)
        .max_by_key(|c| c.result.finalized_at);

    Ok(latest.map(|c| {
        let adjustments = records
            .get(&c.result.run_id)
            .map(|r| r.adjustments_for(module_stable_id))
            .or(c.adjustments)
            .unwrap_or_default();
        HistoricalLog {
            result: c.result,
            adjustments,
        }
    }))
}

/// Rebuild results for one module from archive rows
fn archived_results(rows: &[ArchiveRow], module_stable_id: &str) -> Vec<Candidate> {
    let mut grouped: BTreeMap<String, Vec<&ArchiveRow>> = BTreeMap::new();
    for row in rows.iter().filter(|r| r.module_stable_id == module_stable_id) {
        grouped.entry(row.result_id.clone()).or_default().push(row);
    }

    grouped
        .into_values()
        .filter_map(|mut group| {
            group.sort_by_key(|r| r.exercise_index);
            match candidate_from_rows(&group) {
                Ok(candidate) => Some(candidate),
                Err(e) => {
                    tracing::warn!("Skipping archived result: {}", e);
                    None
                }
            }
        })
        .collect()
}

fn candidate_from_rows(rows: &[&ArchiveRow]) -> Result<Candidate> {
    let first = rows
        .first()
        .ok_or_else(|| Error::Other("Empty archive group".into()))?;

    let id = Uuid::parse_str(&first.result_id)
        .map_err(|e| Error::Other(format!("Invalid result id: {}", e)))?;
    let run_id = Uuid::parse_str(&first.run_id)
        .map_err(|e| Error::Other(format!("Invalid run id: {}", e)))?;
    let finalized_at = DateTime::parse_from_rfc3339(&first.finalized_at)
        .map_err(|e| Error::Other(format!("Invalid date: {}", e)))?
        .with_timezone(&Utc);
    let protocol = Protocol::from_code(&first.protocol)
        .ok_or_else(|| Error::Other(format!("Unknown protocol '{}'", first.protocol)))?;

    // EMOM reps are derived from rounds; rebuild an equivalent round map
    let mut rounds = BTreeMap::new();
    if protocol == Protocol::Emom {
        let successes = first.successful_rounds;
        for n in 1..=successes {
            rounds.insert(n, RoundOutcome::Success);
        }
        for n in 1..=first.failed_rounds {
            rounds.insert(successes + n, RoundOutcome::Fail);
        }
    }

    let exercises = rows
        .iter()
        .map(|r| ExerciseLog {
            exercise_id: r.exercise_id.clone(),
            exercise_stable_id: r.exercise_stable_id.clone(),
            name: r.exercise_name.clone(),
            loadable: r.loadable,
            energy: r.energy,
            reps: r.reps,
            weight_kg: r.weight_kg,
            heart_rate: r.heart_rate,
            note: None,
            sets: Vec::new(),
        })
        .collect();

    let adjustments: Vec<ExerciseAdjustment> = rows
        .iter()
        .filter_map(|r| {
            r.adjustment.map(|adjustment| ExerciseAdjustment {
                exercise_stable_id: r.exercise_stable_id.clone(),
                adjustment,
            })
        })
        .collect();

    Ok(Candidate {
        result: WorkResult {
            id,
            run_id,
            step_index: first.step_index,
            module_id: first.module_id.clone(),
            module_stable_id: first.module_stable_id.clone(),
            block_name: first.block_name.clone(),
            protocol,
            exercises,
            elapsed_seconds: first.elapsed_seconds,
            planned_rounds: first.planned_rounds,
            target_reps_per_round: rows.iter().map(|r| r.target_reps_per_round).collect(),
            rounds,
            feedback: None,
            skipped: first.skipped,
            finalized_at,
        },
        adjustments: Some(adjustments),
    })
}

/// Look up history for every module; failures count as "no history"
pub async fn load_history_index(source: &dyn HistorySource, modules: &[Module]) -> HistoryIndex {
    let mut index = HistoryIndex::new();
    for module in modules {
        match source.latest_for_module(&module.stable_id).await {
            Ok(Some(log)) => {
                index.insert(module.stable_id.clone(), log);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("History lookup for {} failed: {}", module.stable_id, e);
            }
        }
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worklog::JsonlWorkLog;
    use crate::{ExerciseRef, Insight, InsightKind, InsightReason, ModuleConfig, SessionMetrics};
    use chrono::Duration;

    fn result(module: &str, reps: u32, weight: f64, days_ago: i64) -> WorkResult {
        WorkResult {
            id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            step_index: 2,
            module_id: format!("id_{}", module),
            module_stable_id: module.into(),
            block_name: "BUILD".into(),
            protocol: Protocol::TimeCap,
            exercises: vec![ExerciseLog {
                exercise_id: "id_press".into(),
                exercise_stable_id: "press".into(),
                name: "Press".into(),
                loadable: true,
                energy: false,
                reps,
                weight_kg: Some(weight),
                heart_rate: None,
                note: None,
                sets: vec![],
            }],
            elapsed_seconds: 240,
            planned_rounds: None,
            target_reps_per_round: vec![],
            rounds: BTreeMap::new(),
            feedback: None,
            skipped: false,
            finalized_at: Utc::now() - Duration::days(days_ago),
        }
    }

    fn record_for(result: &WorkResult, adjustment: f64) -> SessionRecord {
        SessionRecord {
            run_id: result.run_id,
            session_id: "s".into(),
            schedule_entry_id: None,
            completed_at: result.finalized_at,
            metrics: SessionMetrics::default(),
            insights: vec![Insight {
                kind: InsightKind::Up,
                reason: InsightReason::AboveCeiling,
                module_stable_id: Some(result.module_stable_id.clone()),
                exercise: Some(ExerciseRef {
                    stable_id: "press".into(),
                    name: "Press".into(),
                }),
                athlete_message: String::new(),
                coach_message: String::new(),
                adjustment,
            }],
        }
    }

    #[test]
    fn test_latest_non_skipped_result_with_adjustments() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_path = temp_dir.path().join("worklog.jsonl");
        let log = JsonlWorkLog::new(&log_path);

        let old = result("build_push", 40, 50.0, 7);
        let recent = result("build_push", 52, 55.0, 2);
        let mut skipped = result("build_push", 0, 0.0, 1);
        skipped.skipped = true;

        log.append(&LogEntry::Block(old)).unwrap();
        log.append(&LogEntry::Block(recent.clone())).unwrap();
        log.append(&LogEntry::Session(record_for(&recent, 0.05))).unwrap();
        log.append(&LogEntry::Block(skipped)).unwrap();
        log.append(&LogEntry::Block(result("other", 10, 10.0, 0))).unwrap();

        let history = FileHistory::new(&log_path, None);
        let found = history.find_latest("build_push").unwrap().unwrap();
        assert_eq!(found.result.id, recent.id);
        assert_eq!(found.pending_adjustment("press"), 0.05);
        assert_eq!(found.actual_weight("press"), Some(55.0));
    }

    #[test]
    fn test_archive_is_searched_and_deduplicated() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_path = temp_dir.path().join("worklog.jsonl");
        let csv_path = temp_dir.path().join("worklog.csv");

        let archived = result("build_push", 45, 60.0, 3);
        let log = JsonlWorkLog::new(&log_path);
        log.append(&LogEntry::Block(archived.clone())).unwrap();
        log.append(&LogEntry::Session(record_for(&archived, -0.05))).unwrap();
        crate::csv_rollup::worklog_to_csv_and_archive(&log_path, &csv_path).unwrap();

        // Same result reappears in a fresh log
        log.append(&LogEntry::Block(archived.clone())).unwrap();

        let history = FileHistory::new(&log_path, Some(csv_path));
        let found = history.find_latest("build_push").unwrap().unwrap();
        assert_eq!(found.result.id, archived.id);
        assert_eq!(found.prior_reps("press"), Some(45));
        // Session record was archived; adjustment comes from the CSV row
        assert_eq!(found.pending_adjustment("press"), -0.05);
    }

    #[test]
    fn test_no_history() {
        let temp_dir = tempfile::tempdir().unwrap();
        let history = FileHistory::new(temp_dir.path().join("worklog.jsonl"), None);
        assert!(history.find_latest("anything").unwrap().is_none());
    }

    struct FailingSource;

    #[async_trait]
    impl HistorySource for FailingSource {
        async fn latest_for_module(&self, _: &str) -> Result<Option<HistoricalLog>> {
            Err(Error::Collaborator("offline".into()))
        }
    }

    #[tokio::test]
    async fn test_index_treats_failures_as_no_history() {
        let module = Module {
            id: "m".into(),
            stable_id: "build_push".into(),
            name: "BUILD".into(),
            protocol: Protocol::TimeCap,
            exercises: vec![],
            config: ModuleConfig::default(),
        };
        let index = load_history_index(&FailingSource, &[module]).await;
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_async_lookup() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_path = temp_dir.path().join("worklog.jsonl");
        let r = result("build_push", 30, 40.0, 1);
        JsonlWorkLog::new(&log_path).append(&LogEntry::Block(r.clone())).unwrap();

        let history = FileHistory::new(&log_path, None);
        let found = history.latest_for_module("build_push").await.unwrap();
        assert_eq!(found.map(|h| h.result.id), Some(r.id));
    }
}
