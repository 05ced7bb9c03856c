//! Append-only work log.
//!
//! Finalized block results and end-of-session records are appended to a JSONL
//! (JSON Lines) file under an exclusive lock so concurrent writers never
//! interleave lines.

use crate::{ExerciseAdjustment, Insight, Result, SessionMetrics, WorkResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// End-of-session feedback record
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    pub run_id: Uuid,
    pub session_id: String,
    #[serde(default)]
    pub schedule_entry_id: Option<Uuid>,
    pub completed_at: DateTime<Utc>,
    pub metrics: SessionMetrics,
    pub insights: Vec<Insight>,
}

impl SessionRecord {
    pub fn adjustments_for(&self, module_stable_id: &str) -> Vec<ExerciseAdjustment> {
        crate::types::adjustments_from(&self.insights, module_stable_id)
    }
}

/// One line of the work log
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LogEntry {
    Block(WorkResult),
    Session(SessionRecord),
}

/// Append-only log-write capability
#[async_trait]
pub trait WorkLogSink: Send + Sync {
    async fn append_result(&self, result: &WorkResult) -> Result<()>;
    async fn append_session(&self, record: &SessionRecord) -> Result<()>;
}

/// JSONL work log with file locking
#[derive(Clone, Debug)]
pub struct JsonlWorkLog {
    path: PathBuf,
}

impl JsonlWorkLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry (blocking)
    pub fn append(&self, entry: &LogEntry) -> Result<()> {
        append_entry(&self.path, entry)
    }

    async fn append_owned(&self, entry: LogEntry) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || append_entry(&path, &entry))
            .await
            .map_err(|e| crate::Error::Other(format!("Work log writer task failed: {}", e)))?
    }
}

#[async_trait]
impl WorkLogSink for JsonlWorkLog {
    async fn append_result(&self, result: &WorkResult) -> Result<()> {
        self.append_owned(LogEntry::Block(result.clone())).await
    }

    async fn append_session(&self, record: &SessionRecord) -> Result<()> {
        self.append_owned(LogEntry::Session(record.clone())).await
    }
}

fn append_entry(path: &Path, entry: &LogEntry) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    file.lock_exclusive()?;

    let mut writer = std::io::BufWriter::new(&file);
    let line = serde_json::to_string(entry)?;
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    drop(writer);

    file.unlock()?;

    match entry {
        LogEntry::Block(r) => tracing::debug!("Appended result {} to work log", r.id),
        LogEntry::Session(s) => tracing::debug!("Appended session record {} to work log", s.run_id),
    }
    Ok(())
}

/// Read every entry from a work log; corrupt lines are skipped
pub fn read_entries(path: &Path) -> Result<Vec<LogEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut entries = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<LogEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                tracing::warn!("Failed to parse work log line {}: {}", line_num + 1, e);
            }
        }
    }

    file.unlock()?;
    tracing::debug!("Read {} entries from work log {:?}", entries.len(), path);
    Ok(entries)
}

/// Block results only, in log order
pub fn read_results(path: &Path) -> Result<Vec<WorkResult>> {
    Ok(read_entries(path)?
        .into_iter()
        .filter_map(|e| match e {
            LogEntry::Block(r) => Some(r),
            LogEntry::Session(_) => None,
        })
        .collect())
}
