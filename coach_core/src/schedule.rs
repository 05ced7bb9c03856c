//! Daily schedule persistence with file locking.
//!
//! The schedule holds the dated session occurrences (with optional
//! overrides) the athlete is expected to run. Completing a session marks its
//! entry completed with a short summary.

use crate::{Error, Result, ScheduleEntry, TaskStatus};
use async_trait::async_trait;
use chrono::NaiveDate;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use uuid::Uuid;

/// All scheduled session occurrences
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct DailySchedule {
    #[serde(default)]
    pub entries: Vec<ScheduleEntry>,
}

impl DailySchedule {
    /// Load the schedule with a shared lock
    ///
    /// A missing, unreadable or corrupt file yields an empty schedule.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No schedule file found, using empty schedule");
            return Ok(Self::default());
        }

        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("Unable to open schedule {:?}: {}. Using empty schedule.", path, e);
                return Ok(Self::default());
            }
        };

        if let Err(e) = file.lock_shared() {
            tracing::warn!("Unable to lock schedule {:?}: {}. Using empty schedule.", path, e);
            return Ok(Self::default());
        }

        let mut contents = String::new();
        let mut reader = std::io::BufReader::new(&file);
        if let Err(e) = reader.read_to_string(&mut contents) {
            let _ = file.unlock();
            tracing::warn!("Failed to read schedule {:?}: {}. Using empty schedule.", path, e);
            return Ok(Self::default());
        }

        file.unlock()?;

        match serde_json::from_str::<DailySchedule>(&contents) {
            Ok(schedule) => {
                tracing::debug!("Loaded {} schedule entries from {:?}", schedule.entries.len(), path);
                Ok(schedule)
            }
            Err(e) => {
                tracing::warn!("Failed to parse schedule {:?}: {}. Using empty schedule.", path, e);
                Ok(Self::default())
            }
        }
    }

    /// Atomically write the schedule (temp file, fsync, rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::State(format!("Schedule path {:?} has no parent", path)))?;
        std::fs::create_dir_all(parent)?;

        let temp = NamedTempFile::new_in(parent)?;
        temp.as_file().lock_exclusive()?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            let contents = serde_json::to_string_pretty(self)?;
            writer.write_all(contents.as_bytes())?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;
        temp.persist(path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Saved schedule to {:?}", path);
        Ok(())
    }

    /// Load, modify and save back
    pub fn update<F>(path: &Path, f: F) -> Result<Self>
    where
        F: FnOnce(&mut DailySchedule) -> Result<()>,
    {
        let mut schedule = Self::load(path)?;
        f(&mut schedule)?;
        schedule.save(path)?;
        Ok(schedule)
    }

    /// First pending entry for a date
    pub fn find_pending(&self, date: NaiveDate) -> Option<&ScheduleEntry> {
        self.entries
            .iter()
            .find(|e| e.date == date && e.status == TaskStatus::Pending)
    }

    pub fn entry(&self, id: Uuid) -> Option<&ScheduleEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Mark an entry completed with a human-readable summary
    pub fn mark_completed(&mut self, id: Uuid, summary: &str) -> Result<()> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| Error::State(format!("Schedule entry {} not found", id)))?;
        entry.status = TaskStatus::Completed;
        entry.summary = Some(summary.to_string());
        Ok(())
    }
}

/// Schedule-update capability
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn mark_completed(&self, entry_id: Uuid, summary: &str) -> Result<()>;
}

/// Schedule stored as a JSON file
#[derive(Clone, Debug)]
pub struct FileScheduleStore {
    path: PathBuf,
}

impl FileScheduleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ScheduleStore for FileScheduleStore {
    async fn mark_completed(&self, entry_id: Uuid, summary: &str) -> Result<()> {
        let path = self.path.clone();
        let summary = summary.to_string();
        tokio::task::spawn_blocking(move || {
            DailySchedule::update(&path, |schedule| schedule.mark_completed(entry_id, &summary))
                .map(|_| ())
        })
        .await
        .map_err(|e| Error::Collaborator(format!("Schedule update task failed: {}", e)))??;

        tracing::info!("Marked schedule entry {} completed", entry_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SessionOverride;

    fn entry(date: NaiveDate, session_id: &str) -> ScheduleEntry {
        ScheduleEntry {
            id: Uuid::new_v4(),
            date,
            session_id: session_id.into(),
            status: TaskStatus::Pending,
            summary: None,
            session_override: None,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("schedule.json");

        let mut e = entry(day(2), "strength_mixed");
        e.session_override = Some(SessionOverride {
            duration_minutes: Some(20),
            ..Default::default()
        });
        let schedule = DailySchedule { entries: vec![e] };
        schedule.save(&path).unwrap();

        let loaded = DailySchedule::load(&path).unwrap();
        assert_eq!(loaded, schedule);
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"override\""));
    }

    #[test]
    fn test_corrupt_schedule_is_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("schedule.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(DailySchedule::load(&path).unwrap().entries.is_empty());
    }

    #[test]
    fn test_find_pending_skips_completed() {
        let mut done = entry(day(3), "a");
        done.status = TaskStatus::Completed;
        let pending = entry(day(3), "b");
        let schedule = DailySchedule {
            entries: vec![done, pending.clone(), entry(day(4), "c")],
        };
        assert_eq!(schedule.find_pending(day(3)), Some(&pending));
        assert_eq!(schedule.find_pending(day(5)), None);
    }

    #[test]
    fn test_mark_completed_unknown_entry() {
        let mut schedule = DailySchedule::default();
        assert!(matches!(
            schedule.mark_completed(Uuid::new_v4(), "x"),
            Err(Error::State(_))
        ));
    }

    #[tokio::test]
    async fn test_file_store_marks_completed() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("schedule.json");
        let e = entry(day(2), "a");
        DailySchedule { entries: vec![e.clone()] }.save(&path).unwrap();

        let store = FileScheduleStore::new(&path);
        store.mark_completed(e.id, "3 blocks, 100% efficiency").await.unwrap();

        let loaded = DailySchedule::load(&path).unwrap();
        let updated = loaded.entry(e.id).unwrap();
        assert_eq!(updated.status, TaskStatus::Completed);
        assert_eq!(updated.summary.as_deref(), Some("3 blocks, 100% efficiency"));

        // No stray temp files
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }
}
