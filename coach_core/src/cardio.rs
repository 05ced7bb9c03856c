//! Whole-session cardio record import.
//!
//! Pure-cardio sessions are tracked on an external device; its summary
//! (heart rate, pace, distance) is dropped into a JSON file and picked up
//! here for the analysis engine.

use crate::{CardioRecord, Result};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Load a cardio record from a JSON file
///
/// Returns `None` when the file is missing. Unreadable or malformed files are
/// logged and treated as missing.
pub fn load_cardio_record(path: &Path) -> Result<Option<CardioRecord>> {
    if !path.exists() {
        tracing::debug!("No cardio record found at {:?}", path);
        return Ok(None);
    }

    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            tracing::warn!("Failed to read cardio record at {:?}: {}. Ignoring it.", path, e);
            return Ok(None);
        }
    };

    let record: CardioRecord = match serde_json::from_str(&contents) {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!("Failed to parse cardio record at {:?}: {}. Ignoring it.", path, e);
            return Ok(None);
        }
    };

    tracing::info!(
        "Loaded cardio record: avg HR {:?}, pace {:?}",
        record.avg_hr,
        record.pace
    );
    Ok(Some(record))
}

/// Move a consumed cardio record out of the way so later sessions do not
/// pick it up again. Returns the new path.
pub fn archive_cardio_record(path: &Path, run_id: Uuid) -> Result<PathBuf> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "cardio".into());
    let archived = path.with_file_name(format!("{}-{}.json.used", stem, run_id));
    std::fs::rename(path, &archived)?;
    tracing::info!("Archived cardio record to {:?}", archived);
    Ok(archived)
}
