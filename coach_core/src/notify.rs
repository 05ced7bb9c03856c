//! Coach notifications.
//!
//! After a session the coach-facing insight messages are dispatched to the
//! coach. Delivery is best-effort; the runner never fails a session over it.

use crate::{Result, SessionAnalysis};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Payload sent to the coach
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CoachNotification {
    pub run_id: Uuid,
    pub session_id: String,
    pub sent_at: DateTime<Utc>,
    /// One coach message per insight, in insight order
    pub lines: Vec<String>,
}

impl CoachNotification {
    pub fn from_analysis(run_id: Uuid, session_id: &str, analysis: &SessionAnalysis) -> Self {
        Self {
            run_id,
            session_id: session_id.to_string(),
            sent_at: Utc::now(),
            lines: analysis
                .insights
                .iter()
                .map(|i| i.coach_message.clone())
                .collect(),
        }
    }
}

/// Notification-dispatch capability
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn dispatch(&self, notification: &CoachNotification) -> Result<()>;
}

/// Appends notifications to a JSONL outbox for a delivery process to pick up
#[derive(Clone, Debug)]
pub struct OutboxNotifier {
    path: PathBuf,
}

impl OutboxNotifier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

fn append_notification(path: &Path, notification: &CoachNotification) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    file.lock_exclusive()?;
    let mut line = serde_json::to_string(notification)?;
    line.push('\n');
    (&file).write_all(line.as_bytes())?;
    file.unlock()?;
    Ok(())
}

#[async_trait]
impl Notifier for OutboxNotifier {
    async fn dispatch(&self, notification: &CoachNotification) -> Result<()> {
        let path = self.path.clone();
        let payload = notification.clone();
        tokio::task::spawn_blocking(move || append_notification(&path, &payload))
            .await
            .map_err(|e| crate::Error::Collaborator(format!("Outbox task failed: {}", e)))??;
        tracing::info!(
            "Queued coach notification for run {} ({} lines)",
            notification.run_id,
            notification.lines.len()
        );
        Ok(())
    }
}

/// Writes coach messages to the log only
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn dispatch(&self, notification: &CoachNotification) -> Result<()> {
        for line in &notification.lines {
            tracing::info!(run_id = %notification.run_id, "coach: {}", line);
        }
        Ok(())
    }
}
