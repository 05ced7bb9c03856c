#![forbid(unsafe_code)]

//! Core domain model and session engine for block-based strength sessions.
//!
//! This crate provides:
//! - Domain types (sessions, modules, exercises, results, insights)
//! - Timeline construction and per-protocol block timers
//! - Result recording, weight seeding and the analysis engine
//! - Persistence (JSONL work log, CSV archive, daily schedule)
//! - The session runner that ties it all together

pub mod types;
pub mod error;
pub mod catalog;
pub mod config;
pub mod logging;
pub mod timeline;
pub mod timer;
pub mod driver;
pub mod recorder;
pub mod progression;
pub mod analysis;
pub mod resources;
pub mod worklog;
pub mod csv_rollup;
pub mod history;
pub mod schedule;
pub mod notify;
pub mod cardio;
pub mod runner;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use catalog::{build_default_catalog, get_default_catalog};
pub use config::Config;
pub use timeline::build_timeline;
pub use timer::{BlockTimer, Cue, ProtocolTimer, TimerSnapshot, TimerStatus};
pub use driver::CueEvent;
pub use recorder::{DraftResult, FeedbackCapture};
pub use progression::{apply_adjustment, WeightSeed};
pub use analysis::{analyze, RuleSet};
pub use worklog::{JsonlWorkLog, LogEntry, SessionRecord, WorkLogSink};
pub use history::{FileHistory, HistorySource};
pub use schedule::{DailySchedule, FileScheduleStore, ScheduleStore};
pub use notify::{CoachNotification, LogNotifier, Notifier, OutboxNotifier};
pub use cardio::{archive_cardio_record, load_cardio_record};
pub use runner::{Collaborators, RunRequest, RunnerOptions, SessionOutcome, SessionRunner, StepCompletion};
