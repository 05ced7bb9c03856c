//! Core domain types for the BlockCoach session engine.
//!
//! This module defines the fundamental types used throughout the system:
//! - Sessions, modules (blocks) and exercises
//! - Per-occurrence overrides and schedule entries
//! - Timeline steps
//! - Work results, feedback and historical logs
//! - Insights and session metrics

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Time cap used when a T block has no (or a zero) cap configured.
pub const DEFAULT_TIME_CAP_SECONDS: u32 = 240;

/// Round count used when an EMOM block has no (or a zero) minute count.
pub const DEFAULT_EMOM_MINUTES: u32 = 4;

/// Length of one EMOM round.
pub const EMOM_ROUND_SECONDS: u32 = 60;

// ============================================================================
// Protocol and Block Types
// ============================================================================

/// Timing discipline of a block
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Time-capped: count down from the cap, reps logged during the countdown
    #[serde(rename = "T")]
    TimeCap,
    /// Rep-based for time: count up until every target is reached
    #[serde(rename = "R")]
    ForTime,
    /// Every minute on the minute
    #[serde(rename = "E")]
    Emom,
    /// Free-form sets, no clock
    #[serde(rename = "LIBRE")]
    Libre,
}

impl Protocol {
    pub fn code(&self) -> &'static str {
        match self {
            Protocol::TimeCap => "T",
            Protocol::ForTime => "R",
            Protocol::Emom => "E",
            Protocol::Libre => "LIBRE",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_uppercase().as_str() {
            "T" => Some(Protocol::TimeCap),
            "R" => Some(Protocol::ForTime),
            "E" => Some(Protocol::Emom),
            "LIBRE" => Some(Protocol::Libre),
            _ => None,
        }
    }
}

/// Training intent of a block, derived from its name
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockType {
    Base,
    Build,
    Burn,
    Boost,
}

impl BlockType {
    /// Classify a block name ("BUILD - Upper push", "Burn finisher", ...).
    ///
    /// Names without a recognizable keyword classify as `Base`.
    pub fn classify(name: &str) -> Self {
        let upper = name.to_uppercase();
        if upper.contains("BOOST") {
            BlockType::Boost
        } else if upper.contains("BURN") {
            BlockType::Burn
        } else if upper.contains("BUILD") {
            BlockType::Build
        } else {
            BlockType::Base
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BlockType::Base => "BASE",
            BlockType::Build => "BUILD",
            BlockType::Burn => "BURN",
            BlockType::Boost => "BOOST",
        }
    }
}

// ============================================================================
// Session Definition Types
// ============================================================================

/// What an exercise asks of the athlete
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ExerciseTarget {
    /// A numeric rep target (per round for EMOM blocks)
    Reps(u32),
    /// A qualitative manifestation ("smooth tempo", "nasal breathing")
    Manifestation(String),
}

impl ExerciseTarget {
    pub fn reps(&self) -> Option<u32> {
        match self {
            ExerciseTarget::Reps(n) if *n > 0 => Some(*n),
            _ => None,
        }
    }
}

/// An exercise inside a module
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Exercise {
    pub id: String,
    /// Identity that survives program edits; history is joined on it
    pub stable_id: String,
    pub name: String,
    #[serde(default)]
    pub loadable: bool,
    pub target: ExerciseTarget,
    /// Conditioning work; heart rate drives its qualitative feedback
    #[serde(default)]
    pub energy: bool,
    #[serde(default)]
    pub volume_km: Option<f64>,
    #[serde(default)]
    pub instruction: Option<String>,
}

/// Protocol-specific block configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct ModuleConfig {
    #[serde(default)]
    pub time_cap_seconds: Option<u32>,
    #[serde(default)]
    pub emom_minutes: Option<u32>,
    #[serde(default)]
    pub instruction: Option<String>,
}

/// A block of exercises sharing one timing protocol
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Module {
    pub id: String,
    pub stable_id: String,
    pub name: String,
    pub protocol: Protocol,
    pub exercises: Vec<Exercise>,
    #[serde(default)]
    pub config: ModuleConfig,
}

impl Module {
    pub fn block_type(&self) -> BlockType {
        BlockType::classify(&self.name)
    }

    /// Configured time cap, falling back to the default for missing or zero caps
    pub fn time_cap_seconds(&self) -> u32 {
        match self.config.time_cap_seconds {
            Some(cap) if cap > 0 => cap,
            _ => DEFAULT_TIME_CAP_SECONDS,
        }
    }

    /// Planned EMOM rounds, falling back to the default for missing or zero counts
    pub fn emom_rounds(&self) -> u32 {
        match self.config.emom_minutes {
            Some(minutes) if minutes > 0 => minutes,
            _ => DEFAULT_EMOM_MINUTES,
        }
    }

    /// Numeric rep targets in exercise order
    pub fn rep_targets(&self) -> Vec<Option<u32>> {
        self.exercises.iter().map(|e| e.target.reps()).collect()
    }
}

/// A warmup block shown before the work blocks
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WarmupBlock {
    pub title: String,
    #[serde(default)]
    pub instructions: Vec<String>,
    #[serde(default)]
    pub duration_seconds: Option<u32>,
}

/// A complete session definition
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub pure_cardio: bool,
    #[serde(default)]
    pub warmup: Vec<WarmupBlock>,
    pub modules: Vec<Module>,
}

/// Per-occurrence patch merged into a module at timeline build time
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct SessionOverride {
    /// Module to patch; the first module when absent
    #[serde(default)]
    pub module_stable_id: Option<String>,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub distance_km: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Status of a daily schedule entry
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Completed,
}

/// One scheduled session occurrence
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScheduleEntry {
    pub id: Uuid,
    pub date: NaiveDate,
    pub session_id: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default, rename = "override")]
    pub session_override: Option<SessionOverride>,
}

/// Built-in session definitions keyed by session id
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Catalog {
    pub sessions: HashMap<String, Session>,
}

impl Catalog {
    pub fn session(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// Sessions ordered by id
    pub fn sorted_sessions(&self) -> Vec<&Session> {
        let mut sessions: Vec<&Session> = self.sessions.values().collect();
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        sessions
    }
}

// ============================================================================
// Timeline Types
// ============================================================================

/// One step of the ordered session timeline
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimelineStep {
    /// Pre-session weight planning across every module
    Planning { modules: Vec<Module> },
    Warmup(WarmupBlock),
    /// One block of work; `module_index` is its program position
    Work { module_index: usize, module: Module },
    Summary,
}

impl TimelineStep {
    pub fn kind(&self) -> StepKind {
        match self {
            TimelineStep::Planning { .. } => StepKind::Planning,
            TimelineStep::Warmup(_) => StepKind::Warmup,
            TimelineStep::Work { .. } => StepKind::Work,
            TimelineStep::Summary => StepKind::Summary,
        }
    }

    pub fn work_module(&self) -> Option<&Module> {
        match self {
            TimelineStep::Work { module, .. } => Some(module),
            _ => None,
        }
    }
}

/// Step tag without payload
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepKind {
    Planning,
    Warmup,
    Work,
    Summary,
}

// ============================================================================
// Result Types
// ============================================================================

/// Athlete-marked outcome of one EMOM round
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoundOutcome {
    #[default]
    Unset,
    Success,
    Fail,
}

impl RoundOutcome {
    /// Tri-state cycle: unset -> success -> fail -> unset
    pub fn toggle(self) -> Self {
        match self {
            RoundOutcome::Unset => RoundOutcome::Success,
            RoundOutcome::Success => RoundOutcome::Fail,
            RoundOutcome::Fail => RoundOutcome::Unset,
        }
    }
}

/// One free-form set
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SetLog {
    pub reps: u32,
    #[serde(default)]
    pub weight_kg: Option<f64>,
}

/// Logged performance for one exercise of a block
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExerciseLog {
    pub exercise_id: String,
    pub exercise_stable_id: String,
    pub name: String,
    pub loadable: bool,
    #[serde(default)]
    pub energy: bool,
    #[serde(default)]
    pub reps: u32,
    #[serde(default)]
    pub weight_kg: Option<f64>,
    #[serde(default)]
    pub heart_rate: Option<u16>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub sets: Vec<SetLog>,
}

/// Block-level feedback captured before a result is finalized
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BlockFeedback {
    /// Rate of perceived exertion, 0..=10
    pub rpe: u8,
    #[serde(default)]
    pub comment: String,
}

/// Finalized, immutable result of one WORK step
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkResult {
    pub id: Uuid,
    pub run_id: Uuid,
    pub step_index: usize,
    pub module_id: String,
    pub module_stable_id: String,
    pub block_name: String,
    pub protocol: Protocol,
    pub exercises: Vec<ExerciseLog>,
    #[serde(default)]
    pub elapsed_seconds: u32,
    #[serde(default)]
    pub planned_rounds: Option<u32>,
    /// Rep targets per round, by exercise index (EMOM only)
    #[serde(default)]
    pub target_reps_per_round: Vec<Option<u32>>,
    #[serde(default)]
    pub rounds: BTreeMap<u32, RoundOutcome>,
    #[serde(default)]
    pub feedback: Option<BlockFeedback>,
    #[serde(default)]
    pub skipped: bool,
    pub finalized_at: DateTime<Utc>,
}

impl WorkResult {
    pub fn successful_rounds(&self) -> u32 {
        self.rounds
            .values()
            .filter(|o| **o == RoundOutcome::Success)
            .count() as u32
    }

    pub fn failed_rounds(&self) -> u32 {
        self.rounds
            .values()
            .filter(|o| **o == RoundOutcome::Fail)
            .count() as u32
    }

    /// Reps credited to an exercise.
    ///
    /// EMOM reps are never ticked by hand; they derive from successful rounds.
    /// Free-form reps are the sum of the logged sets.
    pub fn credited_reps(&self, exercise_index: usize) -> u32 {
        let Some(log) = self.exercises.get(exercise_index) else {
            return 0;
        };
        match self.protocol {
            Protocol::Emom => {
                let per_round = self
                    .target_reps_per_round
                    .get(exercise_index)
                    .copied()
                    .flatten()
                    .unwrap_or(0);
                self.successful_rounds() * per_round
            }
            Protocol::Libre if !log.sets.is_empty() => log.sets.iter().map(|s| s.reps).sum(),
            _ => log.reps,
        }
    }

    /// Reps x weight for one exercise (loadable only)
    pub fn exercise_volume(&self, exercise_index: usize) -> f64 {
        let Some(log) = self.exercises.get(exercise_index) else {
            return 0.0;
        };
        if !log.loadable || self.skipped {
            return 0.0;
        }
        if self.protocol == Protocol::Libre && !log.sets.is_empty() {
            return log
                .sets
                .iter()
                .map(|s| s.reps as f64 * s.weight_kg.or(log.weight_kg).unwrap_or(0.0))
                .sum();
        }
        self.credited_reps(exercise_index) as f64 * log.weight_kg.unwrap_or(0.0)
    }
}

/// A load adjustment generated for one exercise in an earlier session
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExerciseAdjustment {
    pub exercise_stable_id: String,
    pub adjustment: f64,
}

/// A prior session's result for a module, plus the adjustments it produced
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HistoricalLog {
    pub result: WorkResult,
    #[serde(default)]
    pub adjustments: Vec<ExerciseAdjustment>,
}

impl HistoricalLog {
    fn exercise(&self, exercise_stable_id: &str) -> Option<(usize, &ExerciseLog)> {
        self.result
            .exercises
            .iter()
            .enumerate()
            .find(|(_, e)| e.exercise_stable_id == exercise_stable_id)
    }

    /// Reps logged last time for this exercise
    pub fn prior_reps(&self, exercise_stable_id: &str) -> Option<u32> {
        self.exercise(exercise_stable_id)
            .map(|(idx, _)| self.result.credited_reps(idx))
    }

    /// Weight actually used last time for this exercise
    pub fn actual_weight(&self, exercise_stable_id: &str) -> Option<f64> {
        self.exercise(exercise_stable_id).and_then(|(_, e)| {
            e.weight_kg
                .or_else(|| e.sets.iter().rev().find_map(|s| s.weight_kg))
        })
    }

    /// Adjustment recommended last time and not yet applied
    pub fn pending_adjustment(&self, exercise_stable_id: &str) -> f64 {
        self.adjustments
            .iter()
            .find(|a| a.exercise_stable_id == exercise_stable_id)
            .map(|a| a.adjustment)
            .unwrap_or(0.0)
    }
}

/// Latest history per module stable id
pub type HistoryIndex = HashMap<String, HistoricalLog>;

/// Whole-session cardio record (pure-cardio sessions)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct CardioRecord {
    #[serde(default)]
    pub avg_hr: Option<u16>,
    #[serde(default)]
    pub max_hr: Option<u16>,
    /// Human-readable pace, e.g. "5:40 /km"
    #[serde(default)]
    pub pace: Option<String>,
    #[serde(default)]
    pub distance_km: Option<f64>,
    #[serde(default)]
    pub duration_seconds: Option<u32>,
}

// ============================================================================
// Insight and Metric Types
// ============================================================================

/// Direction of an insight
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    Up,
    Down,
    Keep,
    Skipped,
}

/// Which rule produced an insight
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InsightReason {
    AboveCeiling,
    BelowFloor,
    WithinBand,
    Stagnation,
    FastFinish,
    OverCap,
    WithinCap,
    RoundFailed,
    AllRoundsCompleted,
    PartialRounds,
    HeartRateCaution,
    SkippedBlock,
    CardioZone,
    CardioPace,
}

impl InsightReason {
    /// Reasons that come from the load classification rules and count
    /// toward session efficiency
    pub fn is_adjustment_rule(&self) -> bool {
        matches!(
            self,
            InsightReason::AboveCeiling
                | InsightReason::BelowFloor
                | InsightReason::WithinBand
                | InsightReason::Stagnation
                | InsightReason::FastFinish
                | InsightReason::OverCap
                | InsightReason::WithinCap
                | InsightReason::RoundFailed
                | InsightReason::AllRoundsCompleted
                | InsightReason::PartialRounds
        )
    }
}

/// Exercise an insight refers to
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExerciseRef {
    pub stable_id: String,
    pub name: String,
}

/// A coaching observation with separate athlete and coach channels
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Insight {
    pub kind: InsightKind,
    pub reason: InsightReason,
    #[serde(default)]
    pub module_stable_id: Option<String>,
    #[serde(default)]
    pub exercise: Option<ExerciseRef>,
    pub athlete_message: String,
    pub coach_message: String,
    /// Signed fraction of the current load
    pub adjustment: f64,
}

/// Aggregate numbers for a finished session
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct SessionMetrics {
    pub total_volume: f64,
    pub completed_exercise_count: u32,
    pub efficiency_percent: f64,
    #[serde(default)]
    pub avg_hr: Option<u16>,
    #[serde(default)]
    pub max_hr: Option<u16>,
    #[serde(default)]
    pub cardio_pace: Option<String>,
}

/// Output of the analysis engine
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct SessionAnalysis {
    pub insights: Vec<Insight>,
    pub metrics: SessionMetrics,
}

impl SessionAnalysis {
    /// Per-exercise adjustments for one module, as stored with history
    pub fn adjustments_for(&self, module_stable_id: &str) -> Vec<ExerciseAdjustment> {
        adjustments_from(&self.insights, module_stable_id)
    }
}

/// Load adjustments the classification rules produced for one module
pub fn adjustments_from(insights: &[Insight], module_stable_id: &str) -> Vec<ExerciseAdjustment> {
    insights
        .iter()
        .filter(|i| i.module_stable_id.as_deref() == Some(module_stable_id))
        .filter(|i| i.reason.is_adjustment_rule())
        .filter_map(|i| {
            i.exercise.as_ref().map(|e| ExerciseAdjustment {
                exercise_stable_id: e.stable_id.clone(),
                adjustment: i.adjustment,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_type_classification() {
        assert_eq!(BlockType::classify("BUILD - upper push"), BlockType::Build);
        assert_eq!(BlockType::classify("Burn finisher"), BlockType::Burn);
        assert_eq!(BlockType::classify("boost: sprints"), BlockType::Boost);
        assert_eq!(BlockType::classify("Base strength"), BlockType::Base);
        assert_eq!(BlockType::classify("Mystery block"), BlockType::Base);
    }

    #[test]
    fn test_round_outcome_cycles() {
        let o = RoundOutcome::Unset;
        assert_eq!(o.toggle(), RoundOutcome::Success);
        assert_eq!(o.toggle().toggle(), RoundOutcome::Fail);
        assert_eq!(o.toggle().toggle().toggle(), RoundOutcome::Unset);
    }

    #[test]
    fn test_protocol_serializes_as_code() {
        let json = serde_json::to_string(&Protocol::Libre).unwrap();
        assert_eq!(json, "\"LIBRE\"");
        let parsed: Protocol = serde_json::from_str("\"E\"").unwrap();
        assert_eq!(parsed, Protocol::Emom);
        assert_eq!(Protocol::from_code("libre"), Some(Protocol::Libre));
        assert_eq!(Protocol::from_code("X"), None);
    }

    #[test]
    fn test_module_defaults_for_missing_config() {
        let module = Module {
            id: "m1".into(),
            stable_id: "m1".into(),
            name: "BASE".into(),
            protocol: Protocol::TimeCap,
            exercises: vec![],
            config: ModuleConfig {
                time_cap_seconds: Some(0),
                emom_minutes: None,
                instruction: None,
            },
        };
        assert_eq!(module.time_cap_seconds(), DEFAULT_TIME_CAP_SECONDS);
        assert_eq!(module.emom_rounds(), DEFAULT_EMOM_MINUTES);
    }
}
