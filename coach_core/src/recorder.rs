//! Performance recorder.
//!
//! A [`DraftResult`] accumulates everything the athlete logs during one WORK
//! step. It stays mutable until block feedback is confirmed or skipped, at
//! which point [`DraftResult::finalize`] consumes it and produces the frozen
//! [`WorkResult`] the analysis engine is allowed to see.

use crate::{
    BlockFeedback, Error, ExerciseLog, Module, Protocol, Result, RoundOutcome, SetLog, WorkResult,
};
use chrono::Utc;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Highest accepted rate of perceived exertion
pub const MAX_RPE: u8 = 10;

/// Outcome of the block-level feedback capture
#[derive(Clone, Debug, PartialEq)]
pub enum FeedbackCapture {
    Confirmed(BlockFeedback),
    Skipped,
}

/// Mutable, not yet finalized result of a WORK step
#[derive(Clone, Debug, PartialEq)]
pub struct DraftResult {
    run_id: Uuid,
    step_index: usize,
    module_id: String,
    module_stable_id: String,
    block_name: String,
    protocol: Protocol,
    exercises: Vec<ExerciseLog>,
    weight_touched: Vec<bool>,
    elapsed_seconds: u32,
    planned_rounds: Option<u32>,
    target_reps_per_round: Vec<Option<u32>>,
    rounds: BTreeMap<u32, RoundOutcome>,
    skipped: bool,
}

impl DraftResult {
    /// Empty draft for a WORK step
    pub fn new(run_id: Uuid, step_index: usize, module: &Module) -> Self {
        let exercises: Vec<ExerciseLog> = module
            .exercises
            .iter()
            .map(|e| ExerciseLog {
                exercise_id: e.id.clone(),
                exercise_stable_id: e.stable_id.clone(),
                name: e.name.clone(),
                loadable: e.loadable,
                energy: e.energy,
                reps: 0,
                weight_kg: None,
                heart_rate: None,
                note: None,
                sets: Vec::new(),
            })
            .collect();

        let (planned_rounds, target_reps_per_round) = if module.protocol == Protocol::Emom {
            (Some(module.emom_rounds()), module.rep_targets())
        } else {
            (None, Vec::new())
        };

        Self {
            run_id,
            step_index,
            module_id: module.id.clone(),
            module_stable_id: module.stable_id.clone(),
            block_name: module.name.clone(),
            protocol: module.protocol,
            weight_touched: vec![false; exercises.len()],
            exercises,
            elapsed_seconds: 0,
            planned_rounds,
            target_reps_per_round,
            rounds: BTreeMap::new(),
            skipped: false,
        }
    }

    pub fn step_index(&self) -> usize {
        self.step_index
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn module_stable_id(&self) -> &str {
        &self.module_stable_id
    }

    pub fn exercises(&self) -> &[ExerciseLog] {
        &self.exercises
    }

    pub fn elapsed_seconds(&self) -> u32 {
        self.elapsed_seconds
    }

    pub fn rounds(&self) -> &BTreeMap<u32, RoundOutcome> {
        &self.rounds
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped
    }

    fn exercise_mut(&mut self, index: usize) -> Result<&mut ExerciseLog> {
        let count = self.exercises.len();
        self.exercises.get_mut(index).ok_or_else(|| {
            Error::Validation(format!(
                "Exercise index {} out of range (block has {})",
                index, count
            ))
        })
    }

    fn ensure_not_emom(&self, what: &str) -> Result<()> {
        if self.protocol == Protocol::Emom {
            return Err(Error::Validation(format!(
                "EMOM blocks do not take {}; mark round outcomes instead",
                what
            )));
        }
        Ok(())
    }

    /// Logged reps in exercise order
    pub fn reps(&self) -> Vec<u32> {
        self.exercises.iter().map(|e| e.reps).collect()
    }

    pub fn set_reps(&mut self, index: usize, reps: u32) -> Result<()> {
        self.ensure_not_emom("manual reps")?;
        self.exercise_mut(index)?.reps = reps;
        Ok(())
    }

    /// Increment (or decrement) reps; never goes below zero
    pub fn add_reps(&mut self, index: usize, delta: i32) -> Result<u32> {
        self.ensure_not_emom("manual reps")?;
        let log = self.exercise_mut(index)?;
        log.reps = (log.reps as i64 + delta as i64).max(0) as u32;
        Ok(log.reps)
    }

    /// Athlete-entered weight; editable at any time before finalization
    pub fn set_weight(&mut self, index: usize, weight_kg: Option<f64>) -> Result<()> {
        let weight_kg = weight_kg.filter(|w| w.is_finite() && *w >= 0.0);
        self.exercise_mut(index)?.weight_kg = weight_kg;
        if let Some(touched) = self.weight_touched.get_mut(index) {
            *touched = true;
        }
        Ok(())
    }

    /// Seeded weight; ignored once the athlete has edited the field
    pub fn seed_weight(&mut self, index: usize, weight_kg: Option<f64>) -> bool {
        if self.weight_touched.get(index).copied().unwrap_or(true) {
            return false;
        }
        match self.exercises.get_mut(index) {
            Some(log) => {
                log.weight_kg = weight_kg;
                true
            }
            None => false,
        }
    }

    /// Record one free-form set (LIBRE blocks)
    pub fn add_set(&mut self, index: usize, set: SetLog) -> Result<()> {
        if self.protocol != Protocol::Libre {
            return Err(Error::Validation(
                "Sets are only recorded for LIBRE blocks".into(),
            ));
        }
        self.exercise_mut(index)?.sets.push(set);
        Ok(())
    }

    pub fn set_heart_rate(&mut self, index: usize, bpm: Option<u16>) -> Result<()> {
        self.exercise_mut(index)?.heart_rate = bpm.filter(|b| *b > 0);
        Ok(())
    }

    pub fn set_note(&mut self, index: usize, note: impl Into<String>) -> Result<()> {
        let note = note.into();
        self.exercise_mut(index)?.note = if note.trim().is_empty() {
            None
        } else {
            Some(note)
        };
        Ok(())
    }

    /// Cycle a round's outcome (EMOM blocks); rounds are 1-based
    pub fn toggle_round(&mut self, round: u32) -> Result<RoundOutcome> {
        let planned = match self.planned_rounds {
            Some(planned) => planned,
            None => {
                return Err(Error::Validation(
                    "Round outcomes only apply to EMOM blocks".into(),
                ))
            }
        };
        if round == 0 || round > planned {
            return Err(Error::Validation(format!(
                "Round {} out of range (1..={})",
                round, planned
            )));
        }

        let next = self.rounds.get(&round).copied().unwrap_or_default().toggle();
        if next == RoundOutcome::Unset {
            self.rounds.remove(&round);
        } else {
            self.rounds.insert(round, next);
        }
        Ok(next)
    }

    pub fn set_elapsed(&mut self, seconds: u32) {
        self.elapsed_seconds = seconds;
    }

    /// Successful rounds x target reps per round, per exercise (EMOM)
    pub fn derived_reps(&self) -> Vec<u32> {
        let successes = self
            .rounds
            .values()
            .filter(|o| **o == RoundOutcome::Success)
            .count() as u32;
        self.target_reps_per_round
            .iter()
            .map(|t| successes * t.unwrap_or(0))
            .collect()
    }

    /// Whether anything has been logged: reps, sets, elapsed time or round marks
    pub fn has_logged_work(&self) -> bool {
        self.exercises
            .iter()
            .any(|e| e.reps > 0 || !e.sets.is_empty())
            || self.elapsed_seconds > 0
            || !self.rounds.is_empty()
    }

    /// Discard numeric fields and flag the step as skipped
    pub fn skip(&mut self) {
        for log in &mut self.exercises {
            log.reps = 0;
            log.weight_kg = None;
            log.heart_rate = None;
            log.sets.clear();
        }
        self.elapsed_seconds = 0;
        self.rounds.clear();
        self.skipped = true;
    }

    /// Freeze the draft into a finalized result
    pub fn finalize(self, capture: FeedbackCapture) -> Result<WorkResult> {
        let feedback = match capture {
            FeedbackCapture::Confirmed(feedback) => {
                if feedback.rpe > MAX_RPE {
                    return Err(Error::Validation(format!(
                        "RPE must be between 0 and {}, got {}",
                        MAX_RPE, feedback.rpe
                    )));
                }
                Some(feedback)
            }
            FeedbackCapture::Skipped => None,
        };

        tracing::debug!(
            "Finalizing result for step {} ({}, skipped={})",
            self.step_index,
            self.module_stable_id,
            self.skipped
        );

        Ok(WorkResult {
            id: Uuid::new_v4(),
            run_id: self.run_id,
            step_index: self.step_index,
            module_id: self.module_id,
            module_stable_id: self.module_stable_id,
            block_name: self.block_name,
            protocol: self.protocol,
            exercises: self.exercises,
            elapsed_seconds: self.elapsed_seconds,
            planned_rounds: self.planned_rounds,
            target_reps_per_round: self.target_reps_per_round,
            rounds: self.rounds,
            feedback,
            skipped: self.skipped,
            finalized_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Exercise, ExerciseTarget, ModuleConfig};

    fn module(protocol: Protocol) -> Module {
        Module {
            id: "m1".into(),
            stable_id: "stable_m1".into(),
            name: "BUILD press".into(),
            protocol,
            exercises: vec![
                Exercise {
                    id: "e1".into(),
                    stable_id: "se1".into(),
                    name: "Push press".into(),
                    loadable: true,
                    target: ExerciseTarget::Reps(5),
                    energy: false,
                    volume_km: None,
                    instruction: None,
                },
                Exercise {
                    id: "e2".into(),
                    stable_id: "se2".into(),
                    name: "Burpee".into(),
                    loadable: false,
                    target: ExerciseTarget::Reps(8),
                    energy: true,
                    volume_km: None,
                    instruction: None,
                },
            ],
            config: ModuleConfig {
                time_cap_seconds: None,
                emom_minutes: Some(4),
                instruction: None,
            },
        }
    }

    #[test]
    fn test_new_draft_is_empty() {
        let draft = DraftResult::new(Uuid::new_v4(), 3, &module(Protocol::TimeCap));
        assert!(!draft.has_logged_work());
        assert_eq!(draft.reps(), vec![0, 0]);
        assert_eq!(draft.step_index(), 3);
    }

    #[test]
    fn test_reps_never_go_negative() {
        let mut draft = DraftResult::new(Uuid::new_v4(), 1, &module(Protocol::TimeCap));
        draft.add_reps(0, 3).unwrap();
        assert_eq!(draft.add_reps(0, -5).unwrap(), 0);
        assert!(draft.set_reps(7, 1).is_err());
    }

    #[test]
    fn test_emom_rejects_manual_reps_and_derives_them() {
        let mut draft = DraftResult::new(Uuid::new_v4(), 1, &module(Protocol::Emom));
        assert!(draft.set_reps(0, 10).is_err());

        assert_eq!(draft.toggle_round(1).unwrap(), RoundOutcome::Success);
        assert_eq!(draft.toggle_round(2).unwrap(), RoundOutcome::Success);
        assert_eq!(draft.toggle_round(3).unwrap(), RoundOutcome::Success);
        assert_eq!(draft.toggle_round(3).unwrap(), RoundOutcome::Fail);
        assert_eq!(draft.derived_reps(), vec![10, 16]);

        // Full cycle clears the mark
        assert_eq!(draft.toggle_round(3).unwrap(), RoundOutcome::Unset);
        assert!(!draft.rounds().contains_key(&3));
        assert!(draft.toggle_round(5).is_err());
    }

    #[test]
    fn test_seed_does_not_overwrite_athlete_weight() {
        let mut draft = DraftResult::new(Uuid::new_v4(), 1, &module(Protocol::TimeCap));
        draft.set_weight(0, Some(42.5)).unwrap();
        assert!(!draft.seed_weight(0, Some(50.0)));
        assert!(draft.seed_weight(1, Some(10.0)));
        assert_eq!(draft.exercises()[0].weight_kg, Some(42.5));
        assert_eq!(draft.exercises()[1].weight_kg, Some(10.0));
    }

    #[test]
    fn test_skip_discards_numbers() {
        let mut draft = DraftResult::new(Uuid::new_v4(), 1, &module(Protocol::TimeCap));
        draft.set_reps(0, 30).unwrap();
        draft.set_weight(0, Some(60.0)).unwrap();
        draft.set_elapsed(200);
        draft.skip();

        let result = draft.finalize(FeedbackCapture::Skipped).unwrap();
        assert!(result.skipped);
        assert_eq!(result.exercises[0].reps, 0);
        assert_eq!(result.exercises[0].weight_kg, None);
        assert_eq!(result.elapsed_seconds, 0);
        assert_eq!(result.exercise_volume(0), 0.0);
    }

    #[test]
    fn test_finalize_validates_rpe() {
        let draft = DraftResult::new(Uuid::new_v4(), 1, &module(Protocol::TimeCap));
        let err = draft
            .clone()
            .finalize(FeedbackCapture::Confirmed(BlockFeedback {
                rpe: 11,
                comment: String::new(),
            }))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let result = draft
            .finalize(FeedbackCapture::Confirmed(BlockFeedback {
                rpe: 8,
                comment: "heavy".into(),
            }))
            .unwrap();
        assert_eq!(result.feedback.unwrap().rpe, 8);
    }

    #[test]
    fn test_libre_sets() {
        let mut draft = DraftResult::new(Uuid::new_v4(), 1, &module(Protocol::Libre));
        draft
            .add_set(0, SetLog { reps: 5, weight_kg: Some(80.0) })
            .unwrap();
        draft
            .add_set(0, SetLog { reps: 5, weight_kg: Some(85.0) })
            .unwrap();
        assert!(draft.has_logged_work());

        let result = draft.finalize(FeedbackCapture::Skipped).unwrap();
        assert_eq!(result.credited_reps(0), 10);
        assert_eq!(result.exercise_volume(0), 825.0);

        let mut timed = DraftResult::new(Uuid::new_v4(), 1, &module(Protocol::TimeCap));
        assert!(timed.add_set(0, SetLog { reps: 1, weight_kg: None }).is_err());
    }
}
