//! Load progression: applying recommended adjustments and seeding weights.
//!
//! Weight fields for a WORK step are seeded in priority order:
//! 1. the most recent history's actual weight, with its pending adjustment applied
//! 2. the pre-session plan value
//! 3. empty

use crate::HistoricalLog;

/// Smallest weight increment the seeding rounds to (kg)
pub const WEIGHT_INCREMENT_KG: f64 = 0.5;

/// Apply a signed load fraction to a weight, rounded to the nearest increment
pub fn apply_adjustment(weight_kg: f64, adjustment: f64) -> f64 {
    let adjusted = weight_kg * (1.0 + adjustment);
    let rounded = (adjusted / WEIGHT_INCREMENT_KG).round() * WEIGHT_INCREMENT_KG;
    rounded.max(0.0)
}

/// Where a seeded weight came from
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum WeightSeed {
    History { weight_kg: f64, adjustment: f64 },
    Plan { weight_kg: f64 },
    Empty,
}

impl WeightSeed {
    pub fn weight_kg(&self) -> Option<f64> {
        match self {
            WeightSeed::History { weight_kg, .. } | WeightSeed::Plan { weight_kg } => {
                Some(*weight_kg)
            }
            WeightSeed::Empty => None,
        }
    }
}

/// Pick the starting weight for one exercise
pub fn seed_weight(
    history: Option<&HistoricalLog>,
    plan_kg: Option<f64>,
    exercise_stable_id: &str,
) -> WeightSeed {
    if let Some(log) = history {
        if let Some(previous) = log.actual_weight(exercise_stable_id).filter(|w| *w > 0.0) {
            let adjustment = log.pending_adjustment(exercise_stable_id);
            let weight_kg = apply_adjustment(previous, adjustment);
            tracing::debug!(
                "Seeding {} from history: {}kg {:+.2} -> {}kg",
                exercise_stable_id,
                previous,
                adjustment,
                weight_kg
            );
            return WeightSeed::History {
                weight_kg,
                adjustment,
            };
        }
    }

    match plan_kg.filter(|w| *w > 0.0) {
        Some(weight_kg) => WeightSeed::Plan { weight_kg },
        None => WeightSeed::Empty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExerciseAdjustment, ExerciseLog, Protocol, WorkResult};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn history(weight: Option<f64>, adjustment: f64) -> HistoricalLog {
        HistoricalLog {
            result: WorkResult {
                id: Uuid::new_v4(),
                run_id: Uuid::new_v4(),
                step_index: 2,
                module_id: "m".into(),
                module_stable_id: "sm".into(),
                block_name: "BUILD".into(),
                protocol: Protocol::TimeCap,
                exercises: vec![ExerciseLog {
                    exercise_id: "e".into(),
                    exercise_stable_id: "se".into(),
                    name: "Squat".into(),
                    loadable: true,
                    energy: false,
                    reps: 40,
                    weight_kg: weight,
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
                finalized_at: Utc::now(),
            },
            adjustments: vec![ExerciseAdjustment {
                exercise_stable_id: "se".into(),
                adjustment,
            }],
        }
    }

    #[test]
    fn test_apply_adjustment_rounds_to_half_kilo() {
        assert_eq!(apply_adjustment(60.0, 0.05), 63.0);
        assert_eq!(apply_adjustment(50.0, -0.05), 47.5);
        assert_eq!(apply_adjustment(22.0, 0.05), 23.0);
        assert_eq!(apply_adjustment(40.0, 0.0), 40.0);
    }

    #[test]
    fn test_history_wins_over_plan() {
        let log = history(Some(60.0), 0.05);
        let seed = seed_weight(Some(&log), Some(55.0), "se");
        assert_eq!(
            seed,
            WeightSeed::History {
                weight_kg: 63.0,
                adjustment: 0.05
            }
        );
    }

    #[test]
    fn test_plan_used_when_history_has_no_weight() {
        let log = history(None, 0.05);
        assert_eq!(
            seed_weight(Some(&log), Some(55.0), "se"),
            WeightSeed::Plan { weight_kg: 55.0 }
        );
        assert_eq!(
            seed_weight(None, Some(30.0), "other"),
            WeightSeed::Plan { weight_kg: 30.0 }
        );
    }

    #[test]
    fn test_empty_without_history_or_plan() {
        let seed = seed_weight(None, None, "se");
        assert_eq!(seed, WeightSeed::Empty);
        assert_eq!(seed.weight_kg(), None);
    }
}
