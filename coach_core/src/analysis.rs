//! Session analysis engine.
//!
//! A pure function over the finalized results of one session attempt, the
//! timeline they were recorded against, and the latest history per module.
//! It produces coaching insights (each with an athlete message, a coach
//! message and a load adjustment) plus aggregate session metrics.
//!
//! ## Rules
//!
//! - **T**: reps against the block-type rep band. Reps within the stagnation
//!   tolerance of last session's reps always produce a decrease, regardless
//!   of the band.
//! - **R**: elapsed time against the block-type efficient time and cap.
//! - **E**: any failed round decreases, all planned rounds successful
//!   increases, partial success keeps.
//! - **LIBRE**: no load changes; heart-rate feedback for energy exercises.
//! - Non-loadable or unweighted exercises get the same classification with
//!   the adjustment forced to zero.

use crate::{
    BlockType, CardioRecord, ExerciseLog, ExerciseRef, HistoryIndex, Insight, InsightKind,
    InsightReason, Module, Protocol, SessionAnalysis, SessionMetrics, TimelineStep, WorkResult,
};
use serde::{Deserialize, Serialize};

/// Rep band for time-capped blocks
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepBand {
    pub floor: u32,
    pub ceiling: u32,
}

/// Time thresholds for for-time blocks
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeThreshold {
    pub cap_seconds: u32,
    pub efficient_seconds: u32,
}

/// Every threshold the analysis engine uses
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuleSet {
    /// Signed load fraction for an increase or decrease
    pub adjustment_step: f64,
    /// Max rep difference to last session that counts as stagnation
    pub stagnation_tolerance: u32,
    pub base_band: RepBand,
    pub build_band: RepBand,
    pub burn_band: RepBand,
    pub base_time: TimeThreshold,
    pub build_time: TimeThreshold,
    pub burn_time: TimeThreshold,
    pub emom_hr_caution_bpm: u16,
    pub energy_hr_caution_bpm: u16,
    pub cardio_caution_bpm: u16,
    pub cardio_aerobic_floor_bpm: u16,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            adjustment_step: 0.05,
            stagnation_tolerance: 1,
            base_band: RepBand { floor: 20, ceiling: 40 },
            build_band: RepBand { floor: 30, ceiling: 50 },
            burn_band: RepBand { floor: 50, ceiling: 70 },
            base_time: TimeThreshold { cap_seconds: 300, efficient_seconds: 180 },
            build_time: TimeThreshold { cap_seconds: 360, efficient_seconds: 216 },
            burn_time: TimeThreshold { cap_seconds: 420, efficient_seconds: 252 },
            emom_hr_caution_bpm: 165,
            energy_hr_caution_bpm: 160,
            cardio_caution_bpm: 170,
            cardio_aerobic_floor_bpm: 140,
        }
    }
}

impl RuleSet {
    /// Rep band for a block type; BOOST shares BASE's thresholds
    pub fn band(&self, block_type: BlockType) -> RepBand {
        match block_type {
            BlockType::Base | BlockType::Boost => self.base_band,
            BlockType::Build => self.build_band,
            BlockType::Burn => self.burn_band,
        }
    }

    pub fn time(&self, block_type: BlockType) -> TimeThreshold {
        match block_type {
            BlockType::Base | BlockType::Boost => self.base_time,
            BlockType::Build => self.build_time,
            BlockType::Burn => self.burn_time,
        }
    }
}

/// Format a load adjustment for coach messages: `+0.05`, `-0.05`, `0.00`
pub fn format_adjustment(adjustment: f64) -> String {
    if adjustment.abs() < f64::EPSILON {
        "0.00".to_string()
    } else {
        format!("{:+.2}", adjustment)
    }
}

/// Analyse one session attempt
pub fn analyze(
    results: &[WorkResult],
    timeline: &[TimelineStep],
    history: &HistoryIndex,
    cardio: Option<&CardioRecord>,
    rules: &RuleSet,
) -> SessionAnalysis {
    let mut insights = Vec::new();

    for result in results {
        let Some(module) = module_for(result, timeline) else {
            tracing::warn!(
                "Result for step {} ({}) has no matching WORK step, skipping analysis",
                result.step_index,
                result.module_stable_id
            );
            continue;
        };

        if result.skipped {
            insights.push(skipped_insight(module));
            continue;
        }

        let ctx = BlockContext {
            module,
            result,
            block_type: module.block_type(),
            history,
            rules,
        };

        match result.protocol {
            Protocol::TimeCap => time_cap_insights(&ctx, &mut insights),
            Protocol::ForTime => for_time_insights(&ctx, &mut insights),
            Protocol::Emom => emom_insights(&ctx, &mut insights),
            Protocol::Libre => libre_insights(&ctx, &mut insights),
        }
    }

    if let Some(record) = cardio {
        cardio_insights(record, rules, &mut insights);
    }

    let metrics = compute_metrics(results, timeline, cardio, &insights);

    tracing::info!(
        "Analysis produced {} insights (volume {:.1}, efficiency {:.0}%)",
        insights.len(),
        metrics.total_volume,
        metrics.efficiency_percent
    );

    SessionAnalysis { insights, metrics }
}

/// Module of the WORK step a result was recorded for
fn module_for<'a>(result: &WorkResult, timeline: &'a [TimelineStep]) -> Option<&'a Module> {
    timeline
        .get(result.step_index)
        .and_then(TimelineStep::work_module)
        .filter(|m| m.stable_id == result.module_stable_id)
}

struct BlockContext<'a> {
    module: &'a Module,
    result: &'a WorkResult,
    block_type: BlockType,
    history: &'a HistoryIndex,
    rules: &'a RuleSet,
}

impl BlockContext<'_> {
    fn label(&self) -> String {
        format!("{}/{}", self.block_type.label(), self.result.protocol.code())
    }

    /// Build a classification insight, zeroing the adjustment for
    /// bodyweight or unweighted exercises
    fn classified(
        &self,
        log: &ExerciseLog,
        kind: InsightKind,
        reason: InsightReason,
        athlete_message: String,
        detail: String,
    ) -> Insight {
        let weighted = log.loadable && log.weight_kg.map(|w| w > 0.0).unwrap_or(false);
        let adjustment = if !weighted {
            0.0
        } else {
            match kind {
                InsightKind::Up => self.rules.adjustment_step,
                InsightKind::Down => -self.rules.adjustment_step,
                InsightKind::Keep | InsightKind::Skipped => 0.0,
            }
        };

        let action = match (weighted, kind) {
            (false, _) => "message only, no load change".to_string(),
            (true, InsightKind::Up) => "increase load".to_string(),
            (true, InsightKind::Down) => "decrease load".to_string(),
            (true, _) => "hold load".to_string(),
        };

        Insight {
            kind,
            reason,
            module_stable_id: Some(self.module.stable_id.clone()),
            exercise: Some(exercise_ref(log)),
            athlete_message,
            coach_message: format!(
                "[{}] {}: {}; {} (adjustment {})",
                self.label(),
                log.name,
                detail,
                action,
                format_adjustment(adjustment)
            ),
            adjustment,
        }
    }

    fn caution(&self, log: &ExerciseLog, bpm: u16, limit: u16) -> Insight {
        Insight {
            kind: InsightKind::Down,
            reason: InsightReason::HeartRateCaution,
            module_stable_id: Some(self.module.stable_id.clone()),
            exercise: Some(exercise_ref(log)),
            athlete_message: format!(
                "Your heart rate hit {} bpm on {}. Ease the pace a little and focus on breathing.",
                bpm, log.name
            ),
            coach_message: format!(
                "[{}] {}: HR {} bpm > {} bpm caution threshold; monitor recovery (adjustment {})",
                self.label(),
                log.name,
                bpm,
                limit,
                format_adjustment(0.0)
            ),
            adjustment: 0.0,
        }
    }
}

fn exercise_ref(log: &ExerciseLog) -> ExerciseRef {
    ExerciseRef {
        stable_id: log.exercise_stable_id.clone(),
        name: log.name.clone(),
    }
}

fn skipped_insight(module: &Module) -> Insight {
    Insight {
        kind: InsightKind::Skipped,
        reason: InsightReason::SkippedBlock,
        module_stable_id: Some(module.stable_id.clone()),
        exercise: None,
        athlete_message: format!("You skipped {}. No worries, we'll pick it up next time.", module.name),
        coach_message: format!(
            "[{}/{}] {} skipped by athlete; no data recorded (adjustment {})",
            module.block_type().label(),
            module.protocol.code(),
            module.name,
            format_adjustment(0.0)
        ),
        adjustment: 0.0,
    }
}

// ============================================================================
// Per-protocol rules
// ============================================================================

fn time_cap_insights(ctx: &BlockContext<'_>, out: &mut Vec<Insight>) {
    let band = ctx.rules.band(ctx.block_type);
    let history = ctx.history.get(&ctx.module.stable_id);

    for (idx, log) in ctx.result.exercises.iter().enumerate() {
        let reps = ctx.result.credited_reps(idx);
        let prior = history
            .and_then(|h| h.prior_reps(&log.exercise_stable_id))
            .filter(|p| *p > 0);

        if let Some(prior) = prior {
            if reps.abs_diff(prior) <= ctx.rules.stagnation_tolerance {
                out.push(ctx.classified(
                    log,
                    InsightKind::Down,
                    InsightReason::Stagnation,
                    format!(
                        "{} reps on {}, same as last time ({}). Let's lighten the load and rebuild momentum.",
                        reps, log.name, prior
                    ),
                    format!("stagnation, {} reps vs {} last session", reps, prior),
                ));
                continue;
            }
        }

        let insight = if reps > band.ceiling {
            ctx.classified(
                log,
                InsightKind::Up,
                InsightReason::AboveCeiling,
                format!("{} reps on {}! You're ready for more weight.", reps, log.name),
                format!("{} reps > ceiling {}", reps, band.ceiling),
            )
        } else if reps < band.floor {
            ctx.classified(
                log,
                InsightKind::Down,
                InsightReason::BelowFloor,
                format!(
                    "{} reps on {}. A slightly lighter load will keep you in the target range.",
                    reps, log.name
                ),
                format!("{} reps < floor {}", reps, band.floor),
            )
        } else {
            ctx.classified(
                log,
                InsightKind::Keep,
                InsightReason::WithinBand,
                format!("{} reps on {}, right in the target zone. Keep it there.", reps, log.name),
                format!("{} reps within [{}, {}]", reps, band.floor, band.ceiling),
            )
        };
        out.push(insight);
    }
}

fn for_time_insights(ctx: &BlockContext<'_>, out: &mut Vec<Insight>) {
    let elapsed = ctx.result.elapsed_seconds;
    if elapsed == 0 {
        tracing::debug!(
            "For-time block {} has no elapsed time, no classification",
            ctx.module.stable_id
        );
        return;
    }
    let limits = ctx.rules.time(ctx.block_type);

    for log in &ctx.result.exercises {
        let insight = if elapsed < limits.efficient_seconds {
            ctx.classified(
                log,
                InsightKind::Up,
                InsightReason::FastFinish,
                format!("Finished in {}. Fast! Time to go heavier on {}.", mmss(elapsed), log.name),
                format!("{}s < efficient {}s", elapsed, limits.efficient_seconds),
            )
        } else if elapsed >= limits.cap_seconds {
            ctx.classified(
                log,
                InsightKind::Down,
                InsightReason::OverCap,
                format!(
                    "That one took {}. We'll lighten {} so you can move faster.",
                    mmss(elapsed),
                    log.name
                ),
                format!("{}s >= cap {}s", elapsed, limits.cap_seconds),
            )
        } else {
            ctx.classified(
                log,
                InsightKind::Keep,
                InsightReason::WithinCap,
                format!("Solid pace at {}. Keep {} where it is.", mmss(elapsed), log.name),
                format!(
                    "{}s within [{}s, {}s)",
                    elapsed, limits.efficient_seconds, limits.cap_seconds
                ),
            )
        };
        out.push(insight);
    }
}

fn emom_insights(ctx: &BlockContext<'_>, out: &mut Vec<Insight>) {
    let fails = ctx.result.failed_rounds();
    let successes = ctx.result.successful_rounds();
    let planned = ctx
        .result
        .planned_rounds
        .unwrap_or_else(|| ctx.module.emom_rounds());

    for log in &ctx.result.exercises {
        let insight = if fails > 0 {
            Some(ctx.classified(
                log,
                InsightKind::Down,
                InsightReason::RoundFailed,
                format!(
                    "{} round(s) got away from you on {}. A lighter load will keep every minute clean.",
                    fails, log.name
                ),
                format!("{} failed / {} planned rounds", fails, planned),
            ))
        } else if successes >= planned {
            Some(ctx.classified(
                log,
                InsightKind::Up,
                InsightReason::AllRoundsCompleted,
                format!("Every round of {} completed. Time to add weight!", log.name),
                format!("{}/{} rounds successful, 0 failed", successes, planned),
            ))
        } else if successes > 0 {
            Some(ctx.classified(
                log,
                InsightKind::Keep,
                InsightReason::PartialRounds,
                format!(
                    "{} of {} rounds done on {}. Stay at this load and finish them all next time.",
                    successes, planned, log.name
                ),
                format!("{}/{} rounds successful, 0 failed", successes, planned),
            ))
        } else {
            None
        };
        out.extend(insight);

        if let Some(bpm) = log.heart_rate.filter(|b| *b > ctx.rules.emom_hr_caution_bpm) {
            out.push(ctx.caution(log, bpm, ctx.rules.emom_hr_caution_bpm));
        }
    }
}

fn libre_insights(ctx: &BlockContext<'_>, out: &mut Vec<Insight>) {
    for log in ctx.result.exercises.iter().filter(|l| l.energy) {
        if let Some(bpm) = log.heart_rate.filter(|b| *b > ctx.rules.energy_hr_caution_bpm) {
            out.push(ctx.caution(log, bpm, ctx.rules.energy_hr_caution_bpm));
        }
    }
}

fn cardio_insights(record: &CardioRecord, rules: &RuleSet, out: &mut Vec<Insight>) {
    if let Some(avg) = record.avg_hr {
        let (kind, athlete_message, zone) = if avg > rules.cardio_caution_bpm {
            (
                InsightKind::Down,
                format!(
                    "Average heart rate {} bpm is high. Slow down next time to stay aerobic.",
                    avg
                ),
                format!("avg HR {} > {} caution", avg, rules.cardio_caution_bpm),
            )
        } else if avg >= rules.cardio_aerobic_floor_bpm {
            (
                InsightKind::Up,
                format!(
                    "Average heart rate {} bpm, great aerobic work. Your efficiency is improving.",
                    avg
                ),
                format!(
                    "avg HR {} in aerobic efficiency zone [{}, {}]",
                    avg, rules.cardio_aerobic_floor_bpm, rules.cardio_caution_bpm
                ),
            )
        } else {
            (
                InsightKind::Keep,
                format!("Average heart rate {} bpm: easy base building. Keep stacking these.", avg),
                format!("avg HR {} < {} base aerobic zone", avg, rules.cardio_aerobic_floor_bpm),
            )
        };

        out.push(Insight {
            kind,
            reason: InsightReason::CardioZone,
            module_stable_id: None,
            exercise: None,
            athlete_message,
            coach_message: format!(
                "[CARDIO] {}; max HR {} (adjustment {})",
                zone,
                record
                    .max_hr
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "n/a".into()),
                format_adjustment(0.0)
            ),
            adjustment: 0.0,
        });
    }

    if let Some(pace) = record.pace.as_ref().filter(|p| !p.trim().is_empty()) {
        let distance = record
            .distance_km
            .map(|d| format!("{:.2} km", d))
            .unwrap_or_else(|| "distance n/a".into());
        out.push(Insight {
            kind: InsightKind::Keep,
            reason: InsightReason::CardioPace,
            module_stable_id: None,
            exercise: None,
            athlete_message: format!("Average pace {} over {}.", pace, distance),
            coach_message: format!(
                "[CARDIO] pace {} over {}; report only (adjustment {})",
                pace,
                distance,
                format_adjustment(0.0)
            ),
            adjustment: 0.0,
        });
    }
}

// ============================================================================
// Metrics
// ============================================================================

fn compute_metrics(
    results: &[WorkResult],
    timeline: &[TimelineStep],
    cardio: Option<&CardioRecord>,
    insights: &[Insight],
) -> SessionMetrics {
    let mut total_volume = 0.0;
    let mut completed_exercise_count = 0u32;
    let mut hr_samples: Vec<u16> = Vec::new();

    for result in results
        .iter()
        .filter(|r| !r.skipped && module_for(r, timeline).is_some())
    {
        for (idx, log) in result.exercises.iter().enumerate() {
            total_volume += result.exercise_volume(idx);

            let emom_success = result.protocol == Protocol::Emom && result.successful_rounds() > 0;
            if result.credited_reps(idx) > 0 || emom_success {
                completed_exercise_count += 1;
            }
            hr_samples.extend(log.heart_rate);
        }
    }

    let mut max_hr = hr_samples.iter().copied().max();
    if let Some(record) = cardio {
        hr_samples.extend(record.avg_hr);
        max_hr = max_hr.max(record.max_hr).max(record.avg_hr);
    }

    let avg_hr = if hr_samples.is_empty() {
        None
    } else {
        let sum: u32 = hr_samples.iter().map(|h| *h as u32).sum();
        Some((sum as f64 / hr_samples.len() as f64).round() as u16)
    };

    let (success, failure) = insights
        .iter()
        .filter(|i| i.reason.is_adjustment_rule())
        .fold((0u32, 0u32), |(s, f), i| match i.kind {
            InsightKind::Up | InsightKind::Keep => (s + 1, f),
            InsightKind::Down => (s, f + 1),
            InsightKind::Skipped => (s, f),
        });

    let did_work = completed_exercise_count > 0 || cardio.is_some();
    let efficiency_percent = if success + failure > 0 {
        success as f64 / (success + failure) as f64 * 100.0
    } else if did_work {
        100.0
    } else {
        0.0
    };

    SessionMetrics {
        total_volume,
        completed_exercise_count,
        efficiency_percent,
        avg_hr,
        max_hr,
        cardio_pace: cardio.and_then(|c| c.pace.clone()),
    }
}

/// Format seconds as `m:ss`
pub fn mmss(seconds: u32) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}
