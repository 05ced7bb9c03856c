//! Protocol timer state machine.
//!
//! One timer drives the active WORK step. Each protocol has its own handler
//! behind the shared [`ProtocolTimer`] contract, and [`BlockTimer`] selects
//! the handler from the module's protocol tag:
//! - T: countdown from the time cap with halfway / one-minute / 3-2-1 cues
//! - R: count-up that stops when every rep target is reached
//! - E: repeating 60-second rounds with per-round cues
//! - LIBRE: no clock at all
//!
//! Timers never schedule themselves. Something else (see `driver`) calls
//! [`ProtocolTimer::tick`] once per second while the timer is running.

use crate::{Module, Protocol, EMOM_ROUND_SECONDS};
use serde::{Deserialize, Serialize};

/// Lifecycle of a block timer
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimerStatus {
    Idle,
    Running,
    Paused,
    Complete,
}

/// Audio/visual cue emitted by a tick
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "cue", rename_all = "snake_case")]
pub enum Cue {
    Halfway,
    OneMinuteLeft,
    Countdown { count: u32 },
    TimeUp,
    TargetReached,
    RoundHalfway { round: u32 },
    RoundCountdown { round: u32, count: u32 },
    RoundStarted { round: u32 },
    EmomComplete,
}

impl Cue {
    /// Whether this cue ends the block
    pub fn is_terminal(&self) -> bool {
        matches!(self, Cue::TimeUp | Cue::TargetReached | Cue::EmomComplete)
    }
}

/// Read-only view of a timer
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimerSnapshot {
    pub protocol: Protocol,
    pub status: TimerStatus,
    pub elapsed_seconds: u32,
    /// Seconds left in the block (T) or in the current round (E)
    pub remaining_seconds: Option<u32>,
    /// 1-based current round (E)
    pub round: Option<u32>,
    pub total_rounds: Option<u32>,
}

/// Contract shared by every protocol handler
pub trait ProtocolTimer {
    /// Start from idle, or resume from paused with the preserved value
    fn start(&mut self);
    /// Halt without touching the clock; pausing twice is harmless
    fn pause(&mut self);
    /// Back to idle with the initial values
    fn reset(&mut self);
    /// Advance one second; no-op unless running
    fn tick(&mut self) -> Vec<Cue>;
    fn is_complete(&self) -> bool;
    fn snapshot(&self) -> TimerSnapshot;
}

// ============================================================================
// Run control shared by the handlers
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct RunControl {
    status: TimerStatus,
}

impl RunControl {
    fn new() -> Self {
        Self {
            status: TimerStatus::Idle,
        }
    }

    fn start(&mut self) {
        match self.status {
            TimerStatus::Idle | TimerStatus::Paused => self.status = TimerStatus::Running,
            TimerStatus::Running | TimerStatus::Complete => {}
        }
    }

    fn pause(&mut self) {
        if self.status == TimerStatus::Running {
            self.status = TimerStatus::Paused;
        }
    }

    fn is_running(&self) -> bool {
        self.status == TimerStatus::Running
    }

    fn complete(&mut self) {
        self.status = TimerStatus::Complete;
    }
}

// ============================================================================
// T: time-capped countdown
// ============================================================================

/// Countdown from a time cap
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeCapTimer {
    cap: u32,
    remaining: u32,
    control: RunControl,
}

impl TimeCapTimer {
    pub fn new(cap_seconds: u32) -> Self {
        Self {
            cap: cap_seconds,
            remaining: cap_seconds,
            control: RunControl::new(),
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

impl ProtocolTimer for TimeCapTimer {
    fn start(&mut self) {
        if self.remaining == 0 {
            self.control.complete();
            return;
        }
        self.control.start();
    }

    fn pause(&mut self) {
        self.control.pause();
    }

    fn reset(&mut self) {
        self.remaining = self.cap;
        self.control = RunControl::new();
    }

    fn tick(&mut self) -> Vec<Cue> {
        if !self.control.is_running() {
            return Vec::new();
        }

        self.remaining = self.remaining.saturating_sub(1);
        let mut cues = Vec::new();

        let half = self.cap / 2;
        if half > 0 && self.remaining == half {
            cues.push(Cue::Halfway);
        }
        if self.cap > 60 && self.remaining == 60 {
            cues.push(Cue::OneMinuteLeft);
        }
        if (1..=3).contains(&self.remaining) {
            cues.push(Cue::Countdown {
                count: self.remaining,
            });
        }
        if self.remaining == 0 {
            self.control.complete();
            cues.push(Cue::TimeUp);
        }

        cues
    }

    fn is_complete(&self) -> bool {
        self.control.status == TimerStatus::Complete
    }

    fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            protocol: Protocol::TimeCap,
            status: self.control.status,
            elapsed_seconds: self.cap - self.remaining,
            remaining_seconds: Some(self.remaining),
            round: None,
            total_rounds: None,
        }
    }
}

// ============================================================================
// R: rep-based, for time
// ============================================================================

/// Count-up timer that stops once every rep target is met
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForTimeTimer {
    elapsed: u32,
    targets: Vec<Option<u32>>,
    control: RunControl,
}

impl ForTimeTimer {
    pub fn new(targets: Vec<Option<u32>>) -> Self {
        Self {
            elapsed: 0,
            targets,
            control: RunControl::new(),
        }
    }

    /// Check logged reps against the targets.
    ///
    /// Returns `TargetReached` (and stops the clock) the moment every
    /// exercise with a numeric target has reached it.
    pub fn observe_reps(&mut self, reps: &[u32]) -> Option<Cue> {
        if self.is_complete() {
            return None;
        }

        let mut any_target = false;
        for (idx, target) in self.targets.iter().enumerate() {
            if let Some(target) = target {
                any_target = true;
                if reps.get(idx).copied().unwrap_or(0) < *target {
                    return None;
                }
            }
        }

        if !any_target {
            return None;
        }

        self.control.complete();
        tracing::debug!("All rep targets reached after {}s", self.elapsed);
        Some(Cue::TargetReached)
    }
}

impl ProtocolTimer for ForTimeTimer {
    fn start(&mut self) {
        self.control.start();
    }

    fn pause(&mut self) {
        self.control.pause();
    }

    fn reset(&mut self) {
        self.elapsed = 0;
        self.control = RunControl::new();
    }

    fn tick(&mut self) -> Vec<Cue> {
        if self.control.is_running() {
            self.elapsed += 1;
        }
        Vec::new()
    }

    fn is_complete(&self) -> bool {
        self.control.status == TimerStatus::Complete
    }

    fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            protocol: Protocol::ForTime,
            status: self.control.status,
            elapsed_seconds: self.elapsed,
            remaining_seconds: None,
            round: None,
            total_rounds: None,
        }
    }
}

// ============================================================================
// E: every minute on the minute
// ============================================================================

/// Repeating one-minute rounds
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmomTimer {
    total_rounds: u32,
    round: u32,
    remaining: u32,
    control: RunControl,
}

impl EmomTimer {
    pub fn new(total_rounds: u32) -> Self {
        Self {
            total_rounds: total_rounds.max(1),
            round: 1,
            remaining: EMOM_ROUND_SECONDS,
            control: RunControl::new(),
        }
    }

    pub fn round(&self) -> u32 {
        self.round
    }
}

impl ProtocolTimer for EmomTimer {
    fn start(&mut self) {
        self.control.start();
    }

    fn pause(&mut self) {
        self.control.pause();
    }

    fn reset(&mut self) {
        self.round = 1;
        self.remaining = EMOM_ROUND_SECONDS;
        self.control = RunControl::new();
    }

    fn tick(&mut self) -> Vec<Cue> {
        if !self.control.is_running() {
            return Vec::new();
        }

        self.remaining = self.remaining.saturating_sub(1);
        let round = self.round;
        let mut cues = Vec::new();

        if self.remaining == EMOM_ROUND_SECONDS / 2 {
            cues.push(Cue::RoundHalfway { round });
        }
        if (1..=3).contains(&self.remaining) {
            cues.push(Cue::RoundCountdown {
                round,
                count: self.remaining,
            });
        }
        if self.remaining == 0 {
            if self.round >= self.total_rounds {
                self.control.complete();
                cues.push(Cue::EmomComplete);
            } else {
                self.round += 1;
                self.remaining = EMOM_ROUND_SECONDS;
                cues.push(Cue::RoundStarted { round: self.round });
            }
        }

        cues
    }

    fn is_complete(&self) -> bool {
        self.control.status == TimerStatus::Complete
    }

    fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            protocol: Protocol::Emom,
            status: self.control.status,
            elapsed_seconds: (self.round - 1) * EMOM_ROUND_SECONDS
                + (EMOM_ROUND_SECONDS - self.remaining),
            remaining_seconds: Some(self.remaining),
            round: Some(self.round),
            total_rounds: Some(self.total_rounds),
        }
    }
}

// ============================================================================
// LIBRE: free-form sets
// ============================================================================

/// No clock; only tracks whether the block is in progress
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FreeFormTimer {
    control: RunControl,
}

impl FreeFormTimer {
    pub fn new() -> Self {
        Self {
            control: RunControl::new(),
        }
    }
}

impl Default for FreeFormTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolTimer for FreeFormTimer {
    fn start(&mut self) {
        self.control.start();
    }

    fn pause(&mut self) {
        self.control.pause();
    }

    fn reset(&mut self) {
        self.control = RunControl::new();
    }

    fn tick(&mut self) -> Vec<Cue> {
        Vec::new()
    }

    fn is_complete(&self) -> bool {
        false
    }

    fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            protocol: Protocol::Libre,
            status: self.control.status,
            elapsed_seconds: 0,
            remaining_seconds: None,
            round: None,
            total_rounds: None,
        }
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Timer for one WORK step, selected by the module's protocol
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockTimer {
    TimeCap(TimeCapTimer),
    ForTime(ForTimeTimer),
    Emom(EmomTimer),
    FreeForm(FreeFormTimer),
}

impl BlockTimer {
    pub fn for_module(module: &Module) -> Self {
        match module.protocol {
            Protocol::TimeCap => BlockTimer::TimeCap(TimeCapTimer::new(module.time_cap_seconds())),
            Protocol::ForTime => BlockTimer::ForTime(ForTimeTimer::new(module.rep_targets())),
            Protocol::Emom => BlockTimer::Emom(EmomTimer::new(module.emom_rounds())),
            Protocol::Libre => BlockTimer::FreeForm(FreeFormTimer::new()),
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            BlockTimer::TimeCap(_) => Protocol::TimeCap,
            BlockTimer::ForTime(_) => Protocol::ForTime,
            BlockTimer::Emom(_) => Protocol::Emom,
            BlockTimer::FreeForm(_) => Protocol::Libre,
        }
    }

    /// Feed logged reps to the timer. Only R blocks react.
    pub fn observe_reps(&mut self, reps: &[u32]) -> Option<Cue> {
        match self {
            BlockTimer::ForTime(t) => t.observe_reps(reps),
            _ => None,
        }
    }

    fn inner(&self) -> &dyn ProtocolTimer {
        match self {
            BlockTimer::TimeCap(t) => t,
            BlockTimer::ForTime(t) => t,
            BlockTimer::Emom(t) => t,
            BlockTimer::FreeForm(t) => t,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn ProtocolTimer {
        match self {
            BlockTimer::TimeCap(t) => t,
            BlockTimer::ForTime(t) => t,
            BlockTimer::Emom(t) => t,
            BlockTimer::FreeForm(t) => t,
        }
    }
}

impl ProtocolTimer for BlockTimer {
    fn start(&mut self) {
        self.inner_mut().start();
    }

    fn pause(&mut self) {
        self.inner_mut().pause();
    }

    fn reset(&mut self) {
        self.inner_mut().reset();
    }

    fn tick(&mut self) -> Vec<Cue> {
        self.inner_mut().tick()
    }

    fn is_complete(&self) -> bool {
        self.inner().is_complete()
    }

    fn snapshot(&self) -> TimerSnapshot {
        self.inner().snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_ticks<T: ProtocolTimer>(timer: &mut T, n: u32) -> Vec<(u32, Cue)> {
        let mut out = Vec::new();
        for i in 1..=n {
            for cue in timer.tick() {
                out.push((i, cue));
            }
        }
        out
    }

    #[test]
    fn test_time_cap_cue_schedule() {
        let mut timer = TimeCapTimer::new(240);
        timer.start();
        let cues = run_ticks(&mut timer, 240);

        assert_eq!(
            cues,
            vec![
                (120, Cue::Halfway),
                (180, Cue::OneMinuteLeft),
                (237, Cue::Countdown { count: 3 }),
                (238, Cue::Countdown { count: 2 }),
                (239, Cue::Countdown { count: 1 }),
                (240, Cue::TimeUp),
            ]
        );
        assert!(timer.is_complete());
        assert_eq!(timer.snapshot().elapsed_seconds, 240);
    }

    #[test]
    fn test_time_cap_stops_at_zero() {
        let mut timer = TimeCapTimer::new(5);
        timer.start();
        run_ticks(&mut timer, 5);
        assert!(timer.is_complete());
        assert!(timer.tick().is_empty());
        assert_eq!(timer.remaining(), 0);
    }

    #[test]
    fn test_pause_resume_preserves_remaining() {
        let mut timer = TimeCapTimer::new(240);
        timer.start();
        run_ticks(&mut timer, 143);
        assert_eq!(timer.remaining(), 97);

        timer.pause();
        // Ticks while paused are ignored
        run_ticks(&mut timer, 10);
        timer.start();
        assert_eq!(timer.snapshot().remaining_seconds, Some(97));
        assert_eq!(timer.snapshot().status, TimerStatus::Running);
    }

    #[test]
    fn test_pause_is_idempotent() {
        let mut timer = TimeCapTimer::new(60);
        timer.start();
        timer.tick();
        timer.pause();
        let first = timer.snapshot();
        timer.pause();
        assert_eq!(timer.snapshot(), first);
        assert_eq!(first.status, TimerStatus::Paused);
    }

    #[test]
    fn test_reset_returns_to_idle() {
        let mut timer = TimeCapTimer::new(90);
        timer.start();
        run_ticks(&mut timer, 30);
        timer.reset();
        let snap = timer.snapshot();
        assert_eq!(snap.status, TimerStatus::Idle);
        assert_eq!(snap.remaining_seconds, Some(90));
        assert!(timer.tick().is_empty());
    }

    #[test]
    fn test_short_cap_skips_one_minute_cue() {
        let mut timer = TimeCapTimer::new(60);
        timer.start();
        let cues = run_ticks(&mut timer, 60);
        assert!(!cues.iter().any(|(_, c)| *c == Cue::OneMinuteLeft));
        assert!(cues.contains(&(30, Cue::Halfway)));
    }

    #[test]
    fn test_for_time_counts_up_until_targets_met() {
        let mut timer = ForTimeTimer::new(vec![Some(20), None, Some(10)]);
        timer.start();
        run_ticks(&mut timer, 42);
        assert_eq!(timer.snapshot().elapsed_seconds, 42);

        assert_eq!(timer.observe_reps(&[20, 0, 9]), None);
        assert!(!timer.is_complete());

        assert_eq!(timer.observe_reps(&[20, 0, 10]), Some(Cue::TargetReached));
        assert!(timer.is_complete());

        // Clock is frozen afterwards
        run_ticks(&mut timer, 5);
        assert_eq!(timer.snapshot().elapsed_seconds, 42);
        assert_eq!(timer.observe_reps(&[25, 0, 12]), None);
    }

    #[test]
    fn test_for_time_without_targets_never_completes() {
        let mut timer = ForTimeTimer::new(vec![None, None]);
        timer.start();
        assert_eq!(timer.observe_reps(&[100, 100]), None);
        assert!(!timer.is_complete());
    }

    #[test]
    fn test_emom_rounds_and_cues() {
        let mut timer = EmomTimer::new(2);
        timer.start();
        let cues = run_ticks(&mut timer, 120);

        assert_eq!(
            cues,
            vec![
                (30, Cue::RoundHalfway { round: 1 }),
                (57, Cue::RoundCountdown { round: 1, count: 3 }),
                (58, Cue::RoundCountdown { round: 1, count: 2 }),
                (59, Cue::RoundCountdown { round: 1, count: 1 }),
                (60, Cue::RoundStarted { round: 2 }),
                (90, Cue::RoundHalfway { round: 2 }),
                (117, Cue::RoundCountdown { round: 2, count: 3 }),
                (118, Cue::RoundCountdown { round: 2, count: 2 }),
                (119, Cue::RoundCountdown { round: 2, count: 1 }),
                (120, Cue::EmomComplete),
            ]
        );
        assert!(timer.is_complete());
        let snap = timer.snapshot();
        assert_eq!(snap.round, Some(2));
        assert_eq!(snap.elapsed_seconds, 120);
    }

    #[test]
    fn test_emom_snapshot_mid_round() {
        let mut timer = EmomTimer::new(4);
        timer.start();
        run_ticks(&mut timer, 75);
        let snap = timer.snapshot();
        assert_eq!(snap.round, Some(2));
        assert_eq!(snap.remaining_seconds, Some(45));
        assert_eq!(snap.elapsed_seconds, 75);
    }

    #[test]
    fn test_free_form_has_no_clock() {
        let mut timer = FreeFormTimer::new();
        timer.start();
        assert!(run_ticks(&mut timer, 300).is_empty());
        assert!(!timer.is_complete());
        assert_eq!(timer.snapshot().elapsed_seconds, 0);
    }

    #[test]
    fn test_block_timer_dispatch() {
        let module = crate::Module {
            id: "m".into(),
            stable_id: "m".into(),
            name: "BURN".into(),
            protocol: Protocol::Emom,
            exercises: vec![],
            config: crate::ModuleConfig {
                time_cap_seconds: None,
                emom_minutes: None,
                instruction: None,
            },
        };
        let mut timer = BlockTimer::for_module(&module);
        assert_eq!(timer.protocol(), Protocol::Emom);
        assert_eq!(timer.snapshot().total_rounds, Some(4));
        timer.start();
        timer.tick();
        assert_eq!(timer.snapshot().remaining_seconds, Some(59));
        assert_eq!(timer.observe_reps(&[10]), None);
    }
}
