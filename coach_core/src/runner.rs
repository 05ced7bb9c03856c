//! Session runner.
//!
//! [`SessionRunState`] is the single owned aggregate for one session attempt:
//! timeline position, weight plans, drafts, finalized results, history
//! lookups, the active timer and held resources. [`SessionRunner`] pairs it
//! with the external collaborators and exposes the operations a UI drives.
//!
//! ## Step rules
//!
//! - The index only moves forward, one step at a time.
//! - A WORK step is left by completing it (feedback confirmed or skipped) or
//!   by skipping the block. Its result is persisted before the index moves;
//!   a failed write keeps the result pending and the index where it is.
//! - `finish_session` runs on the SUMMARY step only.
//! - `exit` is a hard stop: the timer is stopped, resources are released and
//!   unfinalized drafts are discarded.

use crate::analysis::{self, RuleSet};
use crate::driver::{CueEvent, CueSender, SharedTimer, TimerDriver};
use crate::history::HistorySource;
use crate::notify::{CoachNotification, Notifier};
use crate::progression::{self, WeightSeed};
use crate::recorder::{DraftResult, FeedbackCapture};
use crate::resources::{PresentationResource, ResourceGuard};
use crate::schedule::ScheduleStore;
use crate::timeline::build_timeline;
use crate::timer::{BlockTimer, ProtocolTimer, TimerSnapshot};
use crate::worklog::{SessionRecord, WorkLogSink};
use crate::{
    CardioRecord, Error, HistoricalLog, HistoryIndex, Protocol, Result, RoundOutcome,
    ScheduleEntry, Session, SessionAnalysis, SessionOverride, StepKind, TimelineStep, WorkResult,
};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// External capabilities the runner consumes
#[derive(Clone)]
pub struct Collaborators {
    pub history: Arc<dyn HistorySource>,
    pub work_log: Arc<dyn WorkLogSink>,
    pub schedule: Arc<dyn ScheduleStore>,
    pub notifier: Arc<dyn Notifier>,
    pub resources: Vec<Arc<dyn PresentationResource>>,
}

/// Tunables for one run
#[derive(Clone, Debug)]
pub struct RunnerOptions {
    pub tick_period: Duration,
    pub rules: RuleSet,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_secs(1),
            rules: RuleSet::default(),
        }
    }
}

/// What to run
#[derive(Clone, Debug)]
pub struct RunRequest {
    pub session: Session,
    pub session_override: Option<SessionOverride>,
    pub schedule_entry_id: Option<Uuid>,
}

impl RunRequest {
    pub fn for_session(session: Session) -> Self {
        Self {
            session,
            session_override: None,
            schedule_entry_id: None,
        }
    }

    pub fn from_entry(entry: &ScheduleEntry, session: Session) -> Self {
        Self {
            session,
            session_override: entry.session_override.clone(),
            schedule_entry_id: Some(entry.id),
        }
    }
}

/// Result of trying to complete a WORK step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepCompletion {
    /// Nothing was logged; ask the athlete before finalizing an empty block
    NeedsConfirmation,
    Advanced { next_index: usize },
}

/// Result of a finished session
#[derive(Clone, Debug)]
pub struct SessionOutcome {
    pub run_id: Uuid,
    pub analysis: SessionAnalysis,
    /// Short summary written to the schedule entry
    pub summary: String,
    /// Best-effort follow-ups (schedule update, notification) that failed
    pub warnings: Vec<String>,
}

// ============================================================================
// Run state
// ============================================================================

struct ActiveTimer {
    timer: SharedTimer,
    driver: Option<TimerDriver>,
}

impl ActiveTimer {
    async fn stop_driver(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.stop().await;
        }
    }
}

type LookupTask = JoinHandle<Result<Option<HistoricalLog>>>;

/// One-shot history lookups, spawned on first entry to a WORK step
struct HistoryLookups {
    run_id: Uuid,
    requested: HashSet<String>,
    tasks: HashMap<String, LookupTask>,
    index: HistoryIndex,
}

impl HistoryLookups {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            requested: HashSet::new(),
            tasks: HashMap::new(),
            index: HistoryIndex::new(),
        }
    }

    fn request(&mut self, source: &Arc<dyn HistorySource>, module_stable_id: &str) {
        if !self.requested.insert(module_stable_id.to_string()) {
            return;
        }
        let source = Arc::clone(source);
        let stable_id = module_stable_id.to_string();
        let task = tokio::spawn(async move { source.latest_for_module(&stable_id).await });
        self.tasks.insert(module_stable_id.to_string(), task);
        tracing::debug!("Spawned history lookup for {}", module_stable_id);
    }

    /// Wait for a lookup; failures and empty results mean "no history"
    async fn resolve(&mut self, module_stable_id: &str) -> Option<&HistoricalLog> {
        if let Some(task) = self.tasks.remove(module_stable_id) {
            match task.await {
                // Results from this very run are not history
                Ok(Ok(Some(log))) if log.result.run_id != self.run_id => {
                    self.index.insert(module_stable_id.to_string(), log);
                }
                Ok(Ok(_)) => {
                    tracing::debug!("No history for {}", module_stable_id);
                }
                Ok(Err(e)) => {
                    tracing::warn!("History lookup for {} failed: {}", module_stable_id, e);
                }
                Err(e) if !e.is_cancelled() => {
                    tracing::warn!("History lookup task for {} failed: {}", module_stable_id, e);
                }
                Err(_) => {}
            }
        }
        self.index.get(module_stable_id)
    }

    async fn resolve_all(&mut self) {
        let pending: Vec<String> = self.tasks.keys().cloned().collect();
        for stable_id in pending {
            self.resolve(&stable_id).await;
        }
    }

    fn abort_all(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

impl Drop for HistoryLookups {
    fn drop(&mut self) {
        self.abort_all();
    }
}

/// Everything mutable about one session attempt
pub struct SessionRunState {
    run_id: Uuid,
    session: Session,
    schedule_entry_id: Option<Uuid>,
    timeline: Vec<TimelineStep>,
    current_index: usize,
    weight_plans: HashMap<String, f64>,
    drafts: BTreeMap<usize, DraftResult>,
    results: BTreeMap<usize, WorkResult>,
    pending: BTreeSet<usize>,
    history: HistoryLookups,
    active: Option<ActiveTimer>,
    resources_acquired: bool,
    resources: Vec<ResourceGuard>,
    cardio: Option<CardioRecord>,
    analysis: Option<SessionAnalysis>,
    session_recorded: bool,
    closed: bool,
}

impl SessionRunState {
    fn new(request: RunRequest) -> Self {
        let run_id = Uuid::new_v4();
        let timeline = build_timeline(&request.session, request.session_override.as_ref());
        Self {
            run_id,
            session: request.session,
            schedule_entry_id: request.schedule_entry_id,
            timeline,
            current_index: 0,
            weight_plans: HashMap::new(),
            drafts: BTreeMap::new(),
            results: BTreeMap::new(),
            pending: BTreeSet::new(),
            history: HistoryLookups::new(run_id),
            active: None,
            resources_acquired: false,
            resources: Vec::new(),
            cardio: None,
            analysis: None,
            session_recorded: false,
            closed: false,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn schedule_entry_id(&self) -> Option<Uuid> {
        self.schedule_entry_id
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn weight_plan(&self, exercise_stable_id: &str) -> Option<f64> {
        self.weight_plans.get(exercise_stable_id).copied()
    }

    pub fn draft(&self, step_index: usize) -> Option<&DraftResult> {
        self.drafts.get(&step_index)
    }

    pub fn result(&self, step_index: usize) -> Option<&WorkResult> {
        self.results.get(&step_index)
    }

    /// Finalized results in step order
    pub fn results(&self) -> impl Iterator<Item = &WorkResult> {
        self.results.values()
    }

    /// Finalized results not yet written to the work log
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn history(&self, module_stable_id: &str) -> Option<&HistoricalLog> {
        self.history.index.get(module_stable_id)
    }

    pub fn resources_held(&self) -> usize {
        self.resources.len()
    }

    pub fn cardio(&self) -> Option<&CardioRecord> {
        self.cardio.as_ref()
    }

    pub fn analysis(&self) -> Option<&SessionAnalysis> {
        self.analysis.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

// ============================================================================
// Runner
// ============================================================================

/// Drives one session attempt
pub struct SessionRunner {
    state: SessionRunState,
    collaborators: Collaborators,
    options: RunnerOptions,
    cues: CueSender,
}

impl SessionRunner {
    /// Build the timeline and position the runner on its first step.
    ///
    /// The receiver yields timer cues; dropping it just silences them.
    pub fn new(
        request: RunRequest,
        collaborators: Collaborators,
        options: RunnerOptions,
    ) -> (Self, mpsc::UnboundedReceiver<CueEvent>) {
        let (cues, rx) = mpsc::unbounded_channel();
        let mut runner = Self {
            state: SessionRunState::new(request),
            collaborators,
            options,
            cues,
        };
        runner.enter_current();
        tracing::info!(
            "Starting run {} of session '{}' ({} steps)",
            runner.state.run_id,
            runner.state.session.id,
            runner.state.timeline.len()
        );
        (runner, rx)
    }

    pub fn timeline(&self) -> &[TimelineStep] {
        &self.state.timeline
    }

    pub fn current_index(&self) -> usize {
        self.state.current_index
    }

    pub fn current_step(&self) -> &TimelineStep {
        &self.state.timeline[self.state.current_index]
    }

    pub fn state(&self) -> &SessionRunState {
        &self.state
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.closed {
            return Err(Error::State("Session has been exited".into()));
        }
        Ok(())
    }

    fn current_work_index(&self) -> Result<usize> {
        self.ensure_open()?;
        match self.current_step().kind() {
            StepKind::Work => Ok(self.state.current_index),
            other => Err(Error::State(format!(
                "Current step {} is {:?}, not a WORK step",
                self.state.current_index, other
            ))),
        }
    }

    /// Pre-session plan value for an exercise; `None` clears it
    pub fn plan_weight(&mut self, exercise_stable_id: &str, weight_kg: Option<f64>) -> Result<()> {
        self.ensure_open()?;
        match weight_kg.filter(|w| w.is_finite() && *w > 0.0) {
            Some(w) => {
                self.state.weight_plans.insert(exercise_stable_id.to_string(), w);
            }
            None => {
                self.state.weight_plans.remove(exercise_stable_id);
            }
        }
        Ok(())
    }

    /// Move past a PLANNING or WARMUP step
    pub async fn advance(&mut self) -> Result<usize> {
        self.ensure_open()?;
        match self.current_step().kind() {
            StepKind::Work => Err(Error::State(
                "Complete or skip the current block before moving on".into(),
            )),
            StepKind::Summary => Err(Error::State("Already at the summary step".into())),
            StepKind::Planning | StepKind::Warmup => self.move_to_next().await,
        }
    }

    async fn move_to_next(&mut self) -> Result<usize> {
        let next = self.state.current_index + 1;
        if next >= self.state.timeline.len() {
            return Err(Error::State("No step after the current one".into()));
        }
        if let Some(mut active) = self.state.active.take() {
            active.stop_driver().await;
        }
        self.state.current_index = next;
        self.enter_current();
        Ok(next)
    }

    fn enter_current(&mut self) {
        let idx = self.state.current_index;
        let step = &self.state.timeline[idx];
        tracing::info!("Entered step {} ({:?})", idx, step.kind());

        let Some(module) = step.work_module().cloned() else {
            return;
        };

        let run_id = self.state.run_id;
        self.state
            .drafts
            .entry(idx)
            .or_insert_with(|| DraftResult::new(run_id, idx, &module));
        self.state
            .history
            .request(&self.collaborators.history, &module.stable_id);
        self.state.active = Some(ActiveTimer {
            timer: Arc::new(Mutex::new(BlockTimer::for_module(&module))),
            driver: None,
        });
    }

    fn acquire_resources(&mut self) {
        if self.state.resources_acquired {
            return;
        }
        self.state.resources_acquired = true;
        for resource in &self.collaborators.resources {
            match ResourceGuard::acquire(Arc::clone(resource)) {
                Ok(guard) => self.state.resources.push(guard),
                Err(e) => tracing::warn!("Could not acquire {}: {}", resource.name(), e),
            }
        }
    }

    /// Start or resume the active block's timer.
    ///
    /// Never waits on history lookups. The first call acquires the
    /// presentation resources.
    pub async fn start_timer(&mut self) -> Result<TimerSnapshot> {
        let idx = self.current_work_index()?;
        self.acquire_resources();

        let period = self.options.tick_period;
        let active = self
            .state
            .active
            .as_mut()
            .ok_or_else(|| Error::State("No active timer".into()))?;

        let (snapshot, clocked) = {
            let mut timer = active.timer.lock().await;
            timer.start();
            let clocked = timer.protocol() != Protocol::Libre && !timer.is_complete();
            (timer.snapshot(), clocked)
        };

        let driver_idle = active.driver.as_ref().map(|d| d.is_finished()).unwrap_or(true);
        if clocked && driver_idle {
            active.driver = Some(TimerDriver::spawn(
                Arc::clone(&active.timer),
                period,
                idx,
                self.cues.clone(),
            ));
        }
        Ok(snapshot)
    }

    /// Pause the timer, preserving its exact value
    pub async fn pause_timer(&mut self) -> Result<TimerSnapshot> {
        let idx = self.current_work_index()?;
        let active = self
            .state
            .active
            .as_mut()
            .ok_or_else(|| Error::State("No active timer".into()))?;

        active.stop_driver().await;
        let snapshot = {
            let mut timer = active.timer.lock().await;
            timer.pause();
            timer.snapshot()
        };

        if let Some(draft) = self.state.drafts.get_mut(&idx) {
            draft.set_elapsed(snapshot.elapsed_seconds);
        }
        Ok(snapshot)
    }

    pub async fn reset_timer(&mut self) -> Result<TimerSnapshot> {
        let idx = self.current_work_index()?;
        let active = self
            .state
            .active
            .as_mut()
            .ok_or_else(|| Error::State("No active timer".into()))?;

        active.stop_driver().await;
        let snapshot = {
            let mut timer = active.timer.lock().await;
            timer.reset();
            timer.snapshot()
        };

        if let Some(draft) = self.state.drafts.get_mut(&idx) {
            draft.set_elapsed(0);
        }
        Ok(snapshot)
    }

    pub async fn timer_snapshot(&self) -> Option<TimerSnapshot> {
        match &self.state.active {
            Some(active) => Some(active.timer.lock().await.snapshot()),
            None => None,
        }
    }

    /// Mutable draft of the current WORK step
    pub fn draft_mut(&mut self) -> Result<&mut DraftResult> {
        let idx = self.current_work_index()?;
        self.state
            .drafts
            .get_mut(&idx)
            .ok_or_else(|| Error::State(format!("No draft for step {}", idx)))
    }

    /// Adjust reps for an exercise; R blocks stop once every target is met
    pub async fn record_reps(&mut self, exercise_index: usize, delta: i32) -> Result<u32> {
        let idx = self.current_work_index()?;
        let (reps, all_reps) = {
            let draft = self.draft_mut()?;
            let reps = draft.add_reps(exercise_index, delta)?;
            (reps, draft.reps())
        };

        let Some(active) = self.state.active.as_mut() else {
            return Ok(reps);
        };

        let reached = {
            let mut timer = active.timer.lock().await;
            timer
                .observe_reps(&all_reps)
                .map(|cue| (cue, timer.snapshot()))
        };

        if let Some((cue, snapshot)) = reached {
            active.stop_driver().await;
            let _ = self.cues.send(CueEvent {
                step_index: idx,
                cue,
                snapshot,
            });
            if let Some(draft) = self.state.drafts.get_mut(&idx) {
                draft.set_elapsed(snapshot.elapsed_seconds);
            }
        }
        Ok(reps)
    }

    /// Seed weight fields of the current block from history or plan values.
    ///
    /// Waits for this block's history lookup; fields the athlete already
    /// edited are left alone. `complete_step` seeds too, so calling this
    /// only matters for showing the seeded values early.
    pub async fn seed_weights(&mut self) -> Result<Vec<WeightSeed>> {
        let idx = self.current_work_index()?;
        self.seed_step(idx).await
    }

    async fn seed_step(&mut self, idx: usize) -> Result<Vec<WeightSeed>> {
        let module = self.state.timeline[idx]
            .work_module()
            .cloned()
            .ok_or_else(|| Error::State(format!("Step {} has no module", idx)))?;

        let history = self.state.history.resolve(&module.stable_id).await.cloned();

        let draft = self
            .state
            .drafts
            .get_mut(&idx)
            .ok_or_else(|| Error::State(format!("No draft for step {}", idx)))?;

        let seeds = module
            .exercises
            .iter()
            .enumerate()
            .map(|(i, exercise)| {
                let seed = progression::seed_weight(
                    history.as_ref(),
                    self.state.weight_plans.get(&exercise.stable_id).copied(),
                    &exercise.stable_id,
                );
                draft.seed_weight(i, seed.weight_kg());
                seed
            })
            .collect();
        Ok(seeds)
    }

    pub fn toggle_round(&mut self, round: u32) -> Result<RoundOutcome> {
        self.draft_mut()?.toggle_round(round)
    }

    /// Finalize the current WORK step with its feedback and advance.
    ///
    /// An empty draft returns `NeedsConfirmation` unless `confirm_empty` is
    /// set. A failed write returns a retryable `Error::Persistence` and
    /// leaves the index on this step.
    pub async fn complete_step(
        &mut self,
        feedback: FeedbackCapture,
        confirm_empty: bool,
    ) -> Result<StepCompletion> {
        let idx = self.current_work_index()?;
        if self.state.results.contains_key(&idx) {
            let next_index = self.retry_persistence().await?;
            return Ok(StepCompletion::Advanced { next_index });
        }

        if let Some(snapshot) = self.timer_snapshot().await {
            if let Some(draft) = self.state.drafts.get_mut(&idx) {
                draft.set_elapsed(snapshot.elapsed_seconds);
            }
        }

        let draft = self
            .state
            .drafts
            .get(&idx)
            .ok_or_else(|| Error::State(format!("No draft for step {}", idx)))?;

        if !draft.has_logged_work() && !confirm_empty {
            tracing::debug!("Step {} has no logged work, asking for confirmation", idx);
            return Ok(StepCompletion::NeedsConfirmation);
        }

        self.seed_step(idx).await?;
        let result = self
            .state
            .drafts
            .get(&idx)
            .ok_or_else(|| Error::State(format!("No draft for step {}", idx)))?
            .clone()
            .finalize(feedback)?;
        self.state.drafts.remove(&idx);
        self.finish_step(idx, result).await
    }

    /// Skip the current WORK step, discarding its numbers
    pub async fn skip_step(&mut self) -> Result<StepCompletion> {
        let idx = self.current_work_index()?;
        if self.state.results.contains_key(&idx) {
            let next_index = self.retry_persistence().await?;
            return Ok(StepCompletion::Advanced { next_index });
        }

        let mut draft = match self.state.drafts.remove(&idx) {
            Some(draft) => draft,
            None => {
                let module = self.state.timeline[idx]
                    .work_module()
                    .ok_or_else(|| Error::State(format!("Step {} has no module", idx)))?;
                DraftResult::new(self.state.run_id, idx, module)
            }
        };
        draft.skip();
        let result = draft.finalize(FeedbackCapture::Skipped)?;
        tracing::info!("Skipped block {} at step {}", result.module_stable_id, idx);
        self.finish_step(idx, result).await
    }

    async fn finish_step(&mut self, idx: usize, result: WorkResult) -> Result<StepCompletion> {
        if let Some(active) = self.state.active.as_mut() {
            active.stop_driver().await;
            active.timer.lock().await.pause();
        }

        self.state.results.insert(idx, result);
        self.state.pending.insert(idx);
        self.state.analysis = None;

        self.flush_pending().await?;
        let next_index = self.move_to_next().await?;
        Ok(StepCompletion::Advanced { next_index })
    }

    async fn flush_pending(&mut self) -> Result<()> {
        let pending: Vec<usize> = self.state.pending.iter().copied().collect();
        for idx in pending {
            if let Some(result) = self.state.results.get(&idx) {
                if let Err(e) = self.collaborators.work_log.append_result(result).await {
                    tracing::warn!("Failed to persist result for step {}: {}", idx, e);
                    return Err(Error::persistence(e));
                }
            }
            self.state.pending.remove(&idx);
        }
        Ok(())
    }

    /// Write pending results again; advances past a finalized WORK step.
    ///
    /// Returns the current index afterwards.
    pub async fn retry_persistence(&mut self) -> Result<usize> {
        self.ensure_open()?;
        self.flush_pending().await?;

        let idx = self.state.current_index;
        let finalized_here = self.current_step().kind() == StepKind::Work
            && self.state.results.contains_key(&idx);
        if finalized_here {
            return self.move_to_next().await;
        }
        Ok(idx)
    }

    /// Attach a whole-session cardio record; pure-cardio sessions only
    pub fn record_cardio(&mut self, record: CardioRecord) -> Result<()> {
        self.ensure_open()?;
        if !self.state.session.pure_cardio {
            return Err(Error::Validation(format!(
                "Session '{}' is not a pure cardio session",
                self.state.session.id
            )));
        }
        self.state.cardio = Some(record);
        self.state.analysis = None;
        Ok(())
    }

    /// Run the analysis engine over every finalized result
    pub async fn analyze(&mut self) -> Result<&SessionAnalysis> {
        self.ensure_open()?;
        self.state.history.resolve_all().await;

        let results: Vec<WorkResult> = self.state.results.values().cloned().collect();
        let analysis = analysis::analyze(
            &results,
            &self.state.timeline,
            &self.state.history.index,
            self.state.cardio.as_ref().filter(|_| self.state.session.pure_cardio),
            &self.options.rules,
        );
        let analysis = self.state.analysis.insert(analysis);
        Ok(&*analysis)
    }

    /// Persist everything, update the schedule, notify the coach and exit.
    ///
    /// Failing to write results or the session record is an error; the
    /// analysis stays available and the call can be retried. Schedule and
    /// notification failures only produce warnings.
    pub async fn finish_session(&mut self) -> Result<SessionOutcome> {
        self.ensure_open()?;
        if self.current_step().kind() != StepKind::Summary {
            return Err(Error::State(
                "The session can only be finished from the summary step".into(),
            ));
        }

        if self.state.analysis.is_none() {
            self.analyze().await?;
        }
        let analysis = self.state.analysis.clone().unwrap_or_default();

        self.flush_pending().await?;

        if !self.state.session_recorded {
            let record = SessionRecord {
                run_id: self.state.run_id,
                session_id: self.state.session.id.clone(),
                schedule_entry_id: self.state.schedule_entry_id,
                completed_at: Utc::now(),
                metrics: analysis.metrics.clone(),
                insights: analysis.insights.clone(),
            };
            if let Err(e) = self.collaborators.work_log.append_session(&record).await {
                tracing::warn!("Failed to persist session record: {}", e);
                return Err(Error::persistence(e));
            }
            self.state.session_recorded = true;
        }

        let summary = self.summary_line(&analysis);
        let mut warnings = Vec::new();

        if let Some(entry_id) = self.state.schedule_entry_id {
            if let Err(e) = self.collaborators.schedule.mark_completed(entry_id, &summary).await {
                tracing::warn!("Failed to mark schedule entry {} completed: {}", entry_id, e);
                warnings.push(format!("Schedule update failed: {}", e));
            }
        }

        let notification =
            CoachNotification::from_analysis(self.state.run_id, &self.state.session.id, &analysis);
        if !notification.lines.is_empty() {
            if let Err(e) = self.collaborators.notifier.dispatch(&notification).await {
                tracing::warn!("Failed to notify coach: {}", e);
                warnings.push(format!("Coach notification failed: {}", e));
            }
        }

        let outcome = SessionOutcome {
            run_id: self.state.run_id,
            analysis,
            summary,
            warnings,
        };
        self.exit().await;
        Ok(outcome)
    }

    fn summary_line(&self, analysis: &SessionAnalysis) -> String {
        let done = self.state.results.values().filter(|r| !r.skipped).count();
        let skipped = self.state.results.len() - done;
        let mut summary = format!(
            "{}: {} blocks done, {} skipped, volume {:.0} kg, efficiency {:.0}%",
            self.state.session.name,
            done,
            skipped,
            analysis.metrics.total_volume,
            analysis.metrics.efficiency_percent
        );
        if let Some(pace) = &analysis.metrics.cardio_pace {
            summary.push_str(&format!(", pace {}", pace));
        }
        summary
    }

    /// Leave the session: stop the timer, release resources, drop drafts
    pub async fn exit(&mut self) {
        if self.state.closed {
            return;
        }
        if let Some(mut active) = self.state.active.take() {
            active.stop_driver().await;
        }
        self.state.history.abort_all();
        self.state.drafts.clear();
        self.state.resources.clear();
        self.state.closed = true;
        tracing::info!("Exited run {}", self.state.run_id);
    }
}
