//! Tick driver for the active block timer.
//!
//! The driver is a cancellable tokio task that ticks the shared timer once
//! per period and forwards cues over an unbounded channel. It is started and
//! stopped explicitly by the session runner; nothing about it depends on a
//! rendering loop.

use crate::timer::{BlockTimer, Cue, ProtocolTimer, TimerSnapshot};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Timer shared between the runner and its driver task
pub type SharedTimer = Arc<Mutex<BlockTimer>>;

/// A cue tagged with the step that produced it
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub struct CueEvent {
    pub step_index: usize,
    pub cue: Cue,
    pub snapshot: TimerSnapshot,
}

/// Sender half used for fire-and-forget cue delivery
pub type CueSender = mpsc::UnboundedSender<CueEvent>;

/// Handle to a running tick task
pub struct TimerDriver {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl TimerDriver {
    /// Spawn the tick loop. The first tick lands one `period` after spawning.
    pub fn spawn(timer: SharedTimer, period: Duration, step_index: usize, cues: CueSender) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let (emitted, snapshot, done) = {
                            let mut guard = timer.lock().await;
                            let emitted = guard.tick();
                            (emitted, guard.snapshot(), guard.is_complete())
                        };

                        for cue in emitted {
                            // A closed receiver only means nobody is listening
                            let _ = cues.send(CueEvent { step_index, cue, snapshot });
                        }

                        if done {
                            tracing::debug!("Timer for step {} completed, driver exiting", step_index);
                            break;
                        }
                    }
                    _ = &mut shutdown_rx => {
                        tracing::debug!("Timer driver for step {} received shutdown signal", step_index);
                        break;
                    }
                }
            }
        });

        Self {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }

    /// Whether the tick task has exited
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map(|t| t.is_finished()).unwrap_or(true)
    }

    /// Stop delivering ticks and wait for the task to exit
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::warn!("Timer driver task failed: {}", e);
                }
            }
        }
    }
}

impl Drop for TimerDriver {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
