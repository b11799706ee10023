//! The daemon loop: wait, observe, select, execute, record.
//!
//! Cycles never overlap. Blocking work (probing, handler runs, audit writes
//! with their fsync) is moved onto
//! tokio's blocking pool and awaited before the loop moves on, so the engine
//! and its exclusion memory are only ever touched from this task.
//!
//! Every per-cycle failure is logged and folded into a `CycleOutcome`; nothing
//! that happens inside a cycle stops the loop.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::sync::watch;

use crate::audit::AuditSink;
use crate::config::ScheduleConfig;
use crate::engine::{Selection, SelectionEngine};
use crate::error::{Error, Result};
use crate::probe::StateProbe;
use crate::registry::{ActionRegistry, Handler};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Waiting,
    Acting,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// No eligible rule, or no snapshot could be taken.
    Idle,
    /// The handler succeeded. `audited` is false if the audit write failed.
    Executed { action_id: String, audited: bool },
    /// Resolution or execution failed; nothing was audited.
    Failed { action_id: String, error: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub cycles: u64,
    pub executed: u64,
    pub failed: u64,
    pub idle: u64,
}

impl RunSummary {
    fn count(&mut self, outcome: &CycleOutcome) {
        self.cycles += 1;
        match outcome {
            CycleOutcome::Idle => self.idle += 1,
            CycleOutcome::Executed { .. } => self.executed += 1,
            CycleOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct Scheduler<S: AuditSink + 'static> {
    engine: SelectionEngine,
    registry: ActionRegistry,
    probe: Arc<dyn StateProbe>,
    sink: Arc<Mutex<S>>,
    schedule: ScheduleConfig,
    jitter: StdRng,
    max_cycles: Option<u64>,
    state: LoopState,
}

impl<S: AuditSink + 'static> Scheduler<S> {
    pub fn new(
        engine: SelectionEngine,
        registry: ActionRegistry,
        probe: Arc<dyn StateProbe>,
        sink: S,
        schedule: ScheduleConfig,
    ) -> Result<Self> {
        schedule.validate()?;
        Ok(Self {
            engine,
            registry,
            probe,
            sink: Arc::new(Mutex::new(sink)),
            schedule,
            jitter: StdRng::from_entropy(),
            max_cycles: None,
            state: LoopState::Waiting,
        })
    }

    /// Stop after `n` cycles instead of running until shutdown.
    pub fn with_max_cycles(mut self, n: u64) -> Self {
        self.max_cycles = Some(n);
        self
    }

    /// Seed the interval sampler.
    pub fn with_jitter_seed(mut self, seed: u64) -> Self {
        self.jitter = StdRng::seed_from_u64(seed);
        self
    }

    pub fn engine(&self) -> &SelectionEngine {
        &self.engine
    }

    pub fn sink(&self) -> MutexGuard<'_, S> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Uniform sample from `[min_interval_secs, max_interval_secs]`.
    pub fn next_interval(&mut self) -> Duration {
        let secs = self
            .jitter
            .gen_range(self.schedule.min_interval_secs..=self.schedule.max_interval_secs);
        Duration::from_secs(secs)
    }

    fn transition(&mut self, to: LoopState) {
        if self.state != to {
            tracing::trace!(from = ?self.state, to = ?to, "loop state");
            self.state = to;
        }
    }

    /// Loop until `shutdown` flips to `true` (or its sender is dropped), or
    /// until the configured cycle limit is reached. The wait between cycles
    /// is interrupted immediately by a shutdown signal.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> RunSummary {
        let mut summary = RunSummary::default();
        loop {
            if self.max_cycles.is_some_and(|max| summary.cycles >= max) {
                break;
            }
            if *shutdown.borrow() {
                break;
            }

            self.transition(LoopState::Waiting);
            let interval = self.next_interval();
            tracing::debug!(interval_secs = interval.as_secs(), "waiting for next cycle");
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let outcome = self.run_cycle().await;
            summary.count(&outcome);
        }
        self.transition(LoopState::Waiting);
        tracing::info!(
            cycles = summary.cycles,
            executed = summary.executed,
            failed = summary.failed,
            "scheduler stopped"
        );
        summary
    }

    /// One Acting pass. Never returns an error; failures become outcomes.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.transition(LoopState::Acting);

        let probe = Arc::clone(&self.probe);
        let state = match tokio::task::spawn_blocking(move || probe.observe()).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "state probe panicked; skipping cycle");
                return CycleOutcome::Idle;
            }
        };

        let action_id = match self.engine.select(&state) {
            Selection::Chosen(id) => id,
            Selection::None => {
                tracing::debug!(facts = state.len(), "no eligible rule this cycle");
                return CycleOutcome::Idle;
            }
        };
        tracing::info!(action_id = %action_id, "selected action");

        let handler = match self.registry.resolve(&action_id) {
            Ok(h) => h,
            Err(e) => {
                tracing::error!(
                    action_id = %action_id,
                    error = %e,
                    "rule has no registered handler; rule set and registry disagree"
                );
                return CycleOutcome::Failed {
                    action_id,
                    error: e.to_string(),
                };
            }
        };

        if let Err(e) = execute(&action_id, handler, self.schedule.handler_timeout_secs).await {
            tracing::warn!(action_id = %action_id, error = %e, "action failed");
            return CycleOutcome::Failed {
                action_id,
                error: e.to_string(),
            };
        }

        let sink = Arc::clone(&self.sink);
        let id = action_id.clone();
        let at = Utc::now();
        let written = tokio::task::spawn_blocking(move || {
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .record(&id, at)
        })
        .await
        .unwrap_or_else(|e| Err(Error::Sink(format!("audit write panicked: {e}"))));
        let audited = match written {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(action_id = %action_id, error = %e, "audit record was not written");
                false
            }
        };
        tracing::info!(action_id = %action_id, audited, "action completed");
        CycleOutcome::Executed { action_id, audited }
    }
}

async fn execute(action_id: &str, handler: Arc<dyn Handler>, timeout_secs: Option<u64>) -> Result<()> {
    let task = tokio::task::spawn_blocking(move || handler.run());
    let joined = match timeout_secs {
        // A timed-out handler keeps running on the blocking pool; the loop
        // just stops waiting for it.
        Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), task).await {
            Ok(joined) => joined,
            Err(_) => {
                return Err(Error::Action {
                    action: action_id.to_string(),
                    reason: format!("timed out after {secs}s"),
                })
            }
        },
        None => task.await,
    };
    joined.map_err(|e| Error::Action {
        action: action_id.to_string(),
        reason: format!("handler panicked: {e}"),
    })?
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
