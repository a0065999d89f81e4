// src/controller/state.rs

//! Supervisory execution state.
//!
//! One `ExecutionState` per controller, always accessed through a single
//! mutex ([`SharedState`]). "Executing" and "has a runner handle" are the
//! same fact here: both are `active.is_some()`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::debug;

use super::cancel::CancelToken;

pub type SharedState = Arc<Mutex<ExecutionState>>;

/// Lock the shared state, recovering from poisoning: every mutation below
/// leaves the struct consistent, so a panic elsewhere can't corrupt it.
pub fn lock_state(state: &SharedState) -> MutexGuard<'_, ExecutionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Where the active run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// The runner owns the run.
    Running,
    /// The runner left its loop and is reporting.
    Finishing,
    /// The watchdog (or a forced reset) claimed the run and is recovering it.
    Abandoned,
}

/// The run currently holding the execution slot.
#[derive(Debug)]
pub struct ActiveRun {
    pub run_id: u64,
    pub started_at: Instant,
    pub started_wall: SystemTime,
    pub count: u32,
    pub wait_seconds: u64,
    pub phase: RunPhase,
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

impl ActiveRun {
    pub fn new(
        run_id: u64,
        count: u32,
        wait_seconds: u64,
        cancel: CancelToken,
        handle: JoinHandle<()>,
    ) -> Self {
        Self {
            run_id,
            started_at: Instant::now(),
            started_wall: SystemTime::now(),
            count,
            wait_seconds,
            phase: RunPhase::Running,
            cancel,
            handle,
        }
    }

    pub fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// A run taken over by the watchdog or a forced reset.
#[derive(Debug)]
pub struct RunClaim {
    pub run_id: u64,
    pub cancel: CancelToken,
    pub abort: AbortHandle,
    pub started_at: Instant,
}

/// Point-in-time view of the state, for diagnostics and dispatch decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSnapshot {
    pub is_executing: bool,
    pub run_id: Option<u64>,
    pub phase: Option<RunPhase>,
    pub started_at: Option<SystemTime>,
    pub retry_count: u32,
    pub runner_alive: bool,
    pub last_report_ms: Option<u64>,
}

#[derive(Debug, Default)]
pub struct ExecutionState {
    active: Option<ActiveRun>,
    retry_count: u32,
    run_counter: u64,
    last_report_ms: Option<u64>,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedState {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn is_executing(&self) -> bool {
        self.active.is_some()
    }

    pub fn active(&self) -> Option<&ActiveRun> {
        self.active.as_ref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// `updatedAt` of the controller's most recent successful report.
    pub fn last_report_ms(&self) -> Option<u64> {
        self.last_report_ms
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            is_executing: self.is_executing(),
            run_id: self.active.as_ref().map(|r| r.run_id),
            phase: self.active.as_ref().map(|r| r.phase),
            started_at: self.active.as_ref().map(|r| r.started_wall),
            retry_count: self.retry_count,
            runner_alive: self.active.as_ref().is_some_and(ActiveRun::is_alive),
            last_report_ms: self.last_report_ms,
        }
    }

    pub fn next_run_id(&mut self) -> u64 {
        self.run_counter += 1;
        self.run_counter
    }

    /// Install a freshly spawned run. The caller checked `!is_executing()`
    /// under the same lock.
    pub fn begin_run(&mut self, run: ActiveRun) {
        debug_assert!(self.active.is_none(), "a run is already active");
        debug!(run_id = run.run_id, count = run.count, wait = run.wait_seconds, "run started");
        self.active = Some(run);
    }

    /// Runner side: move `run_id` from `Running` to `Finishing`.
    ///
    /// Returns `false` if the run was claimed or replaced, in which case the
    /// runner must neither report nor release.
    pub fn begin_finish(&mut self, run_id: u64) -> bool {
        match self.active.as_mut() {
            Some(run) if run.run_id == run_id && run.phase == RunPhase::Running => {
                run.phase = RunPhase::Finishing;
                true
            }
            _ => false,
        }
    }

    /// Runner side: free the slot after reporting. A clean completion resets
    /// the retry counter.
    pub fn release_finished(&mut self, run_id: u64, report_ms: Option<u64>) -> bool {
        if !self.is_current(run_id, RunPhase::Finishing) {
            return false;
        }
        self.active = None;
        self.retry_count = 0;
        self.note_report(report_ms);
        true
    }

    /// Runner side: free the slot of a run that executed nothing and wrote
    /// nothing. Neither the retry counter nor the report stamp changes.
    pub fn release_unreported(&mut self, run_id: u64) -> bool {
        if !self.is_current(run_id, RunPhase::Finishing) {
            return false;
        }
        self.active = None;
        true
    }

    /// Watchdog / reset side: take over a `Running` run.
    ///
    /// With `count_retry` the retry counter is bumped; the new value is
    /// returned alongside the claim.
    pub fn claim(&mut self, run_id: u64, count_retry: bool) -> Option<(RunClaim, u32)> {
        let run = self.active.as_mut()?;
        if run.run_id != run_id || run.phase != RunPhase::Running {
            return None;
        }
        run.phase = RunPhase::Abandoned;
        let claim = RunClaim {
            run_id,
            cancel: run.cancel.clone(),
            abort: run.handle.abort_handle(),
            started_at: run.started_at,
        };
        if count_retry {
            self.retry_count = self.retry_count.saturating_add(1);
        }
        Some((claim, self.retry_count))
    }

    /// Recovery side: free an abandoned run's slot. With `escalated` the
    /// retry counter is cleared as part of the hard reset.
    pub fn release_abandoned(&mut self, run_id: u64, report_ms: Option<u64>, escalated: bool) -> bool {
        if !self.is_current(run_id, RunPhase::Abandoned) {
            return false;
        }
        self.active = None;
        if escalated {
            self.retry_count = 0;
        }
        self.note_report(report_ms);
        true
    }

    /// Whether the runner task of `run_id` has terminated (or the run is gone).
    pub fn runner_finished(&self, run_id: u64) -> bool {
        match self.active.as_ref() {
            Some(run) if run.run_id == run_id => !run.is_alive(),
            _ => true,
        }
    }

    /// Cooperatively cancel whatever run is active.
    pub fn cancel_active(&self) -> Option<u64> {
        let run = self.active.as_ref()?;
        run.cancel.cancel();
        Some(run.run_id)
    }

    /// Hard reset: forget counters and, if nothing is running, everything.
    ///
    /// A run accepted after the escalating timeout is left alone.
    pub fn hard_reset(&mut self) {
        self.retry_count = 0;
        if let Some(run) = self.active.as_ref() {
            debug!(run_id = run.run_id, "hard reset keeps newly started run");
        }
    }

    pub fn note_report(&mut self, report_ms: Option<u64>) {
        if let Some(ms) = report_ms {
            self.last_report_ms = Some(self.last_report_ms.map_or(ms, |prev| prev.max(ms)));
        }
    }

    fn is_current(&self, run_id: u64, phase: RunPhase) -> bool {
        matches!(self.active.as_ref(), Some(run) if run.run_id == run_id && run.phase == phase)
    }
}
