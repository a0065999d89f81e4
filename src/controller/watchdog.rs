// src/controller/watchdog.rs

//! Deadline supervision of the active run.
//!
//! Evaluation is cheap and synchronous: it runs on every notification that
//! arrives while a run is active, plus on the controller's periodic tick.
//! On expiry the run is claimed under the state lock (so only one party
//! ever recovers it) and the slow part runs on a spawned [`Recovery`].

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::WatchdogSection;

use super::recovery::{Recovery, RecoveryReason};
use super::state::{RunPhase, SharedState, lock_state};

/// Deadline for a sequence of `count` iterations with `wait_secs` between
/// them.
///
/// The estimate `count * (wait + per_iteration_budget)` is floored at the
/// base timeout, padded by the safety margin and capped at the hard cap.
pub fn deadline_for(count: u32, wait_secs: u64, policy: &WatchdogSection) -> Duration {
    let count = u64::from(count);
    let estimated_secs = count
        .saturating_mul(wait_secs)
        .saturating_add(count.saturating_mul(policy.per_iteration_budget_secs));
    let ms = estimated_secs
        .max(policy.base_timeout_secs)
        .saturating_mul(1000)
        .saturating_add(policy.safety_margin_ms);
    Duration::from_millis(ms.min(policy.hard_cap_ms))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogVerdict {
    /// Nothing is executing.
    Idle,
    /// The active run is already finishing or being recovered.
    Busy { run_id: u64, phase: RunPhase },
    WithinBudget {
        run_id: u64,
        elapsed: Duration,
        deadline: Duration,
    },
    /// The run was claimed and a recovery spawned.
    Expired {
        run_id: u64,
        attempt: u32,
        escalate: bool,
    },
}

#[derive(Debug, Clone)]
pub struct WatchdogMonitor {
    policy: WatchdogSection,
    state: SharedState,
    recovery: Recovery,
}

impl WatchdogMonitor {
    pub fn new(policy: WatchdogSection, state: SharedState, recovery: Recovery) -> Self {
        Self {
            policy,
            state,
            recovery,
        }
    }

    pub fn evaluate(&self) -> WatchdogVerdict {
        self.evaluate_at(Instant::now())
    }

    /// Must be called from within a Tokio runtime: expiry spawns a task.
    pub fn evaluate_at(&self, now: Instant) -> WatchdogVerdict {
        let (claim, attempt, reason) = {
            let mut state = lock_state(&self.state);
            let (run_id, phase, count, wait, started_at) = match state.active() {
                Some(run) => (run.run_id, run.phase, run.count, run.wait_seconds, run.started_at),
                None => return WatchdogVerdict::Idle,
            };

            if phase != RunPhase::Running {
                debug!(run_id, ?phase, "watchdog: run not owned by its runner");
                return WatchdogVerdict::Busy { run_id, phase };
            }

            let deadline = deadline_for(count, wait, &self.policy);
            let elapsed = now.saturating_duration_since(started_at);
            if elapsed <= deadline {
                debug!(
                    run_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    deadline_ms = deadline.as_millis() as u64,
                    "watchdog: within budget"
                );
                return WatchdogVerdict::WithinBudget {
                    run_id,
                    elapsed,
                    deadline,
                };
            }

            let Some((claim, attempt)) = state.claim(run_id, true) else {
                return WatchdogVerdict::Busy { run_id, phase };
            };
            let reason = RecoveryReason::Timeout {
                elapsed,
                deadline,
                attempt,
                max_retry: self.policy.max_retry,
            };
            (claim, attempt, reason)
        };

        let run_id = claim.run_id;
        let escalate = reason.escalates();
        warn!(run_id, attempt, max_retry = self.policy.max_retry, escalate, "watchdog: deadline exceeded");

        tokio::spawn(self.recovery.clone().recover(claim, reason));
        WatchdogVerdict::Expired {
            run_id,
            attempt,
            escalate,
        }
    }
}
