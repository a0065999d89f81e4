// src/controller/recovery.rs

//! Tear-down of a run that was claimed away from its runner.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::errors::RelayError;

use super::ControllerEvent;
use super::reporter::ResultReporter;
use super::runner::SUMMARY_MARKER;
use super::state::{RunClaim, SharedState, lock_state};

const EXIT_POLL: Duration = Duration::from_millis(50);
const ABORT_SETTLE: Duration = Duration::from_secs(1);

/// Why a run is being recovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryReason {
    /// The watchdog found the run past its deadline.
    Timeout {
        elapsed: Duration,
        deadline: Duration,
        attempt: u32,
        max_retry: u32,
    },
    /// An operator (or shutdown) forced the slot free.
    Forced(String),
}

impl RecoveryReason {
    /// Whether this recovery must end in a hard reset.
    pub fn escalates(&self) -> bool {
        match self {
            RecoveryReason::Timeout {
                attempt, max_retry, ..
            } => attempt >= max_retry,
            RecoveryReason::Forced(_) => false,
        }
    }

    fn error_text(&self) -> String {
        match self {
            RecoveryReason::Timeout {
                elapsed,
                deadline,
                attempt,
                max_retry,
            } => {
                let timeout = RelayError::Timeout {
                    elapsed_ms: duration_ms(*elapsed),
                    deadline_ms: duration_ms(*deadline),
                    attempt: *attempt,
                    max_retry: *max_retry,
                };
                if self.escalates() {
                    format!("{timeout}\n{}", RelayError::HardReset { attempts: *attempt })
                } else {
                    timeout.to_string()
                }
            }
            RecoveryReason::Forced(reason) => format!("forcibly reset: {reason}"),
        }
    }
}

/// Cancel, force-terminate if needed, report, free the slot.
#[derive(Debug, Clone)]
pub struct Recovery {
    state: SharedState,
    reporter: ResultReporter,
    events: mpsc::UnboundedSender<ControllerEvent>,
    grace: Duration,
}

impl Recovery {
    pub fn new(
        state: SharedState,
        reporter: ResultReporter,
        events: mpsc::UnboundedSender<ControllerEvent>,
        grace: Duration,
    ) -> Self {
        Self {
            state,
            reporter,
            events,
            grace,
        }
    }

    /// Recover a claimed run. Returns whether a hard reset was requested.
    pub async fn recover(self, claim: RunClaim, reason: RecoveryReason) -> bool {
        let run_id = claim.run_id;
        let escalate = reason.escalates();
        info!(run_id, ?reason, "recovering run");

        claim.cancel.cancel();
        if !self.wait_for_exit(run_id, self.grace).await {
            warn!(run_id, grace_ms = duration_ms(self.grace), "runner ignored cancellation; aborting task");
            claim.abort.abort();
            if !self.wait_for_exit(run_id, ABORT_SETTLE).await {
                warn!(run_id, "aborted runner still not finished; freeing slot anyway");
            }
        }

        let elapsed = claim.started_at.elapsed();
        let result = format!(
            "{SUMMARY_MARKER}\naborted after {}ms, status STOPPED",
            elapsed.as_millis()
        );
        let report_ms = self
            .reporter
            .report_completion(&result, &reason.error_text())
            .await;
        lock_state(&self.state).release_abandoned(run_id, report_ms, escalate);

        if escalate {
            error!(run_id, "retry budget exhausted; requesting hard reset");
        }
        if self
            .events
            .send(ControllerEvent::RecoveryFinished {
                run_id,
                escalate,
                reported: report_ms.is_some(),
            })
            .is_err()
        {
            warn!(run_id, "controller gone; recovery completion not delivered");
        }
        escalate
    }

    /// Poll until nothing is executing, up to `limit`.
    pub async fn wait_until_idle(&self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            if !lock_state(&self.state).is_executing() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(EXIT_POLL).await;
        }
    }

    async fn wait_for_exit(&self, run_id: u64, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            if lock_state(&self.state).runner_finished(run_id) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(EXIT_POLL).await;
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
