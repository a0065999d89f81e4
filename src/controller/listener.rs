// src/controller/listener.rs

//! Turns descriptor snapshots into controller actions.

use tracing::{debug, info, warn};

use crate::config::LimitsSection;
use crate::descriptor::{CommandDescriptor, ValidatedDescriptor};
use crate::store::StoreNotification;

use super::reporter::ResultReporter;
use super::runner::RunnerSpawner;
use super::state::{SharedState, lock_state};
use super::watchdog::{WatchdogMonitor, WatchdogVerdict};

/// Why a snapshot was dropped without action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// `enabled` is false (or absent).
    Disabled,
    /// The snapshot predates the controller's own latest report.
    Stale { snapshot_ms: u64, last_report_ms: u64 },
}

/// What a snapshot asks for, given the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Start(ValidatedDescriptor),
    /// A run is active; the snapshot only serves as a watchdog trigger.
    Watchdog,
    Ignore(IgnoreReason),
    /// Enabled but invalid; the message is reported back.
    Reject(String),
}

/// Pure dispatch rule for one snapshot.
pub fn decide(
    descriptor: &CommandDescriptor,
    executing: bool,
    last_report_ms: Option<u64>,
    limits: &LimitsSection,
) -> Decision {
    if executing {
        return Decision::Watchdog;
    }

    if let (Some(snapshot_ms), Some(last_report_ms)) = (descriptor.updated_at, last_report_ms) {
        if snapshot_ms < last_report_ms {
            return Decision::Ignore(IgnoreReason::Stale {
                snapshot_ms,
                last_report_ms,
            });
        }
    }

    if !descriptor.enabled {
        return Decision::Ignore(IgnoreReason::Disabled);
    }

    match descriptor.validate(limits) {
        Ok(validated) => Decision::Start(validated),
        Err(err) => Decision::Reject(err.to_string()),
    }
}

/// What the listener did with a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Started { run_id: u64 },
    Watchdog(WatchdogVerdict),
    Ignored(IgnoreReason),
    Rejected(String),
    StoreError(String),
}

#[derive(Debug, Clone)]
pub struct DescriptorListener {
    limits: LimitsSection,
    state: SharedState,
    spawner: RunnerSpawner,
    watchdog: WatchdogMonitor,
    reporter: ResultReporter,
}

impl DescriptorListener {
    pub fn new(
        limits: LimitsSection,
        state: SharedState,
        spawner: RunnerSpawner,
        watchdog: WatchdogMonitor,
        reporter: ResultReporter,
    ) -> Self {
        Self {
            limits,
            state,
            spawner,
            watchdog,
            reporter,
        }
    }

    pub async fn on_notification(&self, notification: StoreNotification) -> Dispatch {
        match notification {
            StoreNotification::Changed(doc) => {
                self.dispatch(&CommandDescriptor::from_document(&doc)).await
            }
            StoreNotification::Failed(message) => {
                warn!(error = %message, "descriptor subscription error; waiting for next notification");
                Dispatch::StoreError(message)
            }
        }
    }

    pub async fn dispatch(&self, descriptor: &CommandDescriptor) -> Dispatch {
        let message = match self.dispatch_locked(descriptor) {
            Ok(dispatch) => return dispatch,
            Err(message) => message,
        };

        warn!(error = %message, "rejecting descriptor");
        let report_ms = self.reporter.report_completion("", &message).await;
        lock_state(&self.state).note_report(report_ms);
        Dispatch::Rejected(message)
    }

    /// The executing check and the start happen under one lock, so at most
    /// one runner exists regardless of how notifications interleave.
    ///
    /// `Err` carries a rejection that still has to be reported.
    fn dispatch_locked(&self, descriptor: &CommandDescriptor) -> Result<Dispatch, String> {
        let mut state = lock_state(&self.state);
        let decision = decide(
            descriptor,
            state.is_executing(),
            state.last_report_ms(),
            &self.limits,
        );

        match decision {
            Decision::Start(validated) => {
                let command = validated.command.clone();
                let run_id = self.spawner.start(&mut state, validated);
                info!(run_id, cmd = %command, "accepted descriptor");
                Ok(Dispatch::Started { run_id })
            }
            Decision::Watchdog => {
                drop(state);
                Ok(Dispatch::Watchdog(self.watchdog.evaluate()))
            }
            Decision::Ignore(reason) => {
                debug!(?reason, "ignoring snapshot");
                Ok(Dispatch::Ignored(reason))
            }
            Decision::Reject(message) => Err(message),
        }
    }
}
