// src/controller/mod.rs

//! Execution controller.
//!
//! This module ties together:
//! - the [`listener`] that turns descriptor snapshots into decisions
//! - the [`runner`] that executes one repeat sequence per accepted descriptor
//! - the [`watchdog`] that supervises the active run's deadline, and the
//!   [`recovery`] path it hands expired runs to
//! - the [`reporter`], the single write path back to the store
//!
//! All of them share one [`state::ExecutionState`] behind a mutex. The
//! event loop that drives them lives in [`runtime`].

pub mod cancel;
pub mod listener;
pub mod recovery;
pub mod reporter;
pub mod runner;
pub mod runtime;
pub mod state;
pub mod watchdog;

use std::time::SystemTime;

pub use cancel::{CancelListener, CancelToken, CancellationSource, cancel_pair};
pub use listener::{Decision, DescriptorListener, Dispatch, IgnoreReason, decide};
pub use recovery::{Recovery, RecoveryReason};
pub use reporter::ResultReporter;
pub use runner::{ExecutionResult, RunnerOptions, SequenceReport, truncate_output};
pub use runtime::{Controller, ControllerHandle};
pub use state::{ExecutionState, RunPhase, SharedState, StateSnapshot};
pub use watchdog::{WatchdogMonitor, WatchdogVerdict, deadline_for};

/// Runtime options for the controller loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControllerOptions {
    /// Exit once nothing is executing (used for `--once`).
    pub exit_when_idle: bool,
}

/// Events flowing into the controller loop from its own tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    /// A runner released the slot; `reported` is false if the completion
    /// write failed.
    RunnerFinished { run_id: u64, reported: bool },
    /// A recovery released the slot.
    RecoveryFinished {
        run_id: u64,
        escalate: bool,
        reported: bool,
    },
    /// Ctrl-C or an embedding application asked the loop to stop.
    ShutdownRequested,
}

/// Diagnostic view of the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerStatus {
    pub is_executing: bool,
    pub started_at: Option<SystemTime>,
    pub retry_count: u32,
    pub runner_alive: bool,
    pub run_id: Option<u64>,
    /// The active run is being recovered by the watchdog or a forced reset.
    pub recovering: bool,
    /// Bumped on every (re)subscription to the store.
    pub subscription_generation: u64,
}
