// src/controller/runner.rs

//! Runs one descriptor's repeat sequence on its own Tokio task.

use std::any::Any;
use std::fmt::Write as _;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::ConfigFile;
use crate::descriptor::ValidatedDescriptor;
use crate::errors::RelayError;
use crate::exec::{ExecOutcome, PrivilegedExecutor};
use crate::store::DescriptorStore;
use crate::types::{RunStatus, StopReason};

use super::ControllerEvent;
use super::cancel::{CancellationSource, cancel_pair};
use super::reporter::ResultReporter;
use super::state::{ActiveRun, ExecutionState, SharedState, lock_state};

pub const SUMMARY_MARKER: &str = "=== SUMMARY ===";

/// Tunables for a runner, derived from the config.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Bound for a single privileged call.
    pub command_timeout: Duration,
    /// Max characters kept per iteration output / error message.
    pub output_limit: usize,
    /// Granularity of the interruptible inter-iteration sleep.
    pub sleep_slice: Duration,
}

impl RunnerOptions {
    pub fn from_config(cfg: &ConfigFile) -> Self {
        Self {
            command_timeout: cfg.executor.command_timeout(),
            output_limit: cfg.limits.output_limit,
            sleep_slice: Duration::from_secs(1),
        }
    }
}

/// Outcome of one iteration. Output and error text are already truncated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub iteration: u32,
    pub outcome: ExecOutcome,
    pub elapsed: Duration,
}

/// Aggregated outcome of a whole sequence, ready to be reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceReport {
    pub result: String,
    pub error: String,
    pub status: RunStatus,
    pub completed: u32,
    pub count: u32,
}

impl SequenceReport {
    pub fn from_results(
        results: &[ExecutionResult],
        count: u32,
        stop: Option<StopReason>,
        elapsed: Duration,
    ) -> Self {
        let mut result = String::new();
        let mut errors = Vec::new();

        for r in results {
            let ms = r.elapsed.as_millis();
            match &r.outcome {
                ExecOutcome::Success { output } => {
                    let _ = writeln!(result, "[{}/{count}] OK {ms}ms: {output}", r.iteration);
                }
                ExecOutcome::Error { message, exit_code } => {
                    let _ = writeln!(result, "[{}/{count}] ERROR {ms}ms: {message}", r.iteration);
                    errors.push(
                        RelayError::Iteration {
                            iteration: r.iteration,
                            exit_code: *exit_code,
                            message: message.clone(),
                        }
                        .to_string(),
                    );
                }
            }
        }

        let completed = u32::try_from(results.len()).unwrap_or(count);
        let status = match stop {
            Some(_) => RunStatus::Stopped,
            None if !errors.is_empty() => RunStatus::Partial,
            None => RunStatus::Completed,
        };

        result.push_str(SUMMARY_MARKER);
        let _ = write!(
            result,
            "\ncompleted {completed}/{count} in {}ms, status {status}",
            elapsed.as_millis()
        );
        if let Some(reason) = stop {
            let _ = write!(result, " ({reason})");
        }

        Self {
            result,
            error: errors.join("\n"),
            status,
            completed,
            count,
        }
    }

    fn panicked(message: &str, count: u32) -> Self {
        Self {
            result: format!("{SUMMARY_MARKER}\nterminated by panic, status {}", RunStatus::Stopped),
            error: format!("runner panicked: {message}"),
            status: RunStatus::Stopped,
            completed: 0,
            count,
        }
    }

    fn privilege_denied(error: RelayError, count: u32, elapsed: Duration) -> Self {
        Self {
            result: format!(
                "{SUMMARY_MARKER}\ncompleted 0/{count} in {}ms, status {} (privilege denied)",
                elapsed.as_millis(),
                RunStatus::Stopped
            ),
            error: error.to_string(),
            status: RunStatus::Stopped,
            completed: 0,
            count,
        }
    }
}

/// Truncate to at most `limit` characters, marking the cut.
pub fn truncate_output(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Everything needed to start runners; owned by the listener.
#[derive(Debug, Clone)]
pub struct RunnerSpawner {
    executor: Arc<dyn PrivilegedExecutor>,
    store: Arc<dyn DescriptorStore>,
    reporter: ResultReporter,
    state: SharedState,
    events: mpsc::UnboundedSender<ControllerEvent>,
    options: RunnerOptions,
}

impl RunnerSpawner {
    pub fn new(
        executor: Arc<dyn PrivilegedExecutor>,
        store: Arc<dyn DescriptorStore>,
        reporter: ResultReporter,
        state: SharedState,
        events: mpsc::UnboundedSender<ControllerEvent>,
        options: RunnerOptions,
    ) -> Self {
        Self {
            executor,
            store,
            reporter,
            state,
            events,
            options,
        }
    }

    /// Spawn a runner and install it as the active run.
    ///
    /// `state` must be the locked guard of this spawner's shared state, and
    /// the caller must have checked that nothing is executing.
    pub fn start(&self, state: &mut ExecutionState, descriptor: ValidatedDescriptor) -> u64 {
        let run_id = state.next_run_id();
        let (token, listener) = cancel_pair();

        let runner = CommandRunner {
            run_id,
            descriptor: descriptor.clone(),
            executor: Arc::clone(&self.executor),
            cancel: CancellationSource::new(listener, Arc::clone(&self.store)),
            options: self.options.clone(),
            cleanup: CleanupGuard {
                run_id,
                state: Arc::clone(&self.state),
                reporter: self.reporter.clone(),
                events: self.events.clone(),
                stage: CleanupStage::Pending,
            },
        };

        let handle = tokio::spawn(runner.run());
        state.begin_run(ActiveRun::new(
            run_id,
            descriptor.count,
            descriptor.wait_seconds,
            token,
            handle,
        ));
        run_id
    }
}

/// One sequence: `count` iterations of (execute, record, wait).
pub struct CommandRunner {
    run_id: u64,
    descriptor: ValidatedDescriptor,
    executor: Arc<dyn PrivilegedExecutor>,
    cancel: CancellationSource,
    options: RunnerOptions,
    cleanup: CleanupGuard,
}

impl CommandRunner {
    pub async fn run(mut self) {
        info!(
            run_id = self.run_id,
            cmd = %self.descriptor.command,
            count = self.descriptor.count,
            wait = self.descriptor.wait_seconds,
            "runner started"
        );

        let outcome = AssertUnwindSafe(self.execute_sequence())
            .catch_unwind()
            .await;
        let report = match outcome {
            Ok(Some(report)) => report,
            Ok(None) => {
                info!(run_id = self.run_id, "request withdrawn before the first iteration; nothing to report");
                self.cleanup.withdraw();
                return;
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(run_id = self.run_id, panic = %message, "runner panicked");
                SequenceReport::panicked(&message, self.descriptor.count)
            }
        };

        info!(
            run_id = self.run_id,
            completed = report.completed,
            count = report.count,
            status = %report.status,
            "runner finished"
        );
        self.cleanup.complete(&report.result, &report.error).await;
    }

    /// `None` if `enabled` was already cleared before anything ran: the
    /// request was answered or withdrawn, and writing again would overwrite
    /// the last real result.
    async fn execute_sequence(&mut self) -> Option<SequenceReport> {
        let started = Instant::now();
        let count = self.descriptor.count;

        if self.cancel.stop_reason().await == Some(StopReason::DisabledByUser) {
            return None;
        }

        if !self.executor.is_available().await {
            let err = RelayError::PrivilegeDenied(
                "elevated execution is not available".to_string(),
            );
            warn!(run_id = self.run_id, error = %err, "skipping sequence");
            return Some(SequenceReport::privilege_denied(err, count, started.elapsed()));
        }

        let mut results = Vec::with_capacity(count as usize);
        let mut stop = None;

        for iteration in 1..=count {
            if let Some(reason) = self.cancel.stop_reason().await {
                info!(run_id = self.run_id, iteration, %reason, "leaving loop");
                stop = Some(reason);
                break;
            }

            match self.run_iteration(iteration).await {
                Some(result) => results.push(result),
                None => {
                    stop = Some(StopReason::Cancelled);
                    break;
                }
            }

            if iteration < count && self.descriptor.wait_seconds > 0 {
                let wait = self.descriptor.wait();
                if let Some(reason) = self.cancel.sleep(wait, self.options.sleep_slice).await {
                    info!(run_id = self.run_id, iteration, %reason, "wait interrupted");
                    stop = Some(reason);
                    break;
                }
            }
        }

        Some(SequenceReport::from_results(&results, count, stop, started.elapsed()))
    }

    /// Run one iteration; `None` if cancellation interrupted the call.
    async fn run_iteration(&mut self, iteration: u32) -> Option<ExecutionResult> {
        let started = Instant::now();
        let executor = Arc::clone(&self.executor);
        let command = self.descriptor.command.clone();
        let timeout = self.options.command_timeout;

        let outcome = tokio::select! {
            outcome = executor.execute(&command, timeout) => outcome,
            _ = self.cancel.local().cancelled() => {
                info!(run_id = self.run_id, iteration, "cancelled mid-command; dropping call");
                return None;
            }
        };
        let elapsed = started.elapsed();

        let outcome = match outcome {
            ExecOutcome::Success { output } => {
                debug!(run_id = self.run_id, iteration, elapsed_ms = elapsed.as_millis() as u64, "iteration succeeded");
                ExecOutcome::Success {
                    output: truncate_output(&output, self.options.output_limit),
                }
            }
            ExecOutcome::Error { message, exit_code } => {
                warn!(run_id = self.run_id, iteration, exit_code, error = %message, "iteration failed; continuing");
                ExecOutcome::Error {
                    message: truncate_output(&message, self.options.output_limit),
                    exit_code,
                }
            }
        };

        Some(ExecutionResult {
            iteration,
            outcome,
            elapsed,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CleanupStage {
    Pending,
    Reporting,
    Done,
}

/// Resets the execution slot and reports exactly once, even if the runner
/// task is dropped or aborted mid-sequence.
struct CleanupGuard {
    run_id: u64,
    state: SharedState,
    reporter: ResultReporter,
    events: mpsc::UnboundedSender<ControllerEvent>,
    stage: CleanupStage,
}

impl CleanupGuard {
    async fn complete(&mut self, result: &str, error: &str) {
        if !lock_state(&self.state).begin_finish(self.run_id) {
            self.stage = CleanupStage::Done;
            debug!(run_id = self.run_id, "run already claimed; leaving report to recovery");
            return;
        }

        self.stage = CleanupStage::Reporting;
        let report_ms = self.reporter.report_completion(result, error).await;
        self.stage = CleanupStage::Done;
        release_finished(&self.state, &self.events, self.run_id, report_ms);
    }

    /// Free the slot without writing anything. The retry counter is kept.
    fn withdraw(&mut self) {
        self.stage = CleanupStage::Done;
        let released = {
            let mut state = lock_state(&self.state);
            state.begin_finish(self.run_id) && state.release_unreported(self.run_id)
        };
        if released {
            notify_finished(&self.events, self.run_id, false);
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        match self.stage {
            CleanupStage::Done => {}
            CleanupStage::Reporting => {
                warn!(run_id = self.run_id, "runner dropped while reporting; freeing slot");
                release_finished(&self.state, &self.events, self.run_id, None);
            }
            CleanupStage::Pending => {
                if !lock_state(&self.state).begin_finish(self.run_id) {
                    return;
                }
                error!(run_id = self.run_id, "runner task dropped before completing");

                let run_id = self.run_id;
                let state = Arc::clone(&self.state);
                let reporter = self.reporter.clone();
                let events = self.events.clone();
                match Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn(async move {
                            let result = format!(
                                "{SUMMARY_MARKER}\nterminated unexpectedly, status {}",
                                RunStatus::Stopped
                            );
                            let report_ms = reporter
                                .report_completion(&result, "runner terminated unexpectedly")
                                .await;
                            release_finished(&state, &events, run_id, report_ms);
                        });
                    }
                    Err(_) => release_finished(&state, &events, run_id, None),
                }
            }
        }
    }
}

fn release_finished(
    state: &SharedState,
    events: &mpsc::UnboundedSender<ControllerEvent>,
    run_id: u64,
    report_ms: Option<u64>,
) {
    if lock_state(state).release_finished(run_id, report_ms) {
        notify_finished(events, run_id, report_ms.is_some());
    }
}

fn notify_finished(events: &mpsc::UnboundedSender<ControllerEvent>, run_id: u64, reported: bool) {
    if events
        .send(ControllerEvent::RunnerFinished { run_id, reported })
        .is_err()
    {
        debug!(run_id, "controller gone; runner completion not delivered");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
