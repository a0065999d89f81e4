// src/controller/runtime.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::ConfigFile;
use crate::errors::Result;
use crate::exec::PrivilegedExecutor;
use crate::store::{DescriptorStore, NotificationReceiver, StoreNotification, Subscription};

use super::listener::DescriptorListener;
use super::recovery::{Recovery, RecoveryReason};
use super::reporter::ResultReporter;
use super::runner::{RunnerOptions, RunnerSpawner};
use super::state::{ExecutionState, RunPhase, SharedState, lock_state};
use super::watchdog::WatchdogMonitor;
use super::{ControllerEvent, ControllerOptions, ControllerStatus};

struct ActiveSubscription {
    _subscription: Subscription,
    rx: NotificationReceiver,
}

enum Step {
    Event(ControllerEvent),
    Notification(Option<StoreNotification>),
    Tick,
}

/// Owns the store subscription and drives the listener, the watchdog tick
/// and hard resets from a single loop.
pub struct Controller {
    store: Arc<dyn DescriptorStore>,
    executor: Arc<dyn PrivilegedExecutor>,
    state: SharedState,
    listener: DescriptorListener,
    watchdog: WatchdogMonitor,
    recovery: Recovery,
    check_interval: Option<Duration>,
    grace: Duration,
    options: ControllerOptions,
    events_tx: mpsc::UnboundedSender<ControllerEvent>,
    events_rx: mpsc::UnboundedReceiver<ControllerEvent>,
    subscription: Option<ActiveSubscription>,
    generation: Arc<AtomicU64>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("state", &self.state)
            .field("options", &self.options)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl Controller {
    pub fn new(
        cfg: &ConfigFile,
        store: Arc<dyn DescriptorStore>,
        executor: Arc<dyn PrivilegedExecutor>,
        options: ControllerOptions,
    ) -> Self {
        let state = ExecutionState::shared();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let reporter = ResultReporter::new(Arc::clone(&store));
        let grace = cfg.watchdog.grace_period();

        let recovery = Recovery::new(
            Arc::clone(&state),
            reporter.clone(),
            events_tx.clone(),
            grace,
        );
        let watchdog = WatchdogMonitor::new(cfg.watchdog.clone(), Arc::clone(&state), recovery.clone());
        let spawner = RunnerSpawner::new(
            Arc::clone(&executor),
            Arc::clone(&store),
            reporter.clone(),
            Arc::clone(&state),
            events_tx.clone(),
            RunnerOptions::from_config(cfg),
        );
        let listener = DescriptorListener::new(
            cfg.limits.clone(),
            Arc::clone(&state),
            spawner,
            watchdog.clone(),
            reporter,
        );

        Self {
            store,
            executor,
            state,
            listener,
            watchdog,
            recovery,
            check_interval: cfg.watchdog.check_interval(),
            grace,
            options,
            events_tx,
            events_rx,
            subscription: None,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            state: Arc::clone(&self.state),
            recovery: self.recovery.clone(),
            events: self.events_tx.clone(),
            generation: Arc::clone(&self.generation),
        }
    }

    /// Main event loop.
    ///
    /// - Subscribes to the store and dispatches the initial snapshot.
    /// - Feeds every notification into the listener.
    /// - Re-evaluates the watchdog on a periodic tick.
    /// - Reconciles after each runner/recovery completion and performs hard
    ///   resets when a recovery escalates.
    pub async fn run(mut self) -> Result<()> {
        info!("shellrelay controller started");

        self.subscribe();
        self.reconcile().await;

        let mut ticker = self.check_interval.map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        while !self.idle_exit() {
            let step = tokio::select! {
                Some(event) = self.events_rx.recv() => Step::Event(event),
                notification = next_notification(&mut self.subscription) => Step::Notification(notification),
                _ = next_tick(&mut ticker) => Step::Tick,
            };

            match step {
                Step::Notification(Some(notification)) => {
                    let dispatch = self.listener.on_notification(notification).await;
                    debug!(?dispatch, "notification handled");
                }
                Step::Notification(None) => {
                    warn!("descriptor subscription closed; resubscribing on next tick");
                    self.subscription = None;
                }
                Step::Tick => {
                    if self.subscription.is_none() {
                        self.subscribe();
                    }
                    let verdict = self.watchdog.evaluate();
                    debug!(?verdict, "watchdog tick");
                }
                Step::Event(ControllerEvent::RunnerFinished { run_id, reported }) => {
                    self.after_release(run_id, reported).await;
                }
                Step::Event(ControllerEvent::RecoveryFinished {
                    run_id,
                    escalate,
                    reported,
                }) => {
                    if escalate {
                        self.hard_reset(run_id).await;
                    } else {
                        self.after_release(run_id, reported).await;
                    }
                }
                Step::Event(ControllerEvent::ShutdownRequested) => {
                    self.shutdown().await;
                    break;
                }
            }
        }

        info!("controller exiting");
        Ok(())
    }

    fn idle_exit(&self) -> bool {
        self.options.exit_when_idle && !lock_state(&self.state).is_executing()
    }

    /// (Re)subscribe; failures are logged and retried on the next tick.
    fn subscribe(&mut self) -> bool {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.store.subscribe(tx) {
            Ok(subscription) => {
                let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                info!(generation, "subscribed to descriptor store");
                self.subscription = Some(ActiveSubscription {
                    _subscription: subscription,
                    rx,
                });
                true
            }
            Err(err) => {
                error!(error = %err, "failed to subscribe to descriptor store");
                false
            }
        }
    }

    /// Re-read the document after a run released the slot, picking up
    /// requests whose notifications arrived while it was busy.
    ///
    /// Skipped when nothing was written for the run: the document may still
    /// hold the request that just ran.
    async fn after_release(&mut self, run_id: u64, reported: bool) {
        if reported {
            debug!(run_id, "run released; reconciling");
            self.reconcile().await;
        } else {
            debug!(run_id, "nothing written for this run; waiting for the next notification");
        }
    }

    /// Dispatch a fresh read of the document.
    async fn reconcile(&mut self) {
        match self.store.fetch().await {
            Ok(doc) => {
                let dispatch = self
                    .listener
                    .on_notification(StoreNotification::Changed(doc))
                    .await;
                debug!(?dispatch, "reconciled with current document");
            }
            Err(err) => warn!(error = %err, "could not read descriptor; waiting for next notification"),
        }
    }

    async fn hard_reset(&mut self, run_id: u64) {
        warn!(run_id, "hard reset: resubscribing and clearing state");
        self.subscription = None;
        lock_state(&self.state).hard_reset();
        self.executor.clear_privilege_cache();
        self.subscribe();
        self.reconcile().await;
    }

    async fn shutdown(&mut self) {
        let Some(run_id) = lock_state(&self.state).cancel_active() else {
            info!("shutdown requested; nothing running");
            return;
        };
        info!(run_id, "shutdown requested; waiting for active run to stop");

        if self.recovery.wait_until_idle(self.grace).await {
            return;
        }
        if !self.handle().force_reset("controller shutting down").await {
            // Already being recovered; let that finish.
            self.recovery.wait_until_idle(self.grace.saturating_mul(2)).await;
        }
    }
}

async fn next_notification(subscription: &mut Option<ActiveSubscription>) -> Option<StoreNotification> {
    match subscription {
        Some(active) => active.rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Cloneable handle for diagnostics and operator actions.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    state: SharedState,
    recovery: Recovery,
    events: mpsc::UnboundedSender<ControllerEvent>,
    generation: Arc<AtomicU64>,
}

impl ControllerHandle {
    pub fn status(&self) -> ControllerStatus {
        let snapshot = lock_state(&self.state).snapshot();
        ControllerStatus {
            is_executing: snapshot.is_executing,
            started_at: snapshot.started_at,
            retry_count: snapshot.retry_count,
            runner_alive: snapshot.runner_alive,
            run_id: snapshot.run_id,
            recovering: snapshot.phase == Some(RunPhase::Abandoned),
            subscription_generation: self.generation.load(Ordering::SeqCst),
        }
    }

    /// Cancel, terminate, report and free the active run now.
    ///
    /// Returns `false` if nothing was running under its runner's ownership.
    pub async fn force_reset(&self, reason: &str) -> bool {
        let claim = {
            let mut state = lock_state(&self.state);
            let run_id = match state.active() {
                Some(run) if run.phase == RunPhase::Running => run.run_id,
                _ => return false,
            };
            state.claim(run_id, false)
        };

        match claim {
            Some((claim, _)) => {
                info!(run_id = claim.run_id, reason, "forced reset");
                self.recovery
                    .clone()
                    .recover(claim, RecoveryReason::Forced(reason.to_string()))
                    .await;
                true
            }
            None => false,
        }
    }

    /// Ask the controller loop to shut down gracefully.
    pub fn shutdown(&self) {
        if self.events.send(ControllerEvent::ShutdownRequested).is_err() {
            debug!("controller already stopped");
        }
    }
}
