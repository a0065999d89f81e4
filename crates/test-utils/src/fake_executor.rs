use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use shellrelay::exec::{BoxFuture, ExecOutcome, PrivilegedExecutor};

/// A scriptable executor that never spawns processes.
///
/// - `echo <text>` succeeds with `<text>`; any other command succeeds with
///   `ok`, unless the call is scripted otherwise.
/// - Call numbers are 1-based and count every `execute` on this instance.
/// - Records the commands it was given and the peak number of overlapping
///   calls.
#[derive(Debug, Default)]
pub struct FakeExecutor {
    failing: HashSet<usize>,
    panicking: HashSet<usize>,
    hanging: HashSet<usize>,
    hang_all: bool,
    delay: Duration,
    unavailable: AtomicBool,

    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_concurrent: AtomicUsize,
    availability_checks: AtomicUsize,
    cache_clears: AtomicUsize,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls with these numbers fail with exit code 1.
    pub fn failing_on(mut self, calls: &[usize]) -> Self {
        self.failing.extend(calls.iter().copied());
        self
    }

    /// Calls with these numbers panic.
    pub fn panicking_on(mut self, calls: &[usize]) -> Self {
        self.panicking.extend(calls.iter().copied());
        self
    }

    /// Calls with these numbers hang until their future is dropped.
    pub fn hanging_on(mut self, calls: &[usize]) -> Self {
        self.hanging.extend(calls.iter().copied());
        self
    }

    /// Every call hangs until its future is dropped.
    pub fn hanging(mut self) -> Self {
        self.hang_all = true;
        self
    }

    /// Every call takes `delay` before completing.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The privilege check reports "unavailable".
    pub fn unavailable(self) -> Self {
        self.set_available(false);
        self
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn availability_checks(&self) -> usize {
        self.availability_checks.load(Ordering::SeqCst)
    }

    pub fn cache_clears(&self) -> usize {
        self.cache_clears.load(Ordering::SeqCst)
    }

    fn record(&self, command: &str) -> usize {
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        calls.push(command.to_string());
        calls.len()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl PrivilegedExecutor for FakeExecutor {
    fn execute<'a>(&'a self, command: &'a str, _timeout: Duration) -> BoxFuture<'a, ExecOutcome> {
        Box::pin(async move {
            let call = self.record(command);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent.fetch_max(now, Ordering::SeqCst);
            let _guard = InFlight(&self.in_flight);

            if self.hang_all || self.hanging.contains(&call) {
                std::future::pending::<()>().await;
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.panicking.contains(&call) {
                panic!("fake executor panic on call {call}");
            }
            if self.failing.contains(&call) {
                return ExecOutcome::Error {
                    message: format!("scripted failure on call {call}"),
                    exit_code: 1,
                };
            }

            let output = command
                .strip_prefix("echo ")
                .map_or_else(|| "ok".to_string(), str::to_string);
            ExecOutcome::Success { output }
        })
    }

    fn is_available(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            self.availability_checks.fetch_add(1, Ordering::SeqCst);
            !self.unavailable.load(Ordering::SeqCst)
        })
    }

    fn clear_privilege_cache(&self) {
        self.cache_clears.fetch_add(1, Ordering::SeqCst);
    }
}
