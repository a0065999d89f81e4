// src/exec/backend.rs

//! Pluggable executor abstraction.

use std::time::Duration;

pub use futures::future::BoxFuture;

/// Exit code reported when a call hits its timeout.
pub const EXIT_TIMEOUT: i32 = 124;

/// Exit code reported when the process could not be spawned at all.
pub const EXIT_SPAWN_FAILED: i32 = 126;

/// Outcome of one privileged call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    Success { output: String },
    Error { message: String, exit_code: i32 },
}

/// Runs commands with elevated privileges.
///
/// Production code uses [`super::ProcessExecutor`]; tests provide their own
/// implementation that doesn't spawn real processes.
pub trait PrivilegedExecutor: Send + Sync {
    /// Run `command`, giving up after `timeout`.
    ///
    /// Dropping the returned future must stop the underlying work.
    fn execute<'a>(&'a self, command: &'a str, timeout: Duration) -> BoxFuture<'a, ExecOutcome>;

    /// Whether privileged execution is currently possible. Implementations
    /// may cache the answer.
    fn is_available(&self) -> BoxFuture<'_, bool>;

    /// Forget any cached privilege check result.
    fn clear_privilege_cache(&self);
}

impl std::fmt::Debug for dyn PrivilegedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn PrivilegedExecutor")
    }
}
