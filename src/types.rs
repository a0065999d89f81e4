use std::fmt;

/// Final status of a command sequence, as written into the summary line.
///
/// - `Completed`: every iteration ran and succeeded.
/// - `Partial`: every iteration ran, at least one of them failed.
/// - `Stopped`: the loop ended early (cancellation or the remote `enabled`
///   flag was cleared).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Partial,
    Stopped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "COMPLETED",
            RunStatus::Partial => "PARTIAL",
            RunStatus::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a running sequence left its loop before reaching `count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Local cancellation token fired (watchdog, forced reset, shutdown).
    Cancelled,
    /// The remote `enabled` flag was observed as `false`.
    DisabledByUser,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Cancelled => f.write_str("stopped by cancellation"),
            StopReason::DisabledByUser => f.write_str("stopped by user"),
        }
    }
}
