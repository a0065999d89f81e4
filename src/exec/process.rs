// src/exec/process.rs

//! Privileged command execution via child processes.

use std::process::{Output, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::ExecutorSection;

use super::backend::{BoxFuture, EXIT_SPAWN_FAILED, EXIT_TIMEOUT, ExecOutcome, PrivilegedExecutor};
use super::privilege::PrivilegeCache;

/// Bound for the privilege probe itself.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs commands as `<elevate...> <shell> -c <command>`.
///
/// Children are spawned with `kill_on_drop`, so a call whose future is
/// dropped (timeout, cancellation or an aborted runner task) also kills the
/// subprocess.
#[derive(Debug)]
pub struct ProcessExecutor {
    elevate: Vec<String>,
    shell: String,
    privilege_cache: PrivilegeCache,
}

impl ProcessExecutor {
    pub fn new(elevate: Vec<String>, shell: impl Into<String>, privilege_cache_ttl: Duration) -> Self {
        Self {
            elevate,
            shell: shell.into(),
            privilege_cache: PrivilegeCache::new(privilege_cache_ttl),
        }
    }

    pub fn from_config(cfg: &ExecutorSection) -> Self {
        Self::new(cfg.elevate.clone(), cfg.shell.clone(), cfg.privilege_cache_ttl())
    }

    /// Build `<elevate...> <program> <args...>`.
    fn elevated(&self, program: &str, args: &[&str]) -> Command {
        let mut cmd = match self.elevate.split_first() {
            Some((first, rest)) => {
                let mut c = Command::new(first);
                c.args(rest).arg(program);
                c
            }
            None => Command::new(program),
        };
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run_to_output(&self, command: &str) -> Result<Output> {
        let child = self
            .elevated(&self.shell, &["-c", command])
            .spawn()
            .with_context(|| format!("spawning privileged shell for '{command}'"))?;

        child
            .wait_with_output()
            .await
            .with_context(|| format!("waiting for privileged command '{command}'"))
    }

    async fn probe(&self) -> bool {
        if self.elevate.is_empty() {
            return true;
        }

        let mut cmd = self.elevated("true", &[]);
        let status = match cmd.spawn() {
            Ok(child) => tokio::time::timeout(PROBE_TIMEOUT, child.wait_with_output()).await,
            Err(err) => {
                warn!(elevate = ?self.elevate, error = %err, "privilege probe could not be spawned");
                return false;
            }
        };

        match status {
            Ok(Ok(output)) => output.status.success(),
            Ok(Err(err)) => {
                warn!(error = %err, "privilege probe failed");
                false
            }
            Err(_) => {
                warn!(timeout = ?PROBE_TIMEOUT, "privilege probe timed out");
                false
            }
        }
    }
}

impl PrivilegedExecutor for ProcessExecutor {
    fn execute<'a>(&'a self, command: &'a str, timeout: Duration) -> BoxFuture<'a, ExecOutcome> {
        Box::pin(async move {
            debug!(cmd = %command, ?timeout, "spawning privileged command");

            match tokio::time::timeout(timeout, self.run_to_output(command)).await {
                Ok(Ok(output)) => outcome_from_output(&output),
                Ok(Err(err)) => ExecOutcome::Error {
                    message: format!("{err:#}"),
                    exit_code: EXIT_SPAWN_FAILED,
                },
                Err(_) => ExecOutcome::Error {
                    message: format!("timed out after {}s", timeout.as_secs_f64()),
                    exit_code: EXIT_TIMEOUT,
                },
            }
        })
    }

    fn is_available(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            if let Some(cached) = self.privilege_cache.get() {
                return cached;
            }
            let available = self.probe().await;
            info!(available, elevate = ?self.elevate, "privilege check");
            self.privilege_cache.store(available);
            available
        })
    }

    fn clear_privilege_cache(&self) {
        self.privilege_cache.clear();
    }
}

fn outcome_from_output(output: &Output) -> ExecOutcome {
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    if output.status.success() {
        let output = if stderr.is_empty() {
            stdout
        } else if stdout.is_empty() {
            stderr
        } else {
            format!("{stdout}\n{stderr}")
        };
        return ExecOutcome::Success { output };
    }

    let exit_code = output.status.code().unwrap_or(-1);
    let message = match (stderr.is_empty(), stdout.is_empty()) {
        (false, _) => stderr,
        (true, false) => stdout,
        (true, true) => format!("exited with status {exit_code}"),
    };
    ExecOutcome::Error { message, exit_code }
}
