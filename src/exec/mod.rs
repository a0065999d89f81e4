// src/exec/mod.rs

//! Privileged command execution.
//!
//! - [`backend`] defines the [`PrivilegedExecutor`] trait the runner talks
//!   to, so tests can swap in a fake executor.
//! - [`process`] is the production implementation built on
//!   `tokio::process::Command`.
//! - [`privilege`] caches the result of the privilege check.

pub mod backend;
pub mod privilege;
pub mod process;

pub use backend::{BoxFuture, EXIT_SPAWN_FAILED, EXIT_TIMEOUT, ExecOutcome, PrivilegedExecutor};
pub use privilege::PrivilegeCache;
pub use process::ProcessExecutor;
