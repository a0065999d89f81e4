// src/errors.rs

//! Crate-wide error type and `Result` alias.
//!
//! The variants follow the controller's failure taxonomy. Only
//! `Validation` and `PrivilegeDenied` ever short-circuit a sequence; the
//! others are formatted into the descriptor's `error` field or logged.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Privilege denied: {0}")]
    PrivilegeDenied(String),

    #[error("iteration {iteration} failed (exit {exit_code}): {message}")]
    Iteration {
        iteration: u32,
        exit_code: i32,
        message: String,
    },

    #[error(
        "Timeout: execution exceeded {deadline_ms}ms (elapsed {elapsed_ms}ms), retry attempt {attempt}/{max_retry}"
    )]
    Timeout {
        elapsed_ms: u64,
        deadline_ms: u64,
        attempt: u32,
        max_retry: u32,
    },

    #[error("Hard reset after {attempts} consecutive timeouts")]
    HardReset { attempts: u32 },

    #[error("Reporting error: {0}")]
    Reporting(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("File watch error: {0}")]
    WatchError(#[from] notify::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
