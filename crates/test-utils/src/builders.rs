#![allow(dead_code)]

use std::path::PathBuf;

use serde_json::Value;
use shellrelay::config::{ConfigFile, RawConfigFile};
use shellrelay::descriptor::{
    Document, FIELD_COMMAND, FIELD_COUNT, FIELD_ENABLED, FIELD_UPDATED_AT, FIELD_WAIT,
};

/// Builder for descriptor documents.
#[derive(Debug, Clone, Default)]
pub struct DocumentBuilder {
    doc: Document,
}

impl DocumentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// An enabled request for `command`, `count` times, `wait` seconds apart.
    pub fn request(command: &str, count: i64, wait: i64) -> Self {
        Self::new()
            .command(command)
            .enabled(true)
            .count(count)
            .wait(wait)
    }

    pub fn command(self, command: &str) -> Self {
        self.field(FIELD_COMMAND, Value::from(command))
    }

    pub fn enabled(self, enabled: bool) -> Self {
        self.field(FIELD_ENABLED, Value::Bool(enabled))
    }

    pub fn count(self, count: i64) -> Self {
        self.field(FIELD_COUNT, Value::from(count))
    }

    pub fn wait(self, wait: i64) -> Self {
        self.field(FIELD_WAIT, Value::from(wait))
    }

    pub fn updated_at(self, ms: u64) -> Self {
        self.field(FIELD_UPDATED_AT, Value::from(ms))
    }

    pub fn field(mut self, key: &str, value: Value) -> Self {
        self.doc.insert(key.to_string(), value);
        self
    }

    pub fn build(self) -> Document {
        self.doc
    }
}

/// Builder for `ConfigFile` to simplify test setup.
///
/// Starts from the defaults with an empty `elevate` prefix, so a real
/// `ProcessExecutor` built from it runs commands unprivileged.
pub struct ConfigBuilder {
    config: RawConfigFile,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        let mut config = RawConfigFile::default();
        config.executor.elevate = Vec::new();
        Self { config }
    }

    /// Deadline of `deadline_ms` for any single-iteration run, a short
    /// grace period and a fast watchdog tick.
    pub fn fast_watchdog(mut self, deadline_ms: u64) -> Self {
        let w = &mut self.config.watchdog;
        w.per_iteration_budget_secs = 0;
        w.base_timeout_secs = 0;
        w.safety_margin_ms = deadline_ms;
        w.grace_period_ms = 100;
        w.check_interval_ms = 25;
        self
    }

    pub fn document(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.store.document = path.into();
        self
    }

    pub fn max_count(mut self, max: u32) -> Self {
        self.config.limits.max_count = max;
        self.config.limits.warn_count = self.config.limits.warn_count.min(max);
        self
    }

    pub fn output_limit(mut self, limit: usize) -> Self {
        self.config.limits.output_limit = limit;
        self
    }

    pub fn max_retry(mut self, max_retry: u32) -> Self {
        self.config.watchdog.max_retry = max_retry;
        self
    }

    pub fn grace_period_ms(mut self, ms: u64) -> Self {
        self.config.watchdog.grace_period_ms = ms;
        self
    }

    pub fn check_interval_ms(mut self, ms: u64) -> Self {
        self.config.watchdog.check_interval_ms = ms;
        self
    }

    pub fn command_timeout_secs(mut self, secs: u64) -> Self {
        self.config.executor.command_timeout_secs = secs;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
