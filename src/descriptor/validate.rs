// src/descriptor/validate.rs

use std::time::Duration;

use tracing::warn;

use crate::config::LimitsSection;
use crate::errors::{RelayError, Result};

use super::CommandDescriptor;

/// A descriptor that passed validation, with `count` and `wait` clamped to
/// the configured ceilings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedDescriptor {
    pub command: String,
    pub count: u32,
    pub wait_seconds: u64,
}

impl ValidatedDescriptor {
    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_seconds)
    }
}

impl CommandDescriptor {
    /// Validate and clamp this descriptor.
    ///
    /// Fails with [`RelayError::Validation`] for an empty command or a
    /// non-positive count. The `enabled` flag is not inspected here.
    pub fn validate(&self, limits: &LimitsSection) -> Result<ValidatedDescriptor> {
        let command = self.command.trim();
        if command.is_empty() {
            return Err(RelayError::Validation("command is empty".to_string()));
        }

        Ok(ValidatedDescriptor {
            command: command.to_string(),
            count: clamp_count(self.count, limits)?,
            wait_seconds: clamp_wait(self.wait_seconds, limits),
        })
    }
}

/// Clamp `count` to `[1, max_count]`, rejecting values below 1.
pub fn clamp_count(raw: i64, limits: &LimitsSection) -> Result<u32> {
    if raw <= 0 {
        return Err(RelayError::Validation(format!(
            "count must be >= 1 (got {raw})"
        )));
    }

    let max = i64::from(limits.max_count);
    if raw > max {
        warn!(requested = raw, max, "count exceeds ceiling; clamping");
    } else if raw > i64::from(limits.warn_count) {
        warn!(requested = raw, threshold = limits.warn_count, "unusually high count");
    }

    // Within [1, max_count] after the min, so the conversion cannot fail.
    Ok(u32::try_from(raw.min(max)).unwrap_or(limits.max_count))
}

/// Clamp `wait` seconds to `[0, max_wait_secs]`.
pub fn clamp_wait(raw: i64, limits: &LimitsSection) -> u64 {
    let Ok(raw) = u64::try_from(raw) else {
        return 0;
    };
    if raw > limits.max_wait_secs {
        warn!(requested = raw, max = limits.max_wait_secs, "wait exceeds ceiling; clamping");
        return limits.max_wait_secs;
    }
    raw
}
