// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{RelayError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::RelayError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_store(cfg)?;
    validate_limits(cfg)?;
    validate_executor(cfg)?;
    validate_watchdog(cfg)?;
    Ok(())
}

fn config_error(msg: impl Into<String>) -> RelayError {
    RelayError::ConfigError(msg.into())
}

fn validate_store(cfg: &RawConfigFile) -> Result<()> {
    if cfg.store.document.as_os_str().is_empty() {
        return Err(config_error("[store].document must not be empty"));
    }
    Ok(())
}

fn validate_limits(cfg: &RawConfigFile) -> Result<()> {
    let limits = &cfg.limits;

    if limits.max_count == 0 {
        return Err(config_error("[limits].max_count must be >= 1 (got 0)"));
    }
    if limits.warn_count > limits.max_count {
        return Err(config_error(format!(
            "[limits].warn_count ({}) must not exceed max_count ({})",
            limits.warn_count, limits.max_count
        )));
    }
    if limits.output_limit == 0 {
        return Err(config_error("[limits].output_limit must be >= 1 (got 0)"));
    }
    Ok(())
}

fn validate_executor(cfg: &RawConfigFile) -> Result<()> {
    let exec = &cfg.executor;

    if exec.shell.trim().is_empty() {
        return Err(config_error("[executor].shell must not be empty"));
    }
    if exec.elevate.iter().any(|part| part.trim().is_empty()) {
        return Err(config_error(
            "[executor].elevate must not contain empty arguments",
        ));
    }
    if exec.command_timeout_secs == 0 {
        return Err(config_error(
            "[executor].command_timeout_secs must be >= 1 (got 0)",
        ));
    }
    Ok(())
}

fn validate_watchdog(cfg: &RawConfigFile) -> Result<()> {
    let wd = &cfg.watchdog;

    if wd.hard_cap_ms == 0 {
        return Err(config_error("[watchdog].hard_cap_ms must be >= 1 (got 0)"));
    }
    if wd.max_retry == 0 {
        return Err(config_error("[watchdog].max_retry must be >= 1 (got 0)"));
    }
    Ok(())
}
