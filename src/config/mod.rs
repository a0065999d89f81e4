// src/config/mod.rs

//! Configuration loading and validation for shellrelay.
//!
//! - `model.rs`: TOML-backed data model with defaults.
//! - `loader.rs`: reading a config file (or falling back to defaults).
//! - `validate.rs`: `RawConfigFile` -> `ConfigFile` checks.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, load_or_default};
pub use model::{
    ConfigFile, ExecutorSection, LimitsSection, RawConfigFile, StoreSection, WatchdogSection,
};
