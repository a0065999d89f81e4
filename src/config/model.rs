// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [store]
/// document = "descriptor.json"
///
/// [limits]
/// max_count = 50
/// warn_count = 20
/// max_wait_secs = 300
/// output_limit = 200
///
/// [executor]
/// elevate = ["sudo", "-n"]
/// shell = "sh"
/// command_timeout_secs = 15
/// privilege_cache_secs = 30
///
/// [watchdog]
/// per_iteration_budget_secs = 10
/// base_timeout_secs = 60
/// safety_margin_ms = 60000
/// hard_cap_ms = 600000
/// max_retry = 3
/// grace_period_ms = 2000
/// check_interval_ms = 30000
/// ```
///
/// All sections are optional and have the defaults shown above.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub store: StoreSection,

    #[serde(default)]
    pub limits: LimitsSection,

    #[serde(default)]
    pub executor: ExecutorSection,

    #[serde(default)]
    pub watchdog: WatchdogSection,
}

/// Validated configuration. Obtain one via `ConfigFile::try_from(raw)` or
/// [`crate::config::load_and_validate`].
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub store: StoreSection,
    pub limits: LimitsSection,
    pub executor: ExecutorSection,
    pub watchdog: WatchdogSection,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            store: raw.store,
            limits: raw.limits,
            executor: raw.executor,
            watchdog: raw.watchdog,
        }
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self::new_unchecked(RawConfigFile::default())
    }
}

/// `[store]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    /// JSON file holding the descriptor document.
    #[serde(default = "default_document")]
    pub document: PathBuf,
}

fn default_document() -> PathBuf {
    PathBuf::from("descriptor.json")
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            document: default_document(),
        }
    }
}

/// `[limits]` section: safety ceilings applied to incoming descriptors.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsSection {
    /// Repetition ceiling; larger `count` values are clamped to this.
    #[serde(default = "default_max_count")]
    pub max_count: u32,

    /// `count` values above this are logged as suspicious.
    #[serde(default = "default_warn_count")]
    pub warn_count: u32,

    /// Ceiling for the inter-iteration pause, in seconds.
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,

    /// Max characters kept from each iteration's output.
    #[serde(default = "default_output_limit")]
    pub output_limit: usize,
}

fn default_max_count() -> u32 {
    50
}

fn default_warn_count() -> u32 {
    20
}

fn default_max_wait_secs() -> u64 {
    300
}

fn default_output_limit() -> usize {
    200
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_count: default_max_count(),
            warn_count: default_warn_count(),
            max_wait_secs: default_max_wait_secs(),
            output_limit: default_output_limit(),
        }
    }
}

/// `[executor]` section: how privileged commands are spawned.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSection {
    /// Elevation prefix. The command runs as `<elevate...> <shell> -c <cmd>`.
    ///
    /// An empty list runs the shell directly and treats privilege as always
    /// available (e.g. when the controller itself runs as root).
    #[serde(default = "default_elevate")]
    pub elevate: Vec<String>,

    #[serde(default = "default_shell")]
    pub shell: String,

    /// Upper bound for a single privileged call.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// How long a privilege check result is reused.
    #[serde(default = "default_privilege_cache_secs")]
    pub privilege_cache_secs: u64,
}

fn default_elevate() -> Vec<String> {
    vec!["sudo".to_string(), "-n".to_string()]
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_command_timeout_secs() -> u64 {
    15
}

fn default_privilege_cache_secs() -> u64 {
    30
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            elevate: default_elevate(),
            shell: default_shell(),
            command_timeout_secs: default_command_timeout_secs(),
            privilege_cache_secs: default_privilege_cache_secs(),
        }
    }
}

impl ExecutorSection {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn privilege_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.privilege_cache_secs)
    }
}

/// `[watchdog]` section: deadline formula constants and recovery policy.
///
/// The deadline for a run is
/// `min(max(count * wait + count * per_iteration_budget, base_timeout) * 1000
///  + safety_margin_ms, hard_cap_ms)`.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchdogSection {
    #[serde(default = "default_per_iteration_budget_secs")]
    pub per_iteration_budget_secs: u64,

    #[serde(default = "default_base_timeout_secs")]
    pub base_timeout_secs: u64,

    #[serde(default = "default_safety_margin_ms")]
    pub safety_margin_ms: u64,

    #[serde(default = "default_hard_cap_ms")]
    pub hard_cap_ms: u64,

    /// Consecutive timeouts before a hard reset.
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,

    /// Time a cancelled runner gets to stop on its own before it is aborted.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Period of the watchdog tick; `0` disables it and leaves evaluation to
    /// incoming notifications only.
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
}

fn default_per_iteration_budget_secs() -> u64 {
    10
}

fn default_base_timeout_secs() -> u64 {
    60
}

fn default_safety_margin_ms() -> u64 {
    60_000
}

fn default_hard_cap_ms() -> u64 {
    600_000
}

fn default_max_retry() -> u32 {
    3
}

fn default_grace_period_ms() -> u64 {
    2_000
}

fn default_check_interval_ms() -> u64 {
    30_000
}

impl Default for WatchdogSection {
    fn default() -> Self {
        Self {
            per_iteration_budget_secs: default_per_iteration_budget_secs(),
            base_timeout_secs: default_base_timeout_secs(),
            safety_margin_ms: default_safety_margin_ms(),
            hard_cap_ms: default_hard_cap_ms(),
            max_retry: default_max_retry(),
            grace_period_ms: default_grace_period_ms(),
            check_interval_ms: default_check_interval_ms(),
        }
    }
}

impl WatchdogSection {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn check_interval(&self) -> Option<Duration> {
        (self.check_interval_ms > 0).then(|| Duration::from_millis(self.check_interval_ms))
    }
}
