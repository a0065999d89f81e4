// tests/config_loading.rs

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::NamedTempFile;
use shellrelay::config::{ConfigFile, load_and_validate, load_or_default};
use shellrelay::errors::RelayError;
use shellrelay_test_utils::ConfigBuilder;

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

fn expect_config_error(contents: &str, needle: &str) {
    let file = config_file(contents);
    match load_and_validate(file.path()) {
        Err(RelayError::ConfigError(msg)) => {
            assert!(msg.contains(needle), "message {msg:?} should mention {needle:?}");
        }
        Err(e) => panic!("Expected ConfigError, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn empty_file_yields_defaults() {
    let file = config_file("");
    let cfg = load_and_validate(file.path()).unwrap();

    assert_eq!(cfg.store.document, PathBuf::from("descriptor.json"));
    assert_eq!(cfg.limits.max_count, 50);
    assert_eq!(cfg.limits.warn_count, 20);
    assert_eq!(cfg.limits.max_wait_secs, 300);
    assert_eq!(cfg.limits.output_limit, 200);
    assert_eq!(cfg.executor.elevate, vec!["sudo".to_string(), "-n".to_string()]);
    assert_eq!(cfg.executor.command_timeout(), Duration::from_secs(15));
    assert_eq!(cfg.executor.privilege_cache_ttl(), Duration::from_secs(30));
    assert_eq!(cfg.watchdog.base_timeout_secs, 60);
    assert_eq!(cfg.watchdog.max_retry, 3);
    assert_eq!(cfg.watchdog.grace_period(), Duration::from_secs(2));
    assert_eq!(cfg.watchdog.check_interval(), Some(Duration::from_secs(30)));
}

#[test]
fn partial_sections_keep_other_defaults() {
    let file = config_file(
        r#"
[store]
document = "/var/lib/shellrelay/cmd.json"

[limits]
max_count = 10
warn_count = 5

[watchdog]
check_interval_ms = 0
"#,
    );
    let cfg = load_and_validate(file.path()).unwrap();

    assert_eq!(cfg.store.document, Path::new("/var/lib/shellrelay/cmd.json"));
    assert_eq!(cfg.limits.max_count, 10);
    assert_eq!(cfg.limits.warn_count, 5);
    assert_eq!(cfg.limits.max_wait_secs, 300);
    assert_eq!(cfg.executor.shell, "sh");
    assert_eq!(cfg.watchdog.check_interval(), None);
}

#[test]
fn zero_max_count_is_rejected() {
    expect_config_error("[limits]\nmax_count = 0\nwarn_count = 0\n", "max_count");
}

#[test]
fn warn_count_above_max_is_rejected() {
    expect_config_error("[limits]\nmax_count = 5\nwarn_count = 6\n", "warn_count");
}

#[test]
fn empty_shell_is_rejected() {
    expect_config_error("[executor]\nshell = \"  \"\n", "shell");
}

#[test]
fn blank_elevate_argument_is_rejected() {
    expect_config_error("[executor]\nelevate = [\"sudo\", \"\"]\n", "elevate");
}

#[test]
fn zero_command_timeout_is_rejected() {
    expect_config_error("[executor]\ncommand_timeout_secs = 0\n", "command_timeout_secs");
}

#[test]
fn zero_hard_cap_and_zero_retry_are_rejected() {
    expect_config_error("[watchdog]\nhard_cap_ms = 0\n", "hard_cap_ms");
    expect_config_error("[watchdog]\nmax_retry = 0\n", "max_retry");
}

#[test]
fn malformed_toml_is_a_toml_error() {
    let file = config_file("[limits\nmax_count = ");
    match load_and_validate(file.path()) {
        Err(RelayError::TomlError(_)) => {}
        other => panic!("Expected TomlError, got: {:?}", other),
    }
}

#[test]
fn explicit_missing_path_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    match load_or_default(Some(&missing)) {
        Err(RelayError::IoError(_)) => {}
        other => panic!("Expected IoError, got: {:?}", other),
    }
}

#[test]
fn builder_config_passes_validation() {
    let cfg: ConfigFile = ConfigBuilder::new().fast_watchdog(150).max_count(5).build();
    assert!(cfg.executor.elevate.is_empty());
    assert_eq!(cfg.watchdog.safety_margin_ms, 150);
    assert_eq!(cfg.limits.max_count, 5);
    assert!(cfg.limits.warn_count <= 5);
}

#[test]
fn error_messages_carry_their_context() {
    let timeout = RelayError::Timeout {
        elapsed_ms: 130_500,
        deadline_ms: 120_000,
        attempt: 2,
        max_retry: 3,
    };
    let text = timeout.to_string();
    assert!(text.contains("120000ms"));
    assert!(text.contains("retry attempt 2/3"));

    let iteration = RelayError::Iteration {
        iteration: 4,
        exit_code: 1,
        message: "boom".into(),
    };
    assert_eq!(iteration.to_string(), "iteration 4 failed (exit 1): boom");

    assert!(RelayError::HardReset { attempts: 3 }.to_string().contains("3 consecutive timeouts"));
}
