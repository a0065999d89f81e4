// tests/logging_filter.rs

use shellrelay::cli::LogLevel;
use shellrelay::logging::build_filter;

#[test]
fn cli_flag_wins_over_environment() {
    let filter = build_filter(Some(LogLevel::Debug), Some("trace"));
    assert_eq!(filter.to_string(), "debug");
}

#[test]
fn environment_is_used_without_a_flag() {
    assert_eq!(build_filter(None, Some(" warn ")).to_string(), "warn");
    assert_eq!(
        build_filter(None, Some("shellrelay=trace")).to_string(),
        "shellrelay=trace"
    );
}

#[test]
fn missing_or_invalid_environment_defaults_to_info() {
    assert_eq!(build_filter(None, None).to_string(), "info");
    assert_eq!(build_filter(None, Some("")).to_string(), "info");
    assert_eq!(build_filter(None, Some("shellrelay=loud")).to_string(), "info");
}
