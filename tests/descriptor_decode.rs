// tests/descriptor_decode.rs

use proptest::prelude::*;
use serde_json::{Value, json};

use shellrelay::config::LimitsSection;
use shellrelay::descriptor::{CommandDescriptor, Document, clamp_count, clamp_wait};
use shellrelay::errors::RelayError;
use shellrelay_test_utils::DocumentBuilder;

fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

#[test]
fn missing_fields_take_defaults() {
    let d = CommandDescriptor::from_document(&Document::new());
    assert_eq!(d.command, "");
    assert!(!d.enabled);
    assert_eq!(d.count, 1);
    assert_eq!(d.wait_seconds, 0);
    assert_eq!(d.updated_at, None);
}

#[test]
fn mistyped_fields_are_treated_as_absent() {
    let d = CommandDescriptor::from_document(&doc(json!({
        "command": 42,
        "enabled": "true",
        "count": [3],
        "wait": {"secs": 2},
        "result": false,
    })));
    assert_eq!(d.command, "");
    assert!(!d.enabled);
    assert_eq!(d.count, 1);
    assert_eq!(d.wait_seconds, 0);
    assert_eq!(d.result, "");
}

#[test]
fn integral_floats_are_accepted() {
    let d = CommandDescriptor::from_document(&doc(json!({
        "command": "uptime",
        "enabled": true,
        "count": 3.0,
        "wait": 7.0,
        "updatedAt": 1700000000000.0,
    })));
    assert_eq!(d.count, 3);
    assert_eq!(d.wait_seconds, 7);
    assert_eq!(d.updated_at, Some(1_700_000_000_000));

    let fractional = CommandDescriptor::from_document(&doc(json!({ "count": 2.5, "wait": 0.5 })));
    assert_eq!(fractional.count, 1);
    assert_eq!(fractional.wait_seconds, 0);
}

#[test]
fn numeric_strings_fall_back_to_defaults() {
    let d = CommandDescriptor::from_document(&doc(json!({
        "command": "uptime",
        "enabled": true,
        "count": "3",
        "wait": " 7 ",
        "updatedAt": "1700000000000",
    })));
    assert_eq!(d.count, 1);
    assert_eq!(d.wait_seconds, 0);
    assert_eq!(d.updated_at, None);
}

#[test]
fn clamps_match_the_documented_ceilings() {
    let limits = LimitsSection::default();
    assert_eq!(clamp_count(1000, &limits).unwrap(), 50);
    assert_eq!(clamp_count(21, &limits).unwrap(), 21);
    assert_eq!(clamp_wait(-5, &limits), 0);
    assert_eq!(clamp_wait(10_000, &limits), 300);
    assert_eq!(clamp_wait(12, &limits), 12);
}

#[test]
fn non_positive_count_is_a_validation_error() {
    let limits = LimitsSection::default();
    for raw in [0, -1, i64::MIN] {
        match clamp_count(raw, &limits) {
            Err(RelayError::Validation(msg)) => assert!(msg.contains("count must be >= 1")),
            other => panic!("expected validation error for {raw}, got {other:?}"),
        }
    }
}

#[test]
fn validate_trims_command_and_rejects_blank() {
    let limits = LimitsSection::default();

    let ok = CommandDescriptor::from_document(&DocumentBuilder::request("  id -u \n", 2, 1).build())
        .validate(&limits)
        .unwrap();
    assert_eq!(ok.command, "id -u");
    assert_eq!(ok.count, 2);
    assert_eq!(ok.wait_seconds, 1);

    let blank = CommandDescriptor::from_document(&DocumentBuilder::request("   ", 1, 0).build());
    assert!(matches!(blank.validate(&limits), Err(RelayError::Validation(_))));
}

proptest! {
    #[test]
    fn clamped_count_is_always_within_bounds(raw in any::<i64>()) {
        let limits = LimitsSection::default();
        match clamp_count(raw, &limits) {
            Ok(count) => {
                prop_assert!(raw >= 1);
                prop_assert!((1..=limits.max_count).contains(&count));
                if raw <= i64::from(limits.max_count) {
                    prop_assert_eq!(i64::from(count), raw);
                }
            }
            Err(_) => prop_assert!(raw <= 0),
        }
    }

    #[test]
    fn clamped_wait_is_always_within_bounds(raw in any::<i64>()) {
        let limits = LimitsSection::default();
        let wait = clamp_wait(raw, &limits);
        prop_assert!(wait <= limits.max_wait_secs);
        if (0..=300).contains(&raw) {
            prop_assert_eq!(wait as i64, raw);
        }
    }
}
