// src/descriptor/decode.rs

use serde_json::Value;

use super::{
    Document, FIELD_COMMAND, FIELD_COUNT, FIELD_ENABLED, FIELD_ERROR, FIELD_RESULT,
    FIELD_UPDATED_AT, FIELD_WAIT,
};

/// Snapshot of the descriptor document, decoded defensively.
///
/// Decoding never fails: an absent field and a field of the wrong type are
/// treated the same way and fall back to the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub command: String,
    pub enabled: bool,
    /// Raw repetition count, not yet clamped.
    pub count: i64,
    /// Raw pause between repetitions in seconds, not yet clamped.
    pub wait_seconds: i64,
    pub result: String,
    pub error: String,
    /// Epoch milliseconds of the controller's last write, if any.
    pub updated_at: Option<u64>,
}

impl Default for CommandDescriptor {
    fn default() -> Self {
        Self {
            command: String::new(),
            enabled: false,
            count: 1,
            wait_seconds: 0,
            result: String::new(),
            error: String::new(),
            updated_at: None,
        }
    }
}

impl CommandDescriptor {
    pub fn from_document(doc: &Document) -> Self {
        let defaults = Self::default();

        Self {
            command: string_field(doc, FIELD_COMMAND).unwrap_or(defaults.command),
            enabled: bool_field(doc, FIELD_ENABLED).unwrap_or(defaults.enabled),
            count: int_field(doc, FIELD_COUNT).unwrap_or(defaults.count),
            wait_seconds: int_field(doc, FIELD_WAIT).unwrap_or(defaults.wait_seconds),
            result: string_field(doc, FIELD_RESULT).unwrap_or(defaults.result),
            error: string_field(doc, FIELD_ERROR).unwrap_or(defaults.error),
            updated_at: int_field(doc, FIELD_UPDATED_AT).and_then(|ms| u64::try_from(ms).ok()),
        }
    }
}

fn string_field(doc: &Document, key: &str) -> Option<String> {
    match doc.get(key)? {
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn bool_field(doc: &Document, key: &str) -> Option<bool> {
    match doc.get(key)? {
        Value::Bool(b) => Some(*b),
        _ => None,
    }
}

/// Integers may arrive as JSON integers or integral floats (some document
/// stores only have doubles). Strings are a type mismatch.
fn int_field(doc: &Document, key: &str) -> Option<i64> {
    match doc.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f.clamp(i64::MIN as f64, i64::MAX as f64) as i64)
        }),
        _ => None,
    }
}
