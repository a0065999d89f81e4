// src/descriptor/mod.rs

//! The remote command descriptor.
//!
//! - [`decode`] turns a raw document snapshot into a [`CommandDescriptor`],
//!   defaulting missing or mistyped fields.
//! - [`validate`] applies the safety ceilings and produces the
//!   [`ValidatedDescriptor`] a runner is started with.

pub mod decode;
pub mod validate;

use serde_json::{Map, Value};

pub use decode::CommandDescriptor;
pub use validate::{ValidatedDescriptor, clamp_count, clamp_wait};

/// A document snapshot as held by the descriptor store.
pub type Document = Map<String, Value>;

pub const FIELD_COMMAND: &str = "command";
pub const FIELD_ENABLED: &str = "enabled";
pub const FIELD_COUNT: &str = "count";
pub const FIELD_WAIT: &str = "wait";
pub const FIELD_RESULT: &str = "result";
pub const FIELD_ERROR: &str = "error";
pub const FIELD_UPDATED_AT: &str = "updatedAt";
