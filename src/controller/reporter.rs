// src/controller/reporter.rs

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tracing::{error, info};

use crate::descriptor::{
    Document, FIELD_ENABLED, FIELD_ERROR, FIELD_RESULT, FIELD_UPDATED_AT,
};
use crate::errors::RelayError;
use crate::store::DescriptorStore;

/// The single write path back to the descriptor store.
#[derive(Debug, Clone)]
pub struct ResultReporter {
    store: Arc<dyn DescriptorStore>,
}

impl ResultReporter {
    pub fn new(store: Arc<dyn DescriptorStore>) -> Self {
        Self { store }
    }

    /// Clear `enabled`, overwrite `result`/`error`, stamp `updatedAt`.
    ///
    /// One attempt only. Returns the `updatedAt` written, or `None` if the
    /// write failed (logged as a reporting error).
    pub async fn report_completion(&self, result: &str, error: &str) -> Option<u64> {
        let updated_at = now_millis();

        let mut fields = Document::new();
        fields.insert(FIELD_ENABLED.to_string(), Value::Bool(false));
        fields.insert(FIELD_RESULT.to_string(), Value::String(result.to_string()));
        fields.insert(FIELD_ERROR.to_string(), Value::String(error.to_string()));
        fields.insert(FIELD_UPDATED_AT.to_string(), Value::from(updated_at));

        match self.store.update(fields).await {
            Ok(()) => {
                info!(updated_at, has_error = !error.is_empty(), "reported completion");
                Some(updated_at)
            }
            Err(err) => {
                let err = RelayError::Reporting(err.to_string());
                error!(error = %err, "failed to write completion; next notification will reconcile");
                None
            }
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
