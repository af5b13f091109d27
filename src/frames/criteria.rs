//! Success criteria validation for frame results

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// First criterion a frame result failed to satisfy
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CriteriaMismatch {
    #[error("missing key '{0}' in frame result")]
    MissingKey(String),
    #[error("value mismatch for '{key}': expected {expected}, got {actual}")]
    ValueMismatch {
        key: String,
        expected: Value,
        actual: Value,
    },
}

/// Every criterion must be present in the result with an equal value
pub fn validate(
    result: &Map<String, Value>,
    criteria: &Map<String, Value>,
) -> Result<(), CriteriaMismatch> {
    for (key, expected) in criteria {
        let Some(actual) = result.get(key) else {
            debug!(key = %key, "Success criterion missing from result");
            return Err(CriteriaMismatch::MissingKey(key.clone()));
        };
        if actual != expected {
            debug!(key = %key, expected = %expected, actual = %actual, "Success criterion mismatch");
            return Err(CriteriaMismatch::ValueMismatch {
                key: key.clone(),
                expected: expected.clone(),
                actual: actual.clone(),
            });
        }
    }
    Ok(())
}
