use crate::config::Config;
use serde_json::Value;

/// Why an ingest body was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidateError {
    /// Body is not parseable JSON.
    InvalidJson,
    /// Raw body, batch length or a single entry is over a limit.  The
    /// message is client-facing; batch violations name the offending index.
    PayloadTooLarge(String),
}

/// Validate a raw ingest body against the configured bounds and return the
/// parsed value so the handler never re-parses.
pub fn validate_body(raw: &[u8], config: &Config) -> Result<Value, ValidateError> {
    if raw.len() > config.max_payload_size {
        return Err(ValidateError::PayloadTooLarge(format!(
            "Payload size {} exceeds maximum of {} bytes",
            raw.len(),
            config.max_payload_size
        )));
    }

    let value: Value = serde_json::from_slice(raw).map_err(|_| ValidateError::InvalidJson)?;

    match value.get("logs").and_then(Value::as_array) {
        Some(logs) => {
            if logs.len() > config.max_batch_size {
                return Err(ValidateError::PayloadTooLarge(format!(
                    "Batch size exceeds maximum of {} entries",
                    config.max_batch_size
                )));
            }
            for (index, entry) in logs.iter().enumerate() {
                if serialized_size(entry) > config.max_single_log_size {
                    return Err(ValidateError::PayloadTooLarge(format!(
                        "Log entry at index {} exceeds maximum size of {} bytes",
                        index, config.max_single_log_size
                    )));
                }
            }
        }
        None => {
            if serialized_size(&value) > config.max_single_log_size {
                return Err(ValidateError::PayloadTooLarge(format!(
                    "Log entry exceeds maximum size of {} bytes",
                    config.max_single_log_size
                )));
            }
        }
    }

    Ok(value)
}

fn serialized_size(value: &Value) -> usize {
    // to_string on a Value that came from from_slice cannot fail.
    serde_json::to_string(value)
        .map(|json| json.len())
        .unwrap_or(usize::MAX)
}
