//! Payload decoding and field validation shared by the domain services

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::clock;
use crate::error::StorageError;

/// Decode a JSON payload into a typed input. Shape errors (wrong types,
/// unknown or missing fields) are validation errors.
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T, StorageError> {
    serde_json::from_value(value).map_err(|e| StorageError::Validation(e.to_string()))
}

/// Trimmed, non-empty text no longer than `max` characters
pub fn required_text(field: &str, value: &str, max: usize) -> Result<String, StorageError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(StorageError::Validation(format!("{} must not be empty", field)));
    }
    if trimmed.chars().count() > max {
        return Err(StorageError::Validation(format!(
            "{} must be at most {} characters",
            field, max
        )));
    }
    Ok(trimmed.to_string())
}

/// Optional text; blank strings become `None`
pub fn optional_text(field: &str, value: Option<String>, max: usize) -> Result<Option<String>, StorageError> {
    match value {
        Some(text) if !text.trim().is_empty() => required_text(field, &text, max).map(Some),
        _ => Ok(None),
    }
}

/// Normalize an RFC 3339 timestamp to UTC with millisecond precision
pub fn optional_timestamp(field: &str, value: Option<String>) -> Result<Option<String>, StorageError> {
    match value {
        Some(raw) => {
            let ms = clock::parse_rfc3339_ms(field, raw.trim())?;
            Ok(Some(clock::format_ms(ms)))
        }
        None => Ok(None),
    }
}
