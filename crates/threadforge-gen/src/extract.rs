//! Lenient payload extraction from conversational model output.
//!
//! Models wrap JSON in commentary and code fences. Extraction takes the slice from the
//! first opening delimiter to the last closing delimiter and decodes only that slice.
//! This is a stable contract: anything outside the outermost delimiters is ignored.

use serde_json::Value;

/// A successful response whose payload could not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    #[error("no JSON array found in response")]
    NoArrayFound,
    #[error("no JSON object found in response")]
    NoObjectFound,
    #[error("invalid JSON payload: {0}")]
    InvalidJson(String),
    #[error("unexpected payload shape: {0}")]
    InvalidShape(String),
}

/// The slice `[first open ..= last close]`, if both exist in that order.
fn delimited_slice(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// The first-`[`-to-last-`]` slice of `text`.
pub fn array_slice(text: &str) -> Result<&str, ShapeError> {
    delimited_slice(text, '[', ']').ok_or(ShapeError::NoArrayFound)
}

/// The first-`{`-to-last-`}` slice of `text`.
pub fn object_slice(text: &str) -> Result<&str, ShapeError> {
    delimited_slice(text, '{', '}').ok_or(ShapeError::NoObjectFound)
}

/// Decode the outermost array in `text`.
pub fn extract_array(text: &str) -> Result<Vec<Value>, ShapeError> {
    let slice = array_slice(text)?;
    match serde_json::from_str::<Value>(slice) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(other) => Err(ShapeError::InvalidShape(format!(
            "expected an array, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(ShapeError::InvalidJson(e.to_string())),
    }
}

/// Decode the outermost object in `text`.
pub fn extract_object(text: &str) -> Result<serde_json::Map<String, Value>, ShapeError> {
    let slice = object_slice(text)?;
    match serde_json::from_str::<Value>(slice) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ShapeError::InvalidShape(format!(
            "expected an object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(ShapeError::InvalidJson(e.to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Truncate `text` to at most `max` chars for log output.
pub(crate) fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
