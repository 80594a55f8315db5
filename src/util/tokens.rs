//! Character-based token estimation.
//!
//! Thresholds elsewhere in the crate are calibrated against this heuristic,
//! so it stays a plain chars ÷ 4 over the serialized JSON form.

use serde::Serialize;

use crate::types::Content;

pub const CHARS_PER_TOKEN: usize = 4;

/// Length, in characters, of the JSON serialization of `value`.
pub fn serialized_len<T: Serialize + ?Sized>(value: &T) -> usize {
    serde_json::to_string(value)
        .map(|json| json.chars().count())
        .unwrap_or(0)
}

/// Estimated token count of any serializable value.
pub fn estimate_tokens<T: Serialize + ?Sized>(value: &T) -> usize {
    serialized_len(value) / CHARS_PER_TOKEN
}

/// Estimated token count of a history serialized as one JSON array.
pub fn estimate_history_tokens(history: &[Content]) -> usize {
    estimate_tokens(history)
}
