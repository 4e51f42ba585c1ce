//! Recursive input sanitization.
//!
//! [`sanitize`] walks an arbitrary JSON value and cleans every string it
//! finds, including object keys. The shape of the value is preserved and
//! non-string scalars pass through untouched. Cleaning is a single pass;
//! see [`clean_text`] for the exact steps.

mod text;

pub use text::{
    clean_text, sanitize_caption, sanitize_filename, sanitize_url, SanitizeError,
    CAPTION_MAX_CHARS, FILENAME_MAX_CHARS,
};

use serde_json::{Map, Value};

/// Sanitize every string leaf and object key in `value`.
pub fn sanitize(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(clean_text(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(k, v)| (clean_text(&k), sanitize(v)))
                .collect::<Map<String, Value>>(),
        ),
        other => other,
    }
}
