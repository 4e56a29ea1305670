//! Locating the structured payload inside a free-text model response.
//!
//! Models wrap their JSON in commentary, code fences, or get cut off at the
//! token limit. The extractor takes the first `{` in the response, follows it
//! to the matching `}` (ignoring braces inside string literals) and parses
//! exactly that region.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("no JSON object found in response ({0} bytes)")]
    NoObject(usize),

    #[error("JSON object starting at byte {0} is never closed")]
    Unbalanced(usize),

    #[error("JSON object could not be parsed: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("JSON object does not match the expected shape: {0}")]
    Shape(#[source] serde_json::Error),
}

/// Byte range of the first balanced `{ ... }` region.
pub fn find_object(text: &str) -> Result<&str, ExtractionError> {
    let start = text.find('{').ok_or(ExtractionError::NoObject(text.len()))?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    let end = start + i + ch.len_utf8();
                    return Ok(&text[start..end]);
                }
            }
            _ => {}
        }
    }

    Err(ExtractionError::Unbalanced(start))
}

/// Parse the first balanced object in `text` as untyped JSON.
pub fn extract_structured(text: &str) -> Result<Value, ExtractionError> {
    let region = find_object(text)?;
    serde_json::from_str(region).map_err(ExtractionError::Parse)
}

/// Parse the first balanced object in `text` into `T`.
pub fn extract_partial<T: DeserializeOwned>(text: &str) -> Result<T, ExtractionError> {
    let value = extract_structured(text)?;
    serde_json::from_value(value).map_err(ExtractionError::Shape)
}
