//! Tolerant extraction of JSON from model completions
//!
//! Models are asked for bare JSON but regularly wrap it in Markdown fences
//! or add a sentence around it. These helpers strip fences and, failing a
//! direct parse, retry on the outermost `{...}` / `[...]` span.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Remove a surrounding ```lang ... ``` fence, if any
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(after_open) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop the language tag on the opening line
    let body = match after_open.find('\n') {
        Some(newline) => &after_open[newline + 1..],
        None => after_open,
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// Parse a JSON value out of model output
pub fn parse_json_value(text: &str) -> Result<Value, serde_json::Error> {
    parse_json(text)
}

/// Parse model output into `T`, tolerating fences and surrounding prose
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    let stripped = strip_code_fences(text);
    match serde_json::from_str(stripped) {
        Ok(value) => Ok(value),
        Err(err) => match outermost_span(stripped) {
            Some(span) => serde_json::from_str(span).map_err(|_| err),
            None => Err(err),
        },
    }
}

fn outermost_span(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let close = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}
