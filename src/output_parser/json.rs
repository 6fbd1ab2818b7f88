//! JSON extraction from model text.
//!
//! Candidates are tried in order until one parses:
//!
//! 1. the whole text, after `<think>` blocks are stripped
//! 2. the first `` ```json `` fence
//! 3. the first fence of any language
//! 4. the last balanced `{...}`
//! 5. the last balanced `[...]`

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::error::{truncate, ParseError};
use super::extract::{fenced_block, find_bracketed, preprocess};

/// Parse model text into any JSON value.
///
/// ```
/// use llm_runnable::output_parser::parse_json_value;
/// use serde_json::json;
///
/// let text = "Sure! Here you go:\n```json\n{\"setup\": \"Why?\", \"punchline\": \"Because.\"}\n```";
/// let value = parse_json_value(text).unwrap();
/// assert_eq!(value["punchline"], json!("Because."));
/// ```
pub fn parse_json_value(text: &str) -> Result<Value, ParseError> {
    let cleaned = preprocess(text);
    if cleaned.is_empty() {
        return Err(ParseError::EmptyResponse);
    }
    let found = candidates(&cleaned).find_map(|candidate| serde_json::from_str::<Value>(candidate).ok());
    found.ok_or_else(|| ParseError::Unparseable {
        expected_format: "JSON",
        text: truncate(&cleaned, 200),
    })
}

/// Parse model text into a typed value.
///
/// The first candidate that is valid JSON decides: if it does not fit `T`
/// the serde error is reported rather than trying later candidates.
///
/// ```
/// use llm_runnable::output_parser::parse_json;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Verdict {
///     sentiment: String,
/// }
///
/// let v: Verdict = parse_json(r#"<think>hmm</think>{"sentiment": "positive"}"#).unwrap();
/// assert_eq!(v.sentiment, "positive");
/// ```
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, ParseError> {
    let value = parse_json_value(text)?;
    let raw_json = value.to_string();
    serde_json::from_value(value).map_err(|e| ParseError::DeserializationFailed {
        reason: e.to_string(),
        raw_json: truncate(&raw_json, 200),
    })
}

fn candidates(cleaned: &str) -> impl Iterator<Item = &str> {
    [
        Some(cleaned),
        fenced_block(cleaned, Some("json")),
        fenced_block(cleaned, None),
        find_bracketed(cleaned, '{', '}'),
        find_bracketed(cleaned, '[', ']'),
    ]
    .into_iter()
    .flatten()
}
