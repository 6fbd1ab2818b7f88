//! Chunk concatenation for streamed outputs.
//!
//! A stream is a sequence of partial values. Folding every chunk with
//! [`concat`] reproduces the value the same unit returns from `invoke`:
//! text deltas join into one string, keyed chunks from a parallel fan-out
//! merge into one object.

use crate::error::Result;
use crate::payload::ChunkStream;
use futures::StreamExt;
use serde_json::Value;

/// Append `chunk` to an accumulated value.
///
/// - `Null` is the identity on either side
/// - strings and arrays concatenate
/// - objects merge key-wise, concatenating values present on both sides
/// - any other combination keeps the later chunk
pub fn concat(acc: Value, chunk: Value) -> Value {
    match (acc, chunk) {
        (Value::Null, chunk) => chunk,
        (acc, Value::Null) => acc,
        (Value::String(mut a), Value::String(b)) => {
            a.push_str(&b);
            Value::String(a)
        }
        (Value::Array(mut a), Value::Array(b)) => {
            a.extend(b);
            Value::Array(a)
        }
        (Value::Object(mut a), Value::Object(b)) => {
            for (key, value) in b {
                match a.get_mut(&key) {
                    Some(slot) => {
                        let existing = std::mem::take(slot);
                        *slot = concat(existing, value);
                    }
                    None => {
                        a.insert(key, value);
                    }
                }
            }
            Value::Object(a)
        }
        (_, chunk) => chunk,
    }
}

/// Drain a chunk stream into one value.
///
/// Returns the first error unchanged. An empty stream yields `Null`.
pub async fn collect(mut stream: ChunkStream<'_>) -> Result<Value> {
    let mut acc = Value::Null;
    while let Some(chunk) = stream.next().await {
        acc = concat(acc, chunk?);
    }
    Ok(acc)
}

/// Article plus JSON type of `value`, for error messages.
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PipelineError;
    use futures::stream;
    use serde_json::json;

    #[test]
    fn test_strings_concatenate() {
        assert_eq!(concat(json!("Hel"), json!("lo")), json!("Hello"));
    }

    #[test]
    fn test_null_is_identity() {
        assert_eq!(concat(Value::Null, json!(3)), json!(3));
        assert_eq!(concat(json!("x"), Value::Null), json!("x"));
    }

    #[test]
    fn test_objects_merge_keywise() {
        let acc = json!({"a": "Par", "b": [1]});
        let merged = concat(acc, json!({"a": "is", "c": true}));
        assert_eq!(merged, json!({"a": "Paris", "b": [1], "c": true}));
    }

    #[test]
    fn test_nested_object_merge() {
        let acc = json!({"outer": {"x": "ab"}});
        let merged = concat(acc, json!({"outer": {"x": "cd", "y": 1}}));
        assert_eq!(merged, json!({"outer": {"x": "abcd", "y": 1}}));
    }

    #[test]
    fn test_mismatched_kinds_keep_later() {
        assert_eq!(concat(json!(1), json!("two")), json!("two"));
        assert_eq!(concat(json!({"a": 1}), json!([1])), json!([1]));
    }

    #[tokio::test]
    async fn test_collect_folds_stream() {
        let chunks = stream::iter(vec![Ok(json!("a")), Ok(json!("b")), Ok(json!("c"))]).boxed();
        assert_eq!(collect(chunks).await.unwrap(), json!("abc"));
    }

    #[tokio::test]
    async fn test_collect_empty_is_null() {
        let chunks = stream::iter(Vec::<Result<Value>>::new()).boxed();
        assert_eq!(collect(chunks).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_collect_stops_on_error() {
        let chunks = stream::iter(vec![
            Ok(json!("a")),
            Err(PipelineError::Cancelled),
            Ok(json!("b")),
        ])
        .boxed();
        assert!(matches!(
            collect(chunks).await,
            Err(PipelineError::Cancelled)
        ));
    }
}
