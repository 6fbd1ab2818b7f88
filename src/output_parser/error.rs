//! Errors raised while reading model text.

/// Why a parser could not turn model text into a value.
///
/// Wrapped in [`PipelineError::Parse`](crate::PipelineError::Parse) together
/// with the name of the parser unit that failed.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The model text was empty or whitespace-only.
    #[error("empty model response")]
    EmptyResponse,

    /// No extraction strategy found the expected format.
    #[error("could not parse {expected_format} from model response: {text}")]
    Unparseable {
        expected_format: &'static str,
        /// The cleaned text, cut to 200 characters.
        text: String,
    },

    /// JSON was found but does not fit the requested Rust type.
    #[error("JSON deserialization failed: {reason}")]
    DeserializationFailed { reason: String, raw_json: String },
}

/// Cut `s` to at most `max_chars` characters, marking the cut with "...".
pub(crate) fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &s[..end]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_counts_chars() {
        assert_eq!(truncate("héllo", 10), "héllo");
        assert_eq!(truncate("héllo", 2), "hé...");
    }

    #[test]
    fn unparseable_message() {
        let err = ParseError::Unparseable {
            expected_format: "JSON",
            text: "nope".into(),
        };
        assert_eq!(err.to_string(), "could not parse JSON from model response: nope");
    }
}
