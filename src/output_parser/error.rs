//! Error type for output parsers.

/// Errors returned by output parsers.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The reply was empty or whitespace-only after preprocessing.
    #[error("empty model response")]
    EmptyResponse,

    /// No strategy found anything resembling the expected format.
    #[error("could not parse {expected_format} from model response: {text}")]
    Unparseable {
        expected_format: &'static str,
        /// A truncated copy of the cleaned text (max 200 chars).
        text: String,
    },

    /// JSON was found but did not deserialize into the target type.
    #[error("JSON deserialization failed: {reason}")]
    DeserializationFailed {
        /// The serde error message.
        reason: String,
        /// The candidate that failed, truncated.
        raw_json: String,
    },
}

/// Truncate to at most `max_chars` characters, appending "..." if cut.
pub(crate) fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
