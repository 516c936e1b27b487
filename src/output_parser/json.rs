//! JSON extraction from model replies and program output.
//!
//! [`parse_json`] pulls a typed value out of a model reply that may wrap it
//! in reasoning blocks, markdown fences or prose. [`find_json_array`] locates
//! the array a generated program printed.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::output_parser::error::{truncate, ParseError};
use crate::output_parser::extract::{
    bracketed_regions, extract_code_block, extract_code_block_for, find_bracketed, preprocess,
};

/// Parse a model reply into a typed value.
///
/// Strategies (in order):
/// 1. Direct deserialize on the preprocessed text
/// 2. Extract from a `` ```json `` block
/// 3. Extract from any code block that starts with `{` or `[`
/// 4. Bracket-match a JSON object (`{...}`)
/// 5. Bracket-match a JSON array (`[...]`)
///
/// # Examples
///
/// ```
/// use serde::Deserialize;
/// use llm_agent::output_parser::parse_json;
///
/// #[derive(Deserialize)]
/// struct Plan {
///     plan: String,
/// }
///
/// let reply = "<think>hmm</think>Here you go: {\"plan\": \"count the rows\"}";
/// let plan: Plan = parse_json(reply).unwrap();
/// assert_eq!(plan.plan, "count the rows");
/// ```
pub fn parse_json<T: DeserializeOwned>(response: &str) -> Result<T, ParseError> {
    let cleaned = preprocess(response);
    if cleaned.is_empty() {
        return Err(ParseError::EmptyResponse);
    }

    let candidates = json_candidates(&cleaned);
    let mut first_error = None;

    for candidate in &candidates {
        match serde_json::from_str::<T>(candidate) {
            Ok(value) => return Ok(value),
            // Prose that merely failed to parse is not a JSON candidate.
            Err(e) if candidate.starts_with(['{', '[']) => {
                first_error.get_or_insert_with(|| (e.to_string(), truncate(candidate, 200)));
            }
            Err(_) => {}
        }
    }

    match first_error {
        Some((reason, raw_json)) => Err(ParseError::DeserializationFailed { reason, raw_json }),
        None => Err(ParseError::Unparseable {
            expected_format: "JSON",
            text: truncate(&cleaned, 200),
        }),
    }
}

/// Candidate JSON substrings of `cleaned`, most specific strategy first.
fn json_candidates(cleaned: &str) -> Vec<&str> {
    let mut candidates = vec![cleaned];

    if let Some(content) = extract_code_block_for(cleaned, "json") {
        candidates.push(content);
    }
    if let Some((_lang, content)) = extract_code_block(cleaned) {
        if content.starts_with('{') || content.starts_with('[') {
            candidates.push(content);
        }
    }
    if let Some(object) = find_bracketed(cleaned, '{', '}') {
        candidates.push(object);
    }
    if let Some(array) = find_bracketed(cleaned, '[', ']') {
        candidates.push(array);
    }

    candidates.dedup();
    candidates
}

/// Locate a JSON array in free-form program output.
///
/// The widest span, from the first `[` to the last `]`, is tried first.
/// When that does not parse as an array (for example because the output
/// holds several bracketed fragments), each complete top-level bracketed
/// region is tried, preferring the last one that parses.
///
/// # Examples
///
/// ```
/// use llm_agent::output_parser::find_json_array;
/// use serde_json::json;
///
/// assert_eq!(find_json_array("answer: [4]"), Some(vec![json!(4)]));
/// assert_eq!(
///     find_json_array("debug [x] ... final [1, 2]"),
///     Some(vec![json!(1), json!(2)])
/// );
/// assert_eq!(find_json_array("no array here"), None);
/// ```
pub fn find_json_array(output: &str) -> Option<Vec<Value>> {
    let start = output.find('[')?;
    let end = output.rfind(']')?;

    if start < end {
        if let Ok(Value::Array(items)) = serde_json::from_str(&output[start..=end]) {
            return Some(items);
        }
    }

    bracketed_regions(output, '[', ']')
        .into_iter()
        .rev()
        .find_map(|region| match serde_json::from_str(region) {
            Ok(Value::Array(items)) => Some(items),
            _ => None,
        })
}
