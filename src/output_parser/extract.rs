//! Text extraction shared by every consumer of model output.
//!
//! Model replies and program output arrive as free text. These helpers strip
//! reasoning blocks, pull code out of markdown fences and locate bracketed
//! JSON regions.

/// Strip `<think>`/`<thinking>` blocks, then trim whitespace.
pub fn preprocess(text: &str) -> String {
    let stripped = strip_think_tags(text);
    stripped.trim().to_string()
}

/// Strip all `<think>...</think>` and `<thinking>...</thinking>` blocks from text.
///
/// Handles complete blocks, incomplete blocks (no closing tag),
/// and multiple sequential blocks.
///
/// # Examples
///
/// ```
/// use llm_agent::output_parser::strip_think_tags;
///
/// assert_eq!(strip_think_tags("<think>reasoning</think>result"), "result");
/// assert_eq!(strip_think_tags("<think>no closing tag"), "");
/// assert_eq!(strip_think_tags("<thinking>also works</thinking>done"), "done");
/// ```
pub fn strip_think_tags(text: &str) -> String {
    let result = strip_tag_variant(text, "<think>", "</think>");
    strip_tag_variant(&result, "<thinking>", "</thinking>")
}

fn strip_tag_variant(text: &str, open: &str, close: &str) -> String {
    let mut result = text.to_string();
    while let Some(start) = result.find(open) {
        match result[start..].find(close) {
            Some(end_offset) => {
                let end = start + end_offset + close.len();
                result.replace_range(start..end, "");
            }
            None => {
                // unterminated: drop everything after the open tag
                result.truncate(start);
                break;
            }
        }
    }
    result
}

/// Extract content from the first complete markdown code block.
///
/// Returns `(language_hint, content)` where the hint is `None` for bare
/// fences.
///
/// # Examples
///
/// ```
/// use llm_agent::output_parser::extract::extract_code_block;
///
/// let input = "Here:\n```python\nprint(1)\n```";
/// let (lang, content) = extract_code_block(input).unwrap();
/// assert_eq!(lang, Some("python"));
/// assert_eq!(content, "print(1)");
/// ```
pub fn extract_code_block(text: &str) -> Option<(Option<&str>, &str)> {
    let mut search_from = 0;
    while let Some(fence_start) = text[search_from..].find("```") {
        let after_backticks = search_from + fence_start + 3;

        let line_end = text[after_backticks..].find('\n')?;
        let lang_str = text[after_backticks..after_backticks + line_end].trim();
        let lang = (!lang_str.is_empty()).then_some(lang_str);

        let content_start = after_backticks + line_end + 1;
        if let Some(close_offset) = text[content_start..].find("```") {
            let content = text[content_start..content_start + close_offset].trim();
            return Some((lang, content));
        }

        search_from = after_backticks;
    }
    None
}

/// Extract content from the first code block tagged with `lang`
/// (case-insensitive). Blocks with another or no language are skipped.
///
/// # Examples
///
/// ```
/// use llm_agent::output_parser::extract::extract_code_block_for;
///
/// let input = "```text\nnotes\n```\n```json\n[1, 2, 3]\n```";
/// assert_eq!(extract_code_block_for(input, "json"), Some("[1, 2, 3]"));
/// ```
pub fn extract_code_block_for<'a>(text: &'a str, lang: &str) -> Option<&'a str> {
    let mut search_from = 0;
    while let Some(fence_start) = text[search_from..].find("```") {
        let after_backticks = search_from + fence_start + 3;
        let line_end = text[after_backticks..].find('\n')?;
        let lang_str = text[after_backticks..after_backticks + line_end].trim();
        let content_start = after_backticks + line_end + 1;
        let close_offset = text[content_start..].find("```")?;

        if lang_str.eq_ignore_ascii_case(lang) {
            return Some(text[content_start..content_start + close_offset].trim());
        }

        // skip past this block's closing fence
        search_from = content_start + close_offset + 3;
    }
    None
}

/// Every top-level region delimited by `open`/`close`, in order.
///
/// Nesting-aware, and delimiters inside double-quoted strings are ignored.
/// Scanning stops at the first region that never closes.
///
/// # Examples
///
/// ```
/// use llm_agent::output_parser::extract::bracketed_regions;
///
/// let regions = bracketed_regions("a [1, [2]] b [\"]\"] c [open", '[', ']');
/// assert_eq!(regions, vec!["[1, [2]]", "[\"]\"]"]);
/// ```
pub fn bracketed_regions(text: &str, open: char, close: char) -> Vec<&str> {
    let mut regions = Vec::new();
    let mut scan_from = 0;

    while let Some(offset) = text[scan_from..].find(open) {
        let start = scan_from + offset;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escape_next = false;
        let mut found_end = None;

        for (i, ch) in text[start..].char_indices() {
            if escape_next {
                escape_next = false;
                continue;
            }
            if ch == '\\' && in_string {
                escape_next = true;
                continue;
            }
            if ch == '"' {
                in_string = !in_string;
                continue;
            }
            if in_string {
                continue;
            }
            if ch == open {
                depth += 1;
            } else if ch == close {
                depth -= 1;
                if depth == 0 {
                    found_end = Some(start + i);
                    break;
                }
            }
        }

        match found_end {
            Some(end) => {
                regions.push(&text[start..end + close.len_utf8()]);
                scan_from = end + close.len_utf8();
            }
            None => break,
        }
    }

    regions
}

/// The last top-level bracketed region, which is usually the answer when
/// a reply mixes prose and data.
///
/// # Examples
///
/// ```
/// use llm_agent::output_parser::extract::find_bracketed;
///
/// let input = r#"Plan: {"plan": "count rows", "steps": []}"#;
/// assert_eq!(find_bracketed(input, '{', '}'), Some(r#"{"plan": "count rows", "steps": []}"#));
/// ```
pub fn find_bracketed(text: &str, open: char, close: char) -> Option<&str> {
    bracketed_regions(text, open, close).pop()
}
