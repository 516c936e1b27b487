//! Named prompt templates with compiled-in fallbacks.
//!
//! Templates live in a directory as `1_task_breakdown.txt`,
//! `2_code_generation.txt` and `3_code_correction.txt`. A template that is
//! missing, unreadable, or lacks one of its required placeholders is replaced
//! by the built-in default, so template problems are never fatal.
//!
//! Placeholders may be written `{name}`, `${name}` or `$name`. Unknown
//! placeholders are left verbatim. Use `{{`/`}}` for literal braces and `$$`
//! for a literal dollar sign.

use std::path::{Path, PathBuf};

/// The templates the pipeline renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptTemplate {
    TaskBreakdown,
    CodeGeneration,
    CodeCorrection,
}

impl PromptTemplate {
    pub const ALL: [PromptTemplate; 3] = [
        PromptTemplate::TaskBreakdown,
        PromptTemplate::CodeGeneration,
        PromptTemplate::CodeCorrection,
    ];

    /// Logical name, e.g. `task_breakdown`.
    pub fn name(self) -> &'static str {
        match self {
            PromptTemplate::TaskBreakdown => "task_breakdown",
            PromptTemplate::CodeGeneration => "code_generation",
            PromptTemplate::CodeCorrection => "code_correction",
        }
    }

    /// File name without extension inside the template directory.
    pub fn file_stem(self) -> &'static str {
        match self {
            PromptTemplate::TaskBreakdown => "1_task_breakdown",
            PromptTemplate::CodeGeneration => "2_code_generation",
            PromptTemplate::CodeCorrection => "3_code_correction",
        }
    }

    /// Placeholders a template file must mention to be accepted.
    pub fn required_placeholders(self) -> &'static [&'static str] {
        match self {
            PromptTemplate::TaskBreakdown => &["questions"],
            PromptTemplate::CodeGeneration => &["questions", "metadata"],
            PromptTemplate::CodeCorrection => &["code", "error"],
        }
    }

    pub fn default_text(self) -> &'static str {
        match self {
            PromptTemplate::TaskBreakdown => DEFAULT_TASK_BREAKDOWN,
            PromptTemplate::CodeGeneration => DEFAULT_CODE_GENERATION,
            PromptTemplate::CodeCorrection => DEFAULT_CODE_CORRECTION,
        }
    }
}

const DEFAULT_TASK_BREAKDOWN: &str = r#"Analyze the following questions and create a structured plan to answer them:

Questions: {questions}

Please provide a step-by-step plan in JSON format with the following structure:
{{
    "plan": "Brief description of the overall approach",
    "steps": ["Step 1", "Step 2", "Step 3"]
}}
"#;

const DEFAULT_CODE_GENERATION: &str = r#"Based on the following questions and data metadata, write Python code to perform the analysis:

Questions: {questions}

Data Metadata: {metadata}

Please write clean, executable Python code that answers the questions using the provided data structure.
The sourced data is already loaded into the variables `data` and `metadata`.
Include all necessary imports and ensure the code is self-contained.
Print the final answer to standard output.
"#;

const DEFAULT_CODE_CORRECTION: &str = r#"The following Python code has an error. Please fix it:

Code:
{code}

Error:
{error}

Please provide the corrected version of the code. Return only Python code.
"#;

/// One lexical piece of a template.
#[derive(Debug, PartialEq, Eq)]
enum Piece<'a> {
    Text(&'a str),
    Var { name: &'a str, raw: &'a str },
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn ident_len(s: &str) -> usize {
    let mut chars = s.char_indices();
    match chars.next() {
        Some((_, c)) if is_ident_start(c) => {}
        _ => return 0,
    }
    chars
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

/// Split a braced name `{name}` off the start of `s` (which begins after the
/// opening brace). Returns the name length when it is a bare identifier
/// followed by `}`.
fn braced_ident(s: &str) -> Option<usize> {
    let len = ident_len(s);
    (len > 0 && s[len..].starts_with('}')).then_some(len)
}

fn scan(template: &str) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    let mut text_start = 0;
    let mut i = 0;

    while i < template.len() {
        let rest = &template[i..];
        let token = if rest.starts_with("{{") || rest.starts_with("}}") || rest.starts_with("$$") {
            Some((Piece::Text(&rest[..1]), 2))
        } else if let Some(after) = rest.strip_prefix("${") {
            braced_ident(after).map(|len| {
                (Piece::Var { name: &after[..len], raw: &rest[..len + 3] }, len + 3)
            })
        } else if let Some(after) = rest.strip_prefix('$') {
            match ident_len(after) {
                0 => None,
                len => Some((Piece::Var { name: &after[..len], raw: &rest[..len + 1] }, len + 1)),
            }
        } else if let Some(after) = rest.strip_prefix('{') {
            braced_ident(after).map(|len| {
                (Piece::Var { name: &after[..len], raw: &rest[..len + 2] }, len + 2)
            })
        } else {
            None
        };

        match token {
            Some((piece, consumed)) => {
                if text_start < i {
                    pieces.push(Piece::Text(&template[text_start..i]));
                }
                pieces.push(piece);
                i += consumed;
                text_start = i;
            }
            None => {
                i += rest.chars().next().map_or(1, char::len_utf8);
            }
        }
    }

    if text_start < template.len() {
        pieces.push(Piece::Text(&template[text_start..]));
    }
    pieces
}

/// Names of every placeholder mentioned in `template`, in order of
/// appearance (duplicates included).
pub fn placeholders(template: &str) -> Vec<&str> {
    scan(template)
        .into_iter()
        .filter_map(|p| match p {
            Piece::Var { name, .. } => Some(name),
            Piece::Text(_) => None,
        })
        .collect()
}

/// Fill `template` with `vars`.
///
/// Values are inserted as-is and never rescanned. Placeholders without a
/// value stay verbatim.
///
/// # Example
///
/// ```
/// use llm_agent::prompt::render;
///
/// let out = render(
///     "Q: {questions} / ${questions} / $missing {{json}}",
///     &[("questions", "2+2")],
/// );
/// assert_eq!(out, "Q: 2+2 / 2+2 / $missing {json}");
/// ```
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    for piece in scan(template) {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Var { name, raw } => {
                match vars.iter().find(|(key, _)| *key == name) {
                    Some((_, value)) => out.push_str(value),
                    None => out.push_str(raw),
                }
            }
        }
    }
    out
}

/// Loads templates from an optional directory, falling back to defaults.
#[derive(Debug, Clone, Default)]
pub struct PromptResolver {
    dir: Option<PathBuf>,
}

impl PromptResolver {
    /// Resolve templates from `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    /// Always use the compiled-in defaults.
    pub fn builtin() -> Self {
        Self { dir: None }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// The template text to use for `template`.
    pub async fn load(&self, template: PromptTemplate) -> String {
        let Some(dir) = &self.dir else {
            return template.default_text().to_string();
        };
        let path = dir.join(format!("{}.txt", template.file_stem()));

        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(
                    template = template.name(),
                    path = %path.display(),
                    error = %err,
                    "prompt template not readable, using default"
                );
                return template.default_text().to_string();
            }
        };

        let found = placeholders(&text);
        if let Some(missing) = template
            .required_placeholders()
            .iter()
            .find(|name| !found.contains(*name))
        {
            tracing::warn!(
                template = template.name(),
                path = %path.display(),
                missing = *missing,
                "prompt template lacks a required placeholder, using default"
            );
            return template.default_text().to_string();
        }

        text
    }

    /// Load `template` and fill it with `vars`.
    pub async fn render(&self, template: PromptTemplate, vars: &[(&str, &str)]) -> String {
        render(&self.load(template).await, vars)
    }
}
