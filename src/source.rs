//! Request, data-source classification and the sourced-data variants.
//!
//! A request is classified exactly once ([`AnalysisRequest::classify`]);
//! the resulting [`DataSourceType`] decides which tool sources the data and
//! travels with the [`SourcedData`] for the rest of the pipeline.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

use crate::error::Result;
use crate::output_parser::parse_json;
use crate::tools::data_reader::FileData;
use crate::tools::web_scraper::WebPage;

/// An uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFile {
    pub filename: String,
    pub content: Vec<u8>,
}

impl DataFile {
    pub fn new(filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
        }
    }
}

/// One analysis request. Immutable once handed to the agent.
///
/// # Example
///
/// ```
/// use llm_agent::source::{AnalysisRequest, DataSourceType};
///
/// let request = AnalysisRequest::new("Summarize www.example.com");
/// assert_eq!(request.classify(), DataSourceType::UrlInText);
///
/// let request = AnalysisRequest::new("How many rows?").with_file("sales.csv", b"a,b\n1,2\n".to_vec());
/// assert_eq!(request.classify(), DataSourceType::File);
/// ```
#[derive(Debug, Clone, Default)]
pub struct AnalysisRequest {
    pub questions: String,
    pub data_files: Vec<DataFile>,
    pub data_url: Option<String>,
}

impl AnalysisRequest {
    pub fn new(questions: impl Into<String>) -> Self {
        Self {
            questions: questions.into(),
            ..Self::default()
        }
    }

    pub fn with_file(mut self, filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.data_files.push(DataFile::new(filename, content));
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.data_url = Some(url.into());
        self
    }

    /// The explicit data URL, if one was given and is not blank.
    pub fn explicit_url(&self) -> Option<&str> {
        self.data_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
    }

    /// Decide where this request's data comes from.
    ///
    /// An explicit URL wins over files, files win over a URL mentioned in
    /// the question text.
    pub fn classify(&self) -> DataSourceType {
        if self.explicit_url().is_some() {
            return DataSourceType::Url;
        }
        if !self.data_files.is_empty() {
            return DataSourceType::File;
        }
        let lowered = self.questions.to_lowercase();
        if lowered.contains("http") || lowered.contains("www.") {
            DataSourceType::UrlInText
        } else {
            DataSourceType::TextOnly
        }
    }
}

/// Where a request's analysis data comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSourceType {
    Url,
    File,
    UrlInText,
    TextOnly,
}

impl DataSourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            DataSourceType::Url => "url",
            DataSourceType::File => "file",
            DataSourceType::UrlInText => "url_in_text",
            DataSourceType::TextOnly => "text_only",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "url" => Some(DataSourceType::Url),
            "file" => Some(DataSourceType::File),
            "url_in_text" => Some(DataSourceType::UrlInText),
            "text_only" => Some(DataSourceType::TextOnly),
            _ => None,
        }
    }

    /// Whether data for this source is fetched from the web.
    pub fn is_web(self) -> bool {
        matches!(self, DataSourceType::Url | DataSourceType::UrlInText)
    }
}

impl fmt::Display for DataSourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https?://[^\s<>"{}|\\^`\[\]]+"#).expect("URL pattern is valid")
});

/// First `http(s)://` URL in `text`, without trailing sentence punctuation.
///
/// # Example
///
/// ```
/// use llm_agent::source::extract_url;
///
/// assert_eq!(
///     extract_url("Scrape https://example.com/table. Then plot it."),
///     Some("https://example.com/table".to_string())
/// );
/// assert_eq!(extract_url("see www.example.com"), None);
/// ```
pub fn extract_url(text: &str) -> Option<String> {
    URL_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(|c| ".,;:!?)'".contains(c)))
        .find(|url| !url.ends_with("://"))
        .map(str::to_string)
}

/// The model's plan for answering the question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPlan {
    pub plan: String,
    #[serde(default, deserialize_with = "steps_as_text")]
    pub steps: Vec<String>,
}

/// Accept steps as strings or as arbitrary JSON values (kept as JSON text).
fn steps_as_text<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .map(|step| match step {
            Value::String(s) => s,
            other => other.to_string(),
        })
        .collect())
}

impl TaskPlan {
    /// Parse a model reply. A reply that does not contain a plan object is
    /// kept verbatim as `plan` with no steps.
    pub fn from_reply(reply: &str) -> Self {
        parse_json::<TaskPlan>(reply).unwrap_or_else(|_| TaskPlan {
            plan: reply.to_string(),
            steps: Vec::new(),
        })
    }
}

/// Data gathered for a request, one case per source shape.
#[derive(Debug, Clone, PartialEq)]
pub enum SourcedData {
    Web(WebPage),
    File(FileData),
    Files(Vec<FileData>),
    TextOnly,
}

impl SourcedData {
    /// JSON form handed to tools and injected into generated programs.
    ///
    /// `TextOnly` becomes `{"type": "text", "content": ""}`.
    pub fn to_value(&self) -> Result<Value> {
        Ok(match self {
            SourcedData::Web(page) => serde_json::to_value(page)?,
            SourcedData::File(file) => serde_json::to_value(file)?,
            SourcedData::Files(files) => serde_json::to_value(files)?,
            SourcedData::TextOnly => json!({"type": "text", "content": ""}),
        })
    }

    /// Rebuild sourced data from its JSON form and the source type that
    /// produced it.
    pub fn from_parts(source_type: DataSourceType, value: Value) -> Result<Self> {
        Ok(match source_type {
            DataSourceType::Url | DataSourceType::UrlInText => {
                SourcedData::Web(serde_json::from_value(value)?)
            }
            DataSourceType::File => match value {
                Value::Array(_) => SourcedData::Files(serde_json::from_value(value)?),
                other => SourcedData::File(serde_json::from_value(other)?),
            },
            DataSourceType::TextOnly => SourcedData::TextOnly,
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SourcedData::Web(_) => "web",
            SourcedData::File(_) => "file",
            SourcedData::Files(_) => "files",
            SourcedData::TextOnly => "text_only",
        }
    }
}
