//! `web_scraper`: fetch a URL and extract content by content type.
//!
//! HTML pages yield title, description, cleaned text and a structural
//! outline (headings, paragraphs, tables, links, images). JSON, CSV and
//! other text bodies get their own shapes. Fetch failures are returned as a
//! [`WebPage`] with `success: false`, never as errors.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, USER_AGENT};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::structure::json_structure;
use super::Tool;
use crate::error::Result;
use crate::AgentError;

const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
const BROWSER_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Characters of cleaned text kept per page.
const MAX_TEXT_CHARS: usize = 50_000;
const MAX_HEADINGS: usize = 20;
const MAX_PARAGRAPHS: usize = 10;
const MAX_TABLE_ROWS: usize = 50;
const MAX_LINKS: usize = 50;
const MAX_IMAGES: usize = 20;
const MAX_CSV_ROWS: usize = 100;

/// Result of one fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebPage {
    pub success: bool,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<WebContent>,
}

impl WebPage {
    pub fn failed(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            url: url.into(),
            error: Some(error.into()),
            content: None,
        }
    }

    pub fn fetched(url: impl Into<String>, content: WebContent) -> Self {
        Self {
            success: true,
            url: url.into(),
            error: None,
            content: Some(content),
        }
    }
}

/// Extracted body, tagged by `content_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "content_type", rename_all = "lowercase")]
pub enum WebContent {
    Html(HtmlPage),
    Json {
        data: Value,
        structure: Value,
    },
    Csv {
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
        total_rows: usize,
    },
    Text {
        mime: String,
        text_content: String,
        word_count: usize,
        line_count: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HtmlPage {
    pub title: String,
    pub description: String,
    pub text_content: String,
    pub word_count: usize,
    pub structure: PageStructure,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageStructure {
    pub headings: Vec<Heading>,
    pub paragraphs: Vec<String>,
    pub tables: Vec<HtmlTable>,
    pub links: Vec<Link>,
    pub images: Vec<Image>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heading {
    pub level: u8,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HtmlTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub row_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub text: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub src: String,
    pub alt: String,
}

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        static $name: Lazy<Regex> = Lazy::new(|| Regex::new($re).expect("valid HTML pattern"));
    };
}

pattern!(TITLE, r"(?is)<title[^>]*>(.*?)</title>");
pattern!(META, r"(?is)<meta\b[^>]*>");
pattern!(HEADING, r"(?is)<h([1-6])\b[^>]*>(.*?)</h[1-6]\s*>");
pattern!(PARAGRAPH, r"(?is)<p\b[^>]*>(.*?)</p\s*>");
pattern!(TABLE, r"(?is)<table\b[^>]*>(.*?)</table\s*>");
pattern!(ROW, r"(?is)<tr\b[^>]*>(.*?)</tr\s*>");
pattern!(CELL, r"(?is)<t[hd]\b[^>]*>(.*?)</t[hd]\s*>");
pattern!(ANCHOR, r"(?is)<a\b([^>]*)>(.*?)</a\s*>");
pattern!(IMAGE, r"(?is)<img\b[^>]*>");
pattern!(SCRIPT_STYLE, r"(?is)<(script|style|noscript)\b[^>]*>.*?</(script|style|noscript)\s*>");
pattern!(TAG, r"(?s)<[^>]*>");
pattern!(NUMERIC_ENTITY, r"&#(x?[0-9a-fA-F]+);");
pattern!(ATTRIBUTE, r#"(?is)([a-z][a-z0-9_:-]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#);

fn decode_entities(text: &str) -> String {
    let named = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'");
    let numeric = NUMERIC_ENTITY.replace_all(&named, |caps: &Captures| {
        let raw = &caps[1];
        let code = match raw.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => raw.parse().ok(),
        };
        code.and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    });
    numeric.replace("&amp;", "&")
}

/// Visible text of an HTML fragment on one line.
fn inner_text(fragment: &str) -> String {
    let without_tags = TAG.replace_all(fragment, " ");
    decode_entities(&without_tags)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Attributes of a single tag, lowercased names.
fn attributes(tag: &str) -> Vec<(String, String)> {
    ATTRIBUTE
        .captures_iter(tag)
        .map(|caps| {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map_or("", |m| m.as_str());
            (caps[1].to_lowercase(), decode_entities(value))
        })
        .collect()
}

fn attribute(tag: &str, name: &str) -> Option<String> {
    attributes(tag)
        .into_iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value)
}

/// Collapse whitespace and cap the length, marking truncation.
///
/// # Example
///
/// ```
/// use llm_agent::tools::web_scraper::clean_text;
///
/// assert_eq!(clean_text("  a \n\n b\t c "), "a b c");
/// ```
pub fn clean_text(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.char_indices().nth(MAX_TEXT_CHARS) {
        Some((idx, _)) => format!("{}... [TRUNCATED]", &collapsed[..idx]),
        None => collapsed,
    }
}

fn html_to_text(html: &str) -> String {
    let stripped = SCRIPT_STYLE.replace_all(html, " ");
    match html2text::from_read(stripped.as_bytes(), 120) {
        Ok(text) if !text.trim().is_empty() => text,
        _ => inner_text(&stripped),
    }
}

fn extract_tables(html: &str) -> Vec<HtmlTable> {
    TABLE
        .captures_iter(html)
        .map(|table| {
            let mut rows = ROW.captures_iter(&table[1]).map(|row| {
                CELL.captures_iter(&row[1])
                    .map(|cell| inner_text(&cell[1]))
                    .collect::<Vec<_>>()
            });
            let headers = rows.next().unwrap_or_default();
            let body: Vec<Vec<String>> = rows.filter(|r| !r.is_empty()).collect();
            HtmlTable {
                headers,
                row_count: body.len(),
                rows: body.into_iter().take(MAX_TABLE_ROWS).collect(),
            }
        })
        .collect()
}

fn resolve(base: &Url, href: &str) -> Option<String> {
    base.join(href.trim()).ok().map(String::from)
}

/// Extract title, description, text and structure from an HTML document.
pub fn parse_html(html: &str, base: &Url) -> HtmlPage {
    let title = TITLE
        .captures(html)
        .map(|caps| inner_text(&caps[1]))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "No title".to_string());

    let description = META
        .find_iter(html)
        .map(|m| m.as_str())
        .find(|tag| attribute(tag, "name").is_some_and(|n| n.eq_ignore_ascii_case("description")))
        .and_then(|tag| attribute(tag, "content"))
        .unwrap_or_default();

    let mut headings: Vec<Heading> = HEADING
        .captures_iter(html)
        .filter_map(|caps| {
            let level = caps[1].parse().ok()?;
            let text = inner_text(&caps[2]);
            (!text.is_empty()).then_some(Heading { level, text })
        })
        .collect();
    headings.sort_by_key(|h| h.level);
    headings.truncate(MAX_HEADINGS);

    let paragraphs = PARAGRAPH
        .captures_iter(html)
        .map(|caps| inner_text(&caps[1]))
        .filter(|p| !p.is_empty())
        .take(MAX_PARAGRAPHS)
        .collect();

    let links = ANCHOR
        .captures_iter(html)
        .filter_map(|caps| {
            let href = attribute(&caps[1], "href")?;
            let text = inner_text(&caps[2]);
            if text.is_empty() {
                return None;
            }
            Some(Link {
                text,
                url: resolve(base, &href)?,
            })
        })
        .take(MAX_LINKS)
        .collect();

    let images = IMAGE
        .find_iter(html)
        .filter_map(|m| {
            let src = attribute(m.as_str(), "src")?;
            Some(Image {
                src: resolve(base, &src)?,
                alt: attribute(m.as_str(), "alt").unwrap_or_default(),
            })
        })
        .take(MAX_IMAGES)
        .collect();

    let text_content = clean_text(&html_to_text(html));
    HtmlPage {
        title,
        description,
        word_count: text_content.split_whitespace().count(),
        text_content,
        structure: PageStructure {
            headings,
            paragraphs,
            tables: extract_tables(html),
            links,
            images,
        },
    }
}

fn parse_csv(body: &str) -> Option<WebContent> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(body.as_bytes());
    let mut records = reader
        .records()
        .filter_map(|r| r.ok())
        .map(|r| r.iter().map(str::to_string).collect::<Vec<_>>());
    let headers = records.next()?;
    let rows: Vec<Vec<String>> = records.collect();
    Some(WebContent::Csv {
        headers,
        total_rows: rows.len(),
        rows: rows.into_iter().take(MAX_CSV_ROWS).collect(),
    })
}

fn plain_text(mime: &str, body: &str) -> WebContent {
    let text_content = clean_text(body);
    WebContent::Text {
        mime: mime.to_string(),
        word_count: text_content.split_whitespace().count(),
        line_count: body.lines().count(),
        text_content,
    }
}

fn looks_like_html(body: &str) -> bool {
    let head = body.trim_start().get(..512).unwrap_or(body.trim_start()).to_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html") || head.contains("<head")
}

/// Extract content from a fetched body.
///
/// Dispatches on the `Content-Type` header, falling back to the URL's
/// extension and then to sniffing for HTML.
pub fn parse_body(url: &Url, content_type: &str, body: &str) -> WebContent {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    let path = url.path().to_lowercase();
    let body = body.trim_start_matches('\u{feff}');

    let is_json = mime.contains("json") || (mime_is_generic(&mime) && path.ends_with(".json"));
    let is_csv = mime == "text/csv" || (mime_is_generic(&mime) && path.ends_with(".csv"));

    if mime.contains("html") || (mime_is_generic(&mime) && looks_like_html(body)) {
        return WebContent::Html(parse_html(body, url));
    }
    if is_json {
        if let Ok(data) = serde_json::from_str::<Value>(body) {
            return WebContent::Json {
                structure: json_structure(&data, 3),
                data,
            };
        }
    }
    if is_csv {
        if let Some(csv) = parse_csv(body) {
            return csv;
        }
    }
    plain_text(&mime, body)
}

fn mime_is_generic(mime: &str) -> bool {
    matches!(mime, "" | "text/plain" | "application/octet-stream")
}

/// Validate an absolute `http(s)` URL with a host.
fn validate(url: &str) -> Option<Url> {
    let parsed = Url::parse(url.trim()).ok()?;
    let web = matches!(parsed.scheme(), "http" | "https");
    (web && parsed.host_str().is_some_and(|h| !h.is_empty())).then_some(parsed)
}

/// The `web_scraper` tool. Parameter: `url`.
#[derive(Debug, Clone)]
pub struct WebScraper {
    client: Client,
    timeout: Duration,
}

impl WebScraper {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Fetch `url` and extract its content. Never fails; problems are
    /// reported in the returned page.
    pub async fn scrape(&self, url: &str) -> WebPage {
        let Some(parsed) = validate(url) else {
            return WebPage::failed(url, "Invalid URL format");
        };

        let response = self
            .client
            .get(parsed.clone())
            .timeout(self.timeout)
            .header(USER_AGENT, BROWSER_UA)
            .header(ACCEPT, BROWSER_ACCEPT)
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await
            .and_then(|r| r.error_for_status());

        let response = match response {
            Ok(r) => r,
            Err(e) => return WebPage::failed(url, self.describe(&e)),
        };

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return WebPage::failed(url, self.describe(&e)),
        };

        let content = parse_body(&parsed, &content_type, &body);
        tracing::debug!(url, content_type = %content_type, bytes = body.len(), "page fetched");
        WebPage::fetched(url, content)
    }

    fn describe(&self, error: &reqwest::Error) -> String {
        if error.is_timeout() {
            format!("Request timeout after {} seconds", self.timeout.as_secs_f64())
        } else {
            format!("Request failed: {error}")
        }
    }
}

#[async_trait]
impl Tool for WebScraper {
    fn name(&self) -> &str {
        "web_scraper"
    }

    fn description(&self) -> &str {
        "Fetch a web page and extract its text, tables, links and structure"
    }

    fn required_params(&self) -> &[&'static str] {
        &["url"]
    }

    fn check_params(&self, params: &Value) -> Result<()> {
        let url = params.get("url").and_then(Value::as_str).unwrap_or_default();
        if url.trim().is_empty() {
            return Err(AgentError::ToolParameter {
                tool: self.name().to_string(),
                parameter: "url".to_string(),
            });
        }
        Ok(())
    }

    async fn invoke(&self, params: &Value) -> Result<Value> {
        let url = params["url"].as_str().unwrap_or_default();
        Ok(serde_json::to_value(self.scrape(url).await)?)
    }
}
