//! Backend for the Google Generative Language API.
//!
//! Endpoint: `/v1beta/models/{model}:generateContent`, authenticated with
//! the `x-goog-api-key` header. The system message travels as
//! `systemInstruction`, sampling settings as `generationConfig`.

use super::{redact_key, Backend, LlmRequest, LlmResponse};
use crate::error::Result;
use crate::AgentError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

/// Backend for Gemini models.
///
/// # Example
///
/// ```
/// use llm_agent::backend::GeminiBackend;
///
/// let backend = GeminiBackend::new("my-api-key");
/// ```
#[derive(Clone)]
pub struct GeminiBackend {
    api_key: String,
}

impl std::fmt::Debug for GeminiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiBackend")
            .field("api_key", &redact_key(&self.api_key))
            .finish()
    }
}

/// Finish reasons for which the candidate's text is not a usable answer.
const BLOCKED_FINISH_REASONS: &[&str] = &["SAFETY", "RECITATION", "BLOCKLIST", "PROHIBITED_CONTENT"];

impl GeminiBackend {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    /// Build the request body for `generateContent`.
    fn build_body(request: &LlmRequest) -> Value {
        let mut body = json!({
            "contents": [
                {"role": "user", "parts": [{"text": request.prompt}]}
            ],
            "generationConfig": {
                "temperature": request.config.temperature,
                "maxOutputTokens": request.config.max_tokens,
            },
        });

        if let Some(ref sys) = request.system_prompt {
            if !sys.is_empty() {
                body["systemInstruction"] = json!({"parts": [{"text": sys}]});
            }
        }

        body
    }

    /// Extract the reply text from a `generateContent` response.
    ///
    /// Prefers the primary text (all text parts of the single, unblocked
    /// candidate), falls back to the first candidate's first part, and
    /// finally to an empty string.
    pub(crate) fn extract_text(json_resp: &Value) -> String {
        Self::primary_text(json_resp)
            .or_else(|| Self::first_part_text(json_resp))
            .unwrap_or_default()
    }

    fn primary_text(json_resp: &Value) -> Option<String> {
        let candidates = json_resp.get("candidates")?.as_array()?;
        if candidates.len() != 1 {
            return None;
        }
        let candidate = &candidates[0];
        if let Some(reason) = candidate.get("finishReason").and_then(|r| r.as_str()) {
            if BLOCKED_FINISH_REASONS.contains(&reason) {
                return None;
            }
        }
        let parts = candidate.get("content")?.get("parts")?.as_array()?;
        let texts: Vec<&str> = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect();
        if texts.is_empty() {
            return None;
        }
        Some(texts.concat())
    }

    fn first_part_text(json_resp: &Value) -> Option<String> {
        json_resp
            .get("candidates")?
            .get(0)?
            .get("content")?
            .get("parts")?
            .get(0)?
            .get("text")?
            .as_str()
            .map(str::to_string)
    }

    fn extract_metadata(json_resp: &Value) -> Option<Value> {
        let mut meta = serde_json::Map::new();
        if let Some(v) = json_resp.get("usageMetadata") {
            meta.insert("usage".into(), v.clone());
        }
        if let Some(v) = json_resp.get("modelVersion") {
            meta.insert("model".into(), v.clone());
        }
        if let Some(v) = json_resp
            .get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("finishReason"))
        {
            meta.insert("finish_reason".into(), v.clone());
        }
        if meta.is_empty() {
            None
        } else {
            Some(Value::Object(meta))
        }
    }
}

#[async_trait]
impl Backend for GeminiBackend {
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse> {
        let base = base_url.trim_end_matches('/');
        let url = format!("{}/v1beta/models/{}:generateContent", base, request.model);
        let body = Self::build_body(request);

        let resp = client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AgentError::HttpError { status, body: text });
        }

        let json_resp: Value = resp.json().await?;

        Ok(LlmResponse {
            text: Self::extract_text(&json_resp),
            status,
            metadata: Self::extract_metadata(&json_resp),
        })
    }

    fn default_base_url(&self) -> &'static str {
        "https://generativelanguage.googleapis.com"
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}
