//! Backend for OpenAI-compatible chat APIs.
//!
//! Endpoint: `/v1/chat/completions`, authenticated with a bearer token when
//! one is set. Works against OpenAI itself and the local servers that mimic
//! it (vLLM, llama.cpp, LM Studio, Ollama's `/v1/`).

use super::{redact_key, Backend, LlmRequest, LlmResponse};
use crate::error::Result;
use crate::AgentError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

/// Backend for any OpenAI-compatible chat endpoint.
///
/// # Example
///
/// ```
/// use llm_agent::backend::OpenAiBackend;
///
/// let local = OpenAiBackend::new();
/// let hosted = OpenAiBackend::new().with_api_key("sk-...");
/// ```
#[derive(Clone, Default)]
pub struct OpenAiBackend {
    api_key: Option<String>,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("api_key", &self.api_key.as_deref().map(redact_key))
            .finish()
    }
}

impl OpenAiBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `Authorization: Bearer {key}`. A blank key sends nothing.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.api_key = (!key.trim().is_empty()).then_some(key);
        self
    }

    /// Chat endpoint under `base_url`, tolerating a trailing `/v1`.
    fn endpoint(base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');
        let base = base.strip_suffix("/v1").unwrap_or(base);
        format!("{base}/v1/chat/completions")
    }

    fn build_body(request: &LlmRequest) -> Value {
        let system = request
            .system_prompt
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| json!({"role": "system", "content": s}));
        let user = json!({"role": "user", "content": request.prompt});

        json!({
            "model": request.model,
            "messages": system.into_iter().chain([user]).collect::<Vec<_>>(),
            "temperature": request.config.temperature,
            "max_tokens": request.config.max_tokens,
            "stream": false,
        })
    }

    /// `choices[0].message.content`, or empty when the first choice was
    /// filtered or carries no content.
    fn extract_text(json_resp: &Value) -> String {
        let Some(choice) = json_resp.pointer("/choices/0") else {
            return String::new();
        };
        if choice["finish_reason"] == "content_filter" {
            return String::new();
        }
        choice
            .pointer("/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    fn extract_metadata(json_resp: &Value) -> Option<Value> {
        let meta: serde_json::Map<String, Value> = [
            ("usage", json_resp.get("usage")),
            ("model", json_resp.get("model")),
            ("finish_reason", json_resp.pointer("/choices/0/finish_reason")),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.filter(|v| !v.is_null()).map(|v| (k.to_string(), v.clone())))
        .collect();
        (!meta.is_empty()).then_some(Value::Object(meta))
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse> {
        let mut req = client
            .post(Self::endpoint(base_url))
            .json(&Self::build_body(request));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::HttpError { status, body });
        }

        let json_resp: Value = resp.json().await?;
        Ok(LlmResponse {
            text: Self::extract_text(&json_resp),
            status,
            metadata: Self::extract_metadata(&json_resp),
        })
    }

    fn default_base_url(&self) -> &'static str {
        "https://api.openai.com"
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
