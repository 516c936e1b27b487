//! Backend trait and normalized request/response types.
//!
//! The [`Backend`] trait abstracts over LLM providers, translating between
//! normalized [`LlmRequest`]/[`LlmResponse`] types and provider-specific
//! HTTP APIs. Built-in implementations: [`GeminiBackend`], [`OpenAiBackend`],
//! and [`MockBackend`] for tests.
//!
//! ## Architecture
//!
//! ```text
//! ModelGateway ──► LlmRequest ──► Backend::complete() ──► LlmResponse
//!                                        │
//!                         ┌──────────────┼──────────────┐
//!                   GeminiBackend   OpenAiBackend   MockBackend
//!                 :generateContent  /v1/chat/...    scripted
//! ```
//!
//! Retry and backoff are not a backend concern; the
//! [`ModelGateway`](crate::gateway::ModelGateway) wraps every call.

pub mod backoff;
pub mod gemini;
pub mod mock;
pub mod openai;

pub use backoff::{BackoffConfig, JitterStrategy};
pub use gemini::GeminiBackend;
pub use mock::MockBackend;
pub use openai::OpenAiBackend;

use crate::error::Result;
use async_trait::async_trait;
use reqwest::Client;

/// Sampling settings sent with every request.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Temperature (0.0 = deterministic, 1.0 = creative).
    pub temperature: f64,

    /// Maximum tokens to generate.
    pub max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 800,
        }
    }
}

/// A normalized, provider-agnostic LLM request.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Model identifier (e.g. `"gemini-1.5-flash"`, `"gpt-4o"`).
    pub model: String,

    /// Optional system instruction.
    pub system_prompt: Option<String>,

    /// The user prompt text (already budgeted by the gateway).
    pub prompt: String,

    /// Sampling configuration.
    pub config: GenerationConfig,
}

/// A normalized LLM response.
#[derive(Debug)]
pub struct LlmResponse {
    /// The generated text content. Empty when the provider returned no text.
    pub text: String,

    /// HTTP status code (for diagnostics/logging).
    pub status: u16,

    /// Provider-specific metadata (token counts, model info), stored as raw
    /// JSON since each provider returns different fields.
    pub metadata: Option<serde_json::Value>,
}

/// Abstraction over LLM providers.
///
/// Implementors translate between the normalized [`LlmRequest`]/[`LlmResponse`]
/// and the provider's HTTP API. A reply without usable text is not an error:
/// implementations return an empty `text` instead.
///
/// This trait is object-safe and designed to be used as `Arc<dyn Backend>`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Execute a single, non-retried completion call.
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse>;

    /// Default base URL used when none is configured.
    fn default_base_url(&self) -> &'static str;

    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Redact an API key for `Debug` output, keeping a short prefix.
pub(crate) fn redact_key(key: &str) -> String {
    if key.chars().count() > 6 {
        format!("{}***", key.chars().take(6).collect::<String>())
    } else {
        "***".to_string()
    }
}
