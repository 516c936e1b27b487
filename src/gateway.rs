//! Resilient, budgeted access to the language model.
//!
//! [`ModelGateway`] is the only path from the agent to a model provider.
//! Every call goes through the same three steps:
//!
//! 1. refuse immediately when no credential is configured,
//! 2. shrink the prompt to the context budget ([`truncate_prompt`]),
//! 3. call the [`Backend`] up to `max_attempts` times with exponential
//!    backoff between failures.
//!
//! An empty completion is a valid result, never an error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde::Serialize;

use crate::backend::{
    Backend, BackoffConfig, GeminiBackend, GenerationConfig, LlmRequest, OpenAiBackend,
};
use crate::config::{AgentConfig, Provider};
use crate::error::Result;
use crate::AgentError;

/// Inserted between the kept head and tail of an over-budget prompt.
pub const TRUNCATION_MARKER: &str = "\n\n...[TRUNCATED FOR LENGTH]...\n\n";

/// Characters per estimated token.
const CHARS_PER_TOKEN: usize = 4;

/// Base system message for [`ModelGateway::complete_with_context`].
pub const ANALYST_PERSONA: &str = "You are an expert data analyst and Python programmer. \
You help users analyze data by writing precise, executable Python code.

Guidelines:
1. Write clean, well-commented Python code
2. Include all necessary imports
3. Handle errors gracefully
4. Provide clear, actionable insights
5. Focus on answering the specific questions asked";

/// Rough token estimate: one token per four characters.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / CHARS_PER_TOKEN
}

/// Shrink `prompt` to at most `budget_tokens * 4` characters plus the marker.
///
/// Prompts whose estimate is within budget are returned unchanged. Longer
/// prompts keep their first and last halves of the character budget with
/// [`TRUNCATION_MARKER`] in between. Counting is by `char`, so a multi-byte
/// character is never split.
///
/// # Example
///
/// ```
/// use llm_agent::gateway::{truncate_prompt, TRUNCATION_MARKER};
///
/// assert_eq!(truncate_prompt("short", 10), "short");
///
/// let long = "a".repeat(20) + &"b".repeat(20);
/// let cut = truncate_prompt(&long, 2);
/// assert_eq!(cut, format!("aaaa{}bbbb", TRUNCATION_MARKER));
/// ```
pub fn truncate_prompt(prompt: &str, budget_tokens: usize) -> String {
    if estimate_tokens(prompt) <= budget_tokens {
        return prompt.to_string();
    }

    let target = budget_tokens * CHARS_PER_TOKEN;
    let total = prompt.chars().count();
    let keep_start = target / 2;
    let keep_end = target - keep_start;

    let head: String = prompt.chars().take(keep_start).collect();
    let tail: String = prompt.chars().skip(total - keep_end).collect();

    tracing::warn!(
        original_chars = total,
        kept_chars = target,
        budget_tokens,
        "prompt truncated to fit context budget"
    );

    format!("{head}{TRUNCATION_MARKER}{tail}")
}

/// Optional context lines appended to the analyst persona.
///
/// # Example
///
/// ```
/// use llm_agent::gateway::PromptContext;
///
/// let ctx = PromptContext::new()
///     .data_type("file")
///     .previous_error("NameError: name 'df' is not defined");
/// assert!(ctx.system_message().contains("Previous error encountered"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub data_type: Option<String>,
    pub data_structure: Option<String>,
    pub previous_error: Option<String>,
}

impl PromptContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data_type(mut self, value: impl Into<String>) -> Self {
        self.data_type = Some(value.into());
        self
    }

    pub fn data_structure(mut self, value: impl Into<String>) -> Self {
        self.data_structure = Some(value.into());
        self
    }

    pub fn previous_error(mut self, value: impl Into<String>) -> Self {
        self.previous_error = Some(value.into());
        self
    }

    /// Render the persona plus every non-empty context field.
    pub fn system_message(&self) -> String {
        let mut message = ANALYST_PERSONA.to_string();

        if let Some(data_type) = non_empty(&self.data_type) {
            message.push_str(&format!("\n\nData type: {data_type}"));
        }
        if let Some(structure) = non_empty(&self.data_structure) {
            message.push_str(&format!("\nData structure: {structure}"));
        }
        if let Some(error) = non_empty(&self.previous_error) {
            message.push_str(&format!("\n\nPrevious error encountered: {error}"));
            message.push_str("\nPlease fix the error and ensure the code runs successfully.");
        }

        message
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// Settings for a [`ModelGateway`].
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Model credential. `None` makes every call fail with
    /// [`AgentError::Configuration`].
    pub api_key: Option<String>,
    pub model: String,
    pub generation: GenerationConfig,
    pub backoff: BackoffConfig,
    /// Prompt budget in estimated tokens.
    pub context_budget_tokens: usize,
    /// Overrides the backend's default base URL.
    pub base_url: Option<String>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-1.5-flash".to_string(),
            generation: GenerationConfig::default(),
            backoff: BackoffConfig::default(),
            context_budget_tokens: 3000,
            base_url: None,
        }
    }
}

impl GatewaySettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            api_key: config.api_key().map(str::to_string),
            model: config.llm_model.clone(),
            generation: GenerationConfig {
                temperature: config.temperature,
                max_tokens: config.max_tokens,
            },
            backoff: BackoffConfig::new(config.max_retries, config.retry_delay()),
            context_budget_tokens: config.context_budget_tokens,
            base_url: config.llm_base_url.clone(),
        }
    }
}

/// Snapshot of the gateway's model settings, safe to log or print.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub provider: &'static str,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub max_retries: u32,
    pub api_key_configured: bool,
    /// Outcome of a live credential check; only set by
    /// [`ModelGateway::checked_model_info`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_valid: Option<bool>,
}

const KEY_CHECK_PROMPT: &str = "Say 'working' if API key is valid.";

/// Budgeted, retrying model client shared by every pipeline stage.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use llm_agent::backend::MockBackend;
/// use llm_agent::gateway::{GatewaySettings, ModelGateway};
///
/// let settings = GatewaySettings {
///     api_key: Some("test-key".into()),
///     ..GatewaySettings::default()
/// };
/// let gateway = ModelGateway::new(Arc::new(MockBackend::fixed("[4]")), settings);
///
/// let rt = tokio::runtime::Runtime::new().unwrap();
/// let text = rt.block_on(gateway.complete("What is 2+2?", None)).unwrap();
/// assert_eq!(text, "[4]");
/// ```
pub struct ModelGateway {
    client: Client,
    backend: Arc<dyn Backend>,
    base_url: String,
    settings: GatewaySettings,
}

impl std::fmt::Debug for ModelGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelGateway")
            .field("backend", &self.backend.name())
            .field("base_url", &self.base_url)
            .field("model", &self.settings.model)
            .field("backoff", &self.settings.backoff)
            .field("api_key_configured", &self.settings.api_key.is_some())
            .finish()
    }
}

impl ModelGateway {
    /// Create a gateway over an explicit backend with a default HTTP client.
    pub fn new(backend: Arc<dyn Backend>, settings: GatewaySettings) -> Self {
        Self::with_client(Client::new(), backend, settings)
    }

    /// Create a gateway that reuses an existing HTTP client.
    pub fn with_client(client: Client, backend: Arc<dyn Backend>, settings: GatewaySettings) -> Self {
        let base_url = settings
            .base_url
            .clone()
            .unwrap_or_else(|| backend.default_base_url().to_string());
        Self {
            client,
            backend,
            base_url,
            settings,
        }
    }

    /// Build the configured provider backend.
    pub fn from_config(config: &AgentConfig, client: Client) -> Self {
        let settings = GatewaySettings::from_config(config);
        let key = settings.api_key.clone().unwrap_or_default();
        let backend: Arc<dyn Backend> = match config.llm_provider {
            Provider::Gemini => Arc::new(GeminiBackend::new(key)),
            Provider::OpenAi => Arc::new(OpenAiBackend::new().with_api_key(key)),
        };
        Self::with_client(client, backend, settings)
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: self.backend.name(),
            model: self.settings.model.clone(),
            max_tokens: self.settings.generation.max_tokens,
            temperature: self.settings.generation.temperature,
            max_retries: self.settings.backoff.max_attempts,
            api_key_configured: self.settings.api_key.is_some(),
            api_key_valid: None,
        }
    }

    /// [`model_info`](Self::model_info) plus a live credential check.
    pub async fn checked_model_info(&self) -> ModelInfo {
        ModelInfo {
            api_key_valid: Some(self.validate_api_key().await),
            ..self.model_info()
        }
    }

    /// Make one unretried call and report whether the model answered with
    /// the expected word. Without a key no call is made.
    pub async fn validate_api_key(&self) -> bool {
        if self.settings.api_key.is_none() {
            return false;
        }
        let request = LlmRequest {
            model: self.settings.model.clone(),
            system_prompt: None,
            prompt: KEY_CHECK_PROMPT.to_string(),
            config: self.settings.generation.clone(),
        };
        match self
            .backend
            .complete(&self.client, &self.base_url, &request)
            .await
        {
            Ok(response) => response.text.to_lowercase().contains("working"),
            Err(err) => {
                tracing::error!(error = %err, "API key validation failed");
                false
            }
        }
    }

    /// Send `prompt` (with an optional system message) and return the
    /// trimmed reply text.
    ///
    /// # Errors
    ///
    /// - [`AgentError::Configuration`] when no credential is set; no call
    ///   is made.
    /// - [`AgentError::Provider`] when every attempt failed, carrying the
    ///   last underlying error.
    pub async fn complete(&self, prompt: &str, system_message: Option<&str>) -> Result<String> {
        if self.settings.api_key.is_none() {
            tracing::error!("cannot call model: no API key configured");
            return Err(AgentError::Configuration(
                "model API key not configured (set GOOGLE_API_KEY or LLM_API_KEY)".to_string(),
            ));
        }

        let request = LlmRequest {
            model: self.settings.model.clone(),
            system_prompt: system_message.map(str::to_string),
            prompt: truncate_prompt(prompt, self.settings.context_budget_tokens),
            config: self.settings.generation.clone(),
        };

        let backoff = &self.settings.backoff;
        let max_attempts = backoff.max_attempts.max(1);
        let mut last_error: Option<AgentError> = None;

        for attempt in 0..max_attempts {
            tracing::info!(
                attempt = attempt + 1,
                max_attempts,
                backend = self.backend.name(),
                model = %request.model,
                "calling model"
            );
            let started = Instant::now();

            match self
                .backend
                .complete(&self.client, &self.base_url, &request)
                .await
            {
                Ok(response) => {
                    tracing::info!(
                        attempt = attempt + 1,
                        status = response.status,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "model call succeeded"
                    );
                    return Ok(response.text.trim().to_string());
                }
                Err(err) => {
                    tracing::error!(attempt = attempt + 1, error = %err, "model call failed");
                    last_error = Some(err);
                    if attempt + 1 < max_attempts {
                        let delay = backoff.delay_for_attempt(attempt);
                        tracing::debug!(delay_ms = delay.as_millis() as u64, "backing off");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        let source = last_error
            .unwrap_or_else(|| AgentError::Other("no attempt was made".to_string()));
        Err(AgentError::Provider {
            attempts: max_attempts,
            source: Box::new(source),
        })
    }

    /// Call the model with the analyst persona and `context` as the system
    /// message.
    pub async fn complete_with_context(&self, prompt: &str, context: &PromptContext) -> Result<String> {
        let system = context.system_message();
        self.complete(prompt, Some(&system)).await
    }

    /// Time the gateway would spend sleeping if every attempt failed.
    pub fn worst_case_backoff(&self) -> Duration {
        self.settings.backoff.total_delay()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;

    fn settings(max_attempts: u32, delay_secs: u64) -> GatewaySettings {
        GatewaySettings {
            api_key: Some("test-key".into()),
            backoff: BackoffConfig::new(max_attempts, Duration::from_secs(delay_secs)),
            ..GatewaySettings::default()
        }
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 0);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
    }

    #[test]
    fn test_truncate_identity_at_or_below_budget() {
        let at_budget = "x".repeat(12_003); // 3000 tokens by integer division
        assert_eq!(truncate_prompt(&at_budget, 3000), at_budget);
        assert_eq!(truncate_prompt("hello", 3000), "hello");
    }

    #[test]
    fn test_truncate_keeps_head_and_tail() {
        let prompt = format!("{}{}{}", "H".repeat(10_000), "M".repeat(5_000), "T".repeat(10_000));
        let cut = truncate_prompt(&prompt, 3000);

        assert_eq!(
            cut.chars().count(),
            3000 * 4 + TRUNCATION_MARKER.chars().count()
        );
        assert!(cut.starts_with(&"H".repeat(6000)));
        assert!(cut.ends_with(&"T".repeat(6000)));
        assert!(cut.contains(TRUNCATION_MARKER));
        assert!(!cut.contains('M'));
    }

    #[test]
    fn test_truncate_is_deterministic() {
        let prompt = "abcdefghij".repeat(100);
        assert_eq!(truncate_prompt(&prompt, 10), truncate_prompt(&prompt, 10));
    }

    #[test]
    fn test_truncate_never_splits_characters() {
        let prompt = "é".repeat(100);
        let cut = truncate_prompt(&prompt, 5);
        assert_eq!(cut, format!("{}{}{}", "é".repeat(10), TRUNCATION_MARKER, "é".repeat(10)));
    }

    #[test]
    fn test_system_message_context_lines() {
        let bare = PromptContext::new().system_message();
        assert_eq!(bare, ANALYST_PERSONA);

        let full = PromptContext::new()
            .data_type("url")
            .data_structure("table with 3 columns")
            .previous_error("SyntaxError: invalid syntax")
            .system_message();
        assert!(full.starts_with(ANALYST_PERSONA));
        assert!(full.contains("\n\nData type: url"));
        assert!(full.contains("\nData structure: table with 3 columns"));
        assert!(full.contains("Previous error encountered: SyntaxError: invalid syntax"));
        assert!(full.contains("Please fix the error"));
    }

    #[test]
    fn test_system_message_skips_blank_fields() {
        let msg = PromptContext::new().data_type("  ").system_message();
        assert!(!msg.contains("Data type"));
    }

    #[tokio::test]
    async fn test_missing_credential_is_configuration_error() {
        let mock = Arc::new(MockBackend::fixed("never"));
        let gateway = ModelGateway::new(mock.clone(), GatewaySettings::default());

        let err = gateway.complete("hi", None).await.unwrap_err();
        assert!(matches!(err, AgentError::Configuration(_)));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_reply_is_trimmed() {
        let gateway = ModelGateway::new(
            Arc::new(MockBackend::fixed("  \n[4]\n  ")),
            settings(1, 0),
        );
        assert_eq!(gateway.complete("q", None).await.unwrap(), "[4]");
    }

    #[tokio::test]
    async fn test_empty_reply_is_not_an_error() {
        let gateway = ModelGateway::new(Arc::new(MockBackend::fixed("")), settings(1, 0));
        assert_eq!(gateway.complete("q", None).await.unwrap(), "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_failure_retries_with_backoff() {
        let mock = Arc::new(MockBackend::failing("provider down"));
        let gateway = ModelGateway::new(mock.clone(), settings(3, 1));

        let started = tokio::time::Instant::now();
        let err = gateway.complete("q", None).await.unwrap_err();
        let slept = started.elapsed();

        assert_eq!(mock.call_count(), 3);
        assert_eq!(slept, Duration::from_secs(3));
        assert_eq!(slept, gateway.worst_case_backoff());
        match err {
            AgentError::Provider { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, AgentError::HttpError { status: 503, .. }));
            }
            other => panic!("expected Provider error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let mock = Arc::new(MockBackend::scripted(vec![
            Err("blip".into()),
            Ok("recovered".into()),
        ]));
        let gateway = ModelGateway::new(mock.clone(), settings(3, 1));

        let started = tokio::time::Instant::now();
        let text = gateway.complete("q", None).await.unwrap();

        assert_eq!(text, "recovered");
        assert_eq!(mock.call_count(), 2);
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_single_attempt_never_sleeps() {
        let mock = Arc::new(MockBackend::failing("down"));
        let gateway = ModelGateway::new(
            mock.clone(),
            GatewaySettings {
                api_key: Some("k".into()),
                backoff: BackoffConfig::none(),
                ..GatewaySettings::default()
            },
        );
        let err = gateway.complete("q", None).await.unwrap_err();
        assert!(matches!(err, AgentError::Provider { attempts: 1, .. }));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_prompt_is_budgeted_before_sending() {
        let mock = Arc::new(MockBackend::fixed("ok"));
        let gateway = ModelGateway::new(
            mock.clone(),
            GatewaySettings {
                context_budget_tokens: 10,
                ..settings(1, 0)
            },
        );
        gateway.complete(&"z".repeat(500), None).await.unwrap();

        let sent = &mock.requests()[0].prompt;
        assert_eq!(sent.chars().count(), 40 + TRUNCATION_MARKER.chars().count());
    }

    #[tokio::test]
    async fn test_complete_with_context_sends_persona() {
        let mock = Arc::new(MockBackend::fixed("code"));
        let gateway = ModelGateway::new(mock.clone(), settings(1, 0));
        let ctx = PromptContext::new().data_type("text_only");

        gateway.complete_with_context("write code", &ctx).await.unwrap();

        let system = mock.requests()[0].system_prompt.clone().unwrap_or_default();
        assert!(system.starts_with("You are an expert data analyst"));
        assert!(system.ends_with("Data type: text_only"));
    }

    #[test]
    fn test_from_config_picks_provider() {
        let config = AgentConfig {
            llm_provider: Provider::OpenAi,
            llm_api_key: Some("sk-test".into()),
            max_retries: 4,
            ..AgentConfig::default()
        };
        let gateway = ModelGateway::from_config(&config, Client::new());
        let info = gateway.model_info();
        assert_eq!(info.provider, "openai");
        assert_eq!(info.max_retries, 4);
        assert!(info.api_key_configured);
        assert!(info.api_key_valid.is_none());
        assert!(serde_json::to_value(&info).unwrap().get("api_key_valid").is_none());
    }

    #[tokio::test]
    async fn test_key_check_reads_reply() {
        let mock = Arc::new(MockBackend::fixed("Working!"));
        let gateway = ModelGateway::new(mock.clone(), settings(3, 1));
        let info = gateway.checked_model_info().await;
        assert_eq!(info.api_key_valid, Some(true));
        assert_eq!(mock.requests()[0].prompt, KEY_CHECK_PROMPT);

        let gateway = ModelGateway::new(Arc::new(MockBackend::fixed("denied")), settings(3, 1));
        assert!(!gateway.validate_api_key().await);
    }

    #[tokio::test]
    async fn test_key_check_is_not_retried() {
        let mock = Arc::new(MockBackend::failing("401 unauthorized"));
        let gateway = ModelGateway::new(mock.clone(), settings(3, 1));
        assert!(!gateway.validate_api_key().await);
        assert_eq!(mock.call_count(), 1);

        let mock = Arc::new(MockBackend::fixed("working"));
        let gateway = ModelGateway::new(mock.clone(), GatewaySettings::default());
        assert_eq!(gateway.checked_model_info().await.api_key_valid, Some(false));
        assert_eq!(mock.call_count(), 0);
    }
}
