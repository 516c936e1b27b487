//! Environment-sourced configuration.
//!
//! Every setting is read from a flat environment variable (`GOOGLE_API_KEY`,
//! `LLM_MODEL`, `MAX_RETRIES`, ...) through the `config` crate. Unset
//! variables fall back to the defaults below.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;

/// Which model provider backs the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Google Generative Language API (`generateContent`).
    #[default]
    Gemini,
    /// Any OpenAI-compatible `/v1/chat/completions` endpoint.
    OpenAi,
}

/// Agent configuration root.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Gemini credential. `LLM_API_KEY` takes precedence when both are set.
    #[serde(default)]
    pub google_api_key: Option<String>,
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default)]
    pub llm_provider: Provider,
    #[serde(default)]
    pub llm_base_url: Option<String>,
    #[serde(default = "default_model")]
    pub llm_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Total model-call attempts per gateway call.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff base in seconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: f64,
    #[serde(default = "default_max_correction_attempts")]
    pub max_correction_attempts: u32,
    /// Prompt budget in estimated tokens (chars / 4).
    #[serde(default = "default_context_budget_tokens")]
    pub context_budget_tokens: usize,
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: PathBuf,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,
    #[serde(default = "default_python_bin")]
    pub python_bin: String,
}

fn default_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_max_tokens() -> u32 {
    800
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> f64 {
    1.0
}

fn default_max_correction_attempts() -> u32 {
    3
}

fn default_context_budget_tokens() -> usize {
    3000
}

fn default_prompts_dir() -> PathBuf {
    PathBuf::from("prompts")
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_execution_timeout_secs() -> u64 {
    60
}

fn default_python_bin() -> String {
    "python3".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            google_api_key: None,
            llm_api_key: None,
            llm_provider: Provider::default(),
            llm_base_url: None,
            llm_model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            max_correction_attempts: default_max_correction_attempts(),
            context_budget_tokens: default_context_budget_tokens(),
            prompts_dir: default_prompts_dir(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            execution_timeout_secs: default_execution_timeout_secs(),
            python_bin: default_python_bin(),
        }
    }
}

impl AgentConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Load from an explicit variable map instead of the process environment.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self> {
        Self::load(Some(vars))
    }

    fn load(source: Option<HashMap<String, String>>) -> Result<Self> {
        let env = config::Environment::default()
            .try_parsing(true)
            .source(source);
        let cfg = config::Config::builder().add_source(env).build()?;
        let mut loaded: AgentConfig = cfg.try_deserialize()?;
        // Blank credentials count as absent.
        loaded.google_api_key = loaded.google_api_key.filter(|k| !k.trim().is_empty());
        loaded.llm_api_key = loaded.llm_api_key.filter(|k| !k.trim().is_empty());
        Ok(loaded)
    }

    /// The model credential, if any is configured.
    pub fn api_key(&self) -> Option<&str> {
        self.llm_api_key
            .as_deref()
            .or(self.google_api_key.as_deref())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay.max(0.0))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_when_unset() {
        let cfg = AgentConfig::from_vars(HashMap::new()).unwrap();
        assert!(cfg.api_key().is_none());
        assert_eq!(cfg.llm_provider, Provider::Gemini);
        assert_eq!(cfg.llm_model, "gemini-1.5-flash");
        assert_eq!(cfg.max_tokens, 800);
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.retry_delay(), Duration::from_secs(1));
        assert_eq!(cfg.max_correction_attempts, 3);
        assert_eq!(cfg.context_budget_tokens, 3000);
        assert_eq!(cfg.prompts_dir, PathBuf::from("prompts"));
    }

    #[test]
    fn test_reads_environment_names() {
        let cfg = AgentConfig::from_vars(vars(&[
            ("GOOGLE_API_KEY", "abc123"),
            ("LLM_MODEL", "gemini-1.5-pro"),
            ("MAX_TOKENS", "1200"),
            ("TEMPERATURE", "0.2"),
            ("MAX_RETRIES", "5"),
            ("RETRY_DELAY", "2"),
            ("MAX_CORRECTION_ATTEMPTS", "4"),
        ]))
        .unwrap();
        assert_eq!(cfg.api_key(), Some("abc123"));
        assert_eq!(cfg.llm_model, "gemini-1.5-pro");
        assert_eq!(cfg.max_tokens, 1200);
        assert!((cfg.temperature - 0.2).abs() < f64::EPSILON);
        assert_eq!(cfg.max_retries, 5);
        assert_eq!(cfg.retry_delay(), Duration::from_secs(2));
        assert_eq!(cfg.max_correction_attempts, 4);
    }

    #[test]
    fn test_blank_key_is_absent() {
        let cfg = AgentConfig::from_vars(vars(&[("GOOGLE_API_KEY", "  ")])).unwrap();
        assert!(cfg.api_key().is_none());
    }

    #[test]
    fn test_llm_api_key_takes_precedence() {
        let cfg = AgentConfig::from_vars(vars(&[
            ("GOOGLE_API_KEY", "google"),
            ("LLM_API_KEY", "generic"),
            ("LLM_PROVIDER", "openai"),
        ]))
        .unwrap();
        assert_eq!(cfg.api_key(), Some("generic"));
        assert_eq!(cfg.llm_provider, Provider::OpenAi);
    }
}
