//! Mock backend for testing without a live LLM.
//!
//! [`MockBackend`] plays back a script of replies and failures in order and
//! records every request it receives, so tests can assert on the prompts
//! the agent sent.
//!
//! # Example
//!
//! ```
//! use llm_agent::backend::MockBackend;
//!
//! let mock = MockBackend::new(vec!["Hello, world!".to_string()]);
//! let flaky = MockBackend::scripted(vec![Err("503".into()), Ok("ok".into())]);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::Client;

use super::{Backend, LlmRequest, LlmResponse};
use crate::error::Result;
use crate::AgentError;

/// A test backend that returns canned responses in order.
///
/// Cycles back to the beginning when the script is exhausted. `Err` entries
/// fail the call with [`AgentError::HttpError`] status 503.
#[derive(Debug)]
pub struct MockBackend {
    script: Vec<std::result::Result<String, String>>,
    index: AtomicUsize,
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockBackend {
    /// Create a mock backend with the given canned responses.
    pub fn new(responses: Vec<String>) -> Self {
        Self::scripted(responses.into_iter().map(Ok).collect())
    }

    /// Create a mock from an explicit script of replies and failures.
    pub fn scripted(script: Vec<std::result::Result<String, String>>) -> Self {
        assert!(!script.is_empty(), "MockBackend requires at least one entry");
        Self {
            script,
            index: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock that always returns the same response.
    pub fn fixed(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    /// Create a mock whose every call fails.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::scripted(vec![Err(message.into())])
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.index.load(Ordering::Relaxed)
    }

    /// Copies of every request received, in order.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn next_entry(&self) -> std::result::Result<String, String> {
        let idx = self.index.fetch_add(1, Ordering::Relaxed) % self.script.len();
        self.script[idx].clone()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn complete(
        &self,
        _client: &Client,
        _base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse> {
        if let Ok(mut log) = self.requests.lock() {
            log.push(request.clone());
        }
        match self.next_entry() {
            Ok(text) => Ok(LlmResponse {
                text,
                status: 200,
                metadata: None,
            }),
            Err(body) => Err(AgentError::HttpError { status: 503, body }),
        }
    }

    fn default_base_url(&self) -> &'static str {
        "http://mock.invalid"
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
