//! Uniform dispatch over data-sourcing and inspection tools.
//!
//! Every tool implements [`Tool`] (one `invoke(parameters) -> value`
//! operation) and is registered by name in a [`ToolDispatcher`]. The
//! dispatcher resolves the name, checks required parameters and writes an
//! audit log line per call. Adding a tool means registering it, not editing
//! the dispatcher.
//!
//! Built-ins: [`WebScraper`] (`web_scraper`), [`DataReader`]
//! (`data_reader`) and [`DataInspector`] (`data_inspector`).

pub mod data_inspector;
pub mod data_reader;
pub mod structure;
pub mod web_scraper;

pub use data_inspector::DataInspector;
pub use data_reader::{DataReader, FileData};
pub use web_scraper::{WebPage, WebScraper};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::error::Result;
use crate::AgentError;

/// A single-operation capability reachable through the dispatcher.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Registry key, e.g. `"web_scraper"`.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Parameters that must be present and non-null.
    fn required_params(&self) -> &[&'static str] {
        &[]
    }

    /// Reject a call before it runs. The default checks
    /// [`required_params`](Tool::required_params).
    fn check_params(&self, params: &Value) -> Result<()> {
        for parameter in self.required_params() {
            if params.get(parameter).map_or(true, Value::is_null) {
                return Err(AgentError::ToolParameter {
                    tool: self.name().to_string(),
                    parameter: parameter.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn invoke(&self, params: &Value) -> Result<Value>;
}

/// Name-keyed registry of tools.
///
/// # Example
///
/// ```
/// use llm_agent::tools::ToolDispatcher;
/// use serde_json::json;
///
/// let dispatcher = ToolDispatcher::with_defaults(reqwest::Client::new(), std::time::Duration::from_secs(30));
/// assert_eq!(dispatcher.tool_names(), vec!["data_inspector", "data_reader", "web_scraper"]);
///
/// let rt = tokio::runtime::Runtime::new().unwrap();
/// let file = rt
///     .block_on(dispatcher.invoke("data_reader", json!({"filename": "a.txt", "content": "hi"})))
///     .unwrap();
/// assert_eq!(file["type"], "text");
/// ```
#[derive(Default)]
pub struct ToolDispatcher {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDispatcher")
            .field("tools", &self.tool_names())
            .finish()
    }
}

impl ToolDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A dispatcher with the three built-in tools.
    pub fn with_defaults(client: Client, fetch_timeout: Duration) -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register(WebScraper::new(client, fetch_timeout));
        dispatcher.register(DataReader);
        dispatcher.register(DataInspector);
        dispatcher
    }

    /// Register `tool`, replacing any tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Registered names, sorted.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Invoke `name` with `params`.
    ///
    /// # Errors
    ///
    /// - [`AgentError::ToolNotFound`] for an unregistered name
    /// - [`AgentError::ToolParameter`] when a required parameter is missing
    /// - whatever the tool itself returns
    pub async fn invoke(&self, name: &str, params: Value) -> Result<Value> {
        let started = Instant::now();
        let param_keys: Vec<String> = params
            .as_object()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();

        let result = match self.get(name) {
            None => Err(AgentError::ToolNotFound {
                name: name.to_string(),
                available: self.tool_names(),
            }),
            Some(tool) => match tool.check_params(&params) {
                Ok(()) => tool.invoke(&params).await,
                Err(e) => Err(e),
            },
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => tracing::info!(
                tool = name,
                params = ?param_keys,
                outcome = "ok",
                duration_ms,
                "tool invoked"
            ),
            Err(e) => tracing::error!(
                tool = name,
                params = ?param_keys,
                outcome = "error",
                duration_ms,
                error = %e,
                "tool invocation failed"
            ),
        }

        result
    }
}
