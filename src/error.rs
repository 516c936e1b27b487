use thiserror::Error;

/// Errors produced by the agent and its collaborators.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON (de)serialization failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem or process I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Required configuration is missing or invalid. Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// HTTP error with status code and response body.
    ///
    /// Returned by [`Backend`](crate::backend::Backend) implementations when
    /// the provider answers with a non-success status code.
    #[error("HTTP {status}: {body}")]
    HttpError {
        /// HTTP status code (e.g. 429, 500, 503).
        status: u16,
        /// Response body text.
        body: String,
    },

    /// The model provider kept failing until the retry budget ran out.
    #[error("Model call failed after {attempts} attempt(s): {source}")]
    Provider {
        /// Number of attempts made.
        attempts: u32,
        /// The last underlying error.
        #[source]
        source: Box<AgentError>,
    },

    /// No tool is registered under the requested name.
    #[error("Tool '{name}' not found. Available tools: {available:?}")]
    ToolNotFound {
        name: String,
        available: Vec<String>,
    },

    /// A tool was invoked without one of its required parameters.
    #[error("Tool '{tool}' requires parameter '{parameter}'")]
    ToolParameter { tool: String, parameter: String },

    /// The execution engine itself failed (could not spawn, timed out, ...).
    #[error("Execution engine error: {0}")]
    Execution(String),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl From<config::ConfigError> for AgentError {
    fn from(err: config::ConfigError) -> Self {
        AgentError::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
