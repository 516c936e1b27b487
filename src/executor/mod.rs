//! Execution engine seam.
//!
//! The agent only ever calls the three operations of [`CodeExecutor`]:
//! `prepare`, `check_syntax` and `run`. [`PythonExecutor`] runs programs in
//! a local interpreter; [`MockExecutor`] scripts outcomes for tests.

pub mod mock;
pub mod python;

pub use mock::MockExecutor;
pub use python::PythonExecutor;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::output_parser::extract::{extract_code_block, extract_code_block_for};
use crate::output_parser::strip_think_tags;

/// Outcome of a syntax check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxCheck {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyntaxCheck {
    pub fn valid() -> Self {
        Self { valid: true, error: None }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
        }
    }
}

/// Outcome of one program run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn succeeded(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }

    /// The error text, or a generic message when none was recorded.
    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("Execution failed")
    }
}

/// Strip reasoning blocks and markdown fences from a model reply, leaving
/// only the program.
///
/// # Example
///
/// ```
/// use llm_agent::executor::clean_program;
///
/// let reply = "Sure! Here it is:\n```python\nprint([4])\n```\nHope that helps.";
/// assert_eq!(clean_program(reply, "python"), "print([4])");
/// assert_eq!(clean_program("print(1)\n", "python"), "print(1)");
/// ```
pub fn clean_program(reply: &str, language: &str) -> String {
    let text = strip_think_tags(reply);
    let program = extract_code_block_for(&text, language)
        .or_else(|| extract_code_block(&text).map(|(_, content)| content))
        .unwrap_or(text.trim());
    program.trim().to_string()
}

/// A local execution engine.
///
/// Errors returned from `check_syntax` or `run` mean the engine itself
/// failed (spawn failure, timeout); program failures are reported through
/// [`SyntaxCheck`] and [`ExecutionResult`].
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    /// Normalize a program before validation.
    fn prepare(&self, code: &str) -> String;

    async fn check_syntax(&self, code: &str) -> Result<SyntaxCheck>;

    async fn run(&self, code: &str) -> Result<ExecutionResult>;

    fn language(&self) -> &str {
        "python"
    }
}
