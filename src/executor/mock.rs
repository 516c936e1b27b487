//! Scripted execution engine for tests.
//!
//! # Example
//!
//! ```
//! use llm_agent::executor::{CodeExecutor, ExecutionResult, MockExecutor, SyntaxCheck};
//!
//! let exec = MockExecutor::new()
//!     .with_syntax(|code| {
//!         if code.contains("print(") {
//!             SyntaxCheck::valid()
//!         } else {
//!             SyntaxCheck::invalid("SyntaxError: invalid syntax")
//!         }
//!     })
//!     .with_output(|_| ExecutionResult::succeeded("[4]"));
//!
//! let rt = tokio::runtime::Runtime::new().unwrap();
//! assert!(!rt.block_on(exec.check_syntax("oops")).unwrap().valid);
//! assert_eq!(rt.block_on(exec.run("print(4)")).unwrap().output, "[4]");
//! assert_eq!(exec.run_count(), 1);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{clean_program, CodeExecutor, ExecutionResult, SyntaxCheck};
use crate::error::Result;
use crate::AgentError;

type SyntaxFn = Box<dyn Fn(&str) -> SyntaxCheck + Send + Sync>;
type RunFn = Box<dyn Fn(&str) -> Result<ExecutionResult> + Send + Sync>;

/// An executor whose verdicts come from closures over the program text.
///
/// Defaults: every program is valid and prints `[]`. Every program that
/// reaches `run` is recorded.
pub struct MockExecutor {
    syntax: SyntaxFn,
    run: RunFn,
    syntax_calls: AtomicUsize,
    run_calls: AtomicUsize,
    programs: Mutex<Vec<String>>,
}

impl std::fmt::Debug for MockExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockExecutor")
            .field("syntax_calls", &self.syntax_count())
            .field("run_calls", &self.run_count())
            .finish_non_exhaustive()
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExecutor {
    pub fn new() -> Self {
        Self {
            syntax: Box::new(|_| SyntaxCheck::valid()),
            run: Box::new(|_| Ok(ExecutionResult::succeeded("[]"))),
            syntax_calls: AtomicUsize::new(0),
            run_calls: AtomicUsize::new(0),
            programs: Mutex::new(Vec::new()),
        }
    }

    /// Every run succeeds with `output`.
    pub fn succeeding(output: impl Into<String>) -> Self {
        let output = output.into();
        Self::new().with_output(move |_| ExecutionResult::succeeded(output.clone()))
    }

    /// Every run fails with `error`.
    pub fn failing(error: impl Into<String>) -> Self {
        let error = error.into();
        Self::new().with_output(move |_| ExecutionResult::failed(error.clone()))
    }

    pub fn with_syntax(mut self, f: impl Fn(&str) -> SyntaxCheck + Send + Sync + 'static) -> Self {
        self.syntax = Box::new(f);
        self
    }

    pub fn with_output(mut self, f: impl Fn(&str) -> ExecutionResult + Send + Sync + 'static) -> Self {
        self.run = Box::new(move |code| Ok(f(code)));
        self
    }

    /// Runs whose outcome may be an engine error.
    pub fn with_run(
        mut self,
        f: impl Fn(&str) -> Result<ExecutionResult> + Send + Sync + 'static,
    ) -> Self {
        self.run = Box::new(f);
        self
    }

    /// Runs that fail at the engine level with `message`.
    pub fn broken(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new().with_run(move |_| Err(AgentError::Execution(message.clone())))
    }

    pub fn syntax_count(&self) -> usize {
        self.syntax_calls.load(Ordering::Relaxed)
    }

    pub fn run_count(&self) -> usize {
        self.run_calls.load(Ordering::Relaxed)
    }

    /// Programs passed to `run`, in order.
    pub fn programs(&self) -> Vec<String> {
        self.programs
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CodeExecutor for MockExecutor {
    fn prepare(&self, code: &str) -> String {
        clean_program(code, "python")
    }

    async fn check_syntax(&self, code: &str) -> Result<SyntaxCheck> {
        self.syntax_calls.fetch_add(1, Ordering::Relaxed);
        Ok((self.syntax)(code))
    }

    async fn run(&self, code: &str) -> Result<ExecutionResult> {
        self.run_calls.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut programs) = self.programs.lock() {
            programs.push(code.to_string());
        }
        (self.run)(code)
    }
}
