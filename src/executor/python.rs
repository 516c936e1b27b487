//! Subprocess execution with a local Python interpreter.

use std::io::Write;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{clean_program, CodeExecutor, ExecutionResult, SyntaxCheck};
use crate::config::AgentConfig;
use crate::error::Result;
use crate::AgentError;

/// Parses stdin with the interpreter's own parser without running it.
const SYNTAX_PROBE: &str = "import ast, sys\nast.parse(sys.stdin.read(), '<generated>')";

/// Runs programs with `python3` (or a configured interpreter) in a
/// temporary file, killing them when the wall-clock timeout elapses.
#[derive(Debug, Clone)]
pub struct PythonExecutor {
    python: String,
    timeout: Duration,
}

impl Default for PythonExecutor {
    fn default() -> Self {
        Self::new("python3", Duration::from_secs(60))
    }
}

impl PythonExecutor {
    pub fn new(python: impl Into<String>, timeout: Duration) -> Self {
        Self {
            python: python.into(),
            timeout,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.python_bin.clone(), config.execution_timeout())
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.python);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("PYTHONIOENCODING", "utf-8")
            .kill_on_drop(true);
        cmd
    }

    async fn wait(&self, child: tokio::process::Child) -> Result<std::process::Output> {
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => Ok(output?),
            Err(_) => Err(AgentError::Execution(format!(
                "Execution timed out after {} seconds",
                self.timeout.as_secs_f64()
            ))),
        }
    }

    fn spawn_error(&self, err: std::io::Error) -> AgentError {
        AgentError::Execution(format!("Failed to start '{}': {err}", self.python))
    }
}

/// Last non-empty lines of stderr, which carry the exception message.
fn error_text(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let tail = lines.len().saturating_sub(12);
    lines[tail..].join("\n")
}

#[async_trait]
impl CodeExecutor for PythonExecutor {
    fn prepare(&self, code: &str) -> String {
        clean_program(code, "python")
    }

    async fn check_syntax(&self, code: &str) -> Result<SyntaxCheck> {
        let mut cmd = self.command();
        cmd.arg("-c").arg(SYNTAX_PROBE).stdin(Stdio::piped());
        let mut child = cmd.spawn().map_err(|e| self.spawn_error(e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(code.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = self.wait(child).await?;
        if output.status.success() {
            Ok(SyntaxCheck::valid())
        } else {
            Ok(SyntaxCheck::invalid(error_text(&output.stderr)))
        }
    }

    async fn run(&self, code: &str) -> Result<ExecutionResult> {
        let mut script = tempfile::Builder::new()
            .prefix("analysis_")
            .suffix(".py")
            .tempfile()?;
        script.write_all(code.as_bytes())?;
        script.flush()?;

        let started = std::time::Instant::now();
        let mut cmd = self.command();
        cmd.arg(script.path());
        let child = cmd.spawn().map_err(|e| self.spawn_error(e))?;
        let output = self.wait(child).await?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        tracing::debug!(
            exit_code = ?output.status.code(),
            stdout_bytes = output.stdout.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "program finished"
        );

        if !output.status.success() {
            let error = error_text(&output.stderr);
            return Ok(ExecutionResult {
                success: false,
                output: stdout,
                error: Some(if error.is_empty() {
                    format!("Process exited with {}", output.status)
                } else {
                    error
                }),
            });
        }
        if stdout.is_empty() {
            return Ok(ExecutionResult::failed(
                "Code executed successfully but produced no output",
            ));
        }
        Ok(ExecutionResult::succeeded(stdout))
    }
}
