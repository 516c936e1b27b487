//! Execution-correction loop.
//!
//! ```text
//! GENERATED -> SYNTAX_CHECKED -> EXECUTING  -> SUCCEEDED
//!                     |              |
//!                     +--------------+-> CORRECTING -> GENERATED
//!                                    |
//!                                    +-> FAILED (budget spent)
//! ```
//!
//! Each attempt prepares the current program, puts the data preamble in
//! front of it, checks syntax and runs it. A syntax failure, a runtime
//! failure and an engine error all spend one attempt. While budget remains
//! the latest error alone is sent back to the model, which returns a
//! replacement program.

use std::collections::VecDeque;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::executor::{CodeExecutor, ExecutionResult, SyntaxCheck};
use crate::gateway::{ModelGateway, PromptContext};
use crate::prompt::{PromptResolver, PromptTemplate};

/// First line of the data preamble. Programs that already contain it are
/// not wrapped again.
pub const PREAMBLE_MARKER: &str = "# Data injection";

const INVALID_SYNTAX: &str = "Invalid Python code. Return only Python code.";
const REPEATED_VARIANT: &str =
    "This exact program already failed in an earlier attempt; take a different approach.";

/// Python preamble binding the sourced data to `data` and, when the data is
/// a JSON object, an independent copy to `metadata` (else `None`).
///
/// The JSON text is embedded as an escaped string literal, so any content
/// survives intact.
///
/// # Example
///
/// ```
/// use llm_agent::agent::correction::data_preamble;
/// use serde_json::json;
///
/// let preamble = data_preamble(&json!([1, 2])).unwrap();
/// assert!(preamble.starts_with("# Data injection"));
/// assert!(preamble.contains(r#"data = json.loads("[1,2]")"#));
/// assert!(preamble.contains("metadata = None"));
/// ```
pub fn data_preamble(data: &Value) -> Result<String> {
    let literal = serde_json::to_string(&serde_json::to_string(data)?)?;
    let metadata = if data.is_object() {
        format!("json.loads({literal})")
    } else {
        "None".to_string()
    };
    Ok(format!(
        "{PREAMBLE_MARKER}\nimport json\ndata = json.loads({literal})\nmetadata = {metadata}\n\n# User code starts here\n"
    ))
}

/// `code` with `preamble` in front, unless it already carries one.
pub fn with_preamble(code: &str, preamble: Option<&str>) -> String {
    match preamble {
        Some(preamble) if !code.contains(PREAMBLE_MARKER) => format!("{preamble}{code}"),
        _ => code.to_string(),
    }
}

fn fingerprint(code: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(code.trim().as_bytes());
    hasher.finalize().into()
}

/// Fingerprints of programs that already failed, oldest evicted first.
#[derive(Debug)]
struct FailedVariants {
    seen: VecDeque<[u8; 32]>,
    capacity: usize,
}

impl FailedVariants {
    fn new(capacity: usize) -> Self {
        Self {
            seen: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    fn record(&mut self, code: &str) {
        let print = fingerprint(code);
        if self.seen.contains(&print) {
            return;
        }
        if self.seen.len() == self.capacity {
            self.seen.pop_front();
        }
        self.seen.push_back(print);
    }

    fn contains(&self, code: &str) -> bool {
        self.seen.contains(&fingerprint(code))
    }
}

/// How the loop ended.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    pub result: ExecutionResult,
    /// Failed attempts spent.
    pub attempts: u32,
    /// Programs produced by the model: the original plus each correction.
    pub generations: u32,
}

enum Attempt {
    Succeeded(ExecutionResult),
    Failed {
        error: String,
        result: Option<ExecutionResult>,
    },
}

/// The loop's collaborators and budget.
pub struct CorrectionLoop<'a> {
    gateway: &'a ModelGateway,
    prompts: &'a PromptResolver,
    executor: &'a dyn CodeExecutor,
    max_attempts: u32,
}

impl<'a> CorrectionLoop<'a> {
    pub fn new(
        gateway: &'a ModelGateway,
        prompts: &'a PromptResolver,
        executor: &'a dyn CodeExecutor,
        max_attempts: u32,
    ) -> Self {
        Self {
            gateway,
            prompts,
            executor,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Drive `code` to success or until the attempt budget is spent.
    ///
    /// # Errors
    ///
    /// Only a failed correction request (the model call itself) is
    /// returned as an error. Program and engine failures end up in the
    /// outcome's [`ExecutionResult`].
    pub async fn run(&self, code: String, data: Option<&Value>) -> Result<LoopOutcome> {
        let preamble = data.map(data_preamble).transpose()?;
        let mut failed = FailedVariants::new(self.max_attempts as usize);
        let mut current = code;
        let mut attempts = 0u32;
        let mut generations = 1u32;
        let mut repeated = false;

        loop {
            let prepared = self.executor.prepare(&current);
            let program = with_preamble(&prepared, preamble.as_deref());

            let (error, result) = match self.attempt(&program).await {
                Attempt::Succeeded(result) => {
                    tracing::info!(attempts, generations, "program succeeded");
                    return Ok(LoopOutcome {
                        result,
                        attempts,
                        generations,
                    });
                }
                Attempt::Failed { error, result } => (error, result),
            };

            attempts += 1;
            failed.record(&prepared);
            tracing::warn!(
                attempt = attempts,
                max_attempts = self.max_attempts,
                error = %error,
                "program failed"
            );

            if attempts >= self.max_attempts {
                tracing::error!(attempts, "correction budget exhausted");
                return Ok(LoopOutcome {
                    result: result.unwrap_or_else(|| ExecutionResult::failed(error)),
                    attempts,
                    generations,
                });
            }

            let feedback = if repeated {
                format!("{error}\n{REPEATED_VARIANT}")
            } else {
                error
            };
            current = self.correct(&prepared, &feedback).await?;
            generations += 1;

            repeated = failed.contains(&self.executor.prepare(&current));
            if repeated {
                tracing::warn!(attempt = attempts, "correction returned a program that already failed");
            }
        }
    }

    async fn attempt(&self, program: &str) -> Attempt {
        match self.executor.check_syntax(program).await {
            Ok(SyntaxCheck { valid: true, .. }) => {}
            Ok(SyntaxCheck { error, .. }) => {
                return Attempt::Failed {
                    error: error.unwrap_or_else(|| INVALID_SYNTAX.to_string()),
                    result: None,
                }
            }
            Err(e) => {
                return Attempt::Failed {
                    error: e.to_string(),
                    result: None,
                }
            }
        }

        match self.executor.run(program).await {
            Ok(result) if result.success => Attempt::Succeeded(result),
            Ok(result) => Attempt::Failed {
                error: result.error_message().to_string(),
                result: Some(result),
            },
            Err(e) => Attempt::Failed {
                error: e.to_string(),
                result: None,
            },
        }
    }

    /// Ask the model to repair `code` given `error`; the reply replaces the
    /// program wholesale.
    pub async fn correct(&self, code: &str, error: &str) -> Result<String> {
        let prompt = self
            .prompts
            .render(PromptTemplate::CodeCorrection, &[("code", code), ("error", error)])
            .await;
        let context = PromptContext::new().previous_error(error);
        self.gateway.complete_with_context(&prompt, &context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;

    use crate::backend::{BackoffConfig, MockBackend};
    use crate::executor::MockExecutor;
    use crate::gateway::GatewaySettings;

    fn gateway(mock: Arc<MockBackend>) -> ModelGateway {
        ModelGateway::new(
            mock,
            GatewaySettings {
                api_key: Some("test-key".into()),
                backoff: BackoffConfig::none(),
                ..GatewaySettings::default()
            },
        )
    }

    #[test]
    fn test_preamble_binds_metadata_only_for_objects() {
        let object = data_preamble(&json!({"k": "v"})).unwrap();
        assert_eq!(object.matches("json.loads(").count(), 2);
        assert!(!object.contains("metadata = None"));

        let list = data_preamble(&json!(["a"])).unwrap();
        assert!(list.contains("metadata = None"));
    }

    #[test]
    fn test_preamble_escapes_quote_runs() {
        let preamble = data_preamble(&json!({"text": "''' \"\"\" \\ end"})).unwrap();
        assert!(!preamble.contains("r'''"));
        assert!(preamble.contains(r#"\\\"\\\"\\\""#));
    }

    #[test]
    fn test_with_preamble_is_idempotent() {
        let preamble = data_preamble(&json!(1)).unwrap();
        let once = with_preamble("print(data)", Some(&preamble));
        assert_eq!(with_preamble(&once, Some(&preamble)), once);
        assert_eq!(with_preamble("print(1)", None), "print(1)");
    }

    #[test]
    fn test_failed_variants_bounded() {
        let mut failed = FailedVariants::new(2);
        failed.record("a");
        failed.record("b");
        failed.record("a ");
        failed.record("c");
        assert!(!failed.contains("a"));
        assert!(failed.contains("b"));
        assert!(failed.contains("c"));
    }

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let mock = Arc::new(MockBackend::fixed("unused"));
        let gw = gateway(mock.clone());
        let prompts = PromptResolver::builtin();
        let exec = MockExecutor::succeeding("[4]");

        let outcome = CorrectionLoop::new(&gw, &prompts, &exec, 3)
            .run("print([4])".into(), None)
            .await
            .unwrap();
        assert_eq!(outcome.result.output, "[4]");
        assert_eq!(outcome.attempts, 0);
        assert_eq!(outcome.generations, 1);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_syntax_error_then_fixed() {
        let mock = Arc::new(MockBackend::fixed("```python\nprint([4])\n```"));
        let gw = gateway(mock.clone());
        let prompts = PromptResolver::builtin();
        let exec = MockExecutor::succeeding("[4]").with_syntax(|code| {
            if code.contains("print([4]") && !code.contains("print([4])") {
                SyntaxCheck::invalid("SyntaxError: '[' was never closed")
            } else {
                SyntaxCheck::valid()
            }
        });

        let outcome = CorrectionLoop::new(&gw, &prompts, &exec, 3)
            .run("print([4]".into(), None)
            .await
            .unwrap();
        assert!(outcome.result.success);
        assert_eq!(outcome.generations, 2);
        assert_eq!(exec.syntax_count(), 2);
        assert_eq!(exec.run_count(), 1);

        let request = &mock.requests()[0];
        assert!(request.prompt.contains("print([4]"));
        assert!(request.prompt.contains("was never closed"));
        let system = request.system_prompt.as_deref().unwrap();
        assert!(system.contains("Previous error encountered: SyntaxError"));
    }

    #[tokio::test]
    async fn test_budget_exhausted_returns_last_runtime_result() {
        let mock = Arc::new(MockBackend::new(vec!["print(2)".into(), "print(3)".into()]));
        let gw = gateway(mock.clone());
        let prompts = PromptResolver::builtin();
        let exec = MockExecutor::failing("ValueError: bad");

        let outcome = CorrectionLoop::new(&gw, &prompts, &exec, 3)
            .run("print(1)".into(), Some(&json!({"rows": []})))
            .await
            .unwrap();
        assert!(!outcome.result.success);
        assert_eq!(outcome.result.error.as_deref(), Some("ValueError: bad"));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(exec.run_count(), 3);
        assert_eq!(mock.call_count(), 2);

        let programs = exec.programs();
        assert!(programs.iter().all(|p| p.starts_with(PREAMBLE_MARKER)));
        assert!(programs[2].ends_with("print(3)"));
    }

    #[tokio::test]
    async fn test_syntax_budget_exhausted_returns_syntax_error() {
        let mock = Arc::new(MockBackend::new(vec!["print(2".into(), "print(3".into()]));
        let gw = gateway(mock.clone());
        let prompts = PromptResolver::builtin();
        let exec = MockExecutor::succeeding("never")
            .with_syntax(|_| SyntaxCheck::invalid("SyntaxError: unexpected EOF while parsing"));

        let outcome = CorrectionLoop::new(&gw, &prompts, &exec, 3)
            .run("print(1".into(), None)
            .await
            .unwrap();
        assert!(!outcome.result.success);
        assert!(outcome
            .result
            .error_message()
            .contains("SyntaxError: unexpected EOF while parsing"));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.generations, 3);
        assert_eq!(exec.syntax_count(), 3);
        assert_eq!(exec.run_count(), 0);
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_engine_error_counts_as_failure() {
        let mock = Arc::new(MockBackend::fixed("print(1)"));
        let gw = gateway(mock.clone());
        let prompts = PromptResolver::builtin();
        let exec = MockExecutor::broken("spawn failed");

        let outcome = CorrectionLoop::new(&gw, &prompts, &exec, 2)
            .run("print(1)".into(), None)
            .await
            .unwrap();
        assert!(!outcome.result.success);
        assert!(outcome.result.error_message().contains("spawn failed"));
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test]
    async fn test_repeated_variant_flagged_in_feedback() {
        // The model keeps returning the program that already failed.
        let mock = Arc::new(MockBackend::fixed("print(1)"));
        let gw = gateway(mock.clone());
        let prompts = PromptResolver::builtin();
        let exec = MockExecutor::failing("NameError: x");

        let outcome = CorrectionLoop::new(&gw, &prompts, &exec, 3)
            .run("print(1)".into(), None)
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 3);

        let requests = mock.requests();
        assert_eq!(requests.len(), 2);
        assert!(!requests[0].prompt.contains(REPEATED_VARIANT));
        assert!(requests[1].prompt.contains(REPEATED_VARIANT));
    }

    #[tokio::test]
    async fn test_correction_failure_propagates() {
        let mock = Arc::new(MockBackend::failing("unavailable"));
        let gw = gateway(mock.clone());
        let prompts = PromptResolver::builtin();
        let exec = MockExecutor::failing("boom");

        let err = CorrectionLoop::new(&gw, &prompts, &exec, 3)
            .run("print(1)".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::AgentError::Provider { .. }));
        assert_eq!(exec.run_count(), 1);
    }
}
