//! The pipeline controller.
//!
//! [`Agent::process`] runs one request through seven sequential stages:
//!
//! 1. classify the data source
//! 2. ask the model for a task plan
//! 3. source the data through the tools
//! 4. inspect it into compact metadata
//! 5. generate a program from the questions and metadata
//! 6. run the execution-correction loop
//! 7. normalize the result into a response envelope
//!
//! An `Agent` holds only `Arc`ed collaborators and fixed settings; nothing
//! on it changes after construction, so one instance can serve concurrent
//! requests.

pub mod correction;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use reqwest::Client;
use serde_json::{json, Value};

use crate::config::AgentConfig;
use crate::envelope;
use crate::error::Result;
use crate::executor::{CodeExecutor, PythonExecutor};
use crate::gateway::{ModelGateway, PromptContext};
use crate::prompt::{PromptResolver, PromptTemplate};
use crate::source::{extract_url, AnalysisRequest, DataFile, DataSourceType, SourcedData, TaskPlan};
use crate::tools::{FileData, ToolDispatcher, WebPage};

pub use correction::{CorrectionLoop, LoopOutcome};

/// A self-correcting analysis agent.
///
/// # Example
///
/// ```no_run
/// use llm_agent::{Agent, AgentConfig, AnalysisRequest};
///
/// # async fn run() -> llm_agent::Result<()> {
/// let agent = Agent::from_config(&AgentConfig::from_env()?);
/// let request = AnalysisRequest::new("Which region sold most? Respond as a JSON array.")
///     .with_file("sales.csv", std::fs::read("sales.csv")?);
/// let response = agent.process(&request).await;
/// println!("{response}");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Agent {
    gateway: Arc<ModelGateway>,
    tools: Arc<ToolDispatcher>,
    executor: Arc<dyn CodeExecutor>,
    prompts: Arc<PromptResolver>,
    max_correction_attempts: u32,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("model", &self.gateway.model_info())
            .field("tools", &self.tools.tool_names())
            .field("prompts", &self.prompts.dir())
            .field("max_correction_attempts", &self.max_correction_attempts)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Agent`].
pub struct AgentBuilder {
    gateway: Arc<ModelGateway>,
    tools: Option<Arc<ToolDispatcher>>,
    executor: Option<Arc<dyn CodeExecutor>>,
    prompts: Option<Arc<PromptResolver>>,
    max_correction_attempts: u32,
}

impl AgentBuilder {
    /// Set the tool dispatcher. Default: the built-in tools with a 30s fetch
    /// timeout.
    pub fn tools(mut self, tools: impl Into<Arc<ToolDispatcher>>) -> Self {
        self.tools = Some(tools.into());
        self
    }

    /// Set the execution engine. Default: [`PythonExecutor`].
    pub fn executor(mut self, executor: Arc<dyn CodeExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Set the template resolver. Default: compiled-in templates only.
    pub fn prompts(mut self, prompts: PromptResolver) -> Self {
        self.prompts = Some(Arc::new(prompts));
        self
    }

    /// Set the correction budget (minimum 1). Default: 3.
    pub fn max_correction_attempts(mut self, attempts: u32) -> Self {
        self.max_correction_attempts = attempts.max(1);
        self
    }

    pub fn build(self) -> Agent {
        Agent {
            gateway: self.gateway,
            tools: self.tools.unwrap_or_else(|| {
                Arc::new(ToolDispatcher::with_defaults(Client::new(), Duration::from_secs(30)))
            }),
            executor: self
                .executor
                .unwrap_or_else(|| Arc::new(PythonExecutor::default())),
            prompts: self
                .prompts
                .unwrap_or_else(|| Arc::new(PromptResolver::builtin())),
            max_correction_attempts: self.max_correction_attempts,
        }
    }
}

impl Agent {
    pub fn builder(gateway: impl Into<Arc<ModelGateway>>) -> AgentBuilder {
        AgentBuilder {
            gateway: gateway.into(),
            tools: None,
            executor: None,
            prompts: None,
            max_correction_attempts: 3,
        }
    }

    /// Wire every collaborator from `config`, sharing one HTTP client.
    pub fn from_config(config: &AgentConfig) -> Self {
        let client = Client::new();
        Self::builder(ModelGateway::from_config(config, client.clone()))
            .tools(ToolDispatcher::with_defaults(client, config.fetch_timeout()))
            .executor(Arc::new(PythonExecutor::from_config(config)))
            .prompts(PromptResolver::new(config.prompts_dir.clone()))
            .max_correction_attempts(config.max_correction_attempts)
            .build()
    }

    pub fn gateway(&self) -> &ModelGateway {
        &self.gateway
    }

    pub fn tools(&self) -> &ToolDispatcher {
        &self.tools
    }

    /// Run `request` through the pipeline. Never fails: errors and panics
    /// become `{status: "error", message: "Processing failed: ...", results: []}`.
    pub async fn process(&self, request: &AnalysisRequest) -> Value {
        match AssertUnwindSafe(self.run(request)).catch_unwind().await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "request processing failed");
                envelope::processing_failed(e)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(panic = %message, "request processing panicked");
                envelope::processing_failed(message)
            }
        }
    }

    async fn run(&self, request: &AnalysisRequest) -> Result<Value> {
        let source_type = request.classify();
        let mut url = match source_type {
            DataSourceType::Url => request.explicit_url().map(str::to_string),
            DataSourceType::UrlInText => extract_url(&request.questions),
            DataSourceType::File | DataSourceType::TextOnly => None,
        };
        tracing::info!(source_type = %source_type, url = ?url, "stage 1: data source classified");

        let plan = self.task_breakdown(&request.questions).await?;
        tracing::info!(steps = plan.steps.len(), "stage 2: task plan ready");

        if source_type.is_web() && url.is_none() {
            url = extract_url(&plan.plan);
            tracing::debug!(url = ?url, "URL taken from the task plan");
        }

        let data = self
            .source_data(source_type, url.as_deref(), &request.data_files)
            .await?;
        tracing::info!(kind = data.kind(), "stage 3: data sourced");

        let data_value = data.to_value()?;
        let metadata = self
            .tools
            .invoke(
                "data_inspector",
                json!({"data": data_value.clone(), "source_type": source_type}),
            )
            .await?;
        tracing::info!("stage 4: metadata extracted");

        let code = self
            .generate_code(&request.questions, &metadata, source_type)
            .await?;
        tracing::info!(chars = code.len(), "stage 5: code generated");

        let outcome = CorrectionLoop::new(
            &self.gateway,
            &self.prompts,
            self.executor.as_ref(),
            self.max_correction_attempts,
        )
        .run(code, Some(&data_value))
        .await?;
        tracing::info!(
            success = outcome.result.success,
            attempts = outcome.attempts,
            generations = outcome.generations,
            "stage 6: execution finished"
        );

        let response = envelope::format(&outcome.result, &request.questions);
        tracing::info!("stage 7: output normalized");
        Ok(response)
    }

    /// Ask the model how to answer `questions`. Never fails on an
    /// unparseable reply; only the model call itself can fail.
    pub async fn task_breakdown(&self, questions: &str) -> Result<TaskPlan> {
        let prompt = self
            .prompts
            .render(PromptTemplate::TaskBreakdown, &[("questions", questions)])
            .await;
        let reply = self.gateway.complete(&prompt, None).await?;
        Ok(TaskPlan::from_reply(&reply))
    }

    async fn source_data(
        &self,
        source_type: DataSourceType,
        url: Option<&str>,
        files: &[DataFile],
    ) -> Result<SourcedData> {
        match source_type {
            DataSourceType::Url | DataSourceType::UrlInText => {
                let page = self
                    .tools
                    .invoke("web_scraper", json!({"url": url.unwrap_or_default()}))
                    .await?;
                Ok(SourcedData::Web(serde_json::from_value::<WebPage>(page)?))
            }
            DataSourceType::File => {
                let mut parsed = Vec::with_capacity(files.len());
                for file in files {
                    let content = match std::str::from_utf8(&file.content) {
                        Ok(text) => Value::String(text.to_string()),
                        Err(_) => json!(file.content),
                    };
                    let value = self
                        .tools
                        .invoke(
                            "data_reader",
                            json!({"filename": file.filename, "content": content}),
                        )
                        .await?;
                    parsed.push(serde_json::from_value::<FileData>(value)?);
                }
                Ok(match parsed.len() {
                    1 => SourcedData::File(parsed.remove(0)),
                    _ => SourcedData::Files(parsed),
                })
            }
            DataSourceType::TextOnly => Ok(SourcedData::TextOnly),
        }
    }

    /// Ask the model for a program answering `questions` over data
    /// described by `metadata`.
    pub async fn generate_code(
        &self,
        questions: &str,
        metadata: &Value,
        source_type: DataSourceType,
    ) -> Result<String> {
        let metadata_json = serde_json::to_string_pretty(metadata)?;
        let prompt = self
            .prompts
            .render(
                PromptTemplate::CodeGeneration,
                &[("questions", questions), ("metadata", &metadata_json)],
            )
            .await;
        let mut context = PromptContext::new().data_type(source_type.as_str());
        if let Some(structure) = structure_hint(metadata) {
            context = context.data_structure(structure);
        }
        self.gateway.complete_with_context(&prompt, &context).await
    }
}

/// One-line description of the inspected data for the system message.
fn structure_hint(metadata: &Value) -> Option<String> {
    if let Some([rows, cols]) = metadata["shape"]
        .as_array()
        .and_then(|s| Some([s.first()?.as_u64()?, s.get(1)?.as_u64()?]))
    {
        return Some(format!("table with {rows} rows and {cols} columns"));
    }
    if let Some(count) = metadata["file_count"].as_u64() {
        return Some(format!("{count} files"));
    }
    if metadata["success"] == false {
        return None;
    }
    if let Some(kind) = metadata["content_type"].as_str() {
        return Some(format!("{kind} content from a web page"));
    }
    metadata["file_type"]
        .as_str()
        .map(|kind| format!("{kind} file"))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unexpected panic".to_string())
}
