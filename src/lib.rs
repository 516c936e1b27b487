//! # LLM Agent
//!
//! A self-correcting data-analysis agent. Given a natural-language question
//! and optional data (uploaded files or a URL), it asks a language model for
//! an analysis program, runs it locally and feeds failures back to the model
//! until the program succeeds or the correction budget is spent.
//!
//! ## Core Concepts
//!
//! - **[`Agent`]**: the pipeline controller. [`Agent::process`] never
//!   fails; every outcome is a JSON response envelope.
//! - **[`ModelGateway`]**: resilient model calls with exponential backoff
//!   and prompt-size budgeting, over a pluggable [`backend::Backend`].
//! - **[`ToolDispatcher`]**: uniform `invoke(name, params)` over the
//!   data-sourcing tools (`web_scraper`, `data_reader`, `data_inspector`).
//! - **[`CodeExecutor`]**: the execution engine seam
//!   (`prepare` / `check_syntax` / `run`).
//! - **[`PromptResolver`]**: named templates with compiled-in fallbacks.
//!
//! ## Quick Start
//!
//! ```no_run
//! use llm_agent::{Agent, AgentConfig, AnalysisRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let agent = Agent::from_config(&AgentConfig::from_env()?);
//!
//!     let request = AnalysisRequest::new(
//!         "Scrape https://en.wikipedia.org/wiki/List_of_highest-grossing_films \
//!          and list the top 3 titles as a JSON array.",
//!     );
//!     let response = agent.process(&request).await;
//!     println!("{}", serde_json::to_string_pretty(&response)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Testing without a model or interpreter
//!
//! ```
//! use std::sync::Arc;
//! use llm_agent::{Agent, AnalysisRequest, MockBackend, MockExecutor, ModelGateway};
//! use llm_agent::gateway::GatewaySettings;
//!
//! # tokio_test::block_on(async {
//! let backend = Arc::new(MockBackend::new(vec![
//!     r#"{"plan": "add the numbers", "steps": []}"#.to_string(),
//!     "print([4])".to_string(),
//! ]));
//! let gateway = ModelGateway::new(
//!     backend,
//!     GatewaySettings { api_key: Some("test".into()), ..Default::default() },
//! );
//! let agent = Agent::builder(gateway)
//!     .executor(Arc::new(MockExecutor::succeeding("[4]")))
//!     .build();
//!
//! let response = agent
//!     .process(&AnalysisRequest::new("What is 2+2? Respond as a json array."))
//!     .await;
//! assert_eq!(response, serde_json::json!([4]));
//! # });
//! ```

pub mod agent;
pub mod backend;
pub mod config;
pub mod envelope;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod output_parser;
pub mod prompt;
pub mod source;
pub mod tools;

pub use agent::{Agent, AgentBuilder};
pub use backend::{BackoffConfig, GeminiBackend, MockBackend, OpenAiBackend};
pub use config::{AgentConfig, Provider};
pub use error::{AgentError, Result};
pub use executor::{CodeExecutor, ExecutionResult, MockExecutor, PythonExecutor, SyntaxCheck};
pub use gateway::{ModelGateway, PromptContext};
pub use prompt::{PromptResolver, PromptTemplate};
pub use source::{AnalysisRequest, DataFile, DataSourceType, SourcedData, TaskPlan};
pub use tools::{Tool, ToolDispatcher};
