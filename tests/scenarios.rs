//! End-to-end runs of the agent against scripted collaborators.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use llm_agent::backend::{BackoffConfig, MockBackend};
use llm_agent::executor::{ExecutionResult, MockExecutor, SyntaxCheck};
use llm_agent::gateway::GatewaySettings;
use llm_agent::tools::web_scraper::WebPage;
use llm_agent::tools::{DataInspector, DataReader, WebScraper};
use llm_agent::{
    Agent, AgentError, AnalysisRequest, DataSourceType, ModelGateway, Tool, ToolDispatcher,
};

fn settings(backoff: BackoffConfig) -> GatewaySettings {
    GatewaySettings {
        api_key: Some("test-key".into()),
        backoff,
        ..GatewaySettings::default()
    }
}

fn gateway(mock: Arc<MockBackend>) -> ModelGateway {
    ModelGateway::new(mock, settings(BackoffConfig::none()))
}

fn replies(texts: &[&str]) -> Arc<MockBackend> {
    Arc::new(MockBackend::new(texts.iter().map(|t| t.to_string()).collect()))
}

/// Records every URL handed to `web_scraper` and reports a failed fetch.
#[derive(Default)]
struct RecordingScraper {
    urls: Mutex<Vec<String>>,
}

#[async_trait]
impl Tool for RecordingScraper {
    fn name(&self) -> &str {
        "web_scraper"
    }

    fn description(&self) -> &str {
        "records requested URLs"
    }

    fn required_params(&self) -> &[&'static str] {
        &["url"]
    }

    async fn invoke(&self, params: &Value) -> llm_agent::Result<Value> {
        let url = params["url"].as_str().unwrap_or_default().to_string();
        self.urls.lock().unwrap().push(url.clone());
        Ok(serde_json::to_value(WebPage::failed(url, "offline"))?)
    }
}

fn tools_with(scraper: Arc<dyn Tool>) -> ToolDispatcher {
    let mut tools = ToolDispatcher::new();
    tools.register_arc(scraper);
    tools.register(DataReader);
    tools.register(DataInspector);
    tools
}

/// Serve one HTTP response on a local port and return the base URL.
async fn serve_once(content_type: &'static str, body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let _ = socket.read(&mut buf).await;
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn text_only_json_array_question_returns_bare_array() {
    let mock = replies(&[r#"{"plan": "add two numbers", "steps": []}"#, "print([4])"]);
    let exec = Arc::new(MockExecutor::succeeding("[4]"));
    let agent = Agent::builder(gateway(mock.clone()))
        .tools(tools_with(Arc::new(RecordingScraper::default())))
        .executor(exec.clone())
        .build();

    let request = AnalysisRequest::new("What is 2+2? Respond as a json array.");
    assert_eq!(request.classify(), DataSourceType::TextOnly);

    let response = agent.process(&request).await;
    assert_eq!(response, json!([4]));
    assert_eq!(mock.call_count(), 2);
    assert_eq!(exec.run_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn persistent_model_failure_backs_off_then_reports() {
    let mock = Arc::new(MockBackend::failing("service unavailable"));
    let gateway = ModelGateway::new(
        mock.clone(),
        settings(BackoffConfig::new(3, Duration::from_secs(1))),
    );

    let started = tokio::time::Instant::now();
    let err = gateway.complete("plan this", None).await.unwrap_err();
    assert_eq!(started.elapsed(), Duration::from_secs(3));
    assert_eq!(mock.call_count(), 3);
    assert!(matches!(err, AgentError::Provider { attempts: 3, .. }));

    let agent = Agent::builder(gateway)
        .executor(Arc::new(MockExecutor::new()))
        .build();
    let response = agent.process(&AnalysisRequest::new("What is 2+2?")).await;
    assert_eq!(response["status"], "error");
    assert_eq!(response["results"], json!([]));
    assert!(response["message"]
        .as_str()
        .unwrap()
        .starts_with("Processing failed: "));
}

#[tokio::test]
async fn syntax_error_repaired_by_one_correction() {
    let mock = replies(&[
        "1. compute the sum",
        "```python\nprint([4]\n```",
        "```python\nprint([4])\n```",
    ]);
    let exec = Arc::new(
        MockExecutor::new()
            .with_syntax(|program| {
                if program.trim_end().ends_with("print([4])") {
                    SyntaxCheck::valid()
                } else {
                    SyntaxCheck::invalid("SyntaxError: '(' was never closed")
                }
            })
            .with_output(|_| ExecutionResult::succeeded("[4]")),
    );
    let agent = Agent::builder(gateway(mock.clone()))
        .tools(tools_with(Arc::new(RecordingScraper::default())))
        .executor(exec.clone())
        .build();

    let response = agent.process(&AnalysisRequest::new("What is 2+2?")).await;
    assert_eq!(response["status"], "success");
    assert_eq!(response["results"], json!([4]));

    // plan, original program, one correction
    assert_eq!(mock.call_count(), 3);
    assert_eq!(exec.syntax_count(), 2);
    assert_eq!(exec.run_count(), 1);

    let correction = &mock.requests()[2];
    assert!(correction.prompt.contains("print([4]"));
    assert!(correction.prompt.contains("was never closed"));
    assert!(!correction.prompt.contains("# Data injection"));
}

#[tokio::test]
async fn exhausted_corrections_yield_execution_failure_envelope() {
    let mock = replies(&[
        "1. divide",
        "print(1/0)",
        "print(2/0)",
        "print(3/0)",
    ]);
    let exec = Arc::new(MockExecutor::failing("ZeroDivisionError: division by zero"));
    let agent = Agent::builder(gateway(mock.clone()))
        .tools(tools_with(Arc::new(RecordingScraper::default())))
        .executor(exec.clone())
        .max_correction_attempts(3)
        .build();

    let response = agent.process(&AnalysisRequest::new("Divide by zero")).await;
    assert_eq!(response["status"], "error");
    assert_eq!(response["error"], "ZeroDivisionError: division by zero");
    assert_eq!(response["metadata"]["execution_success"], false);
    assert_eq!(response["metadata"]["processing_pipeline"], "failed_at_execution");

    assert_eq!(exec.run_count(), 3);
    // plan, original program, two corrections
    assert_eq!(mock.call_count(), 4);
}

#[tokio::test]
async fn unfixable_syntax_error_reported_in_envelope() {
    let mock = replies(&["1. compute", "print([4]", "print([4]]", "print((4]"]);
    let exec = Arc::new(
        MockExecutor::succeeding("never printed")
            .with_syntax(|_| SyntaxCheck::invalid("SyntaxError: closing parenthesis ']' does not match")),
    );
    let agent = Agent::builder(gateway(mock.clone()))
        .tools(tools_with(Arc::new(RecordingScraper::default())))
        .executor(exec.clone())
        .max_correction_attempts(3)
        .build();

    let response = agent.process(&AnalysisRequest::new("What is 2+2?")).await;
    assert_eq!(response["status"], "error");
    assert_eq!(
        response["error"],
        "SyntaxError: closing parenthesis ']' does not match"
    );
    assert_eq!(response["metadata"]["processing_pipeline"], "failed_at_execution");
    assert_eq!(exec.syntax_count(), 3);
    assert_eq!(exec.run_count(), 0);
    // plan, original program, two corrections
    assert_eq!(mock.call_count(), 4);
}

#[tokio::test]
async fn explicit_url_is_used_without_text_extraction() {
    let scraper = Arc::new(RecordingScraper::default());
    let mock = replies(&[
        "1. Fetch https://mirror.example.net/other.csv 2. Average the price column",
        "print(['n/a'])",
    ]);
    let agent = Agent::builder(gateway(mock))
        .tools(tools_with(scraper.clone()))
        .executor(Arc::new(MockExecutor::succeeding("['n/a']")))
        .build();

    let request = AnalysisRequest::new("What is the average price? See https://ignored.example.org")
        .with_url("http://example.com/data.csv");
    assert_eq!(request.classify(), DataSourceType::Url);

    let response = agent.process(&request).await;
    assert_eq!(response["status"], "success");
    assert_eq!(
        *scraper.urls.lock().unwrap(),
        vec!["http://example.com/data.csv".to_string()]
    );
}

#[tokio::test]
async fn fetched_csv_reaches_the_program_and_the_prompt() {
    let base = serve_once("text/csv", "region,sales\nnorth,10\nsouth,32\n").await;
    let mock = replies(&["1. sum sales", "print([42])"]);
    let exec = Arc::new(MockExecutor::succeeding("[42]"));
    let tools = tools_with(Arc::new(WebScraper::new(
        reqwest::Client::new(),
        Duration::from_secs(5),
    )));
    let agent = Agent::builder(gateway(mock.clone()))
        .tools(tools)
        .executor(exec.clone())
        .build();

    let request = AnalysisRequest::new("Total sales?").with_url(format!("{base}/data.csv"));
    let response = agent.process(&request).await;
    assert_eq!(response["results"], json!([42]));

    let generation = &mock.requests()[1];
    assert!(generation.prompt.contains("region"));
    assert!(generation
        .system_prompt
        .as_deref()
        .unwrap()
        .contains("Data type: url"));

    let program = &exec.programs()[0];
    assert!(program.contains("north"));
    assert!(program.ends_with("print([42])"));
}

#[tokio::test]
async fn uploaded_csv_drives_file_pipeline() {
    let mock = replies(&["1. count rows", "print([2])"]);
    let exec = Arc::new(MockExecutor::succeeding("[2]"));
    let agent = Agent::builder(gateway(mock.clone()))
        .tools(tools_with(Arc::new(RecordingScraper::default())))
        .executor(exec.clone())
        .build();

    let request = AnalysisRequest::new("How many rows are there?")
        .with_file("sales.csv", b"region,sales\nnorth,10\nsouth,32\n".to_vec());
    let response = agent.process(&request).await;
    assert_eq!(response["results"], json!([2]));

    let generation = &mock.requests()[1];
    assert!(generation.prompt.contains("sales.csv"));
    assert!(generation.prompt.contains("int64"));
    assert!(generation
        .system_prompt
        .as_deref()
        .unwrap()
        .contains("Data structure: table with 2 rows and 2 columns"));
}

#[test]
fn classification_precedence() {
    let both = AnalysisRequest::new("Look at www.example.com")
        .with_file("a.csv", b"x\n1\n".to_vec())
        .with_url("https://example.com/a.csv");
    assert_eq!(both.classify(), DataSourceType::Url);

    let files = AnalysisRequest::new("Look at www.example.com").with_file("a.csv", b"x\n".to_vec());
    assert_eq!(files.classify(), DataSourceType::File);

    assert_eq!(
        AnalysisRequest::new("Scrape HTTPS://EXAMPLE.COM").classify(),
        DataSourceType::UrlInText
    );
    assert_eq!(
        AnalysisRequest::new("Tell me a joke").with_url("   ").classify(),
        DataSourceType::TextOnly
    );
}
