//! Command-line front end.
//!
//! Usage:
//!   llm-agent --questions questions.txt
//!   llm-agent --questions questions.txt --file sales.csv --file regions.xlsx
//!   llm-agent --questions questions.txt --url https://example.com/data.csv --pretty
//!   llm-agent --check-model

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use llm_agent::{Agent, AgentConfig, AnalysisRequest};

#[derive(Parser, Debug)]
#[command(name = "llm-agent")]
#[command(about = "Answer analysis questions by generating, running and repairing code")]
struct Args {
    /// File containing the natural-language questions
    #[arg(short, long, required_unless_present = "check_model")]
    questions: Option<PathBuf>,

    /// Data file to analyze (repeatable)
    #[arg(short, long = "file")]
    files: Vec<PathBuf>,

    /// Data URL to fetch instead of uploading files
    #[arg(short, long)]
    url: Option<String>,

    /// Pretty-print the response
    #[arg(long)]
    pretty: bool,

    /// Print the model settings and a live API key check, then exit
    #[arg(long)]
    check_model: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("llm_agent=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = AgentConfig::from_env().context("loading configuration")?;
    let agent = Agent::from_config(&config);

    let response = match &args.questions {
        Some(path) if !args.check_model => {
            let request = build_request(path, &args)?;
            tracing::info!(model = %config.llm_model, files = request.data_files.len(), "agent ready");
            agent.process(&request).await
        }
        _ => serde_json::to_value(agent.gateway().checked_model_info().await)?,
    };

    let rendered = if args.pretty {
        serde_json::to_string_pretty(&response)?
    } else {
        serde_json::to_string(&response)?
    };
    println!("{rendered}");
    Ok(())
}

fn build_request(path: &Path, args: &Args) -> Result<AnalysisRequest> {
    let questions = std::fs::read_to_string(path)
        .with_context(|| format!("reading questions from {}", path.display()))?;

    let mut request = AnalysisRequest::new(questions.trim());
    for path in &args.files {
        let content =
            std::fs::read(path).with_context(|| format!("reading data file {}", path.display()))?;
        request = request.with_file(display_name(path), content);
    }
    if let Some(url) = &args.url {
        request = request.with_url(url.clone());
    }
    Ok(request)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
