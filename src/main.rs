use clap::Parser;
use querychart::config::{AppConfig, GatewayConfig};
use querychart::error::QueryChartResult;
use querychart::gateway::GatewayFactory;
use querychart::llm::{OpenAiClient, TextGenerator};
use querychart::logger::init_logging;
use querychart::pipeline::{Pipeline, PipelineResult, PipelineState};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "querychart")]
#[command(about = "Ask a natural-language question about a dataset and get an answer plus chart data")]
#[command(version)]
struct Cli {
    /// The question to answer
    question: String,

    /// Dataset identifier
    #[arg(short, long)]
    dataset: String,

    /// JSON configuration file (environment variables are used otherwise)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory of <dataset>.sqlite files, overrides the configured backend
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Dataset service URL, overrides the configured backend
    #[arg(long, conflicts_with = "data_dir")]
    endpoint: Option<String>,

    /// Stream every pipeline event as one JSON line
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}

fn load_config(cli: &Cli) -> QueryChartResult<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::from_env()?,
    };

    if let Some(data_dir) = &cli.data_dir {
        config.gateway = GatewayConfig::Sqlite {
            data_dir: data_dir.clone(),
        };
    }
    if let Some(endpoint) = &cli.endpoint {
        config.gateway = GatewayConfig::Http {
            endpoint_url: endpoint.clone(),
        };
    }
    config.validate()?;
    Ok(config)
}

/// Returns whether the run finished without a fatal stage error
async fn run(cli: Cli) -> QueryChartResult<bool> {
    let config = load_config(&cli)?;
    init_logging(&config.log_level);

    let gateway = GatewayFactory::from_config(&config.gateway)?;
    let generator: Arc<dyn TextGenerator> = Arc::new(OpenAiClient::new(&config.llm)?);
    let pipeline = Arc::new(Pipeline::standard(gateway, generator)?);
    let state = PipelineState::new(cli.question.as_str(), cli.dataset.as_str());

    if cli.json {
        let (mut events, handle) = pipeline.spawn_stream(state);
        while let Some(event) = events.recv().await {
            println!("{}", serde_json::to_string(&event)?);
        }
        let result = handle.await?;
        return Ok(result.success);
    }

    let result = pipeline.run(state).await;
    print_result(&result)?;
    Ok(result.success)
}

fn print_result(result: &PipelineResult) -> QueryChartResult<()> {
    let state = &result.final_state;

    if let Some(error) = &result.error {
        eprintln!("Run failed: {}", error);
    }
    if let Some(sql) = state.sql_query() {
        println!("SQL: {}", sql);
    }
    println!("Answer: {}", state.answer().concatenated());
    println!("Visualization: {}", state.visualization());

    let reason = state.visualization_reason().concatenated();
    if !reason.is_empty() {
        println!("Reason: {}", reason);
    }
    if let Some(data) = state.formatted_data() {
        println!("{}", serde_json::to_string_pretty(data)?);
    }
    Ok(())
}
