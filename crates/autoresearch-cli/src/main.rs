use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use autoresearch_core::providers::{OpenRouterModel, TavilySearch};
use autoresearch_core::{
    AgentRole, Config, ConfigLoader, EventCollector, LanguageModel, ModelRequest, ResearchGraph,
    SearchProvider, SessionOptions, SessionOutcome, TelemetryOptions, init_metrics_from_env,
    init_telemetry, persist_trace,
};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tokio::runtime::Runtime;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "autoresearch",
    version,
    about = "Planner, researcher, writer and critic agents with a bounded revision loop"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a research session and print the final report.
    Run(RunArgs),
    /// Check that the configured model and search provider respond.
    Check(CheckArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Topic or question to research.
    #[arg(long)]
    query: String,

    /// Path to an `autoresearch.toml` configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override `session.max_revisions`.
    #[arg(long)]
    max_revisions: Option<u32>,

    /// Override `session.pass_threshold` (0-100).
    #[arg(long)]
    pass_threshold: Option<u8>,

    /// Write the session trace as JSON into this directory.
    #[arg(long)]
    trace_dir: Option<PathBuf>,

    /// Print the whole outcome as JSON instead of the Markdown report.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug)]
struct CheckArgs {
    /// Path to an `autoresearch.toml` configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let rt = Runtime::new()?;
    rt.block_on(async move {
        match cli.command {
            Command::Run(args) => run_command(args).await,
            Command::Check(args) => check_command(args).await,
        }
    })
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let config = ConfigLoader::load(path).context("failed to load configuration")?;
    init_telemetry(TelemetryOptions {
        default_level: Some(config.logging.level.clone()),
        ..TelemetryOptions::default()
    })?;
    init_metrics_from_env("autoresearch");
    Ok(config)
}

fn build_providers(config: &Config) -> Result<(Arc<dyn LanguageModel>, Arc<dyn SearchProvider>)> {
    let call_timeout = config.session.call_timeout();
    let model = OpenRouterModel::new(&config.llm, config.llm_api_key()?, call_timeout)
        .context("failed to build model client")?;
    let search = TavilySearch::new(&config.search, config.search_api_key()?, call_timeout)
        .context("failed to build search client")?;
    Ok((Arc::new(model), Arc::new(search)))
}

async fn run_command(args: RunArgs) -> Result<ExitCode> {
    let mut config = load_config(args.config)?;
    if let Some(threshold) = args.pass_threshold {
        config.session.pass_threshold = threshold;
    }
    if let Some(max_revisions) = args.max_revisions {
        config.session.max_revisions = max_revisions;
    }
    ConfigLoader::validate(&config).context("invalid command-line overrides")?;

    let (model, search) = build_providers(&config)?;
    info!(query = %args.query, model = model.name(), search = search.name(), "starting research session");

    let (collector, mut receiver) = EventCollector::new();
    let printer = tokio::spawn(async move {
        while let Some(envelope) = receiver.recv().await {
            eprintln!("» {}", envelope.event.describe());
        }
    });

    let outcome = {
        let graph = ResearchGraph::new(model, search, config.session.clone()).with_events(collector);
        graph
            .run_session_with_options(SessionOptions::new(&args.query))
            .await
    };
    // The graph owned the last sender, so the printer drains and exits.
    if let Err(err) = printer.await {
        warn!(error = %err, "progress printer stopped unexpectedly");
    }

    if let Some(dir) = &args.trace_dir {
        let path = persist_trace(dir, outcome.session_id(), outcome.trace())?;
        info!(path = %path.display(), "session trace written");
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }

    match &outcome {
        SessionOutcome::Completed(report) => {
            if !args.json {
                println!("{}", report.render_markdown());
                println!("{}", report.trace_summary().render_markdown());
            }
            Ok(ExitCode::SUCCESS)
        }
        SessionOutcome::Failed(report) => {
            eprintln!(
                "research failed during {}: {}",
                report.failed_in.as_str(),
                report.reason
            );
            if !args.json {
                eprintln!("{}", report.trace_summary().render_markdown());
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn check_command(args: CheckArgs) -> Result<ExitCode> {
    let config = load_config(args.config)?;
    let (model, search) = build_providers(&config)?;
    let timeout = config.session.call_timeout();

    let ping = ModelRequest::new(
        AgentRole::Planner,
        "Connectivity check. Reply with the requested JSON and nothing else.",
        json!({ "ping": true }),
        json!({ "ok": "boolean" }),
    );
    let model_ok = match tokio::time::timeout(timeout, model.complete(&ping)).await {
        Ok(Ok(_)) => {
            println!("model  {:<28} ok", model.name());
            true
        }
        Ok(Err(err)) => {
            println!("model  {:<28} FAILED: {err}", model.name());
            false
        }
        Err(_) => {
            println!("model  {:<28} FAILED: no response within {timeout:?}", model.name());
            false
        }
    };

    let search_ok = match tokio::time::timeout(timeout, search.search("connectivity check", 1)).await {
        Ok(Ok(hits)) => {
            println!("search {:<28} ok ({} hits)", search.name(), hits.len());
            true
        }
        Ok(Err(err)) => {
            println!("search {:<28} FAILED: {err}", search.name());
            false
        }
        Err(_) => {
            println!("search {:<28} FAILED: no response within {timeout:?}", search.name());
            false
        }
    };

    Ok(if model_ok && search_ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
