//! CourseForge CLI entry point.
//!
//! This binary is the composition root for the entire system:
//!
//! 1. **Parse configuration**: defaults, `.courseforge/config.toml` and
//!    `COURSEFORGE_*` environment variables, validated before use.
//! 2. **Wire observability**: `tracing-subscriber` with a pretty or JSON
//!    console layer, plus an OpenTelemetry OTLP exporter when an endpoint is
//!    configured. Spans and events from every workspace crate flow through it.
//! 3. **Construct infrastructure**: the file-backed job store, the HTTP model
//!    client behind a process-wide call limiter, and the tracing notifier,
//!    injected into [`agents::PipelineExecutor`].
//! 4. **Dispatch** the requested subcommand.

mod cli;
mod commands;
mod config;
mod observability;

use std::process::ExitCode;
use std::sync::Arc;

use agents::{PipelineExecutor, TracingNotifier};
use anyhow::Context;
use clap::Parser;
use llm::{ConcurrencyLimitedClient, HttpLlmClient};
use store::FileJobStore;
use tracing::warn;

use crate::cli::Cli;
use crate::config::CliConfig;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("courseforge: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.as_deref())?;
    let _telemetry = observability::init(&config.telemetry, cli.json_logs)?;

    let executor = build_executor(&config).await?;
    commands::dispatch(cli.command, &executor).await
}

async fn build_executor(config: &CliConfig) -> anyhow::Result<PipelineExecutor> {
    let store = FileJobStore::open(&config.store.dir)
        .await
        .with_context(|| format!("failed to open job store at {}", config.store.dir.display()))?;

    if config.llm.api_key.is_empty() {
        warn!("No model API key configured; set ANTHROPIC_API_KEY or COURSEFORGE_LLM__API_KEY");
    }
    let client = HttpLlmClient::new(config.llm.clone())?;
    let client = ConcurrencyLimitedClient::new(client, config.max_outstanding_calls);

    let executor = PipelineExecutor::new(
        config.pipeline.clone(),
        Arc::new(client),
        Arc::new(store),
        Arc::new(TracingNotifier),
    )?;
    Ok(executor)
}
