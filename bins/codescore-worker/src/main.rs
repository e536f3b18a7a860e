mod engine;
mod evaluator;
mod executor;
mod harness;
mod loader;
mod runner;
mod style;
mod syntax;

#[cfg(test)]
mod engine_tests;
#[cfg(test)]
mod testing;

use anyhow::Context;
use codescore_common::config::Config;
use codescore_common::registry::TestRegistry;
use engine::ExecutionEngine;
use executor::ScoreAggregator;
use style::CommandChecker;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Codescore worker booting...");

    let config = Config::load_default().map_err(|e| {
        error!("Failed to load configuration: {:#}", e);
        e
    })?;

    let registry = match &config.paths.registry_path {
        Some(path) => TestRegistry::load(path)?,
        None => TestRegistry::builtin(),
    };
    info!(prompts = registry.len(), "Test registry loaded");

    let engine = ExecutionEngine::from_config(&config.sandbox, &config.timing)?;
    engine
        .prepare()
        .await
        .with_context(|| format!("Sandbox backend '{}' is not usable", engine.backend_name()))?;

    let checker = CommandChecker::from_config(&config.style)?;
    info!(
        backend = engine.backend_name(),
        checker = checker.program(),
        responses = %config.paths.responses_dir.display(),
        "Worker configured"
    );

    // Setup graceful shutdown
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        warn!("Received shutdown signal, abandoning batch");
    };

    tokio::select! {
        result = run_batch(&config, &engine, &registry, &checker) => result?,
        _ = shutdown => {}
    }

    info!("Worker shutdown complete");
    Ok(())
}

async fn run_batch(
    config: &Config,
    engine: &ExecutionEngine,
    registry: &TestRegistry,
    checker: &CommandChecker,
) -> anyhow::Result<()> {
    let aggregator = ScoreAggregator::new(engine, registry, checker, config.timing.clone());
    aggregator
        .evaluate_batch(&config.paths.responses_dir, &config.paths.report_path)
        .await?;
    Ok(())
}
