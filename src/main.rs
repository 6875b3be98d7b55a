//! # Homeo
//!
//! Runs the scheduling engine until SIGTERM/SIGINT.
//!
//! Tasks live in an in-memory store and run on the simulated backend; a
//! deployment swaps both for real [`TaskStore`] and [`TaskExecutor`]
//! implementations.
//!
//! [`TaskStore`]: orchestrator::TaskStore
//! [`TaskExecutor`]: orchestrator::TaskExecutor

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use orchestrator::{
    Engine, EngineConfig, InMemoryTaskStore, SimulatedExecutor, Task, TracingTaskStore,
    wait_for_signal,
};

use crate::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    if cli.print_config {
        let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
        println!("{rendered}");
        return Ok(());
    }

    let store = Arc::new(TracingTaskStore::new(InMemoryTaskStore::new()));
    let engine = Engine::new(config, store, Arc::new(SimulatedExecutor::new()))
        .context("Failed to build engine")?;

    if let Some(path) = &cli.tasks {
        seed_tasks(&engine, path).await?;
    }

    engine.start().await.context("Failed to start engine")?;
    info!("Homeo running, press Ctrl+C to stop");

    if let Err(e) = wait_for_signal().await {
        warn!(error = %e, "Signal handling unavailable, stopping now");
    }

    engine.stop().await.context("Failed to stop engine")?;
    info!("Homeo stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn seed_tasks(engine: &Engine, path: &Path) -> Result<()> {
    let tasks: Vec<Task> = homeo_core::load_json(path)
        .with_context(|| format!("Failed to read tasks from {}", path.display()))?;
    let total = tasks.len();
    for task in tasks {
        engine.add_task(task).await.context("Failed to submit task")?;
    }
    info!(tasks = total, path = %path.display(), "Seeded tasks");
    Ok(())
}
