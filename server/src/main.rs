//! sheetflow HTTP API
//!
//! Run with: cargo run -p sheetflow-server --bin sheetflow-api

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sheetflow::broadcast::spawn_event_logger;
use sheetflow::config::load_from_env;
use sheetflow::queue::QueueType;
use sheetflow::sanitize::redact_queue_url;
use sheetflow::telemetry::init_tracing;
use sheetflow::{JobEventBroadcaster, JobRunner, PipelineConfig, WorkerPool, WorkerSettings};
use sheetflow_server::{build_router, AppState};
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "sheetflow-api", version, about = "Accepts uploads and serves job state")]
struct Cli {
    /// Also run csv and excel workers inside this process.
    #[arg(long)]
    with_workers: bool,
}

fn is_in_process_queue(url: &str) -> bool {
    matches!(url.trim(), "memory://" | "sqlite::memory:" | ":memory:")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("info,tower_http=info")?;
    let cli = Cli::parse();

    let config = load_from_env().context("Failed to load configuration")?;
    let queue_name = redact_queue_url(&config.queue_url);
    let state = AppState::from_config(&config)
        .with_context(|| format!("Failed to open queue at {}", queue_name))?;
    info!("Using queue {}", queue_name);

    if is_in_process_queue(&config.queue_url) && !cli.with_workers {
        warn!("Queue is in-process only; separate worker processes cannot see it. Pass --with-workers.");
    }

    let mut pools = Vec::new();
    let events = JobEventBroadcaster::default();
    if cli.with_workers {
        let _logger = spawn_event_logger(&events)?;
        for queue_type in QueueType::ALL {
            let runner = Arc::new(JobRunner::from_config(Arc::new(
                PipelineConfig::from_config(&config, queue_type),
            )));
            let pool = WorkerPool::start(
                Arc::clone(state.dispatcher().queues().get(queue_type)),
                runner,
                WorkerSettings::from_config(config.workers.get(queue_type)),
                Some(events.clone()),
            )?;
            pools.push(pool);
        }
    }

    let addr = format!("{}:{}", config.api.host, config.api.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("sheetflow API listening on http://{}", addr);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    for pool in &pools {
        pool.shutdown();
    }
    for pool in pools {
        tokio::task::spawn_blocking(move || pool.wait()).await?;
    }

    info!("sheetflow API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}
