//! sheetflow worker process: claims and runs jobs from one queue.
//!
//! Run with: cargo run -p sheetflow-server --bin sheetflow-worker -- --queue csv

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use sheetflow::broadcast::spawn_event_logger;
use sheetflow::config::load_from_env;
use sheetflow::queue::{QueueError, QueueSet, QueueType};
use sheetflow::sanitize::redact_queue_url;
use sheetflow::telemetry::init_tracing;
use sheetflow::{JobEventBroadcaster, JobRunner, PipelineConfig, WorkerPool, WorkerSettings};
use tracing::{info, info_span, warn};

const MAX_CONNECT_BACKOFF: Duration = Duration::from_secs(30);
/// Finished jobs buffered for the log loop below.
const FINISHED_BACKLOG: usize = 64;

#[derive(Debug, Parser)]
#[command(name = "sheetflow-worker", version, about = "Processes queued jobs of one file type")]
struct Cli {
    /// Queue to consume: csv or excel.
    #[arg(long)]
    queue: QueueType,

    /// Overrides the configured number of worker threads.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Attempts to open the queue before giving up.
    #[arg(long, default_value_t = 5)]
    connect_attempts: u32,
}

/// Opens the queue, retrying connection failures with doubling backoff.
fn connect_with_retry(url: &str, attempts: u32) -> Result<QueueSet, QueueError> {
    let mut backoff = Duration::from_millis(500);
    let mut attempt = 1;
    loop {
        match QueueSet::connect(url) {
            Ok(queues) => return Ok(queues),
            Err(e) if e.is_connection() && attempt < attempts => {
                warn!(
                    "Queue unavailable (attempt {}/{}), retrying in {:?}: {}",
                    attempt, attempts, backoff, e
                );
                thread::sleep(backoff);
                backoff = (backoff * 2).min(MAX_CONNECT_BACKOFF);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// [`connect_with_retry`] with an error that names the queue without its directory.
fn open_queues(url: &str, attempts: u32) -> anyhow::Result<QueueSet> {
    connect_with_retry(url, attempts.max(1))
        .with_context(|| format!("Failed to open queue at {}", redact_queue_url(url)))
}

fn main() -> anyhow::Result<()> {
    init_tracing("info")?;
    let cli = Cli::parse();
    let _span = info_span!("worker", queue = %cli.queue).entered();

    let config = load_from_env().context("Failed to load configuration")?;
    let queues = open_queues(&config.queue_url, cli.connect_attempts)?;

    let runner = Arc::new(JobRunner::from_config(Arc::new(PipelineConfig::from_config(
        &config, cli.queue,
    ))));
    let mut settings = WorkerSettings::from_config(config.workers.get(cli.queue));
    if let Some(concurrency) = cli.concurrency {
        settings.concurrency = concurrency.max(1);
    }

    let events = JobEventBroadcaster::default();
    let _logger = spawn_event_logger(&events)?;

    let pool = WorkerPool::start_with_finished(
        Arc::clone(queues.get(cli.queue)),
        runner,
        settings,
        Some(events),
        FINISHED_BACKLOG,
    )?;

    let shutdown = pool.shutdown_flag();
    ctrlc::set_handler(move || {
        info!("Shutdown requested, finishing current jobs...");
        shutdown.store(true, Ordering::Relaxed);
    })
    .context("Failed to install signal handler")?;

    while !pool.is_shutdown() {
        if let Some(job) = pool.recv_finished_timeout(Duration::from_secs(1)) {
            info!(
                job_id = job.id,
                state = %job.state,
                "Job finished"
            );
        }
    }
    pool.wait();

    Ok(())
}
