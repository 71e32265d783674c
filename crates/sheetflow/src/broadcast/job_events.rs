//! Job event broadcaster for worker-side progress streaming.

use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::queue::{JobId, QueueType};

/// Default channel capacity. Slow subscribers skip ahead when it overflows.
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum JobEventKind {
    Started {
        total: usize,
    },
    Progress {
        progress: u8,
        processed: usize,
        failed: usize,
        total: usize,
    },
    Completed {
        processed: usize,
        failed: usize,
        total: usize,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: JobId,
    pub queue_type: QueueType,
    #[serde(flatten)]
    pub kind: JobEventKind,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(job_id: JobId, queue_type: QueueType, kind: JobEventKind) -> Self {
        Self {
            job_id,
            queue_type,
            kind,
            timestamp: Utc::now(),
        }
    }
}

/// Cloneable handle over a broadcast channel of [`JobEvent`]s.
#[derive(Clone)]
pub struct JobEventBroadcaster {
    sender: Arc<broadcast::Sender<JobEvent>>,
}

impl JobEventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends an event to all subscribers.
    pub fn send(&self, event: JobEvent) {
        // No active receivers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for JobEventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Logs every event on a background thread until the broadcaster is dropped.
pub fn spawn_event_logger(broadcaster: &JobEventBroadcaster) -> std::io::Result<JoinHandle<()>> {
    let mut rx = broadcaster.subscribe();
    std::thread::Builder::new()
        .name("job-events".to_string())
        .spawn(move || loop {
            match rx.blocking_recv() {
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("Event logger lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        })
}

fn log_event(event: &JobEvent) {
    let id = event.job_id;
    let queue = event.queue_type;
    match &event.kind {
        JobEventKind::Started { total } => {
            log::info!("{} job {} started with {} records", queue, id, total)
        }
        JobEventKind::Progress { progress, .. } => {
            log::debug!("{} job {} at {}%", queue, id, progress)
        }
        JobEventKind::Completed {
            processed,
            failed,
            total,
        } => log::info!(
            "{} job {} completed: {} processed, {} failed of {}",
            queue,
            id,
            processed,
            failed,
            total
        ),
        JobEventKind::Failed { reason } => {
            log::warn!("{} job {} failed: {}", queue, id, reason)
        }
    }
}
