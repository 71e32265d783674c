//! Type-segmented job queues.
//!
//! A [`JobQueue`] owns the jobs of one file type and is the only shared
//! mutable resource in the pipeline. Every mutation is atomic with respect to
//! readers: a job is never observed in a terminal state without its result.

pub mod job;
pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::{Database, DatabaseError};

pub use job::{
    FieldSummary, Job, JobHandle, JobId, JobPayload, JobResult, JobState, JobTimestamps,
    QueueType, RecordOutcome, StateCounts,
};
pub use memory::MemoryQueue;
pub use sqlite::SqliteQueue;

#[derive(Error, Debug)]
pub enum QueueError {
    /// The backing store cannot be reached. Callers must not drop work on this error.
    #[error("Queue backend unavailable: {0}")]
    Connection(String),

    #[error("Queue storage error: {0}")]
    Database(DatabaseError),

    #[error("Job {queue_type}:{id} not found")]
    NotFound { queue_type: QueueType, id: JobId },

    #[error("Job {queue_type}:{id} cannot move from {from} to {to}")]
    InvalidTransition {
        queue_type: QueueType,
        id: JobId,
        from: JobState,
        to: JobState,
    },

    #[error("Corrupt job record {queue_type}:{id}: {reason}")]
    Corrupt {
        queue_type: QueueType,
        id: JobId,
        reason: String,
    },
}

impl QueueError {
    pub fn is_connection(&self) -> bool {
        matches!(self, QueueError::Connection(_))
    }
}

impl From<DatabaseError> for QueueError {
    fn from(err: DatabaseError) -> Self {
        if err.is_unavailable() {
            QueueError::Connection(err.to_string())
        } else {
            QueueError::Database(err)
        }
    }
}

/// Storage for the jobs of one queue type.
pub trait JobQueue: Send + Sync {
    fn queue_type(&self) -> QueueType;

    /// Stores a new waiting job and returns it with its assigned id.
    fn add(&self, payload: JobPayload) -> Result<Job, QueueError>;

    /// Stores a job held in `delayed` until `until`.
    fn add_delayed(&self, payload: JobPayload, until: DateTime<Utc>) -> Result<Job, QueueError>;

    /// Atomically moves the oldest waiting job to `active` and returns it.
    /// Due delayed jobs are promoted to waiting first. A job is handed to at
    /// most one caller.
    fn claim_next(&self) -> Result<Option<Job>, QueueError>;

    fn get(&self, id: JobId) -> Result<Option<Job>, QueueError>;

    /// Jobs in `state`, in insertion order.
    fn list_by_state(&self, state: JobState) -> Result<Vec<Job>, QueueError>;

    fn counts(&self) -> Result<StateCounts, QueueError>;

    /// Raises the progress of an active job. Lower values are ignored.
    fn update_progress(&self, id: JobId, progress: u8) -> Result<(), QueueError>;

    /// Moves an active job to `completed` together with its result.
    fn complete(&self, id: JobId, result: JobResult) -> Result<Job, QueueError>;

    /// Moves an active job to `failed` together with its result and reason.
    /// A result with records means parsing finished, so progress becomes 100.
    fn fail(&self, id: JobId, reason: &str, result: JobResult) -> Result<Job, QueueError>;

    /// Fails every active job claimed before `started_before` and returns
    /// them. Such jobs lost their worker and would otherwise stay active.
    fn fail_stalled(
        &self,
        started_before: DateTime<Utc>,
        reason: &str,
    ) -> Result<Vec<Job>, QueueError>;
}

/// One queue per file type, iterated in lookup priority order.
#[derive(Clone)]
pub struct QueueSet {
    csv: Arc<dyn JobQueue>,
    excel: Arc<dyn JobQueue>,
}

impl QueueSet {
    pub fn new(csv: Arc<dyn JobQueue>, excel: Arc<dyn JobQueue>) -> Self {
        debug_assert_eq!(csv.queue_type(), QueueType::Csv);
        debug_assert_eq!(excel.queue_type(), QueueType::Excel);
        Self { csv, excel }
    }

    /// Non-durable queues for tests and single-process use.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryQueue::new(QueueType::Csv)),
            Arc::new(MemoryQueue::new(QueueType::Excel)),
        )
    }

    /// Both queues backed by the same database.
    pub fn sqlite(db: Database) -> Self {
        Self::new(
            Arc::new(SqliteQueue::new(db.clone(), QueueType::Csv)),
            Arc::new(SqliteQueue::new(db, QueueType::Excel)),
        )
    }

    /// Opens queues from a connection string.
    ///
    /// `memory://` selects in-process queues; anything else is handed to
    /// [`Database::connect`].
    pub fn connect(url: &str) -> Result<Self, QueueError> {
        if url == "memory://" {
            return Ok(Self::in_memory());
        }
        let db = Database::connect(url)?;
        Ok(Self::sqlite(db))
    }

    pub fn get(&self, queue_type: QueueType) -> &Arc<dyn JobQueue> {
        match queue_type {
            QueueType::Csv => &self.csv,
            QueueType::Excel => &self.excel,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (QueueType, &Arc<dyn JobQueue>)> {
        QueueType::ALL.into_iter().map(move |t| (t, self.get(t)))
    }
}
