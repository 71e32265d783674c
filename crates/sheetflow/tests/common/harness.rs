//! Test harness wiring queues, dispatcher and query service over a temp dir.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sheetflow::pipeline::PipelineConfig;
use sheetflow::queue::{Job, JobHandle, QueueSet, QueueType};
use sheetflow::{
    Dispatcher, JobEventBroadcaster, JobExecutor, JobRunner, QueryService, UploadStore,
    WorkerPool, WorkerSettings,
};
use tempfile::TempDir;

/// Upload size limit used by the harness dispatcher.
pub const MAX_UPLOAD_BYTES: usize = 1024 * 1024;

pub struct TestHarness {
    /// Keeps the temp directory alive for the harness lifetime.
    pub temp_dir: TempDir,
    pub upload_dir: PathBuf,
    pub queues: QueueSet,
    pub dispatcher: Dispatcher,
    pub query: QueryService,
}

impl TestHarness {
    /// Harness over in-process queues.
    pub fn new() -> Self {
        Self::with_queues(|_| QueueSet::in_memory())
    }

    /// Harness over a SQLite queue file inside the temp directory.
    pub fn with_sqlite() -> Self {
        Self::with_queues(|dir| {
            let url = format!("sqlite://{}", dir.join("queue.db").display());
            QueueSet::connect(&url).expect("Failed to open queue database")
        })
    }

    fn with_queues(build: impl FnOnce(&Path) -> QueueSet) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let upload_dir = temp_dir.path().join("uploads");
        let queues = build(temp_dir.path());
        let dispatcher = Dispatcher::new(
            queues.clone(),
            UploadStore::new(&upload_dir),
            MAX_UPLOAD_BYTES,
        );
        let query = QueryService::new(queues.clone());

        Self {
            temp_dir,
            upload_dir,
            queues,
            dispatcher,
            query,
        }
    }

    /// URL other handles can use to open the same SQLite queue.
    pub fn sqlite_url(&self) -> String {
        format!(
            "sqlite://{}",
            self.temp_dir.path().join("queue.db").display()
        )
    }

    pub fn submit(&self, content: impl AsRef<[u8]>, name: &str) -> JobHandle {
        self.dispatcher
            .submit(content.as_ref(), name)
            .expect("Failed to submit upload")
    }

    pub fn runner(&self, queue_type: QueueType) -> Arc<JobRunner> {
        Arc::new(JobRunner::from_config(Arc::new(PipelineConfig::defaults_for(
            queue_type,
        ))))
    }

    pub fn executor(&self, queue_type: QueueType) -> JobExecutor {
        JobExecutor::new(Arc::clone(self.queues.get(queue_type)), self.runner(queue_type))
    }

    /// Runs jobs on the calling thread until the queue has nothing ready.
    pub fn drain(&self, queue_type: QueueType) -> Vec<Job> {
        let executor = self.executor(queue_type);
        let mut finished = Vec::new();
        while let Some(job) = executor.process_next().expect("Queue error while draining") {
            finished.push(job);
        }
        finished
    }

    /// Starts a worker pool over one queue with a short poll interval. The
    /// pool reports up to 64 finished jobs.
    pub fn start_pool(
        &self,
        queue_type: QueueType,
        concurrency: usize,
        events: Option<JobEventBroadcaster>,
    ) -> WorkerPool {
        let settings = WorkerSettings {
            concurrency,
            poll_interval: Duration::from_millis(10),
            ..WorkerSettings::default()
        };
        WorkerPool::start_with_finished(
            Arc::clone(self.queues.get(queue_type)),
            self.runner(queue_type),
            settings,
            events,
            64,
        )
        .expect("Failed to start worker pool")
    }

    /// Files still present in the upload directory.
    pub fn stored_uploads(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(&self.upload_dir) {
            Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
