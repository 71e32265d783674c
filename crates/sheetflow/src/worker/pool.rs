use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{debug, error, info, warn};

use crate::broadcast::JobEventBroadcaster;
use crate::config::schema::QueueWorkerConfig;
use crate::pipeline::JobRunner;
use crate::queue::{Job, JobQueue};

use super::backoff::{doubling, pause, MAX_ERROR_BACKOFF};
use super::executor::{FinalizePolicy, JobExecutor};

/// Longest gap between stall sweeps.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub finalize: FinalizePolicy,
    /// Active jobs claimed longer ago than this are failed as stalled.
    pub stall_timeout: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &QueueWorkerConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            finalize: FinalizePolicy::default(),
            stall_timeout: Duration::from_secs(config.stall_timeout_secs),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from_config(&QueueWorkerConfig::default())
    }
}

/// A fixed set of threads each claiming jobs from one queue.
///
/// Worker 0 also sweeps the queue for stalled jobs, once at start and then
/// periodically.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    finished: Option<Receiver<Job>>,
}

impl WorkerPool {
    /// Starts `settings.concurrency` workers (at least one). Finished jobs
    /// are only written to the queue.
    pub fn start(
        queue: Arc<dyn JobQueue>,
        runner: Arc<JobRunner>,
        settings: WorkerSettings,
        events: Option<JobEventBroadcaster>,
    ) -> std::io::Result<Self> {
        Self::spawn(queue, runner, settings, events, None)
    }

    /// Like [`start`](Self::start), and also hands finished jobs to
    /// [`recv_finished_timeout`](Self::recv_finished_timeout). At most
    /// `backlog` undrained jobs are held; later ones are not buffered.
    pub fn start_with_finished(
        queue: Arc<dyn JobQueue>,
        runner: Arc<JobRunner>,
        settings: WorkerSettings,
        events: Option<JobEventBroadcaster>,
        backlog: usize,
    ) -> std::io::Result<Self> {
        let (tx, rx) = bounded::<Job>(backlog.max(1));
        let mut pool = Self::spawn(queue, runner, settings, events, Some(tx))?;
        pool.finished = Some(rx);
        Ok(pool)
    }

    fn spawn(
        queue: Arc<dyn JobQueue>,
        runner: Arc<JobRunner>,
        settings: WorkerSettings,
        events: Option<JobEventBroadcaster>,
        finished: Option<Sender<Job>>,
    ) -> std::io::Result<Self> {
        let worker_count = settings.concurrency.max(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let queue_type = queue.queue_type();

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let mut executor = JobExecutor::new(Arc::clone(&queue), Arc::clone(&runner))
                .with_finalize_policy(settings.finalize)
                .with_shutdown(Arc::clone(&shutdown));
            if let Some(events) = &events {
                executor = executor.with_events(events.clone());
            }
            let worker = Worker {
                id: worker_id,
                executor,
                finished: finished.clone(),
                shutdown: Arc::clone(&shutdown),
                poll_interval: settings.poll_interval,
                stall_timeout: (worker_id == 0).then_some(settings.stall_timeout),
            };

            let handle = thread::Builder::new()
                .name(format!("{}-worker-{}", queue_type, worker_id))
                .spawn(move || worker.run())?;
            workers.push(handle);
        }

        info!("Started {} {} workers", worker_count, queue_type);

        Ok(Self {
            workers,
            shutdown,
            finished: None,
        })
    }

    /// Jobs that reached a terminal state, in the order they finished.
    /// Always `None` for pools started without a finished-job backlog.
    pub fn try_recv_finished(&self) -> Option<Job> {
        self.finished.as_ref()?.try_recv().ok()
    }

    pub fn recv_finished_timeout(&self, timeout: Duration) -> Option<Job> {
        let Some(finished) = &self.finished else {
            thread::sleep(timeout);
            return None;
        };
        match finished.recv_timeout(timeout) {
            Ok(job) => Some(job),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Finished jobs waiting to be received.
    pub fn finished_backlog(&self) -> usize {
        self.finished.as_ref().map_or(0, Receiver::len)
    }

    /// Signals workers to stop after their current job.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// A handle that can request shutdown from another thread.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn wait(self) {
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }
}

struct Worker {
    id: usize,
    executor: JobExecutor,
    finished: Option<Sender<Job>>,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
    /// Set on the one worker that sweeps for stalled jobs.
    stall_timeout: Option<Duration>,
}

impl Worker {
    fn run(self) {
        debug!("Worker {} started", self.id);
        let mut consecutive_errors: u32 = 0;
        let mut next_sweep = Instant::now();

        while !self.shutdown.load(Ordering::Relaxed) {
            if let Some(timeout) = self.stall_timeout {
                if Instant::now() >= next_sweep {
                    self.sweep(timeout);
                    next_sweep = Instant::now() + timeout.min(MAX_SWEEP_INTERVAL);
                }
            }

            match self.executor.process_next() {
                Ok(Some(job)) => {
                    consecutive_errors = 0;
                    self.hand_off(job);
                }
                Ok(None) => {
                    consecutive_errors = 0;
                    pause(&self.shutdown, self.poll_interval);
                }
                Err(e) => {
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    let backoff = error_backoff(self.poll_interval, consecutive_errors);
                    error!(
                        "Worker {} queue error ({} in a row), retrying in {:?}: {}",
                        self.id, consecutive_errors, backoff, e
                    );
                    pause(&self.shutdown, backoff);
                }
            }
        }

        debug!("Worker {} stopped", self.id);
    }

    fn sweep(&self, timeout: Duration) {
        match self.executor.recover_stalled(timeout) {
            Ok(stalled) if !stalled.is_empty() => {
                warn!("Worker {} failed {} stalled job(s)", self.id, stalled.len())
            }
            Ok(_) => {}
            Err(e) => warn!("Worker {} could not sweep for stalled jobs: {}", self.id, e),
        }
    }

    fn hand_off(&self, job: Job) {
        let Some(finished) = &self.finished else {
            return;
        };
        match finished.try_send(job) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(job)) => debug!(
                "Finished-job backlog full; {} job {} not buffered",
                job.queue_type, job.id
            ),
        }
    }
}

/// Doubles from the poll interval per consecutive error, capped.
fn error_backoff(poll_interval: Duration, consecutive_errors: u32) -> Duration {
    let base = poll_interval.max(Duration::from_millis(100));
    doubling(base, consecutive_errors, MAX_ERROR_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineConfig;
    use crate::queue::{JobPayload, JobState, MemoryQueue, QueueType};

    fn settings(concurrency: usize) -> WorkerSettings {
        WorkerSettings {
            concurrency,
            poll_interval: Duration::from_millis(10),
            ..WorkerSettings::default()
        }
    }

    fn runner() -> Arc<JobRunner> {
        Arc::new(JobRunner::from_config(Arc::new(PipelineConfig::defaults_for(
            QueueType::Csv,
        ))))
    }

    fn queue_with_jobs(dir: &std::path::Path, n: usize) -> Arc<MemoryQueue> {
        let queue = Arc::new(MemoryQueue::new(QueueType::Csv));
        for i in 0..n {
            let path = dir.join(format!("{i}.csv"));
            std::fs::write(&path, format!("ProductID,Price\nP{i},{i}\nQ{i},x\n")).unwrap();
            queue.add(JobPayload::new(path, format!("{i}.csv"))).unwrap();
        }
        queue
    }

    fn wait_for_completed(queue: &MemoryQueue, n: u64) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while queue.counts().unwrap().completed < n && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_worker_pool_creation() {
        let queue = Arc::new(MemoryQueue::new(QueueType::Csv));
        let pool = WorkerPool::start(queue, runner(), settings(2), None).unwrap();

        assert!(!pool.is_shutdown());
        pool.shutdown();
        assert!(pool.is_shutdown());
        pool.wait();
    }

    #[test]
    fn test_pool_processes_every_job_once() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with_jobs(dir.path(), 6);

        let pool =
            WorkerPool::start_with_finished(queue.clone(), runner(), settings(3), None, 16).unwrap();
        let mut finished = Vec::new();
        while finished.len() < 6 {
            match pool.recv_finished_timeout(Duration::from_secs(10)) {
                Some(job) => finished.push(job),
                None => break,
            }
        }
        pool.shutdown();
        pool.wait();

        assert_eq!(finished.len(), 6);
        let mut ids: Vec<u64> = finished.iter().map(|j| j.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
        assert!(finished.iter().all(|j| j.state == JobState::Completed));
        assert_eq!(queue.counts().unwrap().completed, 6);
    }

    #[test]
    fn test_undrained_pool_holds_no_finished_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with_jobs(dir.path(), 20);

        let pool = WorkerPool::start(queue.clone(), runner(), settings(2), None).unwrap();
        wait_for_completed(&queue, 20);

        assert_eq!(queue.counts().unwrap().completed, 20);
        assert_eq!(pool.finished_backlog(), 0);
        assert!(pool.try_recv_finished().is_none());
        pool.shutdown();
        pool.wait();
    }

    #[test]
    fn test_finished_backlog_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with_jobs(dir.path(), 10);

        let pool =
            WorkerPool::start_with_finished(queue.clone(), runner(), settings(2), None, 3).unwrap();
        wait_for_completed(&queue, 10);

        assert_eq!(queue.counts().unwrap().completed, 10);
        assert_eq!(pool.finished_backlog(), 3);
        pool.shutdown();
        pool.wait();
    }

    #[test]
    fn test_pool_fails_job_abandoned_by_another_worker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orphan.csv");
        std::fs::write(&path, "ProductID\nP1\n").unwrap();
        let queue = Arc::new(MemoryQueue::new(QueueType::Csv));
        queue.add(JobPayload::new(path.clone(), "orphan.csv")).unwrap();
        queue.claim_next().unwrap();

        let settings = WorkerSettings {
            stall_timeout: Duration::from_millis(50),
            ..settings(1)
        };
        let pool = WorkerPool::start(queue.clone(), runner(), settings, None).unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        while queue.counts().unwrap().failed == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        pool.shutdown();
        pool.wait();

        let job = queue.get(1).unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert!(job.failed_reason.unwrap().contains("stalled"));
        assert!(!path.exists());
    }

    #[test]
    fn test_error_backoff_is_capped() {
        let poll = Duration::from_millis(500);
        assert_eq!(error_backoff(poll, 1), Duration::from_millis(500));
        assert_eq!(error_backoff(poll, 2), Duration::from_secs(1));
        assert_eq!(error_backoff(poll, 50), MAX_ERROR_BACKOFF);
        assert_eq!(error_backoff(Duration::from_millis(1), 1), Duration::from_millis(100));
    }
}
