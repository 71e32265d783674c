//! Claims one job and drives it through the pipeline to a terminal state.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{error, info, warn};

use crate::broadcast::{JobEvent, JobEventBroadcaster, JobEventKind};
use crate::pipeline::{JobOutcome, JobRunner, PipelineError, ProgressEvent, ProgressReporter};
use crate::queue::{Job, JobHandle, JobQueue, JobResult, QueueError};

use super::backoff::{doubling, pause, MAX_ERROR_BACKOFF};

/// Backoff for the terminal write while the queue backend is unreachable.
/// The write is retried until it lands or the executor is shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalizePolicy {
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for FinalizePolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_millis(200),
            max_backoff: MAX_ERROR_BACKOFF,
        }
    }
}

pub struct JobExecutor {
    queue: Arc<dyn JobQueue>,
    runner: Arc<JobRunner>,
    events: Option<JobEventBroadcaster>,
    finalize: FinalizePolicy,
    shutdown: Arc<AtomicBool>,
}

impl JobExecutor {
    pub fn new(queue: Arc<dyn JobQueue>, runner: Arc<JobRunner>) -> Self {
        Self {
            queue,
            runner,
            events: None,
            finalize: FinalizePolicy::default(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_events(mut self, events: JobEventBroadcaster) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_finalize_policy(mut self, policy: FinalizePolicy) -> Self {
        self.finalize = policy;
        self
    }

    /// Flag that ends finalize retries. Usually the owning pool's.
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Claims the next waiting job and runs it to completion.
    ///
    /// Returns `Ok(None)` when the queue has nothing waiting, otherwise the
    /// job as stored in its terminal state.
    pub fn process_next(&self) -> Result<Option<Job>, QueueError> {
        let Some(job) = self.queue.claim_next()? else {
            return Ok(None);
        };
        info!(
            "Claimed {} job {} ({})",
            job.queue_type, job.id, job.payload.original_name
        );

        let reporter = QueueProgress::new(self.queue.as_ref(), job.handle(), self.events.as_ref());
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.runner.run(&job, &reporter)))
            .unwrap_or_else(|payload| {
                let error = PipelineError::Panicked(panic_message(payload.as_ref()));
                error!("{} job {}: {}", job.queue_type, job.id, error);
                self.runner.discard_source(&job.payload.file_path);
                reporter.report(ProgressEvent::Failed {
                    error: error.to_string(),
                });
                JobOutcome::failed(&error, JobResult::aborted(error.to_string()))
            });

        self.finalize(&job, outcome).map(Some)
    }

    /// Fails active jobs claimed more than `timeout` ago and discards their
    /// uploads. Returns the jobs it failed.
    pub fn recover_stalled(&self, timeout: Duration) -> Result<Vec<Job>, QueueError> {
        let cutoff = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));
        let Some(cutoff) = cutoff else {
            return Ok(Vec::new());
        };

        let reason = format!(
            "Job stalled: not finished within {}s of being claimed",
            timeout.as_secs()
        );
        let stalled = self.queue.fail_stalled(cutoff, &reason)?;
        for job in &stalled {
            warn!(
                "Failed stalled {} job {} ({})",
                job.queue_type, job.id, job.payload.original_name
            );
            self.runner.discard_source(&job.payload.file_path);
            if let Some(events) = &self.events {
                events.send(JobEvent::new(
                    job.id,
                    job.queue_type,
                    JobEventKind::Failed {
                        reason: reason.clone(),
                    },
                ));
            }
        }
        Ok(stalled)
    }

    /// Writes the terminal state. Connection errors are retried with
    /// doubling backoff until the write lands or shutdown is requested.
    fn finalize(&self, job: &Job, outcome: JobOutcome) -> Result<Job, QueueError> {
        let mut attempt: u32 = 1;
        loop {
            let written = match &outcome {
                JobOutcome::Completed(result) => self.queue.complete(job.id, result.clone()),
                JobOutcome::Failed { reason, result } => {
                    self.queue.fail(job.id, reason, result.clone())
                }
            };

            match written {
                Ok(stored) => {
                    if attempt > 1 {
                        info!(
                            "Finalized {} job {} after {} attempts",
                            job.queue_type, job.id, attempt
                        );
                    }
                    return Ok(stored);
                }
                Err(e) if e.is_connection() && !self.shutdown.load(Ordering::Relaxed) => {
                    let delay = doubling(self.finalize.backoff, attempt, self.finalize.max_backoff);
                    warn!(
                        "Finalizing {} job {} failed (attempt {}), retrying in {:?}: {}",
                        job.queue_type, job.id, attempt, delay, e
                    );
                    pause(&self.shutdown, delay);
                    attempt = attempt.saturating_add(1);
                }
                Err(e) if e.is_connection() => {
                    error!(
                        "Shutting down with {} job {} unfinalized; stall recovery will fail it: {}",
                        job.queue_type, job.id, e
                    );
                    return Err(e);
                }
                Err(e) => {
                    error!(
                        "Finalizing {} job {} failed: {}",
                        job.queue_type, job.id, e
                    );
                    return Err(e);
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Persists progress to the queue and republishes pipeline events.
///
/// A value of 100 is not persisted here; the terminal write sets it together
/// with the state so readers never see 100 on an active job.
struct QueueProgress<'a> {
    queue: &'a dyn JobQueue,
    job: JobHandle,
    events: Option<&'a JobEventBroadcaster>,
    persisted: AtomicU8,
}

impl<'a> QueueProgress<'a> {
    fn new(queue: &'a dyn JobQueue, job: JobHandle, events: Option<&'a JobEventBroadcaster>) -> Self {
        Self {
            queue,
            job,
            events,
            persisted: AtomicU8::new(0),
        }
    }

    fn publish(&self, kind: JobEventKind) {
        if let Some(events) = self.events {
            events.send(JobEvent::new(self.job.id, self.job.queue_type, kind));
        }
    }

    fn persist(&self, progress: u8) {
        if progress >= 100 || progress <= self.persisted.load(Ordering::Relaxed) {
            return;
        }
        match self.queue.update_progress(self.job.id, progress) {
            Ok(()) => {
                self.persisted.fetch_max(progress, Ordering::Relaxed);
            }
            Err(e) => warn!(
                "Failed to record progress for {} job {}: {}",
                self.job.queue_type, self.job.id, e
            ),
        }
    }
}

impl ProgressReporter for QueueProgress<'_> {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { total } => self.publish(JobEventKind::Started { total }),
            ProgressEvent::Record {
                processed,
                failed,
                total,
                progress,
                ..
            } => {
                self.persist(progress);
                self.publish(JobEventKind::Progress {
                    progress,
                    processed,
                    failed,
                    total,
                });
            }
            ProgressEvent::Completed {
                processed,
                failed,
                total,
            } => self.publish(JobEventKind::Completed {
                processed,
                failed,
                total,
            }),
            ProgressEvent::Failed { error } => {
                self.publish(JobEventKind::Failed { reason: error })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::atomic::AtomicU32;
    use std::thread;

    use chrono::DateTime;

    use super::*;
    use crate::error::RecordProcessingError;
    use crate::parser::{parser_for, Record};
    use crate::pipeline::PipelineConfig;
    use crate::processor::RecordProcessor;
    use crate::queue::{JobId, JobPayload, JobState, MemoryQueue, QueueType, StateCounts};

    /// Memory queue whose terminal writes fail with a connection error
    /// until `outages` runs out.
    struct FlakyFinalize {
        inner: MemoryQueue,
        outages: AtomicU32,
        terminal_writes: AtomicU32,
    }

    impl FlakyFinalize {
        fn new(outages: u32) -> Self {
            Self {
                inner: MemoryQueue::new(QueueType::Csv),
                outages: AtomicU32::new(outages),
                terminal_writes: AtomicU32::new(0),
            }
        }

        fn outage(&self) -> Result<(), QueueError> {
            self.terminal_writes.fetch_add(1, Ordering::SeqCst);
            let remaining = self.outages.load(Ordering::SeqCst);
            if remaining == 0 {
                return Ok(());
            }
            if remaining != u32::MAX {
                self.outages.store(remaining - 1, Ordering::SeqCst);
            }
            Err(QueueError::Connection("connection reset".into()))
        }
    }

    impl JobQueue for FlakyFinalize {
        fn queue_type(&self) -> QueueType {
            self.inner.queue_type()
        }
        fn add(&self, payload: JobPayload) -> Result<Job, QueueError> {
            self.inner.add(payload)
        }
        fn add_delayed(&self, payload: JobPayload, until: DateTime<Utc>) -> Result<Job, QueueError> {
            self.inner.add_delayed(payload, until)
        }
        fn claim_next(&self) -> Result<Option<Job>, QueueError> {
            self.inner.claim_next()
        }
        fn get(&self, id: JobId) -> Result<Option<Job>, QueueError> {
            self.inner.get(id)
        }
        fn list_by_state(&self, state: JobState) -> Result<Vec<Job>, QueueError> {
            self.inner.list_by_state(state)
        }
        fn counts(&self) -> Result<StateCounts, QueueError> {
            self.inner.counts()
        }
        fn update_progress(&self, id: JobId, progress: u8) -> Result<(), QueueError> {
            self.inner.update_progress(id, progress)
        }
        fn complete(&self, id: JobId, result: JobResult) -> Result<Job, QueueError> {
            self.outage()?;
            self.inner.complete(id, result)
        }
        fn fail(&self, id: JobId, reason: &str, result: JobResult) -> Result<Job, QueueError> {
            self.outage()?;
            self.inner.fail(id, reason, result)
        }
        fn fail_stalled(
            &self,
            started_before: DateTime<Utc>,
            reason: &str,
        ) -> Result<Vec<Job>, QueueError> {
            self.inner.fail_stalled(started_before, reason)
        }
    }

    fn quick_retries() -> FinalizePolicy {
        FinalizePolicy {
            backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        }
    }

    fn write_csv(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("items.csv");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn csv_runner() -> Arc<JobRunner> {
        Arc::new(JobRunner::from_config(Arc::new(PipelineConfig::defaults_for(
            QueueType::Csv,
        ))))
    }

    #[test]
    fn test_process_next_on_empty_queue() {
        let queue = Arc::new(MemoryQueue::new(QueueType::Csv));
        let executor = JobExecutor::new(queue, csv_runner());
        assert!(executor.process_next().unwrap().is_none());
    }

    #[test]
    fn test_process_next_completes_job_and_publishes_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "ProductID,Price\nP1,1\nP2,x\n");
        let queue = Arc::new(MemoryQueue::new(QueueType::Csv));
        queue.add(JobPayload::new(path, "items.csv")).unwrap();

        let events = JobEventBroadcaster::new(64);
        let mut rx = events.subscribe();
        let executor = JobExecutor::new(queue.clone(), csv_runner()).with_events(events);

        let job = executor.process_next().unwrap().unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.progress, 100);
        let result = job.result.unwrap();
        assert_eq!((result.processed, result.failed, result.total), (1, 1, 2));

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind);
        }
        assert!(matches!(kinds.first(), Some(JobEventKind::Started { total: 2 })));
        assert!(matches!(kinds.last(), Some(JobEventKind::Completed { .. })));
    }

    #[test]
    fn test_intermediate_progress_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "ProductID\nA\nB\nC\nD\n");
        let queue = Arc::new(MemoryQueue::new(QueueType::Csv));
        queue.add(JobPayload::new(path, "items.csv")).unwrap();
        let claimed = queue.claim_next().unwrap().unwrap();

        let reporter = QueueProgress::new(queue.as_ref(), claimed.handle(), None);
        reporter.report(ProgressEvent::Record {
            row: 1,
            success: true,
            processed: 1,
            failed: 0,
            total: 4,
            progress: 25,
        });
        reporter.report(ProgressEvent::Record {
            row: 4,
            success: true,
            processed: 4,
            failed: 0,
            total: 4,
            progress: 100,
        });

        let stored = queue.get(1).unwrap().unwrap();
        assert_eq!(stored.state, JobState::Active);
        assert_eq!(stored.progress, 25);
    }

    struct Panicking;

    impl RecordProcessor for Panicking {
        fn process(&self, _record: &Record) -> Result<Record, RecordProcessingError> {
            panic!("processor exploded");
        }
    }

    #[test]
    fn test_panicking_processor_fails_job() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "ProductID\nP1\n");
        let queue = Arc::new(MemoryQueue::new(QueueType::Csv));
        queue.add(JobPayload::new(path, "items.csv")).unwrap();

        let config = Arc::new(PipelineConfig::defaults_for(QueueType::Csv));
        let runner = Arc::new(JobRunner::with_components(
            config.clone(),
            parser_for(&config),
            Box::new(Panicking),
        ));
        let executor = JobExecutor::new(queue, runner);

        let job = executor.process_next().unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert!(job
            .failed_reason
            .as_deref()
            .unwrap()
            .contains("processor exploded"));
        assert!(!dir.path().join("items.csv").exists());
    }

    #[test]
    fn test_finalize_outlasts_backend_outage() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "ProductID,Price\nP1,1\n");
        let queue = Arc::new(FlakyFinalize::new(8));
        queue.add(JobPayload::new(path, "items.csv")).unwrap();

        let executor =
            JobExecutor::new(queue.clone(), csv_runner()).with_finalize_policy(quick_retries());
        let job = executor.process_next().unwrap().unwrap();

        assert_eq!(job.state, JobState::Completed);
        assert_eq!(queue.terminal_writes.load(Ordering::SeqCst), 9);
        assert_eq!(queue.counts().unwrap().active, 0);
    }

    #[test]
    fn test_job_left_by_shutdown_is_recovered_as_stalled() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "ProductID,Price\nP1,1\n");
        let queue = Arc::new(FlakyFinalize::new(u32::MAX));
        queue.add(JobPayload::new(path.clone(), "items.csv")).unwrap();

        let shutdown = Arc::new(AtomicBool::new(false));
        let executor = JobExecutor::new(queue.clone(), csv_runner())
            .with_finalize_policy(quick_retries())
            .with_shutdown(Arc::clone(&shutdown));

        let stopper = {
            let shutdown = Arc::clone(&shutdown);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                shutdown.store(true, Ordering::Relaxed);
            })
        };
        let err = executor.process_next().unwrap_err();
        stopper.join().unwrap();

        assert!(err.is_connection());
        assert!(queue.terminal_writes.load(Ordering::SeqCst) > 1);
        assert_eq!(queue.get(1).unwrap().unwrap().state, JobState::Active);

        let recovered = executor.recover_stalled(Duration::ZERO).unwrap();
        assert_eq!(recovered.len(), 1);
        let job = queue.get(1).unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert!(job.failed_reason.unwrap().contains("stalled"));
        assert!(!path.exists());
    }

    #[test]
    fn test_recover_stalled_discards_upload_and_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "ProductID\nP1\n");
        let queue = Arc::new(MemoryQueue::new(QueueType::Csv));
        queue.add(JobPayload::new(path.clone(), "items.csv")).unwrap();
        queue.add(JobPayload::new(dir.path().join("next.csv"), "next.csv")).unwrap();
        queue.claim_next().unwrap();

        let events = JobEventBroadcaster::new(8);
        let mut rx = events.subscribe();
        let executor = JobExecutor::new(queue.clone(), csv_runner()).with_events(events);

        assert!(executor
            .recover_stalled(Duration::from_secs(3600))
            .unwrap()
            .is_empty());
        assert!(path.exists());

        let recovered = executor.recover_stalled(Duration::ZERO).unwrap();
        assert_eq!(recovered.iter().map(|j| j.id).collect::<Vec<_>>(), vec![1]);
        assert!(!path.exists());
        assert_eq!(queue.get(2).unwrap().unwrap().state, JobState::Waiting);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.job_id, 1);
        assert!(matches!(event.kind, JobEventKind::Failed { .. }));
    }
}
