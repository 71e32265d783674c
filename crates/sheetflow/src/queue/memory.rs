//! In-process queue backend.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::{Job, JobId, JobPayload, JobQueue, JobResult, JobState, QueueError, QueueType, StateCounts};

#[derive(Default)]
struct Inner {
    next_id: JobId,
    jobs: BTreeMap<JobId, Job>,
}

/// Jobs held in a mutex-guarded map. Lost when the process exits.
pub struct MemoryQueue {
    queue_type: QueueType,
    inner: Mutex<Inner>,
}

impl MemoryQueue {
    pub fn new(queue_type: QueueType) -> Self {
        Self {
            queue_type,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            log::warn!("{} queue lock was poisoned; recovering", self.queue_type);
            poisoned.into_inner()
        })
    }

    fn insert(&self, payload: JobPayload, delay_until: Option<DateTime<Utc>>) -> Job {
        let mut inner = self.lock();
        inner.next_id += 1;
        let mut job = Job::new(inner.next_id, self.queue_type, payload);
        if delay_until.is_some() {
            job.state = JobState::Delayed;
            job.delay_until = delay_until;
        }
        inner.jobs.insert(job.id, job.clone());
        job
    }

    fn finish(
        &self,
        id: JobId,
        to: JobState,
        reason: Option<&str>,
        result: JobResult,
    ) -> Result<Job, QueueError> {
        let mut inner = self.lock();
        let job = inner.jobs.get_mut(&id).ok_or(QueueError::NotFound {
            queue_type: self.queue_type,
            id,
        })?;
        if job.state != JobState::Active {
            return Err(QueueError::InvalidTransition {
                queue_type: self.queue_type,
                id,
                from: job.state,
                to,
            });
        }

        job.state = to;
        if to == JobState::Completed || result.total > 0 {
            job.progress = 100;
        }
        job.failed_reason = reason.map(str::to_string);
        job.result = Some(result);
        job.timestamps.finished = Some(Utc::now());
        Ok(job.clone())
    }
}

impl JobQueue for MemoryQueue {
    fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    fn add(&self, payload: JobPayload) -> Result<Job, QueueError> {
        Ok(self.insert(payload, None))
    }

    fn add_delayed(&self, payload: JobPayload, until: DateTime<Utc>) -> Result<Job, QueueError> {
        Ok(self.insert(payload, Some(until)))
    }

    fn claim_next(&self) -> Result<Option<Job>, QueueError> {
        let now = Utc::now();
        let mut inner = self.lock();

        for job in inner.jobs.values_mut() {
            if job.state == JobState::Delayed && job.delay_until.is_some_and(|t| t <= now) {
                job.state = JobState::Waiting;
                job.delay_until = None;
            }
        }

        let claimed = inner
            .jobs
            .values_mut()
            .find(|job| job.state == JobState::Waiting)
            .map(|job| {
                job.state = JobState::Active;
                job.timestamps.started = Some(now);
                job.clone()
            });
        Ok(claimed)
    }

    fn get(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        Ok(self.lock().jobs.get(&id).cloned())
    }

    fn list_by_state(&self, state: JobState) -> Result<Vec<Job>, QueueError> {
        Ok(self
            .lock()
            .jobs
            .values()
            .filter(|job| job.state == state)
            .cloned()
            .collect())
    }

    fn counts(&self) -> Result<StateCounts, QueueError> {
        let mut counts = StateCounts::default();
        for job in self.lock().jobs.values() {
            counts.increment(job.state, 1);
        }
        Ok(counts)
    }

    fn update_progress(&self, id: JobId, progress: u8) -> Result<(), QueueError> {
        let mut inner = self.lock();
        let job = inner.jobs.get_mut(&id).ok_or(QueueError::NotFound {
            queue_type: self.queue_type,
            id,
        })?;
        if job.state == JobState::Active && progress > job.progress {
            job.progress = progress.min(100);
        }
        Ok(())
    }

    fn complete(&self, id: JobId, result: JobResult) -> Result<Job, QueueError> {
        self.finish(id, JobState::Completed, None, result)
    }

    fn fail(&self, id: JobId, reason: &str, result: JobResult) -> Result<Job, QueueError> {
        self.finish(id, JobState::Failed, Some(reason), result)
    }

    fn fail_stalled(
        &self,
        started_before: DateTime<Utc>,
        reason: &str,
    ) -> Result<Vec<Job>, QueueError> {
        let now = Utc::now();
        let mut inner = self.lock();
        let stalled = inner
            .jobs
            .values_mut()
            .filter(|job| {
                job.state == JobState::Active
                    && job.timestamps.started.is_some_and(|t| t < started_before)
            })
            .map(|job| {
                job.state = JobState::Failed;
                job.failed_reason = Some(reason.to_string());
                job.result = Some(JobResult::aborted(reason));
                job.timestamps.finished = Some(now);
                job.clone()
            })
            .collect();
        Ok(stalled)
    }
}
