//! Durable queue backend shared by the API and worker processes.

use chrono::{DateTime, SecondsFormat, Utc};

use super::{
    Job, JobId, JobPayload, JobQueue, JobResult, JobState, JobTimestamps, QueueError, QueueType,
    StateCounts,
};
use crate::db::job_repo::{self, JobRow, NewJob};
use crate::db::Database;

/// One queue type stored in the `jobs` table.
#[derive(Clone)]
pub struct SqliteQueue {
    db: Database,
    queue_type: QueueType,
}

/// Fixed-width UTC timestamps so stored values compare lexicographically.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl SqliteQueue {
    pub fn new(db: Database, queue_type: QueueType) -> Self {
        Self { db, queue_type }
    }

    fn corrupt(&self, id: i64, reason: impl ToString) -> QueueError {
        QueueError::Corrupt {
            queue_type: self.queue_type,
            id: id.max(0) as JobId,
            reason: reason.to_string(),
        }
    }

    fn parse_timestamp(&self, id: i64, value: &str) -> Result<DateTime<Utc>, QueueError> {
        DateTime::parse_from_rfc3339(value)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| self.corrupt(id, format!("bad timestamp '{value}': {e}")))
    }

    fn parse_optional_timestamp(
        &self,
        id: i64,
        value: Option<&str>,
    ) -> Result<Option<DateTime<Utc>>, QueueError> {
        value.map(|v| self.parse_timestamp(id, v)).transpose()
    }

    fn row_to_job(&self, row: JobRow) -> Result<Job, QueueError> {
        let id = row.id;
        let state: JobState = row
            .state
            .parse()
            .map_err(|s| self.corrupt(id, format!("unknown state '{s}'")))?;
        let payload: JobPayload =
            serde_json::from_str(&row.payload).map_err(|e| self.corrupt(id, e))?;
        let result = row
            .result
            .as_deref()
            .map(serde_json::from_str::<JobResult>)
            .transpose()
            .map_err(|e| self.corrupt(id, e))?;

        Ok(Job {
            id: id as JobId,
            queue_type: self.queue_type,
            state,
            payload,
            progress: row.progress.clamp(0, 100) as u8,
            result,
            failed_reason: row.failed_reason,
            delay_until: self.parse_optional_timestamp(id, row.delay_until.as_deref())?,
            timestamps: JobTimestamps {
                created: self.parse_timestamp(id, &row.created_at)?,
                started: self.parse_optional_timestamp(id, row.started_at.as_deref())?,
                finished: self.parse_optional_timestamp(id, row.finished_at.as_deref())?,
            },
        })
    }

    fn insert(&self, payload: JobPayload, delay_until: Option<DateTime<Utc>>) -> Result<Job, QueueError> {
        let payload_json =
            serde_json::to_string(&payload).map_err(|e| self.corrupt(0, e))?;
        let created_at = format_timestamp(payload.enqueued_at);
        let delay_until = delay_until.map(format_timestamp);
        let state = if delay_until.is_some() {
            JobState::Delayed
        } else {
            JobState::Waiting
        };

        let row = job_repo::insert(
            &self.db,
            &NewJob {
                queue_type: self.queue_type.as_str(),
                state: state.as_str(),
                payload: &payload_json,
                delay_until: delay_until.as_deref(),
                created_at: &created_at,
            },
        )?;
        self.row_to_job(row)
    }

    /// Turns a missed terminal update into `NotFound` or `InvalidTransition`.
    fn transition_error(&self, id: JobId, to: JobState) -> QueueError {
        match self.get(id) {
            Ok(Some(job)) => QueueError::InvalidTransition {
                queue_type: self.queue_type,
                id,
                from: job.state,
                to,
            },
            Ok(None) => QueueError::NotFound {
                queue_type: self.queue_type,
                id,
            },
            Err(e) => e,
        }
    }

    fn encode_result(&self, id: JobId, result: &JobResult) -> Result<String, QueueError> {
        serde_json::to_string(result).map_err(|e| self.corrupt(id as i64, e))
    }
}

impl JobQueue for SqliteQueue {
    fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    fn add(&self, payload: JobPayload) -> Result<Job, QueueError> {
        self.insert(payload, None)
    }

    fn add_delayed(&self, payload: JobPayload, until: DateTime<Utc>) -> Result<Job, QueueError> {
        self.insert(payload, Some(until))
    }

    fn claim_next(&self) -> Result<Option<Job>, QueueError> {
        let now = format_timestamp(Utc::now());
        job_repo::claim_next(&self.db, self.queue_type.as_str(), &now)?
            .map(|row| self.row_to_job(row))
            .transpose()
    }

    fn get(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        job_repo::find(&self.db, self.queue_type.as_str(), id as i64)?
            .map(|row| self.row_to_job(row))
            .transpose()
    }

    fn list_by_state(&self, state: JobState) -> Result<Vec<Job>, QueueError> {
        job_repo::list_by_state(&self.db, self.queue_type.as_str(), state.as_str())?
            .into_iter()
            .map(|row| self.row_to_job(row))
            .collect()
    }

    fn counts(&self) -> Result<StateCounts, QueueError> {
        let mut counts = StateCounts::default();
        for (state, count) in job_repo::count_by_state(&self.db, self.queue_type.as_str())? {
            match state.parse::<JobState>() {
                Ok(state) => counts.increment(state, count),
                Err(other) => log::warn!(
                    "Ignoring {} {} job(s) with unknown state '{}'",
                    count,
                    self.queue_type,
                    other
                ),
            }
        }
        Ok(counts)
    }

    fn update_progress(&self, id: JobId, progress: u8) -> Result<(), QueueError> {
        job_repo::update_progress(
            &self.db,
            self.queue_type.as_str(),
            id as i64,
            i64::from(progress.min(100)),
        )?;
        Ok(())
    }

    fn complete(&self, id: JobId, result: JobResult) -> Result<Job, QueueError> {
        let encoded = self.encode_result(id, &result)?;
        let finished_at = format_timestamp(Utc::now());
        match job_repo::complete(
            &self.db,
            self.queue_type.as_str(),
            id as i64,
            &encoded,
            &finished_at,
        )? {
            Some(row) => self.row_to_job(row),
            None => Err(self.transition_error(id, JobState::Completed)),
        }
    }

    fn fail(&self, id: JobId, reason: &str, result: JobResult) -> Result<Job, QueueError> {
        let encoded = self.encode_result(id, &result)?;
        let finished_at = format_timestamp(Utc::now());
        match job_repo::fail(
            &self.db,
            self.queue_type.as_str(),
            id as i64,
            reason,
            &encoded,
            &finished_at,
            result.total > 0,
        )? {
            Some(row) => self.row_to_job(row),
            None => Err(self.transition_error(id, JobState::Failed)),
        }
    }

    fn fail_stalled(
        &self,
        started_before: DateTime<Utc>,
        reason: &str,
    ) -> Result<Vec<Job>, QueueError> {
        let encoded = self.encode_result(0, &JobResult::aborted(reason))?;
        job_repo::fail_stalled(
            &self.db,
            self.queue_type.as_str(),
            &format_timestamp(started_before),
            reason,
            &encoded,
            &format_timestamp(Utc::now()),
        )?
        .into_iter()
        .map(|row| self.row_to_job(row))
        .collect()
    }
}
