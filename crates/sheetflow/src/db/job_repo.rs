//! Job repository: queue operations over the `jobs` table.
//!
//! Every function is scoped to one queue type. State transitions are single
//! conditional statements, so two processes racing on the same row cannot
//! both win.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub queue_type: String,
    pub id: i64,
    pub state: String,
    pub payload: String,
    pub progress: i64,
    pub result: Option<String>,
    pub failed_reason: Option<String>,
    pub delay_until: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            queue_type: row.get("queue_type")?,
            id: row.get("id")?,
            state: row.get("state")?,
            payload: row.get("payload")?,
            progress: row.get("progress")?,
            result: row.get("result")?,
            failed_reason: row.get("failed_reason")?,
            delay_until: row.get("delay_until")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
        })
    }
}

/// Fields supplied when enqueueing; the id is assigned by the repository.
#[derive(Debug, Clone)]
pub struct NewJob<'a> {
    pub queue_type: &'a str,
    pub state: &'a str,
    pub payload: &'a str,
    pub delay_until: Option<&'a str>,
    pub created_at: &'a str,
}

const COLUMNS: &str = "queue_type, id, state, payload, progress, result, failed_reason, \
                       delay_until, created_at, started_at, finished_at";

/// Inserts a job under the next id of its queue and returns the stored row.
pub fn insert(db: &Database, job: &NewJob<'_>) -> Result<JobRow, DatabaseError> {
    db.with_transaction(|tx| {
        let id: i64 = tx.query_row(
            "INSERT INTO queue_sequences (queue_type, last_id) VALUES (?1, 1)
             ON CONFLICT(queue_type) DO UPDATE SET last_id = last_id + 1
             RETURNING last_id",
            params![job.queue_type],
            |r| r.get(0),
        )?;

        let row = tx.query_row(
            &format!(
                "INSERT INTO jobs (queue_type, id, state, payload, delay_until, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 RETURNING {COLUMNS}"
            ),
            params![
                job.queue_type,
                id,
                job.state,
                job.payload,
                job.delay_until,
                job.created_at,
            ],
            JobRow::from_row,
        )?;
        Ok(row)
    })
}

/// Finds a job by queue and id.
pub fn find(db: &Database, queue_type: &str, id: i64) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM jobs WHERE queue_type = ?1 AND id = ?2"),
                params![queue_type, id],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Lists the jobs of one queue in one state, oldest first.
pub fn list_by_state(
    db: &Database,
    queue_type: &str,
    state: &str,
) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM jobs WHERE queue_type = ?1 AND state = ?2 ORDER BY id ASC"
        ))?;
        let rows = stmt
            .query_map(params![queue_type, state], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Returns `(state, count)` pairs for one queue. States with no jobs are absent.
pub fn count_by_state(db: &Database, queue_type: &str) -> Result<Vec<(String, u64)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT state, COUNT(*) FROM jobs WHERE queue_type = ?1 GROUP BY state")?;
        let rows = stmt
            .query_map(params![queue_type], |r| {
                let state: String = r.get(0)?;
                let count: i64 = r.get(1)?;
                Ok((state, count.max(0) as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Promotes due delayed jobs, then moves the oldest waiting job to active.
///
/// Both steps run in one write transaction. The claim is a single
/// conditional update, so a row is returned to at most one caller.
pub fn claim_next(db: &Database, queue_type: &str, now: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_transaction(|tx| {
        let promoted = tx.execute(
            "UPDATE jobs SET state = 'waiting', delay_until = NULL
             WHERE queue_type = ?1 AND state = 'delayed' AND delay_until <= ?2",
            params![queue_type, now],
        )?;
        if promoted > 0 {
            log::debug!("Promoted {} delayed {} job(s)", promoted, queue_type);
        }

        let row = tx
            .query_row(
                &format!(
                    "UPDATE jobs SET state = 'active', started_at = ?2
                     WHERE queue_type = ?1 AND state = 'waiting' AND id = (
                         SELECT id FROM jobs
                         WHERE queue_type = ?1 AND state = 'waiting'
                         ORDER BY id ASC LIMIT 1
                     )
                     RETURNING {COLUMNS}"
                ),
                params![queue_type, now],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Raises the progress of an active job. Returns the number of rows changed,
/// which is zero when the job is not active or already at or above `progress`.
pub fn update_progress(
    db: &Database,
    queue_type: &str,
    id: i64,
    progress: i64,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET progress = ?3
             WHERE queue_type = ?1 AND id = ?2 AND state = 'active' AND progress < ?3",
            params![queue_type, id, progress],
        )?;
        Ok(changed)
    })
}

/// Moves an active job to completed with progress 100 and its result.
/// Returns `None` when the job is missing or not active.
pub fn complete(
    db: &Database,
    queue_type: &str,
    id: i64,
    result: &str,
    finished_at: &str,
) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                &format!(
                    "UPDATE jobs SET state = 'completed', progress = 100, result = ?3,
                         finished_at = ?4
                     WHERE queue_type = ?1 AND id = ?2 AND state = 'active'
                     RETURNING {COLUMNS}"
                ),
                params![queue_type, id, result, finished_at],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Moves an active job to failed with its reason and result. With
/// `full_progress` the progress is set to 100 in the same statement.
/// Returns `None` when the job is missing or not active.
pub fn fail(
    db: &Database,
    queue_type: &str,
    id: i64,
    reason: &str,
    result: &str,
    finished_at: &str,
    full_progress: bool,
) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                &format!(
                    "UPDATE jobs SET state = 'failed', failed_reason = ?3, result = ?4,
                         finished_at = ?5,
                         progress = CASE WHEN ?6 THEN 100 ELSE progress END
                     WHERE queue_type = ?1 AND id = ?2 AND state = 'active'
                     RETURNING {COLUMNS}"
                ),
                params![queue_type, id, reason, result, finished_at, full_progress],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Fails every active job of the queue claimed before `started_before`.
pub fn fail_stalled(
    db: &Database,
    queue_type: &str,
    started_before: &str,
    reason: &str,
    result: &str,
    finished_at: &str,
) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_transaction(|tx| {
        let mut stmt = tx.prepare(&format!(
            "UPDATE jobs SET state = 'failed', failed_reason = ?3, result = ?4,
                 finished_at = ?5
             WHERE queue_type = ?1 AND state = 'active' AND started_at < ?2
             RETURNING {COLUMNS}"
        ))?;
        let mut rows = stmt
            .query_map(
                params![queue_type, started_before, reason, result, finished_at],
                JobRow::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        rows.sort_by_key(|r| r.id);
        Ok(rows)
    })
}
