use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use sheetflow::queue::{
    JobId, JobPayload, JobResult, JobState, JobTimestamps, QueueType, StateCounts,
};
use sheetflow::{JobPage, ListJobsParams, Metrics, QueryError};

use super::blocking;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct JobLookup {
    pub worker: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub job_id: JobId,
    pub state: JobState,
    pub progress: u8,
    pub queue_type: QueueType,
    pub data: JobPayload,
    pub result: Option<JobResult>,
    pub failed_reason: Option<String>,
    pub queue_stats: StateCounts,
    pub timestamps: JobTimestamps,
}

/// GET /job/:job_id - one job, from the named queue or csv then excel
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(lookup): Query<JobLookup>,
) -> Result<Json<JobResponse>, ApiError> {
    let query = state.query().clone();
    let response = blocking(move || -> Result<JobResponse, QueryError> {
        let job = query.find_job(&job_id, lookup.worker.as_deref())?;
        let queue_stats = query.counts(job.queue_type)?;
        Ok(JobResponse {
            job_id: job.id,
            state: job.state,
            progress: job.progress,
            queue_type: job.queue_type,
            data: job.payload,
            result: job.result,
            failed_reason: job.failed_reason,
            queue_stats,
            timestamps: job.timestamps,
        })
    })
    .await?;

    Ok(Json(response))
}

/// GET /jobs - one page of jobs in a state, oldest first
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListJobsParams>,
) -> Result<Json<JobPage>, ApiError> {
    let query = state.query().clone();
    let page = blocking(move || query.list(&params)).await?;
    Ok(Json(page))
}

/// GET /metrics - per-queue counts and totals
pub async fn metrics(State(state): State<AppState>) -> Result<Json<Metrics>, ApiError> {
    let query = state.query().clone();
    let metrics = blocking(move || query.metrics()).await?;
    Ok(Json(metrics))
}
