//! Read-only views over the queues: paginated listings, lookups and metrics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::QueryError;
use crate::queue::{Job, JobId, JobState, QueueSet, QueueType, StateCounts};

pub const DEFAULT_PAGE: usize = 1;
pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;
/// State listed when the caller names none.
pub const DEFAULT_STATUS: JobState = JobState::Completed;

/// Query parameters for job listing.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListJobsParams {
    pub worker: Option<String>,
    pub status: Option<String>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
    pub total_pages: usize,
}

impl Pagination {
    /// Pages are 1-based. `page` and `page_size` below 1 are raised to 1.
    pub fn new(page: usize, page_size: usize, total: usize) -> Self {
        let page_size = page_size.max(1);
        Self {
            page: page.max(1),
            page_size,
            total,
            total_pages: total.div_ceil(page_size),
        }
    }

    /// Index range of this page within the full listing, clamped to `total`.
    pub fn range(&self) -> std::ops::Range<usize> {
        let start = self
            .page
            .saturating_sub(1)
            .saturating_mul(self.page_size)
            .min(self.total);
        let end = start.saturating_add(self.page_size).min(self.total);
        start..end
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPage {
    pub jobs: Vec<Job>,
    pub pagination: Pagination,
    pub queue_counts: StateCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub queues: BTreeMap<QueueType, StateCounts>,
    pub totals: StateCounts,
}

#[derive(Clone)]
pub struct QueryService {
    queues: QueueSet,
}

impl QueryService {
    pub fn new(queues: QueueSet) -> Self {
        Self { queues }
    }

    /// Lists one page of jobs in `status` from the named queue, oldest first.
    pub fn list_jobs(
        &self,
        queue_type: &str,
        status: &str,
        page: usize,
        page_size: usize,
    ) -> Result<JobPage, QueryError> {
        let queue_type = parse_queue_type(queue_type)?;
        let state: JobState = status
            .parse()
            .map_err(QueryError::InvalidStatus)?;
        if page < 1 {
            return Err(QueryError::InvalidPagination(
                "page must be at least 1".to_string(),
            ));
        }
        if page_size < 1 {
            return Err(QueryError::InvalidPagination(
                "pageSize must be at least 1".to_string(),
            ));
        }
        let page_size = page_size.min(MAX_PAGE_SIZE);

        let queue = self.queues.get(queue_type);
        let all = queue.list_by_state(state)?;
        let queue_counts = queue.counts()?;

        let pagination = Pagination::new(page, page_size, all.len());
        let range = pagination.range();
        let jobs = all
            .into_iter()
            .skip(range.start)
            .take(range.len())
            .collect();

        Ok(JobPage {
            jobs,
            pagination,
            queue_counts,
        })
    }

    /// [`list_jobs`](Self::list_jobs) with defaults for omitted parameters.
    /// The worker type is required.
    pub fn list(&self, params: &ListJobsParams) -> Result<JobPage, QueryError> {
        let worker = params
            .worker
            .as_deref()
            .ok_or_else(|| QueryError::InvalidWorkerType(String::new()))?;
        self.list_jobs(
            worker,
            params.status.as_deref().unwrap_or(DEFAULT_STATUS.as_str()),
            params.page.unwrap_or(DEFAULT_PAGE),
            params.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        )
    }

    /// Looks a job up in the named queue, or in csv then excel.
    pub fn get_job(&self, id: JobId, queue_type: Option<QueueType>) -> Result<Job, QueryError> {
        let candidates: &[QueueType] = match &queue_type {
            Some(t) => std::slice::from_ref(t),
            None => &QueueType::ALL,
        };
        for candidate in candidates {
            if let Some(job) = self.queues.get(*candidate).get(id)? {
                return Ok(job);
            }
        }
        Err(QueryError::JobNotFound(id.to_string()))
    }

    /// [`get_job`](Self::get_job) from raw request values. A non-numeric id
    /// cannot exist and reports `JobNotFound`.
    pub fn find_job(&self, id: &str, worker: Option<&str>) -> Result<Job, QueryError> {
        let queue_type = worker.map(parse_queue_type).transpose()?;
        let id: JobId = id
            .trim()
            .parse()
            .map_err(|_| QueryError::JobNotFound(id.to_string()))?;
        self.get_job(id, queue_type)
    }

    pub fn counts(&self, queue_type: QueueType) -> Result<StateCounts, QueryError> {
        Ok(self.queues.get(queue_type).counts()?)
    }

    pub fn metrics(&self) -> Result<Metrics, QueryError> {
        let mut queues = BTreeMap::new();
        let mut totals = StateCounts::default();
        for (queue_type, queue) in self.queues.iter() {
            let counts = queue.counts()?;
            totals.add(&counts);
            queues.insert(queue_type, counts);
        }
        Ok(Metrics { queues, totals })
    }
}

fn parse_queue_type(value: &str) -> Result<QueueType, QueryError> {
    value.parse().map_err(QueryError::InvalidWorkerType)
}
