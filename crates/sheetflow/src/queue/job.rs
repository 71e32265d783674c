//! Job model shared by every queue backend.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::parser::Record;

/// Per-queue job identifier, assigned at enqueue time.
pub type JobId = u64;

/// The file type a queue accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueType {
    Csv,
    Excel,
}

impl QueueType {
    /// All queue types in lookup priority order.
    pub const ALL: [QueueType; 2] = [QueueType::Csv, QueueType::Excel];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueType::Csv => "csv",
            QueueType::Excel => "excel",
        }
    }

    /// Maps a file extension (without the dot, any case) to its queue.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "csv" => Some(QueueType::Csv),
            "xlsx" | "xls" => Some(QueueType::Excel),
            _ => None,
        }
    }
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "csv" => Ok(QueueType::Csv),
            "excel" => Ok(QueueType::Excel),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Waiting,
        JobState::Active,
        JobState::Completed,
        JobState::Failed,
        JobState::Delayed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Delayed => "delayed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// What the worker needs to find and describe the uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub file_path: PathBuf,
    pub original_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

impl JobPayload {
    pub fn new(file_path: PathBuf, original_name: impl Into<String>) -> Self {
        let original_name = original_name.into();
        let mime_type = detect_mime_type(Path::new(&original_name));
        Self {
            file_path,
            original_name,
            mime_type,
            enqueued_at: Utc::now(),
        }
    }
}

fn detect_mime_type(path: &Path) -> Option<String> {
    mime_guess::from_path(path).first().map(|m| m.to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTimestamps {
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
}

impl JobTimestamps {
    pub fn new(created: DateTime<Utc>) -> Self {
        Self {
            created,
            started: None,
            finished: None,
        }
    }
}

/// Outcome of processing one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordOutcome {
    /// 1-based data row index within the source file.
    pub row: usize,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Record>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecordOutcome {
    pub fn success(row: usize, data: Record) -> Self {
        Self {
            row,
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(row: usize, error: String) -> Self {
        Self {
            row,
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Statistics for one multi-value field across a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSummary {
    pub total_values: usize,
    pub unique_values: Vec<String>,
    pub max_per_record: usize,
}

/// Final result of a job, written once together with its terminal state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub processed: usize,
    pub failed: usize,
    pub total: usize,
    #[serde(default)]
    pub records: Vec<RecordOutcome>,
    #[serde(default)]
    pub summary: BTreeMap<String, FieldSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobResult {
    /// Result for a job that failed before any record was attempted.
    pub fn aborted(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn is_balanced(&self) -> bool {
        self.processed + self.failed == self.total
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub queue_type: QueueType,
    pub state: JobState,
    pub payload: JobPayload,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_until: Option<DateTime<Utc>>,
    pub timestamps: JobTimestamps,
}

impl Job {
    /// A freshly enqueued job.
    pub fn new(id: JobId, queue_type: QueueType, payload: JobPayload) -> Self {
        Self {
            id,
            queue_type,
            state: JobState::Waiting,
            timestamps: JobTimestamps::new(payload.enqueued_at),
            payload,
            progress: 0,
            result: None,
            failed_reason: None,
            delay_until: None,
        }
    }

    pub fn handle(&self) -> JobHandle {
        JobHandle {
            id: self.id,
            queue_type: self.queue_type,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }
}

/// What the dispatcher hands back to the uploader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHandle {
    pub id: JobId,
    pub queue_type: QueueType,
}

/// Number of jobs per state in one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

impl StateCounts {
    pub fn get(&self, state: JobState) -> u64 {
        match state {
            JobState::Waiting => self.waiting,
            JobState::Active => self.active,
            JobState::Completed => self.completed,
            JobState::Failed => self.failed,
            JobState::Delayed => self.delayed,
        }
    }

    pub fn increment(&mut self, state: JobState, by: u64) {
        match state {
            JobState::Waiting => self.waiting += by,
            JobState::Active => self.active += by,
            JobState::Completed => self.completed += by,
            JobState::Failed => self.failed += by,
            JobState::Delayed => self.delayed += by,
        }
    }

    pub fn add(&mut self, other: &StateCounts) {
        for state in JobState::ALL {
            self.increment(state, other.get(state));
        }
    }

    pub fn total(&self) -> u64 {
        JobState::ALL.iter().map(|s| self.get(*s)).sum()
    }
}
