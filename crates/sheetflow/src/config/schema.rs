use serde::{Deserialize, Serialize};

use crate::processor::DEFAULT_NUMERIC_FIELDS;
use crate::queue::QueueType;

/// Upload size limit applied when none is configured (5 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Queue connection string: a SQLite path, `sqlite::memory:` or `memory://`.
    #[serde(default = "default_queue_url")]
    pub queue_url: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub uploads: UploadConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    /// Fields the processor coerces to numbers.
    #[serde(default = "default_numeric_fields")]
    pub numeric_fields: Vec<String>,
}

fn default_queue_url() -> String {
    match crate::db::default_database_path() {
        Some(path) => format!("sqlite://{}", path.display()),
        None => "sqlite:sheetflow-queue.db".to_string(),
    }
}

fn default_numeric_fields() -> Vec<String> {
    DEFAULT_NUMERIC_FIELDS.iter().map(|s| s.to_string()).collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_url: default_queue_url(),
            api: ApiConfig::default(),
            uploads: UploadConfig::default(),
            workers: WorkersConfig::default(),
            numeric_fields: default_numeric_fields(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_upload_directory")]
    pub directory: String,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    /// Keep the uploaded file when its job fails at the parse stage.
    #[serde(default)]
    pub retain_failed: bool,
}

fn default_upload_directory() -> String {
    "uploads".to_string()
}

fn default_max_bytes() -> usize {
    DEFAULT_MAX_UPLOAD_BYTES
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            directory: default_upload_directory(),
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            retain_failed: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default)]
    pub csv: QueueWorkerConfig,
    #[serde(default)]
    pub excel: QueueWorkerConfig,
}

impl WorkersConfig {
    pub fn get(&self, queue_type: QueueType) -> &QueueWorkerConfig {
        match queue_type {
            QueueType::Csv => &self.csv,
            QueueType::Excel => &self.excel,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueWorkerConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Overrides the per-format default multi-value fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_value_fields: Option<Vec<String>>,
    /// Overrides the per-format default required columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_columns: Option<Vec<String>>,
    /// Seconds an active job may go unfinished before it is failed as stalled.
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,
}

fn default_concurrency() -> usize {
    num_cpus::get().clamp(1, 4)
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_stall_timeout_secs() -> u64 {
    600
}

impl Default for QueueWorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            multi_value_fields: None,
            required_columns: None,
            stall_timeout_secs: default_stall_timeout_secs(),
        }
    }
}
