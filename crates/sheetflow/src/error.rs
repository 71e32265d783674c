use std::path::PathBuf;
use thiserror::Error;

use crate::queue::QueueError;

#[derive(Error, Debug)]
pub enum SheetflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Invalid value '{value}' for environment variable {name}: {reason}")]
    InvalidEnv {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Failures that abort a job before any record is attempted.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Failed to read source file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed CSV input: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to read spreadsheet: {0}")]
    Spreadsheet(String),

    #[error("Spreadsheet contains no worksheets")]
    NoWorksheet,

    #[error("Missing required columns: {}", missing.join(", "))]
    MissingRequiredColumns { missing: Vec<String> },
}

/// A single record could not be transformed. Counted, never fatal to the job.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordProcessingError {
    #[error("Field '{field}' must be numeric, got '{value}'")]
    NonNumeric { field: String, value: String },

    #[error("Record has no values")]
    EmptyRecord,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove file '{path}': {source}")]
    RemoveFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Unsupported file type: '{0}'. Only .csv, .xlsx and .xls files are accepted")]
    UnsupportedFileType(String),

    #[error("File too large: {size} bytes exceeds the {limit} byte limit")]
    FileTooLarge { size: usize, limit: usize },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Invalid worker type: '{0}'. Expected 'csv' or 'excel'")]
    InvalidWorkerType(String),

    #[error("Invalid status: '{0}'. Expected one of waiting, active, completed, failed, delayed")]
    InvalidStatus(String),

    #[error("Invalid pagination: {0}")]
    InvalidPagination(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

pub type Result<T> = std::result::Result<T, SheetflowError>;
