use thiserror::Error;

/// Errors that end a job run in the failed state.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Parse(#[from] crate::error::ParseError),

    #[error("Failed to release source file: {0}")]
    ReleaseSource(#[from] crate::error::StorageError),

    #[error("Job run panicked: {0}")]
    Panicked(String),
}
