pub mod config;
pub mod error;
pub mod progress;
pub mod runner;
pub mod summary;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use progress::{NoopProgress, ProgressEvent, ProgressReporter, ProgressTracker};
pub use runner::{JobOutcome, JobRunner};
pub use summary::MultiValueStats;
