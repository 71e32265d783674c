pub mod broadcast;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod parser;
pub mod pipeline;
pub mod processor;
pub mod query;
pub mod queue;
pub mod sanitize;
pub mod storage;
pub mod telemetry;
pub mod worker;

pub use broadcast::{JobEvent, JobEventBroadcaster, JobEventKind};
pub use config::{load_config, load_from_env, Config};
pub use dispatch::{classify, Dispatcher};
pub use error::{
    ConfigError, DispatchError, ParseError, QueryError, RecordProcessingError, Result,
    SheetflowError, StorageError,
};
pub use parser::{FieldValue, Record, RecordParser};
pub use pipeline::{JobOutcome, JobRunner, PipelineConfig, PipelineError};
pub use processor::{NormalizingProcessor, RecordProcessor};
pub use query::{JobPage, ListJobsParams, Metrics, Pagination, QueryService};
pub use queue::{
    Job, JobHandle, JobId, JobPayload, JobQueue, JobResult, JobState, QueueError, QueueSet,
    QueueType, StateCounts,
};
pub use storage::UploadStore;
pub use worker::{JobExecutor, WorkerPool, WorkerSettings};
