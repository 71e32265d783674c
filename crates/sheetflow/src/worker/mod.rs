mod backoff;
pub mod executor;
pub mod pool;

pub use backoff::MAX_ERROR_BACKOFF;
pub use executor::{FinalizePolicy, JobExecutor};
pub use pool::{WorkerPool, WorkerSettings};
