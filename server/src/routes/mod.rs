//! Route handlers.
//!
//! Queue and file access is synchronous, so handlers hop onto the blocking
//! pool for it.

pub mod health;
pub mod jobs;
pub mod upload;

use crate::error::ApiError;

async fn blocking<F, T, E>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await?.map_err(Into::into)
}
