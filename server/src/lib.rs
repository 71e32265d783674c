//! HTTP surface for sheetflow: uploads, job lookups, listings and metrics.

pub mod error;
pub mod routes;
pub mod state;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

pub use error::ApiError;
pub use state::AppState;

/// Room for multipart framing on top of the file size limit, so oversized
/// files reach the dispatcher and get its error message.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state
        .dispatcher()
        .max_upload_bytes()
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/health", get(routes::health::health))
        .route(
            "/upload",
            post(routes::upload::upload).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/job/:job_id", get(routes::jobs::get_job))
        .route("/jobs", get(routes::jobs::list_jobs))
        .route("/metrics", get(routes::jobs::metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
