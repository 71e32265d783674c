use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use sheetflow::queue::QueueError;
use sheetflow::{DispatchError, QueryError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("No file uploaded. Send the file in a multipart field named 'file'")]
    MissingFile,

    #[error("Malformed upload: {0}")]
    Multipart(#[from] MultipartError),

    #[error("Request handler failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

fn queue_status(err: &QueueError) -> (StatusCode, &'static str) {
    if err.is_connection() {
        (StatusCode::SERVICE_UNAVAILABLE, "queue_unavailable")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "queue_error")
    }
}

impl ApiError {
    fn status(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Dispatch(err) => match err {
                DispatchError::UnsupportedFileType(_) => {
                    (StatusCode::BAD_REQUEST, "unsupported_file_type")
                }
                DispatchError::FileTooLarge { .. } => (StatusCode::BAD_REQUEST, "file_too_large"),
                DispatchError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
                DispatchError::Queue(e) => queue_status(e),
            },
            ApiError::Query(err) => match err {
                QueryError::InvalidWorkerType(_) => (StatusCode::BAD_REQUEST, "invalid_worker_type"),
                QueryError::InvalidStatus(_) => (StatusCode::BAD_REQUEST, "invalid_status"),
                QueryError::InvalidPagination(_) => (StatusCode::BAD_REQUEST, "invalid_pagination"),
                QueryError::JobNotFound(_) => (StatusCode::NOT_FOUND, "job_not_found"),
                QueryError::Queue(e) => queue_status(e),
            },
            ApiError::MissingFile => (StatusCode::BAD_REQUEST, "missing_file"),
            ApiError::Multipart(_) => (StatusCode::BAD_REQUEST, "invalid_upload"),
            ApiError::Task(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status();
        if status.is_server_error() {
            tracing::error!("{} ({})", self, error_type);
        } else {
            tracing::debug!("Rejected request: {}", self);
        }

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                ApiError::from(DispatchError::UnsupportedFileType("a.pdf".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::from(DispatchError::FileTooLarge { size: 2, limit: 1 }),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::from(QueryError::JobNotFound("7".into())),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::from(QueryError::InvalidWorkerType("pdf".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::from(QueryError::Queue(QueueError::Connection("down".into()))),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (ApiError::MissingFile, StatusCode::BAD_REQUEST),
        ];

        for (error, expected) in cases {
            assert_eq!(error.status().0, expected, "{error}");
        }
    }
}
