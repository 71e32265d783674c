use axum::extract::{Multipart, State};
use axum::Json;
use serde::Serialize;
use sheetflow::queue::{JobId, QueueType};

use super::blocking;
use crate::error::ApiError;
use crate::state::AppState;

/// Multipart field carrying the uploaded file.
pub const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: String,
    pub job_id: JobId,
    pub original_name: String,
    pub file_type: QueueType,
}

/// POST /upload - store the file and queue it for its worker type
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let original_name = field.file_name().unwrap_or_default().to_string();
        let content = field.bytes().await?;
        upload = Some((original_name, content));
        break;
    }
    let (original_name, content) = upload.ok_or(ApiError::MissingFile)?;

    let dispatcher = state.dispatcher().clone();
    let name = original_name.clone();
    let handle = blocking(move || dispatcher.submit(&content, &name)).await?;

    tracing::info!(
        job_id = handle.id,
        queue = %handle.queue_type,
        "Accepted upload"
    );

    Ok(Json(UploadResponse {
        message: format!(
            "File queued for processing. Poll /job/{}?worker={} for progress.",
            handle.id, handle.queue_type
        ),
        job_id: handle.id,
        original_name,
        file_type: handle.queue_type,
    }))
}
