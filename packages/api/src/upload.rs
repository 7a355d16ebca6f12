//! `POST /upload_pdf`

use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use jobs_core::{AdmissionError, Upload};
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

/// Multipart field carrying the document.
const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub file_id: String,
    pub file_path: String,
}

/// Accept a PDF upload and queue it for extraction.
pub async fn upload_pdf(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let limit_mb = state.engine.config().admission.limit_mb();
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| read_error(e, limit_mb, "Failed to read multipart field"))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| read_error(e, limit_mb, "Failed to read upload"))?;

        upload = Some(Upload::new(filename, content_type, bytes));
        break;
    }

    let upload = upload.ok_or(AdmissionError::MissingFile)?;
    tracing::debug!("Received upload {} ({} bytes)", upload.filename, upload.size_bytes());

    let job = state.engine.submit(upload).await?;

    Ok(Json(UploadResponse {
        message: "File uploaded successfully".to_string(),
        file_id: job.id.to_string(),
        file_path: job.source.to_string(),
    }))
}

/// Requests cut off by the body limit get the same message as oversized uploads.
fn read_error(err: MultipartError, limit_mb: u64, context: &str) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return AdmissionError::BodyTooLarge { limit_mb }.into();
    }
    ApiError::BadRequest(format!("{context}: {err}"))
}
