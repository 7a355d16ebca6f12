//! `GET /status/:id`

use axum::Json;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use jobs_core::{JobId, StatusPayload, TableData};

use crate::AppState;
use crate::error::ApiError;

/// Report a job's progress, or its result once terminal.
///
/// In-flight jobs answer with a JSON message. Completed jobs download their
/// table as CSV; failed jobs download the diagnostic as text.
pub async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = JobId::parse(&id).map_err(|_| ApiError::JobNotFound)?;
    let view = state.engine.poll(&id).await?;

    let response = match view.payload {
        None => Json(serde_json::json!({
            "message": "The file is currently being processed.",
            "status": view.state.as_str(),
        }))
        .into_response(),
        Some(StatusPayload::Table(table)) => {
            let body = render_csv(&table)
                .map_err(|e| ApiError::Internal(format!("Failed to render CSV: {}", e)))?;
            attachment("text/csv", format!("{}.csv", view.job_id), body)
        }
        Some(StatusPayload::Failure(report)) => attachment(
            "text/plain; charset=utf-8",
            format!("{}.txt", view.job_id),
            report.render().into_bytes(),
        ),
    };

    Ok(response)
}

fn attachment(content_type: &'static str, filename: String, body: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response()
}

/// Render a table as CSV, one record per row.
pub fn render_csv(table: &TableData) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());
    for row in &table.rows {
        writer.write_record(row)?;
    }
    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}
