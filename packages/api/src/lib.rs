//! HTTP transport for the extraction engine.
//!
//! - `POST /upload_pdf` admits a PDF and returns its job id
//! - `GET /status/:id` reports progress or downloads the result
//! - `GET /health` reports queue statistics

mod error;
mod health;
mod status;
mod upload;

use actors::Engine;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};

pub use error::ApiError;
pub use status::render_csv;
pub use upload::UploadResponse;

/// Multipart framing allowance on top of the upload limit.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
}

impl AppState {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let max_upload = usize::try_from(state.engine.config().admission.max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route(
            "/upload_pdf",
            post(upload::upload_pdf).layer(DefaultBodyLimit::max(max_upload)),
        )
        .route("/status/:id", get(status::job_status))
        .route("/health", get(health::health))
        .with_state(state)
}
