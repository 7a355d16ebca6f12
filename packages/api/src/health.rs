//! `GET /health`

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::State;
use jobs_core::{JobState, QueueStats};
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub queue: QueueStats,
    /// Job records per lifecycle state.
    pub jobs: BTreeMap<&'static str, u64>,
}

pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let queue = state
        .engine
        .stats()
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;

    let mut jobs = BTreeMap::new();
    for job_state in [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Failed,
    ] {
        let count = state
            .engine
            .store()
            .count_by_state(job_state)
            .await
            .map_err(|e| ApiError::Unavailable(e.to_string()))?;
        jobs.insert(job_state.as_str(), count);
    }

    Ok(Json(HealthResponse {
        status: "ok",
        queue,
        jobs,
    }))
}
