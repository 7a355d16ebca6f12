//! Client-facing job status.

use serde::{Deserialize, Serialize};

use crate::{ArtifactMeta, FailureReport, JobId, JobState, TableData};

/// What the record store says about a job, without touching the result sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolution {
    Pending,
    Processing,
    Completed {
        artifact: ArtifactMeta,
    },
    Failed {
        artifact: Option<ArtifactMeta>,
        reason: Option<String>,
    },
}

impl Resolution {
    pub fn state(&self) -> JobState {
        match self {
            Resolution::Pending => JobState::Pending,
            Resolution::Processing => JobState::Processing,
            Resolution::Completed { .. } => JobState::Completed,
            Resolution::Failed { .. } => JobState::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }
}

/// Loaded terminal payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusPayload {
    Table(TableData),
    Failure(FailureReport),
}

/// Job status with its artifact loaded when the job is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusView {
    pub job_id: JobId,
    pub label: String,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<StatusPayload>,
}

impl StatusView {
    pub fn table(&self) -> Option<&TableData> {
        match &self.payload {
            Some(StatusPayload::Table(table)) => Some(table),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureReport> {
        match &self.payload {
            Some(StatusPayload::Failure(report)) => Some(report),
            _ => None,
        }
    }
}
