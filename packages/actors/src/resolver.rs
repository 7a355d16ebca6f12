//! Status resolver: the read path behind polling.

use db::{DbError, JobStore};
use jobs_core::{
    Artifact, ArtifactKind, FailureReport, Job, JobId, JobState, Resolution, StatusPayload,
    StatusView,
};
use storage::{ResultSink, SinkError};

/// Errors surfaced to pollers.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("{} file not found: {key}", kind_label(.kind))]
    ArtifactMissing { kind: ArtifactKind, key: String },

    #[error("Artifact {key} does not match job state {state}")]
    ArtifactMismatch { key: String, state: JobState },

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Result storage error: {0}")]
    Sink(#[from] SinkError),
}

fn kind_label(kind: &ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Table => "CSV",
        ArtifactKind::Failure => "Error",
    }
}

/// Maps job ids to client-facing state, loading artifacts for terminal jobs.
///
/// Only committed record state is observed. Artifacts are written before the
/// terminal transition, so a terminal resolution always has a readable
/// artifact (or an inline failure reason).
#[derive(Clone)]
pub struct StatusResolver {
    store: JobStore,
    sink: ResultSink,
}

impl StatusResolver {
    pub fn new(store: JobStore, sink: ResultSink) -> Self {
        Self { store, sink }
    }

    async fn load_job(&self, id: &JobId) -> Result<Job, ResolveError> {
        match self.store.get(id).await {
            Ok(job) => Ok(job),
            Err(DbError::NotFound(_)) => Err(ResolveError::NotFound(id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve state from the job record alone.
    pub async fn resolve(&self, id: &JobId) -> Result<Resolution, ResolveError> {
        let job = self.load_job(id).await?;
        Ok(resolution_of(&job))
    }

    /// Resolve and, for terminal jobs, load the artifact.
    pub async fn poll(&self, id: &JobId) -> Result<StatusView, ResolveError> {
        let job = self.load_job(id).await?;

        let payload = match resolution_of(&job) {
            Resolution::Pending | Resolution::Processing => None,
            Resolution::Completed { artifact } => match self.read(&artifact.key, artifact.kind).await? {
                Artifact::Table(table) => Some(StatusPayload::Table(table)),
                Artifact::Failure(_) => {
                    return Err(ResolveError::ArtifactMismatch {
                        key: artifact.key,
                        state: job.state,
                    });
                }
            },
            Resolution::Failed {
                artifact: Some(artifact),
                ..
            } => match self.read(&artifact.key, artifact.kind).await? {
                Artifact::Failure(report) => Some(StatusPayload::Failure(report)),
                Artifact::Table(_) => {
                    return Err(ResolveError::ArtifactMismatch {
                        key: artifact.key,
                        state: job.state,
                    });
                }
            },
            Resolution::Failed {
                artifact: None,
                reason,
            } => Some(StatusPayload::Failure(FailureReport::new(
                reason.unwrap_or_else(|| "Unknown failure".to_string()),
                "no failure artifact was written",
            ))),
        };

        Ok(StatusView {
            job_id: job.id,
            label: job.label,
            state: job.state,
            payload,
        })
    }

    async fn read(&self, key: &str, kind: ArtifactKind) -> Result<Artifact, ResolveError> {
        match self.sink.read_key(key).await {
            Ok(artifact) => Ok(artifact),
            Err(SinkError::NotFound { key }) => Err(ResolveError::ArtifactMissing { kind, key }),
            Err(e) => Err(e.into()),
        }
    }
}

fn resolution_of(job: &Job) -> Resolution {
    match job.state {
        JobState::Pending => Resolution::Pending,
        JobState::Processing => Resolution::Processing,
        JobState::Completed => match &job.artifact {
            Some(artifact) => Resolution::Completed {
                artifact: artifact.clone(),
            },
            // Unreachable through the store, which refuses COMPLETED without
            // an artifact.
            None => Resolution::Failed {
                artifact: None,
                reason: Some("Completed job has no artifact".to_string()),
            },
        },
        JobState::Failed => Resolution::Failed {
            artifact: job.artifact.clone(),
            reason: job.failure_reason.clone(),
        },
    }
}
