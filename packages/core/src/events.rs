//! Lifecycle events broadcast to observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::JobId;

/// Events emitted as jobs and workers move through their lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// A job was accepted and its invocation message queued.
    JobSubmitted {
        job_id: JobId,
        label: String,
        timestamp: DateTime<Utc>,
    },
    /// A worker claimed the job and started extraction.
    JobStarted {
        job_id: JobId,
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
    /// The job committed COMPLETED.
    JobCompleted {
        job_id: JobId,
        worker_id: String,
        rows: usize,
        timestamp: DateTime<Utc>,
    },
    /// The job committed FAILED.
    JobFailed {
        job_id: JobId,
        worker_id: Option<String>,
        cause: String,
        timestamp: DateTime<Utc>,
    },
    /// An expired lease was found and the job re-enqueued.
    JobRequeued {
        job_id: JobId,
        previous_owner: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// A worker joined the pool.
    WorkerConnected {
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A worker left the pool.
    WorkerDisconnected {
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    pub fn submitted(job_id: JobId, label: impl Into<String>) -> Self {
        Self::JobSubmitted {
            job_id,
            label: label.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn started(job_id: JobId, worker_id: impl Into<String>) -> Self {
        Self::JobStarted {
            job_id,
            worker_id: worker_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn completed(job_id: JobId, worker_id: impl Into<String>, rows: usize) -> Self {
        Self::JobCompleted {
            job_id,
            worker_id: worker_id.into(),
            rows,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(job_id: JobId, worker_id: Option<String>, cause: impl Into<String>) -> Self {
        Self::JobFailed {
            job_id,
            worker_id,
            cause: cause.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn requeued(job_id: JobId, previous_owner: Option<String>) -> Self {
        Self::JobRequeued {
            job_id,
            previous_owner,
            timestamp: Utc::now(),
        }
    }

    pub fn worker_connected(worker_id: impl Into<String>) -> Self {
        Self::WorkerConnected {
            worker_id: worker_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn worker_disconnected(worker_id: impl Into<String>) -> Self {
        Self::WorkerDisconnected {
            worker_id: worker_id.into(),
            timestamp: Utc::now(),
        }
    }

    /// Get the timestamp of this event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::JobSubmitted { timestamp, .. }
            | JobEvent::JobStarted { timestamp, .. }
            | JobEvent::JobCompleted { timestamp, .. }
            | JobEvent::JobFailed { timestamp, .. }
            | JobEvent::JobRequeued { timestamp, .. }
            | JobEvent::WorkerConnected { timestamp, .. }
            | JobEvent::WorkerDisconnected { timestamp, .. } => *timestamp,
        }
    }

    /// Get the job ID if this is a job-related event.
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            JobEvent::JobSubmitted { job_id, .. }
            | JobEvent::JobStarted { job_id, .. }
            | JobEvent::JobCompleted { job_id, .. }
            | JobEvent::JobFailed { job_id, .. }
            | JobEvent::JobRequeued { job_id, .. } => Some(job_id),
            JobEvent::WorkerConnected { .. } | JobEvent::WorkerDisconnected { .. } => None,
        }
    }

    /// Get a human-readable description of this event.
    pub fn description(&self) -> String {
        match self {
            JobEvent::JobSubmitted { job_id, label, .. } => {
                format!("Job {} submitted ({})", job_id, label)
            }
            JobEvent::JobStarted {
                job_id, worker_id, ..
            } => format!("Job {} started by worker {}", job_id, worker_id),
            JobEvent::JobCompleted {
                job_id,
                worker_id,
                rows,
                ..
            } => format!(
                "Job {} completed by worker {} ({} rows)",
                job_id, worker_id, rows
            ),
            JobEvent::JobFailed { job_id, cause, .. } => {
                format!("Job {} failed: {}", job_id, cause)
            }
            JobEvent::JobRequeued { job_id, .. } => {
                format!("Job {} re-enqueued after lease expiry", job_id)
            }
            JobEvent::WorkerConnected { worker_id, .. } => {
                format!("Worker {} connected", worker_id)
            }
            JobEvent::WorkerDisconnected { worker_id, .. } => {
                format!("Worker {} disconnected", worker_id)
            }
        }
    }
}
