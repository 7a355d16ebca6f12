//! Work queue message and configuration types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, OutputRef};

/// Message carried by the work queue from submitter to worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationMessage {
    pub job_id: JobId,
    pub output: OutputRef,
    pub enqueued_at: DateTime<Utc>,
}

impl InvocationMessage {
    pub fn new(job_id: JobId, output: OutputRef) -> Self {
        Self {
            job_id,
            output,
            enqueued_at: Utc::now(),
        }
    }
}

/// Configuration for the queue broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue name, also the state file stem.
    pub name: String,
    /// Maximum number of undelivered messages (None = unbounded).
    pub max_queue_size: Option<usize>,
}

impl QueueConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_queue_size: None,
        }
    }

    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_queue_size = Some(size);
        self
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::new("extraction")
    }
}

/// Point-in-time statistics for the queue broker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Messages waiting for a consumer.
    pub pending: usize,
    /// Messages handed out and not yet acknowledged.
    pub in_flight: usize,
    /// Workers parked waiting for a message.
    pub parked_consumers: usize,
    /// Total deliveries since the broker started.
    pub delivered: u64,
    /// Total acknowledgements since the broker started.
    pub acknowledged: u64,
}
