//! Message types for actor communication.

use jobs_core::{InvocationMessage, JobId, QueueStats};
use ractor::RpcReplyPort;

/// Messages for the QueueActor.
#[derive(Debug)]
pub enum QueueMessage {
    /// Add a message. Replies once the message is durable.
    Enqueue {
        message: InvocationMessage,
        reply: RpcReplyPort<Result<(), QueueError>>,
    },

    /// Request the next message for a worker. Parks until one exists;
    /// `None` means the queue closed.
    RequestJob {
        worker_id: String,
        reply: RpcReplyPort<Option<InvocationMessage>>,
    },

    /// Release an in-flight delivery.
    Ack { job_id: JobId, worker_id: String },

    /// Put one in-flight delivery back at the tail of the pending set.
    Release { job_id: JobId, worker_id: String },

    /// Return every unacknowledged delivery held by a dead worker.
    WorkerLost { worker_id: String },

    /// Get queue stats.
    GetStats { reply: RpcReplyPort<QueueStats> },

    /// Stop accepting messages and release parked workers.
    Close,
}

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Pull the next message from the queue and execute it.
    Poll,

    /// Stop after the current job.
    Shutdown,
}

/// Messages for the Supervisor.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// Enqueue an invocation message on the work queue.
    Enqueue {
        message: InvocationMessage,
        reply: RpcReplyPort<Result<(), QueueError>>,
    },

    /// Get queue statistics.
    GetStats { reply: RpcReplyPort<QueueStats> },

    /// Close the queue, let workers drain, then stop.
    Shutdown,

    /// Periodic tick for the lease reaper.
    Tick,
}

/// Work queue errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("Queue is closed")]
    Closed,

    #[error("Queue is full ({max} messages)")]
    Full { max: usize },

    #[error("Failed to persist queue state: {0}")]
    Persistence(String),

    #[error("Queue actor unreachable: {0}")]
    Unreachable(String),
}
