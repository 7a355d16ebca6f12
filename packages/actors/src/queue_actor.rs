//! Queue actor: durable FIFO broker between submitters and workers.

use std::collections::VecDeque;

use jobs_core::{InvocationMessage, JobId, QueueConfig, QueueStats};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use serde::{Deserialize, Serialize};

use crate::messages::{QueueError, QueueMessage};
use crate::persistence::StatePersistence;

/// A delivery handed to a worker and not yet acknowledged.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct InFlight {
    worker_id: String,
    message: InvocationMessage,
}

/// What survives a restart.
#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueSnapshot {
    pending: Vec<InvocationMessage>,
    in_flight: Vec<InFlight>,
}

/// A worker parked on an empty queue.
struct Waiter {
    worker_id: String,
    reply: RpcReplyPort<Option<InvocationMessage>>,
}

/// Queue actor arguments.
pub struct QueueArgs {
    pub config: QueueConfig,
    pub persistence: StatePersistence,
}

/// State for the queue actor.
pub struct QueueActorState {
    config: QueueConfig,
    persistence: StatePersistence,
    pending: VecDeque<InvocationMessage>,
    in_flight: Vec<InFlight>,
    waiters: VecDeque<Waiter>,
    closed: bool,
    delivered: u64,
    acknowledged: u64,
}

impl QueueActorState {
    fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.pending.len(),
            in_flight: self.in_flight.len(),
            parked_consumers: self.waiters.len(),
            delivered: self.delivered,
            acknowledged: self.acknowledged,
        }
    }

    fn is_pending(&self, job_id: &JobId) -> bool {
        self.pending.iter().any(|m| &m.job_id == job_id)
    }

    async fn persist(&self) -> Result<(), QueueError> {
        let snapshot = QueueSnapshot {
            pending: self.pending.iter().cloned().collect(),
            in_flight: self.in_flight.clone(),
        };
        self.persistence
            .save(&self.config.name, &snapshot)
            .await
            .map_err(|e| QueueError::Persistence(e.to_string()))
    }

    /// Hand the head of the pending set to `worker_id`, durably.
    async fn deliver(
        &mut self,
        worker_id: String,
        reply: RpcReplyPort<Option<InvocationMessage>>,
    ) -> Result<(), QueueError> {
        let Some(message) = self.pending.pop_front() else {
            self.waiters.push_back(Waiter { worker_id, reply });
            return Ok(());
        };

        self.in_flight.push(InFlight {
            worker_id: worker_id.clone(),
            message: message.clone(),
        });
        if let Err(e) = self.persist().await {
            self.in_flight.pop();
            self.pending.push_front(message);
            self.waiters.push_back(Waiter { worker_id, reply });
            return Err(e);
        }

        if reply.send(Some(message.clone())).is_err() {
            // Consumer went away before the hand-off.
            tracing::debug!("Worker {} dropped its request; requeueing {}", worker_id, message.job_id);
            self.in_flight.retain(|f| !(f.worker_id == worker_id && f.message.job_id == message.job_id));
            self.pending.push_front(message);
            self.persist().await?;
            return Ok(());
        }

        self.delivered += 1;
        tracing::debug!("Delivered job {} to {}", message.job_id, worker_id);
        Ok(())
    }

    /// Match parked workers with pending messages.
    async fn dispatch(&mut self) -> Result<(), QueueError> {
        while !self.pending.is_empty() {
            let Some(waiter) = self.waiters.pop_front() else {
                break;
            };
            self.deliver(waiter.worker_id, waiter.reply).await?;
        }
        Ok(())
    }
}

/// Queue actor that owns the work queue.
pub struct QueueActor;

impl Actor for QueueActor {
    type Msg = QueueMessage;
    type State = QueueActorState;
    type Arguments = QueueArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting queue actor: {}", args.config.name);

        args.persistence.init().await?;
        let snapshot: QueueSnapshot = args
            .persistence
            .load(&args.config.name)
            .await?
            .unwrap_or_default();

        // Unacknowledged deliveries from a previous run go back first.
        let mut pending: VecDeque<InvocationMessage> =
            snapshot.in_flight.into_iter().map(|f| f.message).collect();
        pending.extend(snapshot.pending);

        if !pending.is_empty() {
            tracing::info!(
                "Recovered {} undelivered messages for queue {}",
                pending.len(),
                args.config.name
            );
        }

        let state = QueueActorState {
            config: args.config,
            persistence: args.persistence,
            pending,
            in_flight: Vec::new(),
            waiters: VecDeque::new(),
            closed: false,
            delivered: 0,
            acknowledged: 0,
        };
        state.persist().await?;
        Ok(state)
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            QueueMessage::Enqueue { message, reply } => {
                if state.closed {
                    let _ = reply.send(Err(QueueError::Closed));
                    return Ok(());
                }

                if state.is_pending(&message.job_id) {
                    tracing::debug!("Job {} already queued", message.job_id);
                    let _ = reply.send(Ok(()));
                    return Ok(());
                }

                if let Some(max) = state.config.max_queue_size
                    && state.pending.len() >= max
                {
                    let _ = reply.send(Err(QueueError::Full { max }));
                    return Ok(());
                }

                let job_id = message.job_id.clone();
                state.pending.push_back(message);
                if let Err(e) = state.persist().await {
                    state.pending.retain(|m| m.job_id != job_id);
                    tracing::error!("Failed to enqueue {}: {}", job_id, e);
                    let _ = reply.send(Err(e));
                    return Ok(());
                }

                tracing::debug!("Enqueued job {}", job_id);
                let _ = reply.send(Ok(()));

                if let Err(e) = state.dispatch().await {
                    tracing::error!("Failed to dispatch on queue {}: {}", state.config.name, e);
                }
            }

            QueueMessage::RequestJob { worker_id, reply } => {
                if state.closed {
                    let _ = reply.send(None);
                    return Ok(());
                }
                if let Err(e) = state.deliver(worker_id, reply).await {
                    tracing::error!("Failed to deliver on queue {}: {}", state.config.name, e);
                }
            }

            QueueMessage::Ack { job_id, worker_id } => {
                let before = state.in_flight.len();
                if let Some(pos) = state
                    .in_flight
                    .iter()
                    .position(|f| f.message.job_id == job_id && f.worker_id == worker_id)
                {
                    state.in_flight.remove(pos);
                }
                if state.in_flight.len() == before {
                    tracing::warn!("Ack for unknown delivery {} from {}", job_id, worker_id);
                    return Ok(());
                }

                state.acknowledged += 1;
                if let Err(e) = state.persist().await {
                    tracing::error!("Failed to persist ack for {}: {}", job_id, e);
                }
            }

            QueueMessage::Release { job_id, worker_id } => {
                let Some(pos) = state
                    .in_flight
                    .iter()
                    .position(|f| f.message.job_id == job_id && f.worker_id == worker_id)
                else {
                    tracing::debug!("Release for unknown delivery {} from {}", job_id, worker_id);
                    return Ok(());
                };

                let released = state.in_flight.remove(pos);
                if !state.is_pending(&job_id) {
                    state.pending.push_back(released.message);
                }
                if let Err(e) = state.persist().await {
                    tracing::error!("Failed to persist release of {}: {}", job_id, e);
                }
                if !state.closed
                    && let Err(e) = state.dispatch().await
                {
                    tracing::error!("Failed to dispatch on queue {}: {}", state.config.name, e);
                }
            }

            QueueMessage::WorkerLost { worker_id } => {
                state.waiters.retain(|w| w.worker_id != worker_id);

                let (lost, kept): (Vec<_>, Vec<_>) = state
                    .in_flight
                    .drain(..)
                    .partition(|f| f.worker_id == worker_id);
                state.in_flight = kept;

                if lost.is_empty() {
                    return Ok(());
                }

                tracing::warn!(
                    "Returning {} unacknowledged deliveries from {}",
                    lost.len(),
                    worker_id
                );
                for f in lost.into_iter().rev() {
                    state.pending.push_front(f.message);
                }
                if let Err(e) = state.persist().await {
                    tracing::error!("Failed to persist requeue for {}: {}", worker_id, e);
                }
                if let Err(e) = state.dispatch().await {
                    tracing::error!("Failed to dispatch on queue {}: {}", state.config.name, e);
                }
            }

            QueueMessage::GetStats { reply } => {
                let _ = reply.send(state.stats());
            }

            QueueMessage::Close => {
                tracing::info!("Closing queue: {}", state.config.name);
                state.closed = true;
                for waiter in state.waiters.drain(..) {
                    let _ = waiter.reply.send(None);
                }
            }
        }

        Ok(())
    }
}
