//! Supervisor actor for the queue broker, the worker pool and the lease reaper.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use jobs_core::{InvocationMessage, JobEvent, QueueConfig, QueueStats};
use ractor::rpc::CallResult;
use ractor::{Actor, ActorCell, ActorId, ActorProcessingErr, ActorRef, SupervisionEvent};

use crate::messages::{QueueError, QueueMessage, SupervisorMessage, WorkerMessage};
use crate::persistence::StatePersistence;
use crate::queue_actor::{QueueActor, QueueArgs};
use crate::worker_actor::{WorkerActor, WorkerArgs, WorkerContext};

/// Most expired leases handled per reaper tick.
const REAPER_BATCH: usize = 100;

/// Supervisor arguments.
pub struct SupervisorArgs {
    pub queue: QueueConfig,
    pub persistence: StatePersistence,
    pub concurrency: usize,
    /// Tick interval for the lease reaper; `None` disables it.
    pub reaper_interval: Option<Duration>,
    /// Prefix for worker ids, unique per engine instance.
    pub instance: String,
    pub context: Arc<WorkerContext>,
}

/// State for the supervisor actor.
pub struct SupervisorState {
    queue_config: QueueConfig,
    persistence: StatePersistence,
    queue: ActorRef<QueueMessage>,
    queue_id: ActorId,
    /// Live workers: actor id -> (worker id, actor ref).
    workers: HashMap<ActorId, (String, ActorRef<WorkerMessage>)>,
    context: Arc<WorkerContext>,
    reaper_enabled: bool,
    instance: String,
    /// Worker counter for unique IDs.
    worker_counter: u64,
    shutting_down: bool,
}

impl SupervisorState {
    /// Generate a unique worker ID.
    fn next_worker_id(&mut self) -> String {
        self.worker_counter += 1;
        format!("{}-worker-{}", self.instance, self.worker_counter)
    }
}

async fn spawn_queue(
    supervisor: ActorCell,
    config: &QueueConfig,
    persistence: &StatePersistence,
) -> Result<ActorRef<QueueMessage>, ActorProcessingErr> {
    let args = QueueArgs {
        config: config.clone(),
        persistence: persistence.clone(),
    };
    let (queue, _handle) = Actor::spawn_linked(None, QueueActor, args, supervisor)
        .await
        .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn queue: {}", e)))?;
    Ok(queue)
}

async fn spawn_worker(
    myself: &ActorRef<SupervisorMessage>,
    state: &mut SupervisorState,
) -> Result<(), ActorProcessingErr> {
    let worker_id = state.next_worker_id();
    let args = WorkerArgs {
        worker_id: worker_id.clone(),
        queue: state.queue.clone(),
        context: state.context.clone(),
    };

    let (worker, _handle) = Actor::spawn_linked(None, WorkerActor, args, myself.get_cell())
        .await
        .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn worker: {}", e)))?;

    state.workers.insert(worker.get_id(), (worker_id, worker));
    Ok(())
}

/// Re-enqueue PROCESSING jobs whose lease expired.
async fn reap_expired_leases(state: &SupervisorState) {
    let store = &state.context.store;
    let now = Utc::now();

    let expired = match store.expired_leases(now, REAPER_BATCH).await {
        Ok(jobs) => jobs,
        Err(e) => {
            tracing::warn!("Lease reaper query failed: {}", e);
            return;
        }
    };

    for job in expired {
        let Some(owner) = job.lease.as_ref().map(|l| l.owner.clone()) else {
            continue;
        };

        match store.release_expired_lease(&job.id, &owner, now).await {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                tracing::warn!("Failed to release lease on {}: {}", job.id, e);
                continue;
            }
        }

        let message = InvocationMessage::new(job.id.clone(), job.output.clone());
        let result = ractor::rpc::call(
            &state.queue,
            |reply| QueueMessage::Enqueue { message, reply },
            Some(Duration::from_secs(5)),
        )
        .await;

        match result {
            Ok(CallResult::Success(Ok(()))) => {
                tracing::warn!("Re-enqueued job {} after lease held by {} expired", job.id, owner);
                let _ = state
                    .context
                    .events
                    .send(JobEvent::requeued(job.id.clone(), Some(owner)));
            }
            Ok(CallResult::Success(Err(e))) => {
                tracing::error!("Failed to re-enqueue job {}: {}", job.id, e);
            }
            _ => tracing::error!("Queue unreachable while re-enqueueing job {}", job.id),
        }
    }
}

/// Supervisor actor that owns the queue and the worker pool.
pub struct Supervisor;

impl Actor for Supervisor {
    type Msg = SupervisorMessage;
    type State = SupervisorState;
    type Arguments = SupervisorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            "Starting supervisor with {} workers on queue {}",
            args.concurrency,
            args.queue.name
        );

        let queue = spawn_queue(myself.get_cell(), &args.queue, &args.persistence).await?;

        let mut state = SupervisorState {
            queue_config: args.queue,
            persistence: args.persistence,
            queue_id: queue.get_id(),
            queue,
            workers: HashMap::new(),
            context: args.context,
            reaper_enabled: args.reaper_interval.is_some(),
            instance: args.instance,
            worker_counter: 0,
            shutting_down: false,
        };

        for _ in 0..args.concurrency {
            spawn_worker(&myself, &mut state).await?;
        }

        if let Some(period) = args.reaper_interval {
            let myself_clone = myself.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                loop {
                    interval.tick().await;
                    if myself_clone.send_message(SupervisorMessage::Tick).is_err() {
                        break;
                    }
                }
            });
        }

        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::Enqueue { message, reply } => {
                let result = ractor::rpc::call(
                    &state.queue,
                    |queue_reply| QueueMessage::Enqueue {
                        message,
                        reply: queue_reply,
                    },
                    None,
                )
                .await;

                let outcome = match result {
                    Ok(CallResult::Success(outcome)) => outcome,
                    Ok(_) => Err(QueueError::Unreachable("no reply from queue".into())),
                    Err(e) => Err(QueueError::Unreachable(e.to_string())),
                };
                let _ = reply.send(outcome);
            }

            SupervisorMessage::GetStats { reply } => {
                let (tx, rx) = ractor::concurrency::oneshot();
                if state
                    .queue
                    .send_message(QueueMessage::GetStats { reply: tx.into() })
                    .is_ok()
                    && let Ok(stats) = rx.await
                {
                    let _ = reply.send(stats);
                    return Ok(());
                }
                let _ = reply.send(QueueStats::default());
            }

            SupervisorMessage::Shutdown => {
                tracing::info!("Shutting down supervisor");
                state.shutting_down = true;
                let _ = state.queue.send_message(QueueMessage::Close);
                for (_, worker) in state.workers.values() {
                    let _ = worker.send_message(WorkerMessage::Shutdown);
                }
                if state.workers.is_empty() {
                    state.queue.stop(None);
                    myself.stop(None);
                }
            }

            SupervisorMessage::Tick => {
                if state.reaper_enabled && !state.shutting_down {
                    reap_expired_leases(state).await;
                }
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let (cell, reason) = match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) => (cell, reason),
            SupervisionEvent::ActorFailed(cell, err) => (cell, Some(err.to_string())),
            _ => return Ok(()),
        };
        let id = cell.get_id();

        if id == state.queue_id {
            if state.shutting_down {
                myself.stop(None);
                return Ok(());
            }
            tracing::error!("Queue actor terminated ({:?}); restarting", reason);
            let queue =
                spawn_queue(myself.get_cell(), &state.queue_config, &state.persistence).await?;
            state.queue_id = queue.get_id();
            state.queue = queue;
            // Workers still bound to the old queue stop on their next poll and
            // are replaced against the new one.
            return Ok(());
        }

        let Some((worker_id, _)) = state.workers.remove(&id) else {
            return Ok(());
        };

        if state.shutting_down {
            tracing::debug!("Worker {} stopped during shutdown", worker_id);
            if state.workers.is_empty() {
                state.queue.stop(None);
            }
            return Ok(());
        }

        tracing::warn!("Worker {} terminated ({:?}); replacing it", worker_id, reason);
        let _ = state
            .queue
            .send_message(QueueMessage::WorkerLost { worker_id });
        spawn_worker(&myself, state).await?;

        Ok(())
    }
}

/// Start the supervisor.
pub async fn start_supervisor(
    args: SupervisorArgs,
) -> Result<(ActorRef<SupervisorMessage>, tokio::task::JoinHandle<()>), ractor::SpawnErr> {
    Actor::spawn(None, Supervisor, args).await
}
