//! Worker actor for executing extraction jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use db::{DbError, JobStore};
use jobs_core::{
    Artifact, ArtifactMeta, ExtractionError, Extractor, FailureReport, InvocationMessage, Job,
    JobEvent, JobId, JobState, TableData, Transition,
};
use ractor::rpc::CallResult;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use storage::{ResultSink, SinkError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::messages::{QueueMessage, WorkerMessage};

/// Shared collaborators every worker needs.
pub struct WorkerContext {
    pub store: JobStore,
    pub sink: ResultSink,
    pub extractor: Arc<dyn Extractor>,
    pub events: broadcast::Sender<JobEvent>,
    pub lease_ttl: Duration,
}

impl WorkerContext {
    fn emit(&self, event: JobEvent) {
        let _ = self.events.send(event);
    }
}

/// State for the worker actor.
pub struct WorkerActorState {
    /// Unique worker ID, also the lease owner.
    pub worker_id: String,
    /// Queue actor reference.
    pub queue: ActorRef<QueueMessage>,
    pub context: Arc<WorkerContext>,
    /// Job being executed, if any.
    pub current_job: Option<JobId>,
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub worker_id: String,
    pub queue: ActorRef<QueueMessage>,
    pub context: Arc<WorkerContext>,
}

/// Worker actor that executes jobs.
///
/// Each `Poll` blocks on the queue until a message arrives, runs it to a
/// terminal commit, acknowledges it and polls again. A closed queue stops the
/// worker.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting worker: {}", args.worker_id);
        Ok(WorkerActorState {
            worker_id: args.worker_id,
            queue: args.queue,
            context: args.context,
            current_job: None,
        })
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.context.emit(JobEvent::worker_connected(&state.worker_id));
        myself.send_message(WorkerMessage::Poll)?;
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!("Worker stopped: {}", state.worker_id);
        state.context.emit(JobEvent::worker_disconnected(&state.worker_id));
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => {
                let result = ractor::rpc::call(
                    &state.queue,
                    |reply| QueueMessage::RequestJob {
                        worker_id: state.worker_id.clone(),
                        reply,
                    },
                    None,
                )
                .await;

                match result {
                    Ok(CallResult::Success(Some(invocation))) => {
                        state.current_job = Some(invocation.job_id.clone());
                        let disposition =
                            execute(&state.context, &state.worker_id, &invocation).await;
                        state.current_job = None;

                        match disposition {
                            Disposition::Ack => {
                                state.queue.send_message(QueueMessage::Ack {
                                    job_id: invocation.job_id,
                                    worker_id: state.worker_id.clone(),
                                })?;
                            }
                            Disposition::Hold => {}
                            Disposition::Defer(delay) => {
                                let queue = state.queue.clone();
                                let job_id = invocation.job_id;
                                let worker_id = state.worker_id.clone();
                                tokio::spawn(async move {
                                    tokio::time::sleep(delay).await;
                                    let _ = queue.send_message(QueueMessage::Release { job_id, worker_id });
                                });
                            }
                        }
                        myself.send_message(WorkerMessage::Poll)?;
                    }
                    Ok(CallResult::Success(None)) => {
                        tracing::info!("Queue closed, stopping worker {}", state.worker_id);
                        myself.stop(None);
                    }
                    Ok(_) | Err(_) => {
                        tracing::warn!("Queue unreachable from worker {}", state.worker_id);
                        myself.stop(Some("queue unreachable".to_string()));
                    }
                }
            }

            WorkerMessage::Shutdown => {
                tracing::info!("Shutting down worker: {}", state.worker_id);
                myself.stop(None);
            }
        }

        Ok(())
    }
}

/// What to do with the delivery once execution returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// Release the message.
    Ack,
    /// Keep it in flight; it is redelivered after a queue restart.
    Hold,
    /// Keep it in flight, then put it back on the queue after the delay.
    Defer(Duration),
}

/// Slack added after a foreign lease expires before retrying.
const LEASE_GRACE: Duration = Duration::from_millis(50);

/// Run one invocation message to a terminal commit.
pub(crate) async fn execute(
    ctx: &WorkerContext,
    worker_id: &str,
    invocation: &InvocationMessage,
) -> Disposition {
    let job_id = &invocation.job_id;

    let job = match ctx.store.claim(job_id, worker_id, ctx.lease_ttl).await {
        Ok(Some(job)) => job,
        Ok(None) => return refused_claim(ctx, worker_id, job_id).await,
        Err(DbError::NotFound(_)) => {
            tracing::warn!("Job {} has no record; dropping message", job_id);
            return Disposition::Ack;
        }
        Err(e) => {
            tracing::error!("Failed to claim job {}: {}", job_id, e);
            return Disposition::Hold;
        }
    };

    tracing::info!("Worker {} started job {}", worker_id, job_id);
    ctx.emit(JobEvent::started(job_id.clone(), worker_id));

    let keeper = LeaseKeeper::start(ctx.store.clone(), job_id.clone(), worker_id, ctx.lease_ttl);
    let outcome = run_extractor(ctx, &job).await;

    let artifact = match outcome {
        Ok(table) if table.is_empty() => {
            Artifact::Failure(FailureReport::from_error(&ExtractionError::NoTables))
        }
        Ok(table) => Artifact::Table(table),
        Err(e) => {
            tracing::warn!("Extraction failed for job {}: {}", job_id, e);
            Artifact::Failure(FailureReport::from_error(&e))
        }
    };

    let recorded = record_artifact(ctx, invocation, artifact).await;
    drop(keeper);
    commit(ctx, worker_id, &job, recorded).await;

    Disposition::Ack
}

/// Decide what happens to a delivery whose claim was refused.
///
/// A live lease held by a worker of another engine instance may belong to a
/// run that died with that instance, so the delivery is retried once the
/// lease lapses. Terminal jobs and leases held inside this instance are
/// already accounted for and the delivery is dropped.
async fn refused_claim(ctx: &WorkerContext, worker_id: &str, job_id: &JobId) -> Disposition {
    let job = match ctx.store.get(job_id).await {
        Ok(job) => job,
        Err(e) => {
            tracing::error!("Failed to inspect refused job {}: {}", job_id, e);
            return Disposition::Hold;
        }
    };

    if job.state == JobState::Processing
        && let Some(lease) = &job.lease
        && !same_instance(&lease.owner, worker_id)
    {
        let remaining = (lease.expires_at - Utc::now()).to_std().unwrap_or_default();
        tracing::info!(
            "Job {} is leased by {} until {}; retrying after it lapses",
            job_id,
            lease.owner,
            lease.expires_at
        );
        return Disposition::Defer(remaining + LEASE_GRACE);
    }

    tracing::warn!("Claim on job {} refused for {}; dropping message", job_id, worker_id);
    Disposition::Ack
}

/// Engine instance part of a `<instance>-worker-<n>` id.
fn instance_of(worker_id: &str) -> Option<&str> {
    worker_id.split_once("-worker-").map(|(instance, _)| instance)
}

fn same_instance(a: &str, b: &str) -> bool {
    matches!((instance_of(a), instance_of(b)), (Some(x), Some(y)) if x == y)
}

/// Run the extractor on its own task so a panic is contained.
async fn run_extractor(ctx: &WorkerContext, job: &Job) -> Result<TableData, ExtractionError> {
    let extractor = ctx.extractor.clone();
    let source = job.source.clone();

    tracing::debug!("Running {} on {}", extractor.name(), source);

    match tokio::spawn(async move { extractor.extract(&source).await }).await {
        Ok(result) => result,
        Err(join_err) if join_err.is_panic() => {
            let payload = join_err.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            Err(ExtractionError::Panicked(message))
        }
        Err(join_err) => Err(ExtractionError::Other(join_err.to_string())),
    }
}

/// Outcome of writing to the result sink.
enum Recorded {
    Artifact { artifact: Artifact, meta: ArtifactMeta },
    Inline { reason: String },
}

async fn record_artifact(
    ctx: &WorkerContext,
    invocation: &InvocationMessage,
    artifact: Artifact,
) -> Recorded {
    let (output, job_id) = (&invocation.output, &invocation.job_id);

    let write_err = match ctx.sink.write(output, job_id, &artifact).await {
        Ok(meta) => return Recorded::Artifact { artifact, meta },
        Err(SinkError::AlreadyExists { key }) => {
            // A previous lease holder got there first; its artifact wins.
            return match ctx.sink.existing(output, job_id).await {
                Ok((existing, meta)) => {
                    tracing::info!("Adopting existing artifact {} for job {}", key, job_id);
                    Recorded::Artifact {
                        artifact: existing,
                        meta,
                    }
                }
                Err(e) => Recorded::Inline {
                    reason: format!("Artifact {key} exists but could not be read: {e}"),
                },
            };
        }
        Err(e) => e,
    };

    tracing::error!("Failed to write artifact for job {}: {}", job_id, write_err);

    let original = match &artifact {
        Artifact::Table(table) => format!("extraction produced {} rows", table.row_count()),
        Artifact::Failure(report) => report.cause.clone(),
    };
    let fallback = Artifact::Failure(FailureReport::new(
        format!("Failed to write result: {write_err}"),
        format!("original outcome: {original}"),
    ));

    match ctx.sink.write(output, job_id, &fallback).await {
        Ok(meta) => Recorded::Artifact {
            artifact: fallback,
            meta,
        },
        Err(fallback_err) => Recorded::Inline {
            reason: format!(
                "Failed to write result: {write_err}; fallback artifact also failed: {fallback_err}; original outcome: {original}"
            ),
        },
    }
}

async fn commit(ctx: &WorkerContext, worker_id: &str, job: &Job, recorded: Recorded) {
    let (transition, event) = match recorded {
        Recorded::Artifact { artifact, meta } => {
            let event = match &artifact {
                Artifact::Table(table) => {
                    JobEvent::completed(job.id.clone(), worker_id, table.row_count())
                }
                Artifact::Failure(report) => {
                    JobEvent::failed(job.id.clone(), Some(worker_id.to_string()), &report.cause)
                }
            };
            (
                Transition::to(meta.kind.terminal_state()).with_artifact(meta),
                event,
            )
        }
        Recorded::Inline { reason } => (
            Transition::to(JobState::Failed).with_failure_reason(reason.clone()),
            JobEvent::failed(job.id.clone(), Some(worker_id.to_string()), reason),
        ),
    };

    let target = transition.to;
    match ctx.store.transition(&job.id, transition.held_by(worker_id)).await {
        Ok(_) => {
            tracing::info!("Job {} committed {} by {}", job.id, target, worker_id);
            ctx.emit(event);
        }
        Err(e @ (DbError::InvalidTransition { .. } | DbError::LeaseNotHeld { .. })) => {
            tracing::warn!("Commit of job {} by {} lost a race: {}", job.id, worker_id, e);
        }
        Err(e) => {
            tracing::error!("Failed to commit job {} as {}: {}", job.id, target, e);
        }
    }
}

/// Renews a job lease in the background until dropped.
struct LeaseKeeper {
    handle: JoinHandle<()>,
}

impl LeaseKeeper {
    fn start(store: JobStore, job_id: JobId, owner: &str, ttl: Duration) -> Self {
        let owner = owner.to_string();
        let period = (ttl / 3).max(Duration::from_millis(100));

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // First tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                match store.renew_lease(&job_id, &owner, ttl).await {
                    Ok(true) => tracing::trace!("Renewed lease on {} for {}", job_id, owner),
                    Ok(false) => {
                        tracing::warn!("Lease on job {} lost by {}", job_id, owner);
                        break;
                    }
                    Err(e) => tracing::warn!("Failed to renew lease on {}: {}", job_id, e),
                }
            }
        });

        Self { handle }
    }
}

impl Drop for LeaseKeeper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
