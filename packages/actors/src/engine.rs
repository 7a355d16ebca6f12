//! Engine facade: submission, polling and lifecycle of the actor system.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use db::{DbError, JobStore};
use jobs_core::{
    AdmissionError, AdmissionPolicy, Artifact, Extractor, FailureReport, InvocationMessage, Job,
    JobEvent, JobId, JobState, OutputRef, QueueConfig, QueueStats, Resolution, StatusView,
    Transition, Upload,
};
use ractor::ActorRef;
use ractor::rpc::CallResult;
use storage::{DocumentStore, ResultSink, StorageError};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;

use crate::messages::{QueueError, SupervisorMessage};
use crate::persistence::StatePersistence;
use crate::resolver::{ResolveError, StatusResolver};
use crate::supervisor::{SupervisorArgs, start_supervisor};
use crate::worker_actor::WorkerContext;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of concurrent workers.
    pub concurrency: usize,
    /// Lease granted to a worker per claim, renewed while it runs.
    pub lease_ttl: Duration,
    /// Lease reaper tick; `None` disables the reaper.
    pub reaper_interval: Option<Duration>,
    /// Directory for the queue broker's state file.
    pub queue_state_dir: PathBuf,
    pub queue: QueueConfig,
    /// Output location recorded on every job.
    pub result_prefix: String,
    pub admission: AdmissionPolicy,
    /// Capacity of the lifecycle event channel.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            lease_ttl: Duration::from_secs(300),
            reaper_interval: None,
            queue_state_dir: PathBuf::from("./data/queues"),
            queue: QueueConfig::default(),
            result_prefix: "results".to_string(),
            admission: AdmissionPolicy::default(),
            event_capacity: 1024,
        }
    }
}

impl EngineConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn with_reaper(mut self, interval: Duration) -> Self {
        self.reaper_interval = Some(interval);
        self
    }

    pub fn with_queue_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.queue_state_dir = dir.into();
        self
    }

    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_result_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.result_prefix = prefix.into();
        self
    }

    pub fn with_admission(mut self, admission: AdmissionPolicy) -> Self {
        self.admission = admission;
        self
    }
}

/// Collaborators the engine is built from.
pub struct EngineParts {
    pub store: JobStore,
    pub documents: DocumentStore,
    pub sink: ResultSink,
    pub extractor: Arc<dyn Extractor>,
}

/// Errors starting or stopping the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Failed to spawn actors: {0}")]
    Spawn(#[from] ractor::SpawnErr),

    #[error("Supervisor unreachable: {0}")]
    Unreachable(String),
}

/// Errors returned by [`Engine::submit`].
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error("Duplicate job identifier: {0}")]
    DuplicateIdentifier(JobId),

    #[error("Queue unavailable: {0}")]
    QueueUnavailable(QueueError),

    #[error("Failed to store document: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(DbError),
}

impl From<DbError> for SubmitError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::DuplicateIdentifier(id) => match JobId::parse(&id) {
                Ok(id) => SubmitError::DuplicateIdentifier(id),
                Err(_) => SubmitError::Database(DbError::DuplicateIdentifier(id)),
            },
            other => SubmitError::Database(other),
        }
    }
}

struct EngineInner {
    config: EngineConfig,
    store: JobStore,
    documents: DocumentStore,
    sink: ResultSink,
    resolver: StatusResolver,
    events: broadcast::Sender<JobEvent>,
    supervisor: ActorRef<SupervisorMessage>,
    supervisor_handle: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a running job engine.
///
/// Cheap to clone; every clone talks to the same supervisor, queue and
/// worker pool.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Spawn the supervisor, queue broker and worker pool.
    pub async fn start(config: EngineConfig, parts: EngineParts) -> Result<Self, EngineError> {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        let context = Arc::new(WorkerContext {
            store: parts.store.clone(),
            sink: parts.sink.clone(),
            extractor: parts.extractor,
            events: events.clone(),
            lease_ttl: config.lease_ttl,
        });

        let instance = ulid::Ulid::new().to_string().to_lowercase();
        let args = SupervisorArgs {
            queue: config.queue.clone(),
            persistence: StatePersistence::new(&config.queue_state_dir),
            concurrency: config.concurrency,
            reaper_interval: config.reaper_interval,
            instance: instance[instance.len() - 6..].to_string(),
            context,
        };

        let (supervisor, handle) = start_supervisor(args).await?;
        tracing::info!("Engine started with {} workers", config.concurrency);

        Ok(Self {
            inner: Arc::new(EngineInner {
                resolver: StatusResolver::new(parts.store.clone(), parts.sink.clone()),
                config,
                store: parts.store,
                documents: parts.documents,
                sink: parts.sink,
                events,
                supervisor,
                supervisor_handle: Mutex::new(Some(handle)),
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &JobStore {
        &self.inner.store
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    /// Admit an upload under a fresh server-generated id.
    pub async fn submit(&self, upload: Upload) -> Result<Job, SubmitError> {
        self.submit_with_id(JobId::new(), upload).await
    }

    /// Admit an upload under a caller-chosen id.
    ///
    /// The job record is created PENDING, the document stored, the invocation
    /// message enqueued and the job moved to PROCESSING. When the queue refuses
    /// the message the job is failed with an artifact explaining why.
    pub async fn submit_with_id(&self, id: JobId, upload: Upload) -> Result<Job, SubmitError> {
        let inner = &self.inner;
        inner.config.admission.validate(&upload)?;

        let label = upload.label();
        let source = inner.documents.source_ref(&id);
        let output = OutputRef::new(inner.config.result_prefix.clone());

        let job = inner
            .store
            .create(id.clone(), label.clone(), source, output.clone())
            .await?;

        if let Err(e) = inner.documents.put(&id, upload.bytes).await {
            self.abort_submission(&job, "Failed to store document", &e).await;
            return Err(e.into());
        }

        let message = InvocationMessage::new(id.clone(), output);
        if let Err(e) = self.enqueue(message).await {
            tracing::error!("Enqueue of job {} failed: {}", id, e);
            self.abort_submission(&job, "Queue unavailable", &e).await;
            return Err(SubmitError::QueueUnavailable(e));
        }

        // A fast worker may already have claimed the job.
        let job = match inner
            .store
            .transition(&id, Transition::to(JobState::Processing))
            .await
        {
            Ok(job) => job,
            Err(DbError::InvalidTransition { from, .. }) => {
                tracing::debug!("Job {} already {} when submission committed", id, from);
                inner.store.get(&id).await?
            }
            Err(e) => {
                tracing::warn!("Failed to mark job {} processing: {}", id, e);
                inner.store.get(&id).await?
            }
        };

        tracing::info!("Submitted job {} ({})", id, label);
        let _ = inner.events.send(JobEvent::submitted(id, label));
        Ok(job)
    }

    async fn enqueue(&self, message: InvocationMessage) -> Result<(), QueueError> {
        let result = ractor::rpc::call(
            &self.inner.supervisor,
            |reply| SupervisorMessage::Enqueue { message, reply },
            None,
        )
        .await;

        match result {
            Ok(CallResult::Success(outcome)) => outcome,
            Ok(_) => Err(QueueError::Unreachable("no reply from supervisor".into())),
            Err(e) => Err(QueueError::Unreachable(e.to_string())),
        }
    }

    /// Drive a job that never reached the queue to FAILED with a failure artifact.
    async fn abort_submission(
        &self,
        job: &Job,
        cause: &str,
        err: &(dyn std::error::Error + Send + Sync + 'static),
    ) {
        let inner = &self.inner;
        let mut report = FailureReport::from_error(err);
        report.cause = format!("{cause}: {}", report.cause);

        if let Err(e) = inner
            .store
            .transition(&job.id, Transition::to(JobState::Processing))
            .await
        {
            tracing::error!("Failed to move aborted job {} to processing: {}", job.id, e);
            return;
        }

        let transition = match inner
            .sink
            .write(&job.output, &job.id, &Artifact::Failure(report.clone()))
            .await
        {
            Ok(meta) => Transition::to(JobState::Failed).with_artifact(meta),
            Err(e) => Transition::to(JobState::Failed)
                .with_failure_reason(format!("{}; failure artifact not written: {}", report.cause, e)),
        };

        match inner.store.transition(&job.id, transition).await {
            Ok(_) => {
                let _ = inner
                    .events
                    .send(JobEvent::failed(job.id.clone(), None, report.cause));
            }
            Err(e) => tracing::error!("Failed to fail aborted job {}: {}", job.id, e),
        }
    }

    /// Resolve a job's state from its record.
    pub async fn resolve(&self, id: &JobId) -> Result<Resolution, ResolveError> {
        self.inner.resolver.resolve(id).await
    }

    /// Resolve a job's state and load its artifact when terminal.
    pub async fn poll(&self, id: &JobId) -> Result<StatusView, ResolveError> {
        self.inner.resolver.poll(id).await
    }

    /// Current queue statistics.
    pub async fn stats(&self) -> Result<QueueStats, EngineError> {
        let result = ractor::rpc::call(
            &self.inner.supervisor,
            |reply| SupervisorMessage::GetStats { reply },
            Some(Duration::from_secs(5)),
        )
        .await;

        match result {
            Ok(CallResult::Success(stats)) => Ok(stats),
            Ok(_) => Err(EngineError::Unreachable("no reply from supervisor".into())),
            Err(e) => Err(EngineError::Unreachable(e.to_string())),
        }
    }

    /// Close the queue, let in-progress jobs finish and stop every actor.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down engine");
        let _ = self.inner.supervisor.send_message(SupervisorMessage::Shutdown);

        let handle = self.inner.supervisor_handle.lock().await.take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::warn!("Supervisor task ended abnormally: {}", e);
        }
    }
}
