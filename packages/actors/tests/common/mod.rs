#![allow(dead_code)]

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use actors::{Engine, EngineConfig, EngineParts};
use bytes::Bytes;
use db::DbConfig;
use jobs_core::{Extractor, JobId, Resolution, Upload};
use storage::{DocumentStore, ResultSink, Storage, StorageConfig};
use tempfile::TempDir;

pub struct Harness {
    pub engine: Engine,
    pub documents: DocumentStore,
    pub sink: ResultSink,
    pub dir: TempDir,
}

/// Start an engine over in-memory storage.
pub async fn start_engine<E, F>(config: EngineConfig, make_extractor: F) -> Result<Harness, Box<dyn Error>>
where
    E: Extractor,
    F: FnOnce(DocumentStore) -> E,
{
    let storage = Storage::new(StorageConfig::memory()).await?;
    start_engine_on(storage, config, make_extractor).await
}

/// Start an engine over the given storage.
pub async fn start_engine_on<E, F>(
    storage: Storage,
    config: EngineConfig,
    make_extractor: F,
) -> Result<Harness, Box<dyn Error>>
where
    E: Extractor,
    F: FnOnce(DocumentStore) -> E,
{
    let dir = tempfile::tempdir()?;
    let store = db::init(&DbConfig::memory()).await?;
    let documents = DocumentStore::new(storage.clone(), "uploads");
    let sink = ResultSink::new(storage);

    let parts = EngineParts {
        store,
        documents: documents.clone(),
        sink: sink.clone(),
        extractor: Arc::new(make_extractor(documents.clone())),
    };
    let config = config.with_queue_state_dir(dir.path().join("queues"));
    let engine = Engine::start(config, parts).await?;

    Ok(Harness {
        engine,
        documents,
        sink,
        dir,
    })
}

pub fn pdf_upload(name: &str, body: &'static [u8]) -> Upload {
    Upload::new(name, Some("application/pdf".to_string()), Bytes::from_static(body))
}

/// Poll `resolve` until the job is terminal.
pub async fn wait_terminal(engine: &Engine, id: &JobId) -> Result<Resolution, Box<dyn Error>> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let resolution = engine.resolve(id).await?;
        if resolution.is_terminal() {
            return Ok(resolution);
        }
        if tokio::time::Instant::now() > deadline {
            return Err(format!("job {id} still {:?} after 10s", resolution.state()).into());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
