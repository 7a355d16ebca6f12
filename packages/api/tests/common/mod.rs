#![allow(dead_code)]

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use actors::{Engine, EngineConfig, EngineParts, FnExtractor};
use api::{AppState, router};
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use db::DbConfig;
use http_body_util::BodyExt;
use extractor::PdfTableExtractor;
use jobs_core::{ExtractFuture, ExtractResult, ExtractionError, Extractor, SourceRef, TableData};
use storage::{DocumentStore, ResultSink, Storage, StorageConfig};
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "extraction-test-boundary";

pub struct TestApp {
    pub app: Router,
    pub engine: Engine,
    pub storage: Storage,
    pub dir: TempDir,
}

/// Documents containing `table` yield a 3x2 table; anything else has none.
async fn keyword_extract(documents: DocumentStore, source: SourceRef) -> ExtractResult {
    let bytes = documents
        .get(&source)
        .await
        .map_err(|e| ExtractionError::SourceUnavailable {
            source_ref: source.to_string(),
            message: e.to_string(),
        })?;
    if bytes.windows(5).any(|w| w == b"table") {
        Ok(TableData::from_iter(vec![vec!["h1", "h2"], vec!["a", "b"], vec!["c", "d"]]))
    } else {
        Err(ExtractionError::NoTables)
    }
}

/// App whose extractor keys off the `table` keyword in the upload bytes.
pub async fn spawn_app(config: EngineConfig) -> Result<TestApp, Box<dyn Error>> {
    spawn_app_with(config, |documents| {
        Arc::new(FnExtractor::new("keyword", move |source: &SourceRef| -> ExtractFuture {
            Box::pin(keyword_extract(documents.clone(), source.clone()))
        }))
    })
    .await
}

/// App running the production PDF extractor.
pub async fn spawn_pdf_app(config: EngineConfig) -> Result<TestApp, Box<dyn Error>> {
    spawn_app_with(config, |documents| Arc::new(PdfTableExtractor::new(documents))).await
}

pub async fn spawn_app_with<F>(config: EngineConfig, make_extractor: F) -> Result<TestApp, Box<dyn Error>>
where
    F: FnOnce(DocumentStore) -> Arc<dyn Extractor>,
{
    let dir = tempfile::tempdir()?;
    let storage = Storage::new(StorageConfig::memory()).await?;
    let documents = DocumentStore::new(storage.clone(), "uploads");
    let sink = ResultSink::new(storage.clone());
    let extractor = make_extractor(documents.clone());

    let parts = EngineParts {
        store: db::init(&DbConfig::memory()).await?,
        documents,
        sink,
        extractor,
    };
    let engine = Engine::start(config.with_queue_state_dir(dir.path().join("queues")), parts).await?;
    let app = router(AppState::new(engine.clone()));

    Ok(TestApp {
        app,
        engine,
        storage,
        dir,
    })
}

/// Build a multipart upload with a single file part.
pub fn upload_request(field: &str, filename: &str, content_type: &str, body: &[u8]) -> Request<Body> {
    let mut payload = Vec::new();
    payload.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    payload.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    payload.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    payload.extend_from_slice(body);
    payload.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/upload_pdf")
        .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(payload))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn send(app: &Router, request: Request<Body>) -> Result<Response<Body>, Box<dyn Error>> {
    Ok(app.clone().oneshot(request).await?)
}

pub async fn body_bytes(response: Response<Body>) -> Result<Vec<u8>, Box<dyn Error>> {
    Ok(response.into_body().collect().await?.to_bytes().to_vec())
}

pub async fn body_json(response: Response<Body>) -> Result<serde_json::Value, Box<dyn Error>> {
    Ok(serde_json::from_slice(&body_bytes(response).await?)?)
}

/// Poll `/status/:id` until it stops answering with an in-flight message.
pub async fn wait_for_result(app: &Router, id: &str) -> Result<Response<Body>, Box<dyn Error>> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let response = send(app, get(&format!("/status/{id}"))).await?;
        let is_json = response
            .headers()
            .get("content-type")
            .is_some_and(|v| v.as_bytes().starts_with(b"application/json"));
        if response.status() != StatusCode::OK || !is_json {
            return Ok(response);
        }
        if tokio::time::Instant::now() > deadline {
            return Err(format!("job {id} still in flight after 10s").into());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
