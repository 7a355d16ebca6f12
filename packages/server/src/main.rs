//! Extraction server: HTTP transport in front of the job engine.

mod config;

use std::error::Error;
use std::sync::Arc;

use actors::{Engine, EngineParts};
use api::AppState;
use extractor::PdfTableExtractor;
use storage::{DocumentStore, ResultSink, Storage};
use tokio::sync::broadcast::error::RecvError;

use crate::config::AppConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env()?;

    let store = db::init(&config.db).await?;
    let storage = Storage::from_env().await?;
    tracing::info!("Using {} storage", storage.backend());

    let documents = DocumentStore::new(storage.clone(), config.upload_prefix.clone());
    let parts = EngineParts {
        store,
        documents: documents.clone(),
        sink: ResultSink::new(storage),
        extractor: Arc::new(PdfTableExtractor::new(documents)),
    };
    let engine = Engine::start(config.engine.clone(), parts).await?;
    spawn_event_logger(&engine);

    let app = api::router(AppState::new(engine.clone()));
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.shutdown().await;
    tracing::info!("Server stopped");
    Ok(())
}

fn spawn_event_logger(engine: &Engine) {
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::debug!("{}", event.description()),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Event logger skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
