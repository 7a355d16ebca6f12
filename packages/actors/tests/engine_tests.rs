#![allow(clippy::disallowed_methods)]

mod common;

use std::collections::HashMap;
use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actors::{EngineConfig, FnExtractor, ResolveError, SubmitError};
use bytes::Bytes;
use jobs_core::{
    AdmissionError, Artifact, ExtractFuture, ExtractResult, ExtractionError, FailureReport, JobEvent, JobId,
    JobState, OutputRef, QueueConfig, Resolution, SourceRef, TableData, Upload,
};
use storage::{DocumentStore, Storage, StorageConfig};
use tokio::sync::Notify;

use common::{pdf_upload, start_engine, start_engine_on, wait_terminal};

fn three_by_two() -> TableData {
    TableData::from_iter(vec![vec!["h1", "h2"], vec!["a", "b"], vec!["c", "d"]])
}

fn fixed_table(table: TableData) -> FnExtractor<impl Fn(&SourceRef) -> ExtractFuture + Send + Sync + 'static> {
    FnExtractor::new("fixed", move |_: &SourceRef| -> ExtractFuture {
        let table = table.clone();
        Box::pin(async move { Ok(table) })
    })
}

/// Read the stored document and reject anything without a PDF header.
async fn read_checked(documents: DocumentStore, source: SourceRef) -> ExtractResult {
    let bytes = documents
        .get(&source)
        .await
        .map_err(|e| ExtractionError::SourceUnavailable {
            source_ref: source.to_string(),
            message: e.to_string(),
        })?;
    if !bytes.starts_with(b"%PDF") {
        return Err(ExtractionError::Parse("invalid file header".into()));
    }
    Ok(three_by_two())
}

async fn explode() -> ExtractResult {
    panic!("extractor exploded")
}

#[tokio::test]
async fn table_job_moves_from_processing_to_completed() -> Result<(), Box<dyn Error>> {
    let gate = Arc::new(Notify::new());
    let extractor_gate = gate.clone();
    let harness = start_engine(EngineConfig::default().with_concurrency(2), move |_| {
        FnExtractor::new("gated", move |_: &SourceRef| -> ExtractFuture {
            let gate = extractor_gate.clone();
            Box::pin(async move {
                gate.notified().await;
                Ok(three_by_two())
            })
        })
    })
    .await?;
    let engine = &harness.engine;
    let mut events = engine.subscribe();

    let job = engine.submit(pdf_upload("report.pdf", b"%PDF-1.4")).await?;
    assert_eq!(job.label, "report");

    let early = engine.resolve(&job.id).await?;
    assert!(matches!(early, Resolution::Pending | Resolution::Processing));
    let view = engine.poll(&job.id).await?;
    assert!(view.payload.is_none());

    gate.notify_one();
    let resolution = wait_terminal(engine, &job.id).await?;
    assert_eq!(resolution.state(), JobState::Completed);

    let view = engine.poll(&job.id).await?;
    assert_eq!(view.state, JobState::Completed);
    assert_eq!(
        view.table().ok_or("missing table")?.rows,
        vec![
            vec!["h1".to_string(), "h2".to_string()],
            vec!["a".to_string(), "b".to_string()],
            vec!["c".to_string(), "d".to_string()],
        ]
    );

    // Terminal results are stable across calls.
    assert_eq!(engine.poll(&job.id).await?, view);
    assert_eq!(engine.resolve(&job.id).await?, resolution);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.job_id() == Some(&job.id) {
            seen.push(event);
        }
    }
    assert!(seen.iter().any(|e| matches!(e, JobEvent::JobStarted { .. })));
    assert!(seen.iter().any(|e| matches!(e, JobEvent::JobCompleted { rows: 3, .. })));

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn document_without_tables_fails() -> Result<(), Box<dyn Error>> {
    let harness = start_engine(EngineConfig::default(), |_| fixed_table(TableData::default())).await?;
    let engine = &harness.engine;

    let job = engine.submit(pdf_upload("empty.pdf", b"%PDF-1.4")).await?;
    let resolution = wait_terminal(engine, &job.id).await?;
    assert!(matches!(resolution, Resolution::Failed { artifact: Some(_), .. }));

    let view = engine.poll(&job.id).await?;
    let report = view.failure().ok_or("missing failure report")?;
    assert!(report.render().contains("No tables found"));

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn corrupt_document_fails_with_parser_cause() -> Result<(), Box<dyn Error>> {
    let harness = start_engine(EngineConfig::default(), |documents| {
        FnExtractor::new("header-check", move |source: &SourceRef| -> ExtractFuture {
            Box::pin(read_checked(documents.clone(), source.clone()))
        })
    })
    .await?;
    let engine = &harness.engine;

    let job = engine.submit(pdf_upload("broken.pdf", b"garbage")).await?;
    assert_eq!(wait_terminal(engine, &job.id).await?.state(), JobState::Failed);

    let report = engine.poll(&job.id).await?.failure().cloned().ok_or("missing report")?;
    assert!(report.cause.contains("invalid file header"), "{}", report.cause);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn unreadable_source_surfaces_io_cause() -> Result<(), Box<dyn Error>> {
    let storage = Storage::new(StorageConfig::memory()).await?;
    let gate = Arc::new(Notify::new());
    let extractor_gate = gate.clone();

    let harness = start_engine_on(storage.clone(), EngineConfig::default(), move |documents| {
        FnExtractor::new("reader", move |source: &SourceRef| -> ExtractFuture {
            let documents = documents.clone();
            let source = source.clone();
            let gate = extractor_gate.clone();
            Box::pin(async move {
                gate.notified().await;
                read_checked(documents, source).await
            })
        })
    })
    .await?;
    let engine = &harness.engine;

    let job = engine.submit(pdf_upload("gone.pdf", b"%PDF-1.4")).await?;
    storage.delete(job.source.as_str()).await?;
    gate.notify_one();

    assert_eq!(wait_terminal(engine, &job.id).await?.state(), JobState::Failed);
    let report = engine.poll(&job.id).await?.failure().cloned().ok_or("missing report")?;
    assert!(report.cause.contains("unavailable"), "{}", report.cause);
    assert!(report.cause.contains("not found"), "{}", report.cause);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn unknown_id_is_not_found() -> Result<(), Box<dyn Error>> {
    let harness = start_engine(EngineConfig::default(), |_| fixed_table(three_by_two())).await?;

    let id = JobId::parse("unknown-id")?;
    assert!(matches!(harness.engine.resolve(&id).await, Err(ResolveError::NotFound(_))));
    assert!(matches!(harness.engine.poll(&id).await, Err(ResolveError::NotFound(_))));

    harness.engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn duplicate_identifier_is_rejected() -> Result<(), Box<dyn Error>> {
    let harness = start_engine(EngineConfig::default(), |_| fixed_table(three_by_two())).await?;
    let engine = &harness.engine;
    let id = JobId::parse("client-1")?;

    engine.submit_with_id(id.clone(), pdf_upload("first.pdf", b"%PDF-1")).await?;
    let second = engine
        .submit_with_id(id.clone(), pdf_upload("second.pdf", b"%PDF-2"))
        .await;
    assert!(matches!(second, Err(SubmitError::DuplicateIdentifier(_))));

    assert_eq!(wait_terminal(engine, &id).await?.state(), JobState::Completed);
    let view = engine.poll(&id).await?;
    assert_eq!(view.label, "first");
    assert_eq!(harness.documents.get(&SourceRef::new("uploads/client-1/document")).await?, Bytes::from_static(b"%PDF-1"));

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn rejected_upload_creates_no_job() -> Result<(), Box<dyn Error>> {
    let harness = start_engine(EngineConfig::default(), |_| fixed_table(three_by_two())).await?;
    let engine = &harness.engine;
    let id = JobId::parse("not-a-pdf")?;

    let upload = Upload::new("notes.txt", Some("text/plain".into()), Bytes::from_static(b"hi"));
    let result = engine.submit_with_id(id.clone(), upload).await;
    assert!(matches!(
        result,
        Err(SubmitError::Admission(AdmissionError::InvalidContentType { .. }))
    ));
    assert!(matches!(engine.resolve(&id).await, Err(ResolveError::NotFound(_))));

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn panicking_extractor_fails_the_job() -> Result<(), Box<dyn Error>> {
    let harness = start_engine(EngineConfig::default().with_concurrency(1), |_| {
        FnExtractor::new("panics", |_: &SourceRef| -> ExtractFuture {
            Box::pin(explode())
        })
    })
    .await?;
    let engine = &harness.engine;

    let job = engine.submit(pdf_upload("boom.pdf", b"%PDF")).await?;
    assert_eq!(wait_terminal(engine, &job.id).await?.state(), JobState::Failed);
    let report = engine.poll(&job.id).await?.failure().cloned().ok_or("missing report")?;
    assert!(report.cause.contains("extractor exploded"), "{}", report.cause);

    // The worker survives and keeps serving.
    let next = engine.submit(pdf_upload("again.pdf", b"%PDF")).await?;
    assert_eq!(wait_terminal(engine, &next.id).await?.state(), JobState::Failed);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn queue_refusal_fails_the_job_with_an_artifact() -> Result<(), Box<dyn Error>> {
    let config = EngineConfig::default().with_queue(QueueConfig::new("refusing").with_max_size(0));
    let harness = start_engine(config, |_| fixed_table(three_by_two())).await?;
    let engine = &harness.engine;
    let id = JobId::parse("refused")?;

    let result = engine.submit_with_id(id.clone(), pdf_upload("a.pdf", b"%PDF")).await;
    assert!(matches!(result, Err(SubmitError::QueueUnavailable(_))));

    let resolution = engine.resolve(&id).await?;
    assert!(matches!(resolution, Resolution::Failed { artifact: Some(_), .. }));
    let report = engine.poll(&id).await?.failure().cloned().ok_or("missing report")?;
    assert!(report.cause.starts_with("Queue unavailable"), "{}", report.cause);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn artifact_write_failure_still_fails_the_job() -> Result<(), Box<dyn Error>> {
    let root = tempfile::tempdir()?;
    // A plain file where the results directory should be.
    std::fs::write(root.path().join("results"), b"not a directory")?;
    let storage = Storage::new(StorageConfig::filesystem(root.path())).await?;

    let harness = start_engine_on(storage, EngineConfig::default(), |_| fixed_table(three_by_two())).await?;
    let engine = &harness.engine;

    let job = engine.submit(pdf_upload("ok.pdf", b"%PDF")).await?;
    let resolution = wait_terminal(engine, &job.id).await?;
    let Resolution::Failed { artifact, reason } = resolution else {
        return Err(format!("expected failure, got {resolution:?}").into());
    };
    assert!(artifact.is_none());
    assert!(reason.is_some());

    let report = engine.poll(&job.id).await?.failure().cloned().ok_or("missing report")?;
    assert!(!report.cause.is_empty());

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn existing_artifact_is_adopted() -> Result<(), Box<dyn Error>> {
    let harness = start_engine(EngineConfig::default(), |_| fixed_table(three_by_two())).await?;
    let engine = &harness.engine;
    let id = JobId::parse("adopted")?;

    let earlier = Artifact::Failure(FailureReport::new("written by an earlier holder", ""));
    harness
        .sink
        .write(&OutputRef::new("results"), &id, &earlier)
        .await?;

    engine.submit_with_id(id.clone(), pdf_upload("a.pdf", b"%PDF")).await?;
    assert_eq!(wait_terminal(engine, &id).await?.state(), JobState::Failed);
    let report = engine.poll(&id).await?.failure().cloned().ok_or("missing report")?;
    assert_eq!(report.cause, "written by an earlier holder");

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn each_job_runs_exactly_once_across_the_pool() -> Result<(), Box<dyn Error>> {
    let calls: Arc<Mutex<HashMap<String, usize>>> = Arc::default();
    let counter = calls.clone();

    let harness = start_engine(EngineConfig::default().with_concurrency(4), move |_| {
        FnExtractor::new("counting", move |source: &SourceRef| -> ExtractFuture {
            if let Ok(mut map) = counter.lock() {
                *map.entry(source.to_string()).or_default() += 1;
            }
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(three_by_two())
            })
        })
    })
    .await?;
    let engine = &harness.engine;

    let mut ids = Vec::new();
    for i in 0..12 {
        let name = format!("doc-{i}.pdf");
        let job = engine
            .submit(Upload::new(name, Some("application/pdf".into()), Bytes::from_static(b"%PDF")))
            .await?;
        ids.push(job.id);
    }

    for id in &ids {
        assert_eq!(wait_terminal(engine, id).await?.state(), JobState::Completed);
    }

    let calls = calls.lock().map_err(|_| "poisoned")?;
    assert_eq!(calls.len(), 12);
    assert!(calls.values().all(|&n| n == 1));

    let stats = engine.stats().await?;
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.delivered, 12);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn reaper_requeues_jobs_with_expired_leases() -> Result<(), Box<dyn Error>> {
    let config = EngineConfig::default()
        .with_reaper(Duration::from_millis(50))
        .with_lease_ttl(Duration::from_secs(5));
    let harness = start_engine(config, |_| fixed_table(three_by_two())).await?;
    let engine = &harness.engine;
    let mut events = engine.subscribe();

    // A job claimed by a worker that died without committing.
    let id = JobId::parse("orphaned")?;
    let store = engine.store();
    store
        .create(id.clone(), "orphan", SourceRef::new("uploads/orphaned/document"), OutputRef::new("results"))
        .await?;
    store.claim(&id, "dead-worker", Duration::ZERO).await?.ok_or("claim refused")?;

    assert_eq!(wait_terminal(engine, &id).await?.state(), JobState::Completed);

    let mut requeued = false;
    while let Ok(event) = events.try_recv() {
        if let JobEvent::JobRequeued { job_id, previous_owner, .. } = event {
            requeued |= job_id == id && previous_owner.as_deref() == Some("dead-worker");
        }
    }
    assert!(requeued);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn submissions_after_shutdown_are_refused() -> Result<(), Box<dyn Error>> {
    let harness = start_engine(EngineConfig::default(), |_| fixed_table(three_by_two())).await?;
    let engine = &harness.engine;

    engine.shutdown().await;

    let id = JobId::parse("too-late")?;
    let result = engine.submit_with_id(id.clone(), pdf_upload("late.pdf", b"%PDF")).await;
    assert!(matches!(result, Err(SubmitError::QueueUnavailable(_))));
    assert_eq!(engine.resolve(&id).await?.state(), JobState::Failed);
    Ok(())
}

#[tokio::test]
async fn submission_runs_on_a_spawned_task() -> Result<(), Box<dyn Error>> {
    let harness = start_engine(EngineConfig::default(), |_| fixed_table(three_by_two())).await?;
    let engine = harness.engine.clone();

    // HTTP handlers drive submissions from multi-threaded tasks.
    let job = tokio::spawn(async move { engine.submit(pdf_upload("spawned.pdf", b"%PDF-1.4")).await }).await??;
    assert_eq!(wait_terminal(&harness.engine, &job.id).await?.state(), JobState::Completed);

    // The refusal path must be sendable too.
    let refusing = start_engine(
        EngineConfig::default().with_queue(QueueConfig::new("refusing-spawned").with_max_size(0)),
        |_| fixed_table(three_by_two()),
    )
    .await?;
    let engine = refusing.engine.clone();
    let refused = tokio::spawn(async move { engine.submit(pdf_upload("late.pdf", b"%PDF-1.4")).await }).await?;
    assert!(matches!(refused, Err(SubmitError::QueueUnavailable(_))));

    harness.engine.shutdown().await;
    refusing.engine.shutdown().await;
    Ok(())
}
