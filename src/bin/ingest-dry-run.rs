//! # Ingestion Dry Run
//!
//! Runs a local delimited-text file through the complete pipeline against
//! in-memory backends: intake, scan, chunk dispatch, parallel workers, and
//! the completion check. Nothing touches PostgreSQL or a real object store,
//! which makes this the fastest way to sanity-check a feed file or observe
//! the pipeline's behavior on odd inputs.
//!
//! ```bash
//! ingest-dry-run path/to/feed.csv [chunk_size]
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use eligibility_core::config::IngestConfig;
use eligibility_core::constants::defaults;
use eligibility_core::dispatch::{ChunkDispatcher, WorkerPoolDispatcher};
use eligibility_core::events::EventPublisher;
use eligibility_core::intake::UploadIntake;
use eligibility_core::logging::init_structured_logging;
use eligibility_core::persistence::{BatchStore, MemoryBatchStore};
use eligibility_core::pipeline::{
    BatchOrchestrator, ChunkReader, ChunkWorker, CompletionCoordinator,
};
use eligibility_core::processing::NoopProcessor;
use eligibility_core::storage::{MemoryObjectStore, ObjectStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_structured_logging();

    let mut args = std::env::args().skip(1);
    let path: PathBuf = args
        .next()
        .map(PathBuf::from)
        .context("usage: ingest-dry-run <file> [chunk_size]")?;
    let chunk_size: usize = match args.next() {
        Some(raw) => raw
            .parse()
            .context("chunk_size must be a positive integer")?,
        None => defaults::CHUNK_SIZE,
    };

    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("could not read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.csv".to_string());

    let mut config = IngestConfig::default();
    config.pipeline.chunk_size = chunk_size;

    let objects: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
    let store: Arc<dyn BatchStore> = Arc::new(MemoryBatchStore::new());
    let events = EventPublisher::new(config.events.channel_capacity);
    let mut lifecycle = events.subscribe();

    let intake = UploadIntake::new(
        objects.clone(),
        store.clone(),
        events.clone(),
        config.object_store.clone(),
    );
    let coordinator = CompletionCoordinator::new(store.clone(), events.clone());
    let worker = ChunkWorker::new(
        store.clone(),
        ChunkReader::new(objects.clone(), config.pipeline.clone()),
        Arc::new(NoopProcessor),
        coordinator.clone(),
        events.clone(),
    );
    let pool = Arc::new(WorkerPoolDispatcher::start(
        worker,
        store.clone(),
        events.clone(),
        &config.dispatch,
    ));
    let orchestrator = BatchOrchestrator::new(
        store.clone(),
        objects.clone(),
        pool.clone() as Arc<dyn ChunkDispatcher>,
        coordinator,
        events.clone(),
        config.pipeline.clone(),
    );

    // A real client PUTs to the signed URL; the dry run writes the bytes
    // straight to the same key.
    let pending = intake.begin_upload(&filename, "text/csv").await?;
    objects.write(&pending.batch.storage_key, &bytes).await?;
    let batch_upload_id = pending.batch.id;

    println!(
        "batch {} accepted: {} ({} bytes, chunk_size {})",
        batch_upload_id,
        filename,
        bytes.len(),
        chunk_size
    );

    orchestrator.run(batch_upload_id).await?;

    let batch = loop {
        match store.find_batch(batch_upload_id).await? {
            Some(batch) if batch.is_terminal() => break batch,
            _ => tokio::time::sleep(Duration::from_millis(25)).await,
        }
    };
    pool.shutdown().await;

    while let Ok(event) = lifecycle.try_recv() {
        println!("  event {} {}", event.name, event.context);
    }

    println!(
        "batch {} {}: rows={} processed={} succeeded={} errored={}",
        batch.id,
        batch.status,
        batch.num_rows.unwrap_or(0),
        batch.num_rows_processed,
        batch.num_rows_succeeded,
        batch.num_rows_errored,
    );
    if let Some(message) = &batch.error_message {
        println!("  error: {message}");
    }

    let errors = store.list_upload_errors(batch_upload_id, 20, 0).await?;
    if !errors.is_empty() {
        println!("first {} row errors:", errors.len());
        for error in errors {
            println!(
                "  row {} [{}] {}",
                error.row_number, error.error_code, error.error_message
            );
        }
    }

    Ok(())
}
