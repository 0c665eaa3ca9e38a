//! Shared fixtures for pipeline integration tests: a fully wired in-memory
//! rig, feed builders, and scripted record processors.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use eligibility_core::config::IngestConfig;
use eligibility_core::dispatch::{ChunkDispatcher, WorkerPoolDispatcher};
use eligibility_core::events::{EventPublisher, PublishedEvent};
use eligibility_core::intake::UploadIntake;
use eligibility_core::models::BatchUpload;
use eligibility_core::persistence::{BatchStore, MemoryBatchStore};
use eligibility_core::pipeline::{
    BatchOrchestrator, ChunkReader, ChunkWorker, CompletionCoordinator,
};
use eligibility_core::processing::{
    FileRecord, ProcessContext, ProcessorError, RecordProcessor,
};
use eligibility_core::storage::{MemoryObjectStore, ObjectStore};

/// Everything a test needs to drive the pipeline end to end in memory.
pub struct TestRig {
    pub objects: Arc<MemoryObjectStore>,
    pub store: Arc<MemoryBatchStore>,
    pub events: EventPublisher,
    pub intake: UploadIntake,
    pub orchestrator: BatchOrchestrator,
    pub coordinator: CompletionCoordinator,
    pub pool: Arc<WorkerPoolDispatcher>,
}

impl TestRig {
    /// Issue an upload slot, write the feed bytes to its key, return the
    /// batch id.
    pub async fn upload(&self, filename: &str, bytes: &[u8]) -> i64 {
        let pending = self
            .intake
            .begin_upload(filename, "text/csv")
            .await
            .expect("intake should accept the upload");
        self.objects
            .write(&pending.batch.storage_key, bytes)
            .await
            .expect("write to memory store cannot fail");
        pending.batch.id
    }

    /// Poll until the batch reaches a terminal status.
    pub async fn wait_terminal(&self, batch_upload_id: i64) -> BatchUpload {
        for _ in 0..2000 {
            if let Some(batch) = self
                .store
                .find_batch(batch_upload_id)
                .await
                .expect("memory store lookups cannot fail")
            {
                if batch.is_terminal() {
                    return batch;
                }
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("batch {batch_upload_id} never reached a terminal state");
    }

    pub async fn shutdown(self) {
        self.pool.shutdown().await;
    }
}

/// Wire the full pipeline over in-memory backends.
pub fn rig_with(processor: Arc<dyn RecordProcessor>, config: IngestConfig) -> TestRig {
    let objects = Arc::new(MemoryObjectStore::with_read_chunk_bytes(
        config.pipeline.read_chunk_bytes,
    ));
    let store = Arc::new(MemoryBatchStore::new());
    let events = EventPublisher::new(config.events.channel_capacity.max(64));

    let intake = UploadIntake::new(
        objects.clone() as Arc<dyn ObjectStore>,
        store.clone() as Arc<dyn BatchStore>,
        events.clone(),
        config.object_store.clone(),
    );
    let coordinator = CompletionCoordinator::new(
        store.clone() as Arc<dyn BatchStore>,
        events.clone(),
    );
    let worker = ChunkWorker::new(
        store.clone() as Arc<dyn BatchStore>,
        ChunkReader::new(objects.clone() as Arc<dyn ObjectStore>, config.pipeline.clone()),
        processor,
        coordinator.clone(),
        events.clone(),
    );
    let pool = Arc::new(WorkerPoolDispatcher::start(
        worker,
        store.clone() as Arc<dyn BatchStore>,
        events.clone(),
        &config.dispatch,
    ));
    let orchestrator = BatchOrchestrator::new(
        store.clone() as Arc<dyn BatchStore>,
        objects.clone() as Arc<dyn ObjectStore>,
        pool.clone() as Arc<dyn ChunkDispatcher>,
        coordinator.clone(),
        events.clone(),
        config.pipeline.clone(),
    );

    TestRig {
        objects,
        store,
        events,
        intake,
        orchestrator,
        coordinator,
        pool,
    }
}

/// Rig with the given chunk size and an accept-everything processor unless
/// overridden.
pub fn rig(chunk_size: usize, processor: Arc<dyn RecordProcessor>) -> TestRig {
    let mut config = IngestConfig::default();
    config.pipeline.chunk_size = chunk_size;
    config.dispatch.worker_count = 4;
    rig_with(processor, config)
}

/// Synthetic eligibility feed: `member_id,first_name,last_name,dob` plus
/// `rows` data rows with ids `M0..M{rows-1}`.
pub fn eligibility_feed(rows: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(rows * 40 + 64);
    data.extend_from_slice(b"member_id,first_name,last_name,dob\n");
    for row in 0..rows {
        data.extend_from_slice(
            format!("M{row},First{row},Last{row},1990-01-{:02}\n", (row % 28) + 1).as_bytes(),
        );
    }
    data
}

/// Drain every event currently buffered on a subscription.
pub fn drain_events(
    receiver: &mut tokio::sync::broadcast::Receiver<PublishedEvent>,
) -> Vec<PublishedEvent> {
    std::iter::from_fn(|| receiver.try_recv().ok()).collect()
}

/// Accepts everything and counts invocations.
#[derive(Debug, Default)]
pub struct CountingProcessor {
    pub calls: AtomicUsize,
}

#[async_trait]
impl RecordProcessor for CountingProcessor {
    async fn process(
        &self,
        _record: &FileRecord,
        _context: &ProcessContext,
    ) -> Result<(), ProcessorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Rejects records whose `member_id` is in the reject list.
#[derive(Debug)]
pub struct RejectListProcessor {
    rejects: Vec<String>,
}

impl RejectListProcessor {
    pub fn new(rejects: &[&str]) -> Self {
        Self {
            rejects: rejects.iter().map(|id| id.to_string()).collect(),
        }
    }
}

#[async_trait]
impl RecordProcessor for RejectListProcessor {
    async fn process(
        &self,
        record: &FileRecord,
        _context: &ProcessContext,
    ) -> Result<(), ProcessorError> {
        match record.get("member_id") {
            Some(id) if self.rejects.iter().any(|r| r == id) => {
                Err(ProcessorError::validation(format!("member {id} rejected")))
            }
            Some(_) => Ok(()),
            None => Err(ProcessorError::validation("member_id missing")),
        }
    }
}

/// Panics on a specific `member_id`, accepts everything else.
#[derive(Debug)]
pub struct PanicOnMember {
    pub member_id: String,
}

#[async_trait]
impl RecordProcessor for PanicOnMember {
    async fn process(
        &self,
        record: &FileRecord,
        _context: &ProcessContext,
    ) -> Result<(), ProcessorError> {
        if record.get("member_id") == Some(self.member_id.as_str()) {
            panic!("poisoned member {}", self.member_id);
        }
        Ok(())
    }
}
