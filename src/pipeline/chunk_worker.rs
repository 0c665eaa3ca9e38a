//! # Chunk Worker
//!
//! Executes one dispatched [`ChunkTask`]: read the chunk's byte range, run
//! every record through the processor, persist row errors, fold tallies into
//! the batch, then run the completion check. Tasks arrive at-least-once, so
//! the worker is built around redelivery:
//!
//! - Before doing anything it consults the latest audit row for the chunk.
//!   A `completed` row means a previous attempt already applied its tallies;
//!   the worker skips straight to the completion check (which a crash right
//!   after counter application could have left unrun) and exits.
//! - Tally application and the `completed` marker commit together in one
//!   store operation, so a re-run can never double-count.
//!
//! Row failures are contained: a processor error or panic records an error
//! row and moves on. Only infrastructure failures (storage reads, store
//! writes) abort the attempt, and those mark the audit row `failed` before
//! propagating so the dispatcher can schedule a retry.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, info, instrument, warn};

use crate::dispatch::ChunkTask;
use crate::error::Result;
use crate::events::{EventPublisher, IngestEvent};
use crate::models::{NewChunkAuditLog, NewUploadError};
use crate::persistence::{BatchStore, CompletionOutcome};
use crate::processing::{FileRecord, ProcessContext, ProcessorError, RecordProcessor};

use super::chunk_reader::ChunkReader;
use super::completion_coordinator::CompletionCoordinator;

/// What a single worker run did with its task.
#[derive(Debug)]
pub enum ChunkRunOutcome {
    /// This run processed the records and applied the tallies.
    Applied {
        succeeded: i64,
        failed: i64,
        completion: CompletionOutcome,
    },
    /// A previous attempt already applied tallies; only the completion check
    /// ran.
    AlreadyApplied { completion: CompletionOutcome },
}

impl ChunkRunOutcome {
    pub fn completion(&self) -> &CompletionOutcome {
        match self {
            Self::Applied { completion, .. } | Self::AlreadyApplied { completion } => completion,
        }
    }
}

/// Processes dispatched chunk tasks. Cheap to clone; workers in a pool share
/// the same store, reader, and processor.
#[derive(Clone)]
pub struct ChunkWorker {
    store: Arc<dyn BatchStore>,
    reader: ChunkReader,
    processor: Arc<dyn RecordProcessor>,
    coordinator: CompletionCoordinator,
    events: EventPublisher,
}

impl std::fmt::Debug for ChunkWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkWorker")
            .field("store", &self.store)
            .field("reader", &self.reader)
            .finish_non_exhaustive()
    }
}

impl ChunkWorker {
    pub fn new(
        store: Arc<dyn BatchStore>,
        reader: ChunkReader,
        processor: Arc<dyn RecordProcessor>,
        coordinator: CompletionCoordinator,
        events: EventPublisher,
    ) -> Self {
        Self {
            store,
            reader,
            processor,
            coordinator,
            events,
        }
    }

    /// Run one chunk task to completion. Errors returned here are
    /// infrastructure failures; the dispatcher decides whether to retry.
    #[instrument(
        skip(self, task),
        fields(batch_upload_id = task.batch_upload_id, chunk_number = task.chunk_number)
    )]
    pub async fn execute(&self, task: &ChunkTask) -> Result<ChunkRunOutcome> {
        if let Some(log) = self
            .store
            .latest_chunk_log(task.batch_upload_id, task.chunk_number)
            .await?
        {
            if log.is_completed() {
                debug!("chunk already applied; re-running completion check only");
                let completion = self
                    .coordinator
                    .check_and_finalize(task.batch_upload_id)
                    .await?;
                return Ok(ChunkRunOutcome::AlreadyApplied { completion });
            }
        }

        let log = self
            .store
            .create_chunk_log(NewChunkAuditLog {
                batch_upload_id: task.batch_upload_id,
                chunk_number: task.chunk_number,
            })
            .await?;
        self.publish(IngestEvent::ChunkStarted {
            batch_upload_id: task.batch_upload_id,
            chunk_number: task.chunk_number,
        });

        let records = match self
            .reader
            .read(&task.storage_key, &task.headers, task.start_byte, task.end_byte)
            .await
        {
            Ok(records) => records,
            Err(error) => {
                self.fail_attempt(task, log.id, 0, 0, &error.to_string()).await;
                return Err(error.into());
            }
        };

        let mut succeeded: i64 = 0;
        let mut failed: i64 = 0;
        let mut row_errors: Vec<NewUploadError> = Vec::new();

        for (index, record) in records.iter().enumerate() {
            let row_number = task.row_number(index);
            let context = ProcessContext {
                batch_upload_id: task.batch_upload_id,
                row_number,
            };

            match self.process_one(record, &context).await {
                Ok(()) => succeeded += 1,
                Err(error) => {
                    failed += 1;
                    if error.is_unexpected() {
                        warn!(row_number = row_number, error = %error, "record processing raised an unexpected error");
                    }
                    row_errors.push(NewUploadError {
                        batch_upload_id: task.batch_upload_id,
                        row_number,
                        error_code: error.code.as_str().to_string(),
                        error_message: error.message,
                        raw_row: record.raw.clone(),
                    });
                }
            }
        }

        if !row_errors.is_empty() {
            if let Err(error) = self.store.insert_upload_errors(&row_errors).await {
                self.fail_attempt(task, log.id, succeeded, failed, &error.to_string())
                    .await;
                return Err(error.into());
            }
        }

        let counters = match self
            .store
            .complete_chunk(task.batch_upload_id, log.id, succeeded, failed)
            .await
        {
            Ok(counters) => counters,
            Err(error) => {
                self.fail_attempt(task, log.id, succeeded, failed, &error.to_string())
                    .await;
                return Err(error.into());
            }
        };

        info!(
            succeeded = succeeded,
            failed = failed,
            batch_processed = counters.num_rows_processed,
            "chunk attempt applied"
        );
        self.publish(IngestEvent::ChunkCompleted {
            batch_upload_id: task.batch_upload_id,
            chunk_number: task.chunk_number,
            succeeded,
            failed,
        });

        let completion = self
            .coordinator
            .check_and_finalize(task.batch_upload_id)
            .await?;

        Ok(ChunkRunOutcome::Applied {
            succeeded,
            failed,
            completion,
        })
    }

    /// Run the processor on one record, converting panics into contained
    /// `UNEXPECTED` failures so a poisoned row cannot take down the worker.
    async fn process_one(
        &self,
        record: &FileRecord,
        context: &ProcessContext,
    ) -> std::result::Result<(), ProcessorError> {
        match AssertUnwindSafe(self.processor.process(record, context))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(ProcessorError::unexpected(panic_message(&*panic))),
        }
    }

    /// Best-effort failure bookkeeping; the original error still propagates.
    async fn fail_attempt(
        &self,
        task: &ChunkTask,
        chunk_log_id: i64,
        succeeded: i64,
        failed: i64,
        message: &str,
    ) {
        if let Err(error) = self
            .store
            .mark_chunk_log_failed(task.batch_upload_id, chunk_log_id, succeeded, failed, message)
            .await
        {
            warn!(
                chunk_log_id = chunk_log_id,
                error = %error,
                "could not mark chunk attempt failed"
            );
        }
        self.publish(IngestEvent::ChunkFailed {
            batch_upload_id: task.batch_upload_id,
            chunk_number: task.chunk_number,
            message: message.to_string(),
        });
    }

    fn publish(&self, event: IngestEvent) {
        if let Err(error) = self.events.publish(event) {
            warn!(error = %error, "failed to publish chunk lifecycle event");
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("record processor panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("record processor panicked: {message}")
    } else {
        "record processor panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::persistence::MemoryBatchStore;
    use crate::processing::NoopProcessor;
    use crate::storage::MemoryObjectStore;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct RejectOdd;

    #[async_trait]
    impl RecordProcessor for RejectOdd {
        async fn process(
            &self,
            record: &FileRecord,
            _context: &ProcessContext,
        ) -> std::result::Result<(), ProcessorError> {
            let id: i64 = record
                .get("id")
                .and_then(|value| value.parse().ok())
                .ok_or_else(|| ProcessorError::validation("id is not numeric"))?;
            if id % 2 == 1 {
                Err(ProcessorError::validation("odd ids are rejected"))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Debug)]
    struct PanicsOnBob;

    #[async_trait]
    impl RecordProcessor for PanicsOnBob {
        async fn process(
            &self,
            record: &FileRecord,
            _context: &ProcessContext,
        ) -> std::result::Result<(), ProcessorError> {
            if record.get("name") == Some("bob") {
                panic!("bob is not allowed");
            }
            Ok(())
        }
    }

    struct Harness {
        store: Arc<MemoryBatchStore>,
        worker: ChunkWorker,
        events: EventPublisher,
    }

    fn harness(data: &[u8], processor: Arc<dyn RecordProcessor>) -> Harness {
        let objects = MemoryObjectStore::new();
        objects.insert("uploads/feed.csv", data.to_vec());
        let objects: Arc<dyn crate::storage::ObjectStore> = Arc::new(objects);

        let store = Arc::new(MemoryBatchStore::new());
        let events = EventPublisher::new(64);
        let reader = ChunkReader::new(objects, PipelineConfig::default());
        let coordinator =
            CompletionCoordinator::new(store.clone() as Arc<dyn BatchStore>, events.clone());
        let worker = ChunkWorker::new(
            store.clone() as Arc<dyn BatchStore>,
            reader,
            processor,
            coordinator,
            events.clone(),
        );
        Harness { store, worker, events }
    }

    async fn seeded_batch(store: &MemoryBatchStore, num_rows: i64) -> i64 {
        let batch = store
            .create_batch(crate::models::NewBatchUpload {
                storage_key: "uploads/feed.csv".to_string(),
                original_filename: "feed.csv".to_string(),
            })
            .await
            .unwrap();
        store.mark_batch_processing(batch.id).await.unwrap();
        store.set_batch_num_rows(batch.id, num_rows).await.unwrap();
        batch.id
    }

    fn task(batch_upload_id: i64, data: &[u8], header_len: usize) -> ChunkTask {
        ChunkTask {
            batch_upload_id,
            chunk_number: 1,
            storage_key: "uploads/feed.csv".to_string(),
            headers: vec!["id".to_string(), "name".to_string()],
            start_byte: header_len as u64,
            end_byte: data.len() as u64 - 1,
            chunk_size: 1000,
        }
    }

    #[tokio::test]
    async fn test_successful_chunk_applies_tallies_and_completes_batch() {
        let data = b"id,name\n2,ann\n4,bob\n";
        let h = harness(data, Arc::new(NoopProcessor));
        let batch_id = seeded_batch(&h.store, 2).await;

        let outcome = h.worker.execute(&task(batch_id, data, 8)).await.unwrap();
        match outcome {
            ChunkRunOutcome::Applied { succeeded, failed, completion } => {
                assert_eq!(succeeded, 2);
                assert_eq!(failed, 0);
                assert!(completion.did_complete());
            }
            other => panic!("expected Applied, got {other:?}"),
        }

        let batch = h.store.find_batch(batch_id).await.unwrap().unwrap();
        assert_eq!(batch.num_rows_processed, 2);
        assert_eq!(batch.num_rows_succeeded, 2);
        assert!(batch.is_completed());
    }

    #[tokio::test]
    async fn test_row_failures_are_contained_and_recorded() {
        let data = b"id,name\n1,ann\n2,bob\n3,cam\n";
        let h = harness(data, Arc::new(RejectOdd));
        let batch_id = seeded_batch(&h.store, 3).await;

        let outcome = h.worker.execute(&task(batch_id, data, 8)).await.unwrap();
        match outcome {
            ChunkRunOutcome::Applied { succeeded, failed, .. } => {
                assert_eq!(succeeded, 1);
                assert_eq!(failed, 2);
            }
            other => panic!("expected Applied, got {other:?}"),
        }

        let errors = h.store.list_upload_errors(batch_id, 10, 0).await.unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].row_number, 2);
        assert_eq!(errors[0].error_code, "VALIDATION");
        assert_eq!(errors[0].raw_row, "1,ann");
        assert_eq!(errors[1].row_number, 4);

        let batch = h.store.find_batch(batch_id).await.unwrap().unwrap();
        assert_eq!(batch.num_rows_processed, 3);
        assert_eq!(batch.num_rows_errored, 2);
        assert!(batch.is_completed());
    }

    #[tokio::test]
    async fn test_processor_panic_is_isolated_as_unexpected() {
        let data = b"id,name\n1,ann\n2,bob\n3,cam\n";
        let h = harness(data, Arc::new(PanicsOnBob));
        let batch_id = seeded_batch(&h.store, 3).await;

        let outcome = h.worker.execute(&task(batch_id, data, 8)).await.unwrap();
        match outcome {
            ChunkRunOutcome::Applied { succeeded, failed, .. } => {
                assert_eq!(succeeded, 2);
                assert_eq!(failed, 1);
            }
            other => panic!("expected Applied, got {other:?}"),
        }

        let errors = h.store.list_upload_errors(batch_id, 10, 0).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_code, "UNEXPECTED");
        assert!(errors[0].error_message.contains("bob is not allowed"));
        assert_eq!(errors[0].row_number, 3);
    }

    #[tokio::test]
    async fn test_redelivered_task_does_not_double_count() {
        let data = b"id,name\n2,ann\n4,bob\n";
        let h = harness(data, Arc::new(NoopProcessor));
        let batch_id = seeded_batch(&h.store, 2).await;
        let task = task(batch_id, data, 8);

        let first = h.worker.execute(&task).await.unwrap();
        assert!(matches!(first, ChunkRunOutcome::Applied { .. }));

        let second = h.worker.execute(&task).await.unwrap();
        assert!(matches!(second, ChunkRunOutcome::AlreadyApplied { .. }));

        let batch = h.store.find_batch(batch_id).await.unwrap().unwrap();
        assert_eq!(batch.num_rows_processed, 2);
        assert_eq!(batch.num_rows_succeeded, 2);
    }

    #[tokio::test]
    async fn test_missing_range_marks_attempt_failed() {
        let data = b"id,name\n2,ann\n";
        let h = harness(data, Arc::new(NoopProcessor));
        let batch_id = seeded_batch(&h.store, 1).await;

        let mut bad_task = task(batch_id, data, 8);
        bad_task.storage_key = "uploads/missing.csv".to_string();

        let error = h.worker.execute(&bad_task).await.unwrap_err();
        assert!(matches!(error, crate::error::IngestError::Storage(_)));

        let log = h
            .store
            .latest_chunk_log(batch_id, 1)
            .await
            .unwrap()
            .unwrap();
        assert!(log.is_failed());

        let batch = h.store.find_batch(batch_id).await.unwrap().unwrap();
        assert_eq!(batch.num_rows_processed, 0);
        assert!(batch.is_processing());
    }

    #[tokio::test]
    async fn test_chunk_events_are_published_in_order() {
        let data = b"id,name\n2,ann\n";
        let h = harness(data, Arc::new(NoopProcessor));
        let mut receiver = h.events.subscribe();
        let batch_id = seeded_batch(&h.store, 1).await;

        h.worker.execute(&task(batch_id, data, 8)).await.unwrap();

        let names: Vec<String> = std::iter::from_fn(|| receiver.try_recv().ok())
            .map(|event| event.name)
            .collect();
        assert_eq!(names, vec!["chunk.started", "chunk.completed", "batch.completed"]);
    }
}
