//! In-memory batch store for tests and dry-runs.
//!
//! The per-batch exclusive lock the contract requires is a per-batch
//! `tokio::sync::Mutex`: every counter application and completion check for
//! one batch serializes on that one mutex while different batches proceed
//! independently. The same lock covers the audit rows and error records, so
//! `complete_chunk` is atomic exactly like its Postgres transaction twin.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::models::{
    BatchStatus, BatchUpload, ChunkAuditLog, ChunkStatus, NewBatchUpload, NewChunkAuditLog,
    NewUploadError, UploadError,
};

use super::{BatchCounters, BatchStore, CompletionOutcome, StoreError};

#[derive(Debug)]
struct BatchEntry {
    batch: BatchUpload,
    chunk_logs: Vec<ChunkAuditLog>,
    errors: Vec<UploadError>,
}

/// [`BatchStore`] holding everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryBatchStore {
    entries: DashMap<i64, Arc<Mutex<BatchEntry>>>,
    next_batch_id: AtomicI64,
    next_chunk_log_id: AtomicI64,
    next_error_id: AtomicI64,
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

impl MemoryBatchStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_batch_id: AtomicI64::new(1),
            next_chunk_log_id: AtomicI64::new(1),
            next_error_id: AtomicI64::new(1),
        }
    }

    /// Clone the entry handle out of the map so no map guard is ever held
    /// across an await point.
    fn entry(&self, batch_upload_id: i64) -> Option<Arc<Mutex<BatchEntry>>> {
        self.entries
            .get(&batch_upload_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn require_entry(&self, batch_upload_id: i64) -> Result<Arc<Mutex<BatchEntry>>, StoreError> {
        self.entry(batch_upload_id)
            .ok_or(StoreError::BatchNotFound { batch_upload_id })
    }
}

#[async_trait]
impl BatchStore for MemoryBatchStore {
    async fn create_batch(&self, new_batch: NewBatchUpload) -> Result<BatchUpload, StoreError> {
        let id = self.next_batch_id.fetch_add(1, Ordering::Relaxed);
        let timestamp = now();
        let batch = BatchUpload {
            id,
            storage_key: new_batch.storage_key,
            original_filename: new_batch.original_filename,
            status: BatchStatus::Pending.as_str().to_string(),
            num_rows: None,
            num_rows_processed: 0,
            num_rows_succeeded: 0,
            num_rows_errored: 0,
            error_message: None,
            processed_at: None,
            created_at: timestamp,
            updated_at: timestamp,
        };
        self.entries.insert(
            id,
            Arc::new(Mutex::new(BatchEntry {
                batch: batch.clone(),
                chunk_logs: Vec::new(),
                errors: Vec::new(),
            })),
        );
        Ok(batch)
    }

    async fn find_batch(&self, batch_upload_id: i64) -> Result<Option<BatchUpload>, StoreError> {
        match self.entry(batch_upload_id) {
            Some(entry) => Ok(Some(entry.lock().await.batch.clone())),
            None => Ok(None),
        }
    }

    async fn mark_batch_processing(&self, batch_upload_id: i64) -> Result<(), StoreError> {
        let entry = self.require_entry(batch_upload_id)?;
        let mut guard = entry.lock().await;
        if guard.batch.is_processing() {
            return Ok(());
        }
        if guard.batch.is_terminal() {
            return Err(StoreError::invalid_transition(
                batch_upload_id,
                format!(
                    "cannot move batch in state '{}' to processing",
                    guard.batch.status
                ),
            ));
        }
        guard.batch.status = BatchStatus::Processing.as_str().to_string();
        guard.batch.updated_at = now();
        Ok(())
    }

    async fn set_batch_num_rows(
        &self,
        batch_upload_id: i64,
        num_rows: i64,
    ) -> Result<(), StoreError> {
        let entry = self.require_entry(batch_upload_id)?;
        let mut guard = entry.lock().await;
        match guard.batch.num_rows {
            None => {
                guard.batch.num_rows = Some(num_rows);
                guard.batch.updated_at = now();
                Ok(())
            }
            Some(existing) if existing == num_rows => Ok(()),
            Some(existing) => Err(StoreError::invalid_transition(
                batch_upload_id,
                format!("num_rows already set to {existing}, refusing to overwrite with {num_rows}"),
            )),
        }
    }

    async fn mark_batch_failed(
        &self,
        batch_upload_id: i64,
        message: &str,
    ) -> Result<bool, StoreError> {
        let entry = match self.entry(batch_upload_id) {
            Some(entry) => entry,
            None => return Ok(false),
        };
        let mut guard = entry.lock().await;
        if guard.batch.is_terminal() {
            return Ok(false);
        }
        guard.batch.status = BatchStatus::Failed.as_str().to_string();
        guard.batch.error_message = Some(message.to_string());
        guard.batch.updated_at = now();
        Ok(true)
    }

    async fn create_chunk_log(
        &self,
        new_log: NewChunkAuditLog,
    ) -> Result<ChunkAuditLog, StoreError> {
        let entry = self.require_entry(new_log.batch_upload_id)?;
        let mut guard = entry.lock().await;
        let timestamp = now();
        let log = ChunkAuditLog {
            id: self.next_chunk_log_id.fetch_add(1, Ordering::Relaxed),
            batch_upload_id: new_log.batch_upload_id,
            chunk_number: new_log.chunk_number,
            status: ChunkStatus::Started.as_str().to_string(),
            succeeded_count: 0,
            failed_count: 0,
            error_message: None,
            created_at: timestamp,
            updated_at: timestamp,
        };
        guard.chunk_logs.push(log.clone());
        Ok(log)
    }

    async fn latest_chunk_log(
        &self,
        batch_upload_id: i64,
        chunk_number: i32,
    ) -> Result<Option<ChunkAuditLog>, StoreError> {
        let entry = match self.entry(batch_upload_id) {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let guard = entry.lock().await;
        Ok(guard
            .chunk_logs
            .iter()
            .filter(|log| log.chunk_number == chunk_number)
            .max_by_key(|log| log.id)
            .cloned())
    }

    async fn mark_chunk_log_failed(
        &self,
        batch_upload_id: i64,
        chunk_log_id: i64,
        succeeded: i64,
        failed: i64,
        message: &str,
    ) -> Result<bool, StoreError> {
        let entry = match self.entry(batch_upload_id) {
            Some(entry) => entry,
            None => return Ok(false),
        };
        let mut guard = entry.lock().await;
        match guard.chunk_logs.iter_mut().find(|log| log.id == chunk_log_id) {
            Some(log) => {
                log.status = ChunkStatus::Failed.as_str().to_string();
                log.succeeded_count = succeeded;
                log.failed_count = failed;
                log.error_message = Some(message.to_string());
                log.updated_at = now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn complete_chunk(
        &self,
        batch_upload_id: i64,
        chunk_log_id: i64,
        succeeded: i64,
        failed: i64,
    ) -> Result<BatchCounters, StoreError> {
        let entry = self.require_entry(batch_upload_id)?;
        let mut guard = entry.lock().await;

        let timestamp = now();
        let log = guard
            .chunk_logs
            .iter_mut()
            .find(|log| log.id == chunk_log_id)
            .ok_or(StoreError::ChunkLogNotFound {
                batch_upload_id,
                chunk_log_id,
            })?;
        log.status = ChunkStatus::Completed.as_str().to_string();
        log.succeeded_count = succeeded;
        log.failed_count = failed;
        log.updated_at = timestamp;

        guard.batch.num_rows_processed += succeeded + failed;
        guard.batch.num_rows_succeeded += succeeded;
        guard.batch.num_rows_errored += failed;
        guard.batch.updated_at = timestamp;

        let counters = BatchCounters::from(&guard.batch);
        debug_assert!(counters.is_conserved());
        Ok(counters)
    }

    async fn insert_upload_errors(&self, errors: &[NewUploadError]) -> Result<u64, StoreError> {
        if errors.is_empty() {
            return Ok(0);
        }

        let mut grouped: HashMap<i64, Vec<&NewUploadError>> = HashMap::new();
        for error in errors {
            grouped.entry(error.batch_upload_id).or_default().push(error);
        }

        let mut inserted = 0u64;
        for (batch_upload_id, group) in grouped {
            let entry = self.require_entry(batch_upload_id)?;
            let mut guard = entry.lock().await;
            for error in group {
                guard.errors.push(UploadError {
                    id: self.next_error_id.fetch_add(1, Ordering::Relaxed),
                    batch_upload_id: error.batch_upload_id,
                    row_number: error.row_number,
                    error_code: error.error_code.clone(),
                    error_message: error.error_message.clone(),
                    raw_row: error.raw_row.clone(),
                    created_at: now(),
                });
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn complete_if_fully_processed(
        &self,
        batch_upload_id: i64,
    ) -> Result<CompletionOutcome, StoreError> {
        let entry = match self.entry(batch_upload_id) {
            Some(entry) => entry,
            None => return Ok(CompletionOutcome::BatchMissing),
        };
        let mut guard = entry.lock().await;

        if guard.batch.is_completed() {
            return Ok(CompletionOutcome::AlreadyCompleted);
        }
        if guard.batch.is_failed() {
            return Ok(CompletionOutcome::BatchFailed);
        }
        let counters = BatchCounters::from(&guard.batch);
        if !guard.batch.is_processing() || !guard.batch.is_fully_processed() {
            return Ok(CompletionOutcome::NotYetComplete { counters });
        }

        let timestamp = now();
        guard.batch.status = BatchStatus::Completed.as_str().to_string();
        guard.batch.processed_at = Some(timestamp);
        guard.batch.updated_at = timestamp;
        Ok(CompletionOutcome::Completed { counters })
    }

    async fn list_chunk_logs(
        &self,
        batch_upload_id: i64,
    ) -> Result<Vec<ChunkAuditLog>, StoreError> {
        let entry = match self.entry(batch_upload_id) {
            Some(entry) => entry,
            None => return Ok(Vec::new()),
        };
        let guard = entry.lock().await;
        let mut logs = guard.chunk_logs.clone();
        logs.sort_by_key(|log| (log.chunk_number, log.id));
        Ok(logs)
    }

    async fn list_upload_errors(
        &self,
        batch_upload_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<UploadError>, StoreError> {
        let entry = match self.entry(batch_upload_id) {
            Some(entry) => entry,
            None => return Ok(Vec::new()),
        };
        let guard = entry.lock().await;
        let mut errors = guard.errors.clone();
        errors.sort_by_key(|error| (error.row_number, error.id));
        Ok(errors
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn find_stalled(&self, older_than_seconds: i64) -> Result<Vec<BatchUpload>, StoreError> {
        let cutoff = now() - chrono::Duration::seconds(older_than_seconds);
        let handles: Vec<Arc<Mutex<BatchEntry>>> = self
            .entries
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut stalled = Vec::new();
        for handle in handles {
            let guard = handle.lock().await;
            if guard.batch.is_processing() && guard.batch.updated_at < cutoff {
                stalled.push(guard.batch.clone());
            }
        }
        stalled.sort_by_key(|batch| batch.updated_at);
        Ok(stalled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_batch() -> NewBatchUpload {
        NewBatchUpload {
            storage_key: "uploads/test.csv".to_string(),
            original_filename: "test.csv".to_string(),
        }
    }

    #[tokio::test]
    async fn batch_lifecycle_happy_path() {
        let store = MemoryBatchStore::new();
        let batch = store.create_batch(new_batch()).await.unwrap();
        assert!(batch.is_pending());

        store.mark_batch_processing(batch.id).await.unwrap();
        store.set_batch_num_rows(batch.id, 2).await.unwrap();

        let log = store
            .create_chunk_log(NewChunkAuditLog {
                batch_upload_id: batch.id,
                chunk_number: 1,
            })
            .await
            .unwrap();
        let counters = store.complete_chunk(batch.id, log.id, 2, 0).await.unwrap();
        assert_eq!(counters.num_rows_processed, 2);
        assert!(counters.is_conserved());

        let outcome = store.complete_if_fully_processed(batch.id).await.unwrap();
        assert!(outcome.did_complete());

        let reloaded = store.find_batch(batch.id).await.unwrap().unwrap();
        assert!(reloaded.is_completed());
        assert!(reloaded.processed_at.is_some());
    }

    #[tokio::test]
    async fn completion_is_reported_once() {
        let store = MemoryBatchStore::new();
        let batch = store.create_batch(new_batch()).await.unwrap();
        store.mark_batch_processing(batch.id).await.unwrap();
        store.set_batch_num_rows(batch.id, 1).await.unwrap();

        let log = store
            .create_chunk_log(NewChunkAuditLog {
                batch_upload_id: batch.id,
                chunk_number: 1,
            })
            .await
            .unwrap();
        store.complete_chunk(batch.id, log.id, 1, 0).await.unwrap();

        let first = store.complete_if_fully_processed(batch.id).await.unwrap();
        let second = store.complete_if_fully_processed(batch.id).await.unwrap();
        assert!(first.did_complete());
        assert_eq!(second, CompletionOutcome::AlreadyCompleted);
    }

    #[tokio::test]
    async fn num_rows_is_set_once() {
        let store = MemoryBatchStore::new();
        let batch = store.create_batch(new_batch()).await.unwrap();

        store.set_batch_num_rows(batch.id, 10).await.unwrap();
        // Same value is an idempotent re-run
        store.set_batch_num_rows(batch.id, 10).await.unwrap();
        // A different value is a contract violation
        let err = store.set_batch_num_rows(batch.id, 11).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn failed_batches_never_complete() {
        let store = MemoryBatchStore::new();
        let batch = store.create_batch(new_batch()).await.unwrap();
        store.mark_batch_processing(batch.id).await.unwrap();
        store.set_batch_num_rows(batch.id, 0).await.unwrap();
        assert!(store.mark_batch_failed(batch.id, "scan failed").await.unwrap());

        let outcome = store.complete_if_fully_processed(batch.id).await.unwrap();
        assert_eq!(outcome, CompletionOutcome::BatchFailed);

        // Terminal status is sticky
        let err = store.mark_batch_processing(batch.id).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
        assert!(!store.mark_batch_failed(batch.id, "again").await.unwrap());
    }

    #[tokio::test]
    async fn latest_chunk_log_sees_newest_attempt() {
        let store = MemoryBatchStore::new();
        let batch = store.create_batch(new_batch()).await.unwrap();

        let first = store
            .create_chunk_log(NewChunkAuditLog {
                batch_upload_id: batch.id,
                chunk_number: 3,
            })
            .await
            .unwrap();
        store
            .mark_chunk_log_failed(batch.id, first.id, 0, 0, "object store hiccup")
            .await
            .unwrap();
        let second = store
            .create_chunk_log(NewChunkAuditLog {
                batch_upload_id: batch.id,
                chunk_number: 3,
            })
            .await
            .unwrap();

        let latest = store.latest_chunk_log(batch.id, 3).await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);
        assert_eq!(store.list_chunk_logs(batch.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_batch_is_a_silent_completion_noop() {
        let store = MemoryBatchStore::new();
        let outcome = store.complete_if_fully_processed(999).await.unwrap();
        assert_eq!(outcome, CompletionOutcome::BatchMissing);
    }

    #[tokio::test]
    async fn stalled_scan_reports_only_old_processing_batches() {
        use crate::constants::defaults;

        let store = MemoryBatchStore::new();
        let stuck = store.create_batch(new_batch()).await.unwrap();
        store.mark_batch_processing(stuck.id).await.unwrap();
        let fresh = store.create_batch(new_batch()).await.unwrap();
        store.mark_batch_processing(fresh.id).await.unwrap();

        // Age the first batch past the stall window
        {
            let entry = store.entry(stuck.id).unwrap();
            let mut guard = entry.lock().await;
            guard.batch.updated_at =
                now() - chrono::Duration::seconds(defaults::STALLED_AFTER_SECONDS + 60);
        }

        let stalled = store
            .find_stalled(defaults::STALLED_AFTER_SECONDS)
            .await
            .unwrap();
        let ids: Vec<i64> = stalled.iter().map(|batch| batch.id).collect();
        assert_eq!(ids, vec![stuck.id]);
    }
}
