//! Postgres-backed batch store.
//!
//! Delegates simple CRUD to the model methods and owns the two transactional
//! operations that must hold the per-batch row lock: atomic chunk completion
//! and the exactly-once batch completion check. Plain `UPDATE` statements and
//! `SELECT ... FOR UPDATE` contend on the same row lock, which is the whole
//! coordination story: concurrent workers serialize at the batch row, and the
//! final check can never see a torn counter update.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{FromRow, PgPool};
use tracing::{debug, instrument};

use crate::models::{
    BatchStatus, BatchUpload, ChunkAuditLog, NewBatchUpload, NewChunkAuditLog, NewUploadError,
    UploadError,
};

use super::{BatchCounters, BatchStore, CompletionOutcome, StoreError};

/// Production [`BatchStore`] over a sqlx connection pool.
#[derive(Debug, Clone)]
pub struct PgBatchStore {
    pool: PgPool,
}

impl PgBatchStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(Debug, FromRow)]
struct CounterRow {
    num_rows: Option<i64>,
    num_rows_processed: i64,
    num_rows_succeeded: i64,
    num_rows_errored: i64,
}

impl From<CounterRow> for BatchCounters {
    fn from(row: CounterRow) -> Self {
        Self {
            num_rows: row.num_rows,
            num_rows_processed: row.num_rows_processed,
            num_rows_succeeded: row.num_rows_succeeded,
            num_rows_errored: row.num_rows_errored,
        }
    }
}

#[async_trait]
impl BatchStore for PgBatchStore {
    async fn create_batch(&self, new_batch: NewBatchUpload) -> Result<BatchUpload, StoreError> {
        BatchUpload::create(&self.pool, new_batch)
            .await
            .map_err(|err| StoreError::database("create_batch", err))
    }

    async fn find_batch(&self, batch_upload_id: i64) -> Result<Option<BatchUpload>, StoreError> {
        BatchUpload::find_by_id(&self.pool, batch_upload_id)
            .await
            .map_err(|err| StoreError::database("find_batch", err))
    }

    async fn mark_batch_processing(&self, batch_upload_id: i64) -> Result<(), StoreError> {
        let updated = BatchUpload::mark_processing(&self.pool, batch_upload_id)
            .await
            .map_err(|err| StoreError::database("mark_batch_processing", err))?;
        if updated {
            return Ok(());
        }

        match self.find_batch(batch_upload_id).await? {
            None => Err(StoreError::BatchNotFound { batch_upload_id }),
            Some(batch) => Err(StoreError::invalid_transition(
                batch_upload_id,
                format!("cannot move batch in state '{}' to processing", batch.status),
            )),
        }
    }

    async fn set_batch_num_rows(
        &self,
        batch_upload_id: i64,
        num_rows: i64,
    ) -> Result<(), StoreError> {
        let updated = BatchUpload::set_num_rows(&self.pool, batch_upload_id, num_rows)
            .await
            .map_err(|err| StoreError::database("set_batch_num_rows", err))?;
        if updated {
            return Ok(());
        }

        match self.find_batch(batch_upload_id).await? {
            None => Err(StoreError::BatchNotFound { batch_upload_id }),
            Some(batch) => Err(StoreError::invalid_transition(
                batch_upload_id,
                format!(
                    "num_rows already set to {:?}, refusing to overwrite with {num_rows}",
                    batch.num_rows
                ),
            )),
        }
    }

    async fn mark_batch_failed(
        &self,
        batch_upload_id: i64,
        message: &str,
    ) -> Result<bool, StoreError> {
        BatchUpload::mark_failed(&self.pool, batch_upload_id, message)
            .await
            .map_err(|err| StoreError::database("mark_batch_failed", err))
    }

    async fn create_chunk_log(
        &self,
        new_log: NewChunkAuditLog,
    ) -> Result<ChunkAuditLog, StoreError> {
        ChunkAuditLog::create(&self.pool, new_log)
            .await
            .map_err(|err| StoreError::database("create_chunk_log", err))
    }

    async fn latest_chunk_log(
        &self,
        batch_upload_id: i64,
        chunk_number: i32,
    ) -> Result<Option<ChunkAuditLog>, StoreError> {
        ChunkAuditLog::latest_for_chunk(&self.pool, batch_upload_id, chunk_number)
            .await
            .map_err(|err| StoreError::database("latest_chunk_log", err))
    }

    async fn mark_chunk_log_failed(
        &self,
        _batch_upload_id: i64,
        chunk_log_id: i64,
        succeeded: i64,
        failed: i64,
        message: &str,
    ) -> Result<bool, StoreError> {
        ChunkAuditLog::mark_failed(&self.pool, chunk_log_id, succeeded, failed, message)
            .await
            .map_err(|err| StoreError::database("mark_chunk_log_failed", err))
    }

    #[instrument(skip(self), fields(batch_upload_id = batch_upload_id, chunk_log_id = chunk_log_id))]
    async fn complete_chunk(
        &self,
        batch_upload_id: i64,
        chunk_log_id: i64,
        succeeded: i64,
        failed: i64,
    ) -> Result<BatchCounters, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| StoreError::database("complete_chunk.begin", err))?;

        let audit_updated =
            ChunkAuditLog::mark_completed(&mut *tx, chunk_log_id, succeeded, failed)
                .await
                .map_err(|err| StoreError::database("complete_chunk.audit", err))?;
        if !audit_updated {
            let _ = tx.rollback().await;
            return Err(StoreError::ChunkLogNotFound {
                batch_upload_id,
                chunk_log_id,
            });
        }

        // The UPDATE takes the batch row lock, serializing with concurrent
        // counter applications and the completion check.
        let counters = sqlx::query_as::<_, CounterRow>(
            "UPDATE eligibility_batch_uploads
             SET num_rows_processed = num_rows_processed + $2,
                 num_rows_succeeded = num_rows_succeeded + $3,
                 num_rows_errored = num_rows_errored + $4,
                 updated_at = NOW()
             WHERE id = $1
             RETURNING num_rows, num_rows_processed, num_rows_succeeded, num_rows_errored",
        )
        .bind(batch_upload_id)
        .bind(succeeded + failed)
        .bind(succeeded)
        .bind(failed)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|err| StoreError::database("complete_chunk.counters", err))?;

        let counters = match counters {
            Some(row) => BatchCounters::from(row),
            None => {
                let _ = tx.rollback().await;
                return Err(StoreError::BatchNotFound { batch_upload_id });
            }
        };

        tx.commit()
            .await
            .map_err(|err| StoreError::database("complete_chunk.commit", err))?;

        debug!(
            num_rows_processed = counters.num_rows_processed,
            num_rows_succeeded = counters.num_rows_succeeded,
            num_rows_errored = counters.num_rows_errored,
            "chunk counters applied"
        );
        Ok(counters)
    }

    async fn insert_upload_errors(&self, errors: &[NewUploadError]) -> Result<u64, StoreError> {
        UploadError::bulk_create(&self.pool, errors)
            .await
            .map_err(|err| StoreError::database("insert_upload_errors", err))
    }

    #[instrument(skip(self), fields(batch_upload_id = batch_upload_id))]
    async fn complete_if_fully_processed(
        &self,
        batch_upload_id: i64,
    ) -> Result<CompletionOutcome, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| StoreError::database("complete_check.begin", err))?;

        let batch = BatchUpload::find_by_id_for_update(&mut *tx, batch_upload_id)
            .await
            .map_err(|err| StoreError::database("complete_check.lock", err))?;

        let batch = match batch {
            Some(batch) => batch,
            None => {
                let _ = tx.rollback().await;
                return Ok(CompletionOutcome::BatchMissing);
            }
        };

        if batch.is_completed() {
            let _ = tx.rollback().await;
            return Ok(CompletionOutcome::AlreadyCompleted);
        }
        if batch.is_failed() {
            let _ = tx.rollback().await;
            return Ok(CompletionOutcome::BatchFailed);
        }
        if !batch.is_fully_processed() {
            let counters = BatchCounters::from(&batch);
            let _ = tx.rollback().await;
            return Ok(CompletionOutcome::NotYetComplete { counters });
        }

        // Guarded so a pending batch (rows counted but never marked
        // processing) cannot jump straight to completed.
        let transitioned = sqlx::query(
            "UPDATE eligibility_batch_uploads
             SET status = $2, processed_at = NOW(), updated_at = NOW()
             WHERE id = $1 AND status = $3",
        )
        .bind(batch_upload_id)
        .bind(BatchStatus::Completed.as_str())
        .bind(BatchStatus::Processing.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|err| StoreError::database("complete_check.transition", err))?;

        if transitioned.rows_affected() == 0 {
            let counters = BatchCounters::from(&batch);
            let _ = tx.rollback().await;
            return Ok(CompletionOutcome::NotYetComplete { counters });
        }

        tx.commit()
            .await
            .map_err(|err| StoreError::database("complete_check.commit", err))?;

        Ok(CompletionOutcome::Completed {
            counters: BatchCounters::from(&batch),
        })
    }

    async fn list_chunk_logs(
        &self,
        batch_upload_id: i64,
    ) -> Result<Vec<ChunkAuditLog>, StoreError> {
        ChunkAuditLog::list_for_batch(&self.pool, batch_upload_id)
            .await
            .map_err(|err| StoreError::database("list_chunk_logs", err))
    }

    async fn list_upload_errors(
        &self,
        batch_upload_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<UploadError>, StoreError> {
        UploadError::list_for_batch(&self.pool, batch_upload_id, limit, offset)
            .await
            .map_err(|err| StoreError::database("list_upload_errors", err))
    }

    async fn find_stalled(&self, older_than_seconds: i64) -> Result<Vec<BatchUpload>, StoreError> {
        let cutoff = Utc::now().naive_utc() - chrono::Duration::seconds(older_than_seconds);
        BatchUpload::find_stalled(&self.pool, cutoff)
            .await
            .map_err(|err| StoreError::database("find_stalled", err))
    }
}
