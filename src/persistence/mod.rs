//! # Batch Store
//!
//! Every persistent mutation the pipeline performs, behind one trait. The
//! contract encodes the concurrency rules the pipeline depends on, so any
//! implementation must provide:
//!
//! - **A per-batch exclusive lock.** [`BatchStore::complete_chunk`] (counter
//!   application) and [`BatchStore::complete_if_fully_processed`] (the
//!   completion check) serialize on it. Postgres uses the batch row lock;
//!   the in-memory store uses a per-batch async mutex.
//! - **Atomic attempt completion.** `complete_chunk` flips the audit row to
//!   `completed` and folds the chunk's tallies into the batch counters as
//!   one atomic step, so the completed-audit marker workers consult on
//!   redelivery can never be observed half-applied.
//! - **Monotonic status.** Terminal batch states never regress, and the
//!   `processing → completed` transition happens exactly once no matter how
//!   many concurrent callers race the final check.
//!
//! [`PgBatchStore`] is the production implementation; [`MemoryBatchStore`]
//! backs tests and dry-runs.

mod memory;
mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{BatchUpload, ChunkAuditLog, NewBatchUpload, NewChunkAuditLog, NewUploadError, UploadError};

pub use memory::MemoryBatchStore;
pub use postgres::PgBatchStore;

/// Errors raised by batch store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying database failed.
    #[error("database error during {operation}: {source}")]
    Database {
        operation: String,
        #[source]
        source: sqlx::Error,
    },

    /// The referenced batch does not exist.
    #[error("batch upload {batch_upload_id} not found")]
    BatchNotFound { batch_upload_id: i64 },

    /// The referenced chunk audit row does not exist.
    #[error("chunk audit log {chunk_log_id} not found for batch {batch_upload_id}")]
    ChunkLogNotFound {
        batch_upload_id: i64,
        chunk_log_id: i64,
    },

    /// A status or set-once rule rejected the mutation.
    #[error("invalid transition for batch {batch_upload_id}: {reason}")]
    InvalidTransition {
        batch_upload_id: i64,
        reason: String,
    },
}

impl StoreError {
    pub fn database(operation: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Database {
            operation: operation.into(),
            source,
        }
    }

    pub fn invalid_transition(batch_upload_id: i64, reason: impl Into<String>) -> Self {
        Self::InvalidTransition {
            batch_upload_id,
            reason: reason.into(),
        }
    }

    /// Database failures are worth retrying; contract violations are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database { .. })
    }
}

/// Snapshot of a batch's row counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounters {
    /// Total data rows the scan counted; `None` until the scan persists it.
    pub num_rows: Option<i64>,
    pub num_rows_processed: i64,
    pub num_rows_succeeded: i64,
    pub num_rows_errored: i64,
}

impl BatchCounters {
    /// The conservation law: processed rows split exactly into successes
    /// and errors.
    pub fn is_conserved(&self) -> bool {
        self.num_rows_processed == self.num_rows_succeeded + self.num_rows_errored
    }

    /// Rows still unaccounted for, once the total is known.
    pub fn remaining(&self) -> Option<i64> {
        self.num_rows.map(|total| total - self.num_rows_processed)
    }
}

impl From<&BatchUpload> for BatchCounters {
    fn from(batch: &BatchUpload) -> Self {
        Self {
            num_rows: batch.num_rows,
            num_rows_processed: batch.num_rows_processed,
            num_rows_succeeded: batch.num_rows_succeeded,
            num_rows_errored: batch.num_rows_errored,
        }
    }
}

/// Result of one completion check. Exactly one caller per batch ever
/// observes [`CompletionOutcome::Completed`].
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    /// This call performed the `processing → completed` transition.
    Completed { counters: BatchCounters },
    /// Rows remain unprocessed (or the scan total is not recorded yet).
    NotYetComplete { counters: BatchCounters },
    /// Another caller already completed the batch.
    AlreadyCompleted,
    /// The batch failed earlier; completion never fires.
    BatchFailed,
    /// The batch row is gone; treated as a silent no-op.
    BatchMissing,
}

impl CompletionOutcome {
    pub fn did_complete(&self) -> bool {
        matches!(self, CompletionOutcome::Completed { .. })
    }
}

/// Persistent bookkeeping surface for the ingestion pipeline.
#[async_trait]
pub trait BatchStore: Send + Sync + std::fmt::Debug {
    /// Create a pending batch for a freshly requested upload.
    async fn create_batch(&self, new_batch: NewBatchUpload) -> Result<BatchUpload, StoreError>;

    /// Fetch a batch by id.
    async fn find_batch(&self, batch_upload_id: i64) -> Result<Option<BatchUpload>, StoreError>;

    /// Move a batch to `processing`. Idempotent when already processing;
    /// errors on terminal batches.
    async fn mark_batch_processing(&self, batch_upload_id: i64) -> Result<(), StoreError>;

    /// Record the scanned data-row total. Set-once.
    async fn set_batch_num_rows(&self, batch_upload_id: i64, num_rows: i64)
        -> Result<(), StoreError>;

    /// Mark a batch failed with a diagnostic message. Returns false when the
    /// batch was already terminal (nothing changed).
    async fn mark_batch_failed(
        &self,
        batch_upload_id: i64,
        message: &str,
    ) -> Result<bool, StoreError>;

    /// Open a fresh `started` audit row for a chunk attempt.
    async fn create_chunk_log(
        &self,
        new_log: NewChunkAuditLog,
    ) -> Result<ChunkAuditLog, StoreError>;

    /// The most recent audit row for a chunk, if any attempt exists.
    async fn latest_chunk_log(
        &self,
        batch_upload_id: i64,
        chunk_number: i32,
    ) -> Result<Option<ChunkAuditLog>, StoreError>;

    /// Flip an attempt to `failed`, keeping partial tallies for diagnostics.
    /// Returns false when the audit row no longer exists.
    async fn mark_chunk_log_failed(
        &self,
        batch_upload_id: i64,
        chunk_log_id: i64,
        succeeded: i64,
        failed: i64,
        message: &str,
    ) -> Result<bool, StoreError>;

    /// Atomically flip an attempt to `completed` and fold its tallies into
    /// the batch counters, under the per-batch lock. Returns the counters
    /// after application.
    async fn complete_chunk(
        &self,
        batch_upload_id: i64,
        chunk_log_id: i64,
        succeeded: i64,
        failed: i64,
    ) -> Result<BatchCounters, StoreError>;

    /// Bulk-insert a chunk's row errors.
    async fn insert_upload_errors(&self, errors: &[NewUploadError]) -> Result<u64, StoreError>;

    /// Under the per-batch lock: complete the batch if every counted row is
    /// processed, otherwise report why not. See [`CompletionOutcome`].
    async fn complete_if_fully_processed(
        &self,
        batch_upload_id: i64,
    ) -> Result<CompletionOutcome, StoreError>;

    /// Every chunk attempt for a batch, for operational drill-down.
    async fn list_chunk_logs(&self, batch_upload_id: i64)
        -> Result<Vec<ChunkAuditLog>, StoreError>;

    /// Page through a batch's row errors in file order.
    async fn list_upload_errors(
        &self,
        batch_upload_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<UploadError>, StoreError>;

    /// Processing batches with no progress for `older_than_seconds`.
    async fn find_stalled(&self, older_than_seconds: i64) -> Result<Vec<BatchUpload>, StoreError>;
}
