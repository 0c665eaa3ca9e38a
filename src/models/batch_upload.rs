//! # Batch Upload Model
//!
//! Root record for one uploaded eligibility file.
//!
//! ## Overview
//!
//! A `BatchUpload` is created when a client asks to upload a file and tracks
//! the file through its whole life: where the object lives, how many data
//! rows the scan counted, how many rows the chunk workers have processed so
//! far, and the terminal outcome. Concurrent workers fold their per-chunk
//! tallies into the running counters; the completion check fires exactly once
//! when `num_rows_processed` reaches `num_rows`.
//!
//! ## Database Schema
//!
//! Maps to `eligibility_batch_uploads`:
//! ```sql
//! CREATE TABLE eligibility_batch_uploads (
//!   id BIGSERIAL PRIMARY KEY,
//!   storage_key VARCHAR NOT NULL,
//!   original_filename VARCHAR NOT NULL,
//!   status VARCHAR NOT NULL DEFAULT 'pending',
//!   num_rows BIGINT,
//!   num_rows_processed BIGINT NOT NULL DEFAULT 0,
//!   num_rows_succeeded BIGINT NOT NULL DEFAULT 0,
//!   num_rows_errored BIGINT NOT NULL DEFAULT 0,
//!   error_message TEXT,
//!   processed_at TIMESTAMP,
//!   -- ... timestamps
//! );
//! ```
//!
//! ## Invariants
//!
//! - `num_rows_processed = num_rows_succeeded + num_rows_errored` at every
//!   observation point (also CHECK-enforced in the schema).
//! - `num_rows` is written once by the orchestrator and never changed.
//! - `status` moves monotonically: pending → processing → completed | failed.
//!   Terminal states never regress; the transition guards live in the WHERE
//!   clauses below.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

/// Lifecycle states for a batch upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Created; the file may still be uploading.
    Pending,
    /// Scan finished or underway; chunks are being processed.
    Processing,
    /// Every counted row was processed; terminal.
    Completed,
    /// Scan, dispatch, or an unrecoverable chunk crash ended the batch;
    /// terminal.
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }

    /// Whether this state permits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BatchStatus::Pending),
            "processing" => Ok(BatchStatus::Processing),
            "completed" => Ok(BatchStatus::Completed),
            "failed" => Ok(BatchStatus::Failed),
            _ => Err(format!("unknown batch status: {s}")),
        }
    }
}

/// One uploaded eligibility file and its processing bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct BatchUpload {
    pub id: i64,
    pub storage_key: String,
    pub original_filename: String,
    pub status: String,
    pub num_rows: Option<i64>,
    pub num_rows_processed: i64,
    pub num_rows_succeeded: i64,
    pub num_rows_errored: i64,
    pub error_message: Option<String>,
    pub processed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// New batch upload for creation (without generated fields).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBatchUpload {
    pub storage_key: String,
    pub original_filename: String,
}

const BATCH_COLUMNS: &str = "id, storage_key, original_filename, status, num_rows, \
     num_rows_processed, num_rows_succeeded, num_rows_errored, error_message, \
     processed_at, created_at, updated_at";

impl BatchUpload {
    pub fn is_pending(&self) -> bool {
        self.status == BatchStatus::Pending.as_str()
    }

    pub fn is_processing(&self) -> bool {
        self.status == BatchStatus::Processing.as_str()
    }

    pub fn is_completed(&self) -> bool {
        self.status == BatchStatus::Completed.as_str()
    }

    pub fn is_failed(&self) -> bool {
        self.status == BatchStatus::Failed.as_str()
    }

    pub fn is_terminal(&self) -> bool {
        self.is_completed() || self.is_failed()
    }

    /// Whether every counted row has been folded into the totals. False
    /// until the scan has recorded `num_rows`.
    pub fn is_fully_processed(&self) -> bool {
        match self.num_rows {
            Some(total) => self.num_rows_processed >= total,
            None => false,
        }
    }

    /// Create a new pending batch upload.
    pub async fn create(pool: &PgPool, new_batch: NewBatchUpload) -> Result<Self, sqlx::Error> {
        let query = format!(
            "INSERT INTO eligibility_batch_uploads (storage_key, original_filename, status)
             VALUES ($1, $2, $3)
             RETURNING {BATCH_COLUMNS}"
        );
        sqlx::query_as::<_, BatchUpload>(&query)
            .bind(&new_batch.storage_key)
            .bind(&new_batch.original_filename)
            .bind(BatchStatus::Pending.as_str())
            .fetch_one(pool)
            .await
    }

    /// Find a batch by its ID.
    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {BATCH_COLUMNS} FROM eligibility_batch_uploads WHERE id = $1");
        sqlx::query_as::<_, BatchUpload>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find a batch and take its row lock. Must run inside a transaction;
    /// the lock serializes counter application against the completion check.
    pub async fn find_by_id_for_update<'e, E>(
        executor: E,
        id: i64,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let query = format!(
            "SELECT {BATCH_COLUMNS} FROM eligibility_batch_uploads WHERE id = $1 FOR UPDATE"
        );
        sqlx::query_as::<_, BatchUpload>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Move a pending batch to processing. Idempotent for batches already
    /// processing; refuses to resurrect terminal batches.
    pub async fn mark_processing(pool: &PgPool, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE eligibility_batch_uploads
             SET status = $2, updated_at = NOW()
             WHERE id = $1 AND status IN ($3, $2)",
        )
        .bind(id)
        .bind(BatchStatus::Processing.as_str())
        .bind(BatchStatus::Pending.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record the scanned row total. Set-once: re-running the scan with the
    /// same total is a no-op, a different total is rejected (returns false).
    pub async fn set_num_rows(pool: &PgPool, id: i64, num_rows: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE eligibility_batch_uploads
             SET num_rows = $2, updated_at = NOW()
             WHERE id = $1 AND (num_rows IS NULL OR num_rows = $2)",
        )
        .bind(id)
        .bind(num_rows)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a batch failed with a diagnostic message. No-op on batches
    /// already terminal (completed stays completed, first failure message
    /// wins).
    pub async fn mark_failed(
        pool: &PgPool,
        id: i64,
        message: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE eligibility_batch_uploads
             SET status = $2, error_message = $3, updated_at = NOW()
             WHERE id = $1 AND status NOT IN ($2, $4)",
        )
        .bind(id)
        .bind(BatchStatus::Failed.as_str())
        .bind(message)
        .bind(BatchStatus::Completed.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Processing batches with no progress since `older_than`; the
    /// operational "slow or lost chunk" inspection hook.
    pub async fn find_stalled(
        pool: &PgPool,
        older_than: NaiveDateTime,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {BATCH_COLUMNS} FROM eligibility_batch_uploads
             WHERE status = $1 AND updated_at < $2
             ORDER BY updated_at ASC"
        );
        sqlx::query_as::<_, BatchUpload>(&query)
            .bind(BatchStatus::Processing.as_str())
            .bind(older_than)
            .fetch_all(pool)
            .await
    }
}
