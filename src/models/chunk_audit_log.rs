//! # Chunk Audit Log Model
//!
//! One row per chunk processing **attempt**. Workers write `started` before
//! touching any data, then flip the same row to `completed` or `failed`, so
//! operators can tell a slow chunk (started, no terminal row) from a lost one
//! and so retries can see whether a previous attempt already finished. Rows
//! are never deleted.
//!
//! Maps to `eligibility_chunk_audit_logs`; see `migrations/` for the schema.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

/// Lifecycle states for a chunk attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Started,
    Completed,
    Failed,
}

impl ChunkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStatus::Started => "started",
            ChunkStatus::Completed => "completed",
            ChunkStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChunkStatus::Completed | ChunkStatus::Failed)
    }
}

impl fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChunkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(ChunkStatus::Started),
            "completed" => Ok(ChunkStatus::Completed),
            "failed" => Ok(ChunkStatus::Failed),
            _ => Err(format!("unknown chunk status: {s}")),
        }
    }
}

/// One attempt at processing one chunk of one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ChunkAuditLog {
    pub id: i64,
    pub batch_upload_id: i64,
    pub chunk_number: i32,
    pub status: String,
    pub succeeded_count: i64,
    pub failed_count: i64,
    pub error_message: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// New audit row for creation (fresh attempt, zero counts).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewChunkAuditLog {
    pub batch_upload_id: i64,
    pub chunk_number: i32,
}

const CHUNK_LOG_COLUMNS: &str = "id, batch_upload_id, chunk_number, status, succeeded_count, \
     failed_count, error_message, created_at, updated_at";

impl ChunkAuditLog {
    pub fn is_completed(&self) -> bool {
        self.status == ChunkStatus::Completed.as_str()
    }

    pub fn is_failed(&self) -> bool {
        self.status == ChunkStatus::Failed.as_str()
    }

    /// Create a fresh `started` attempt row.
    pub async fn create(pool: &PgPool, new_log: NewChunkAuditLog) -> Result<Self, sqlx::Error> {
        let query = format!(
            "INSERT INTO eligibility_chunk_audit_logs
                 (batch_upload_id, chunk_number, status, succeeded_count, failed_count)
             VALUES ($1, $2, $3, 0, 0)
             RETURNING {CHUNK_LOG_COLUMNS}"
        );
        sqlx::query_as::<_, ChunkAuditLog>(&query)
            .bind(new_log.batch_upload_id)
            .bind(new_log.chunk_number)
            .bind(ChunkStatus::Started.as_str())
            .fetch_one(pool)
            .await
    }

    /// The most recent attempt for a chunk, if any. Retried chunks have
    /// several rows; the newest one decides whether work was already done.
    pub async fn latest_for_chunk(
        pool: &PgPool,
        batch_upload_id: i64,
        chunk_number: i32,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {CHUNK_LOG_COLUMNS} FROM eligibility_chunk_audit_logs
             WHERE batch_upload_id = $1 AND chunk_number = $2
             ORDER BY id DESC
             LIMIT 1"
        );
        sqlx::query_as::<_, ChunkAuditLog>(&query)
            .bind(batch_upload_id)
            .bind(chunk_number)
            .fetch_optional(pool)
            .await
    }

    /// Flip an attempt row to `completed` with its final tallies, executable
    /// inside the counter-application transaction.
    pub async fn mark_completed<'e, E>(
        executor: E,
        id: i64,
        succeeded_count: i64,
        failed_count: i64,
    ) -> Result<bool, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE eligibility_chunk_audit_logs
             SET status = $2, succeeded_count = $3, failed_count = $4, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(ChunkStatus::Completed.as_str())
        .bind(succeeded_count)
        .bind(failed_count)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Flip an attempt row to `failed`, keeping whatever partial tallies the
    /// attempt reached for diagnostics.
    pub async fn mark_failed(
        pool: &PgPool,
        id: i64,
        succeeded_count: i64,
        failed_count: i64,
        message: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE eligibility_chunk_audit_logs
             SET status = $2, succeeded_count = $3, failed_count = $4,
                 error_message = $5, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(ChunkStatus::Failed.as_str())
        .bind(succeeded_count)
        .bind(failed_count)
        .bind(message)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Every attempt for a batch, ordered for drill-down display.
    pub async fn list_for_batch(
        pool: &PgPool,
        batch_upload_id: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {CHUNK_LOG_COLUMNS} FROM eligibility_chunk_audit_logs
             WHERE batch_upload_id = $1
             ORDER BY chunk_number ASC, id ASC"
        );
        sqlx::query_as::<_, ChunkAuditLog>(&query)
            .bind(batch_upload_id)
            .fetch_all(pool)
            .await
    }
}
