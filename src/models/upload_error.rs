//! # Upload Error Model
//!
//! Immutable per-row failure records. A chunk worker accumulates these in
//! memory and bulk-inserts them once at the end of the chunk; remediation
//! tooling pages through them by batch.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

/// One data row that failed processing, with enough context to fix and
/// resubmit it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct UploadError {
    pub id: i64,
    pub batch_upload_id: i64,
    /// 1-indexed physical line in the original file (header is row 1).
    pub row_number: i64,
    pub error_code: String,
    pub error_message: String,
    pub raw_row: String,
    pub created_at: NaiveDateTime,
}

/// New error record for bulk creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUploadError {
    pub batch_upload_id: i64,
    pub row_number: i64,
    pub error_code: String,
    pub error_message: String,
    pub raw_row: String,
}

const UPLOAD_ERROR_COLUMNS: &str =
    "id, batch_upload_id, row_number, error_code, error_message, raw_row, created_at";

impl UploadError {
    /// Insert a chunk's accumulated errors in one statement. Returns the
    /// number of rows written; an empty slice writes nothing.
    pub async fn bulk_create<'e, E>(
        executor: E,
        errors: &[NewUploadError],
    ) -> Result<u64, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        if errors.is_empty() {
            return Ok(0);
        }

        let mut batch_ids = Vec::with_capacity(errors.len());
        let mut row_numbers = Vec::with_capacity(errors.len());
        let mut codes = Vec::with_capacity(errors.len());
        let mut messages = Vec::with_capacity(errors.len());
        let mut raw_rows = Vec::with_capacity(errors.len());
        for error in errors {
            batch_ids.push(error.batch_upload_id);
            row_numbers.push(error.row_number);
            codes.push(error.error_code.clone());
            messages.push(error.error_message.clone());
            raw_rows.push(error.raw_row.clone());
        }

        let result = sqlx::query(
            "INSERT INTO eligibility_upload_errors
                 (batch_upload_id, row_number, error_code, error_message, raw_row)
             SELECT * FROM UNNEST($1::BIGINT[], $2::BIGINT[], $3::TEXT[], $4::TEXT[], $5::TEXT[])",
        )
        .bind(&batch_ids)
        .bind(&row_numbers)
        .bind(&codes)
        .bind(&messages)
        .bind(&raw_rows)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Page through a batch's errors in file order.
    pub async fn list_for_batch(
        pool: &PgPool,
        batch_upload_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {UPLOAD_ERROR_COLUMNS} FROM eligibility_upload_errors
             WHERE batch_upload_id = $1
             ORDER BY row_number ASC, id ASC
             LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, UploadError>(&query)
            .bind(batch_upload_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    /// Total error rows recorded for a batch.
    pub async fn count_for_batch(pool: &PgPool, batch_upload_id: i64) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM eligibility_upload_errors WHERE batch_upload_id = $1",
        )
        .bind(batch_upload_id)
        .fetch_one(pool)
        .await
    }
}
