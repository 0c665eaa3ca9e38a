//! # Error Types
//!
//! Crate-level error handling for the eligibility ingestion core.
//!
//! Each subsystem defines its own error enum (`StorageError`, `StoreError`,
//! `DispatchError`, `ConfigurationError`) and converts into [`IngestError`]
//! at the pipeline surface. Retry decisions are driven by
//! [`IngestError::is_transient`], which classifies infrastructure failures
//! (storage I/O, database contention) as retryable and everything else as
//! permanent.

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::dispatch::DispatchError;
use crate::persistence::StoreError;
use crate::storage::StorageError;

/// Top-level error type for ingestion pipeline operations.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Object store failure (missing object, I/O, oversized line).
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Batch store failure (database error, invalid transition).
    #[error("batch store error: {0}")]
    Store(#[from] StoreError),

    /// Chunk dispatch failure.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// The initial scan of an uploaded file could not produce a chunk plan.
    #[error("planning error for batch {batch_upload_id}: {message}")]
    Planning { batch_upload_id: i64, message: String },

    /// An operation referenced a batch upload that does not exist.
    #[error("batch upload {batch_upload_id} not found")]
    BatchNotFound { batch_upload_id: i64 },
}

impl IngestError {
    /// Create a planning error with context about what the scan rejected.
    pub fn planning(batch_upload_id: i64, message: impl Into<String>) -> Self {
        Self::Planning {
            batch_upload_id,
            message: message.into(),
        }
    }

    /// Create a batch-not-found error.
    pub fn batch_not_found(batch_upload_id: i64) -> Self {
        Self::BatchNotFound { batch_upload_id }
    }

    /// Whether a retry has any chance of succeeding.
    ///
    /// Transient errors are infrastructure hiccups: object store I/O and
    /// database failures. Planning rejections, missing batches, missing
    /// objects, and configuration problems are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(err) => err.is_transient(),
            Self::Store(err) => err.is_transient(),
            Self::Dispatch(err) => err.is_transient(),
            Self::Configuration(_) => false,
            Self::Planning { .. } => false,
            Self::BatchNotFound { .. } => false,
        }
    }
}

/// Convenient result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification_follows_subsystem() {
        let io = IngestError::Storage(StorageError::backend("connection reset"));
        assert!(io.is_transient());

        let missing = IngestError::Storage(StorageError::not_found("uploads/x.csv"));
        assert!(!missing.is_transient());

        let planning = IngestError::planning(7, "file is empty");
        assert!(!planning.is_transient());
        assert!(planning.to_string().contains("batch 7"));
    }

    #[test]
    fn batch_not_found_displays_id() {
        let err = IngestError::batch_not_found(42);
        assert_eq!(err.to_string(), "batch upload 42 not found");
    }
}
