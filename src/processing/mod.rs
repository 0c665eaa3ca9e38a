//! # Record Processing Interface
//!
//! The boundary between this crate and the business layer. The pipeline
//! parses rows and delivers them here one at a time; what "processing" means
//! (member matching, enrollment writes, rule evaluation) lives outside the
//! crate behind the [`RecordProcessor`] trait.
//!
//! Failures cross the boundary as a [`ProcessorError`] with a closed
//! [`ErrorCode`] taxonomy, which is what ends up in the `error_code` column
//! of persisted row errors. Anything a processor cannot classify belongs
//! under [`ErrorCode::Unexpected`]; the worker logs those loudly and keeps
//! going, because one poisoned row must never sink the other 999 in its
//! chunk.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed failure taxonomy for per-row processing errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The row's content is unusable (missing/malformed fields).
    Validation,
    /// The row collides with an existing record.
    Duplicate,
    /// Anything the processor could not classify.
    Unexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Validation => "VALIDATION",
            ErrorCode::Duplicate => "DUPLICATE",
            ErrorCode::Unexpected => "UNEXPECTED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VALIDATION" => Ok(ErrorCode::Validation),
            "DUPLICATE" => Ok(ErrorCode::Duplicate),
            "UNEXPECTED" => Ok(ErrorCode::Unexpected),
            _ => Err(format!("unknown error code: {s}")),
        }
    }
}

/// A classified per-row processing failure.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct ProcessorError {
    pub code: ErrorCode,
    pub message: String,
}

impl ProcessorError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Validation,
            message: message.into(),
        }
    }

    pub fn duplicate(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Duplicate,
            message: message.into(),
        }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Unexpected,
            message: message.into(),
        }
    }

    /// Whether this failure came through the catch-all code rather than a
    /// deliberate classification.
    pub fn is_unexpected(&self) -> bool {
        self.code == ErrorCode::Unexpected
    }
}

impl From<anyhow::Error> for ProcessorError {
    fn from(err: anyhow::Error) -> Self {
        // {:#} flattens the whole context chain into one line
        Self::unexpected(format!("{err:#}"))
    }
}

/// One parsed data row: header-keyed fields plus the raw line for error
/// records and audits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub fields: HashMap<String, String>,
    /// The line as it appeared in the file, without its terminator.
    pub raw: String,
}

impl FileRecord {
    /// Field value by header name.
    pub fn get(&self, header: &str) -> Option<&str> {
        self.fields.get(header).map(String::as_str)
    }
}

/// Per-row context handed to the processor alongside the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessContext {
    pub batch_upload_id: i64,
    /// 1-indexed physical line number in the original file.
    pub row_number: i64,
}

/// Business-layer hook invoked once per parsed data row.
///
/// The entity a successful call produces is opaque to the pipeline, so the
/// contract only carries success or a classified failure. Chunk tasks are
/// delivered at least once; implementations must tolerate re-seeing a row
/// they already handled (typically surfacing it as [`ErrorCode::Duplicate`]).
#[async_trait]
pub trait RecordProcessor: Send + Sync {
    async fn process(
        &self,
        record: &FileRecord,
        context: &ProcessContext,
    ) -> Result<(), ProcessorError>;
}

/// Processor that accepts every row. Wiring tests and dry-runs only.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProcessor;

#[async_trait]
impl RecordProcessor for NoopProcessor {
    async fn process(
        &self,
        _record: &FileRecord,
        _context: &ProcessContext,
    ) -> Result<(), ProcessorError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_round_trip() {
        for code in [ErrorCode::Validation, ErrorCode::Duplicate, ErrorCode::Unexpected] {
            assert_eq!(ErrorCode::from_str(code.as_str()).unwrap(), code);
        }
        assert!(ErrorCode::from_str("validation").is_err());
    }

    #[test]
    fn anyhow_errors_become_unexpected() {
        let err = anyhow::anyhow!("driver exploded").context("writing enrollment");
        let processor_err = ProcessorError::from(err);
        assert!(processor_err.is_unexpected());
        assert!(processor_err.message.contains("driver exploded"));
        assert!(processor_err.message.contains("writing enrollment"));
    }

    #[tokio::test]
    async fn noop_processor_accepts_everything() {
        let record = FileRecord {
            fields: HashMap::from([("member_id".to_string(), "m-1".to_string())]),
            raw: "m-1".to_string(),
        };
        let context = ProcessContext {
            batch_upload_id: 1,
            row_number: 2,
        };
        assert!(NoopProcessor.process(&record, &context).await.is_ok());
    }
}
