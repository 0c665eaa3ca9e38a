//! # Chunk Dispatch
//!
//! The queueing seam between the orchestrator and chunk workers. The
//! orchestrator turns a chunk plan into [`ChunkTask`] descriptors and hands
//! them to a [`ChunkDispatcher`]; the bundled [`WorkerPoolDispatcher`] runs
//! them on an in-process tokio worker pool with bounded retry. Delivery is
//! at-least-once: a task observed twice is harmless because chunk completion
//! is idempotent downstream.
//!
//! Tasks are self-contained. Everything a worker needs to process a chunk
//! (storage key, headers, byte range, the chunk size the planner used) rides
//! in the task, so a re-delivered task behaves identically even if pipeline
//! configuration changed after the batch was partitioned.

pub mod worker_pool;

pub use worker_pool::WorkerPoolDispatcher;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::DispatchConfig;
use crate::constants::FIRST_DATA_ROW_NUMBER;
use crate::pipeline::ChunkBoundary;

/// One unit of dispatched work: a single chunk of a single batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkTask {
    pub batch_upload_id: i64,
    pub chunk_number: i32,
    /// Object store key of the uploaded file.
    pub storage_key: String,
    /// Header cells from the plan; workers map record fields positionally.
    pub headers: Vec<String>,
    /// Inclusive byte range of this chunk within the file.
    pub start_byte: u64,
    pub end_byte: u64,
    /// Chunk size the planner partitioned with. Row numbers derive from this
    /// value, not from live configuration.
    pub chunk_size: usize,
}

impl ChunkTask {
    /// Build a task from one planned boundary.
    pub fn from_boundary(
        batch_upload_id: i64,
        storage_key: &str,
        headers: &[String],
        chunk_size: usize,
        boundary: &ChunkBoundary,
    ) -> Self {
        Self {
            batch_upload_id,
            chunk_number: boundary.chunk_number,
            storage_key: storage_key.to_string(),
            headers: headers.to_vec(),
            start_byte: boundary.start_byte,
            end_byte: boundary.end_byte,
            chunk_size,
        }
    }

    /// 1-indexed file row number of the record at `index` within this chunk.
    /// Row 1 is the header, so the first data row of the first chunk is 2.
    pub fn row_number(&self, index: usize) -> i64 {
        (self.chunk_number as i64 - 1) * self.chunk_size as i64
            + index as i64
            + FIRST_DATA_ROW_NUMBER
    }
}

/// Errors raised while enqueueing or executing dispatched work.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The dispatcher has been shut down and accepts no further tasks.
    #[error("Dispatcher is closed")]
    Closed,

    #[error("Failed to enqueue chunk {chunk_number} for batch {batch_upload_id}: {message}")]
    Enqueue {
        batch_upload_id: i64,
        chunk_number: i32,
        message: String,
    },
}

impl DispatchError {
    pub fn enqueue(
        batch_upload_id: i64,
        chunk_number: i32,
        message: impl Into<String>,
    ) -> Self {
        Self::Enqueue {
            batch_upload_id,
            chunk_number,
            message: message.into(),
        }
    }

    /// Whether retrying the same call might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Closed => false,
            Self::Enqueue { .. } => true,
        }
    }
}

/// Accepts chunk tasks for asynchronous execution.
#[async_trait]
pub trait ChunkDispatcher: Send + Sync + std::fmt::Debug {
    /// Enqueue a task. Returns once the task is accepted, not once it runs.
    async fn dispatch(&self, task: ChunkTask) -> Result<(), DispatchError>;
}

/// Bounded exponential backoff for failed chunk attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts allowed, first try included.
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: Duration, backoff_max: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
            backoff_max,
        }
    }

    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(config.max_attempts, config.backoff_base(), config.backoff_max())
    }

    /// Delay before the next try after `completed_attempts` failures, or
    /// `None` when the attempt budget is spent.
    pub fn backoff(&self, completed_attempts: u32) -> Option<Duration> {
        if completed_attempts >= self.max_attempts {
            return None;
        }
        let exponent = completed_attempts.saturating_sub(1).min(31);
        let delay = self.backoff_base.saturating_mul(1u32 << exponent);
        Some(delay.min(self.backoff_max))
    }
}
