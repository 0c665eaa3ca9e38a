//! # System Constants
//!
//! Event names and operational defaults for the eligibility ingestion core.
//!
//! Event name strings stay compatible with the upstream eligibility platform's
//! notification vocabulary so downstream subscribers can match on them without
//! translation.

/// Lifecycle events published on the ingestion event channel.
pub mod events {
    // Batch lifecycle events
    pub const UPLOAD_ACCEPTED: &str = "batch.upload_accepted";
    pub const BATCH_PROCESSING_STARTED: &str = "batch.processing_started";
    pub const BATCH_PARTITIONED: &str = "batch.partitioned";
    pub const BATCH_COMPLETED: &str = "batch.completed";
    pub const BATCH_FAILED: &str = "batch.failed";

    // Chunk lifecycle events
    pub const CHUNK_STARTED: &str = "chunk.started";
    pub const CHUNK_COMPLETED: &str = "chunk.completed";
    pub const CHUNK_FAILED: &str = "chunk.failed";
}

/// Operational defaults, overridable through `PipelineConfig` and friends.
pub mod defaults {
    /// Maximum data rows per chunk.
    pub const CHUNK_SIZE: usize = 1000;

    /// Field delimiter for eligibility files.
    pub const DELIMITER: char = ',';

    /// Hard cap on a single line; a newline-free object must not buffer
    /// without bound.
    pub const MAX_LINE_BYTES: usize = 1024 * 1024;

    /// Preferred size of ranged reads from the object store.
    pub const READ_CHUNK_BYTES: usize = 64 * 1024;

    /// Concurrent chunk workers in the in-process dispatcher.
    pub const WORKER_COUNT: usize = 4;

    /// Delivery attempts per chunk task before the batch is failed.
    pub const MAX_ATTEMPTS: u32 = 3;

    /// Base delay for exponential backoff between attempts.
    pub const BACKOFF_BASE_MS: u64 = 200;

    /// Ceiling for the backoff delay.
    pub const BACKOFF_MAX_MS: u64 = 5_000;

    /// Lifetime of issued signed upload URLs.
    pub const SIGNED_URL_TTL_SECONDS: u64 = 900;

    /// Broadcast channel capacity for lifecycle events.
    pub const EVENT_CHANNEL_CAPACITY: usize = 256;

    /// Age after which a processing batch with no progress is reported
    /// as stalled.
    pub const STALLED_AFTER_SECONDS: i64 = 3600;
}

/// Row number of the header line in an eligibility file.
pub const HEADER_ROW_NUMBER: i64 = 1;

/// Row number of the first data line (the line after the header).
pub const FIRST_DATA_ROW_NUMBER: i64 = 2;
