//! # Object Store Abstraction
//!
//! Byte-range addressable object storage behind a narrow trait so the
//! pipeline never touches a concrete backend. Uploaded eligibility files are
//! written once and then read in ranges by the planner (full scan) and the
//! chunk workers (disjoint slices), so the surface is deliberately small:
//! existence, ranged streaming reads, whole-object writes, and signed upload
//! URL issuance for clients that push files directly to storage.
//!
//! Two backends ship with the crate: [`MemoryObjectStore`] for tests and
//! dry-runs, and [`FileObjectStore`] for single-node deployments. Hosted
//! object stores (S3 and friends) implement the same trait out of tree.

mod file;
mod memory;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use file::FileObjectStore;
pub use memory::MemoryObjectStore;

/// Stream of byte chunks from a ranged read. Chunk sizes are backend-chosen
/// and carry no meaning; consumers must tolerate arbitrary split points.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, StorageError>> + Send>>;

/// Errors raised by object store operations and the streaming read path.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No object exists at the requested key.
    #[error("object not found: {key}")]
    NotFound { key: String },

    /// The key is structurally unusable (empty, absolute, traversal).
    #[error("invalid storage key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// An I/O failure from the backing medium.
    #[error("storage I/O failure during {operation} for '{key}': {source}")]
    Io {
        operation: String,
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// Any other backend failure (network, truncation mid-read).
    #[error("storage backend error: {message}")]
    Backend { message: String },

    /// A single line exceeded the configured cap while streaming.
    #[error("line exceeds maximum length at byte offset {offset}: {length} bytes (limit {limit})")]
    LineTooLong {
        offset: u64,
        length: usize,
        limit: usize,
    },
}

impl StorageError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn io(operation: impl Into<String>, key: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            key: key.into(),
            source,
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Whether retrying the failed operation could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Backend { .. })
    }
}

/// A pre-authorized upload handle issued to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedUpload {
    /// URL the client PUTs the file to.
    pub url: String,
    /// Storage key the object will land at.
    pub key: String,
    /// When the handle stops being honored.
    pub expires_at: DateTime<Utc>,
}

/// Byte-range addressable object storage.
///
/// Range semantics follow HTTP: `start` and `end` are both inclusive byte
/// offsets; ranges extending past the end of the object yield only the
/// available bytes, and a range starting at or beyond the object's length
/// yields an empty stream. `read_range(key, 0, u64::MAX)` therefore streams
/// the whole object without a separate size lookup.
#[async_trait]
pub trait ObjectStore: Send + Sync + std::fmt::Debug {
    /// Whether an object exists at `key`.
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Stream the inclusive byte range `[start, end]` of the object at `key`.
    async fn read_range(&self, key: &str, start: u64, end: u64) -> Result<ByteStream, StorageError>;

    /// Store `contents` at `key`, replacing any existing object.
    async fn write(&self, key: &str, contents: &[u8]) -> Result<(), StorageError>;

    /// Issue a pre-authorized upload URL for `key`, valid for `ttl`.
    async fn signed_upload_url(
        &self,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> Result<SignedUpload, StorageError>;
}

/// Clamp an inclusive `[start, end]` range against an object of `len` bytes,
/// returning the concrete `(offset, count)` to read, or `None` when the range
/// selects nothing.
pub(crate) fn clamp_range(len: u64, start: u64, end: u64) -> Option<(u64, u64)> {
    if len == 0 || start >= len || end < start {
        return None;
    }
    let last = end.min(len - 1);
    Some((start, last - start + 1))
}
