//! In-memory object store for tests and dry-runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{clamp_range, ByteStream, ObjectStore, SignedUpload, StorageError};
use crate::constants::defaults;

/// Object store holding everything in process memory.
///
/// Ranged reads clone the selected range and replay it in fixed-size chunks,
/// which keeps streaming consumers honest about split points without any I/O.
#[derive(Debug, Clone)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    read_chunk_bytes: usize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::with_read_chunk_bytes(defaults::READ_CHUNK_BYTES)
    }

    /// Control the replayed chunk size; tests use tiny values to exercise
    /// lines that straddle chunk boundaries.
    pub fn with_read_chunk_bytes(read_chunk_bytes: usize) -> Self {
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
            read_chunk_bytes: read_chunk_bytes.max(1),
        }
    }

    /// Synchronous insert for test setup.
    pub fn insert(&self, key: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.objects.write().insert(key.into(), contents.into());
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.objects.read().contains_key(key))
    }

    async fn read_range(&self, key: &str, start: u64, end: u64) -> Result<ByteStream, StorageError> {
        let chunks: Vec<Result<Vec<u8>, StorageError>> = {
            let objects = self.objects.read();
            let contents = objects
                .get(key)
                .ok_or_else(|| StorageError::not_found(key))?;

            match clamp_range(contents.len() as u64, start, end) {
                None => Vec::new(),
                Some((offset, count)) => {
                    let offset = offset as usize;
                    let selected = &contents[offset..offset + count as usize];
                    selected
                        .chunks(self.read_chunk_bytes)
                        .map(|chunk| Ok(chunk.to_vec()))
                        .collect()
                }
            }
        };

        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn write(&self, key: &str, contents: &[u8]) -> Result<(), StorageError> {
        if key.is_empty() {
            return Err(StorageError::invalid_key(key, "key must not be empty"));
        }
        self.objects.write().insert(key.to_string(), contents.to_vec());
        Ok(())
    }

    async fn signed_upload_url(
        &self,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> Result<SignedUpload, StorageError> {
        if key.is_empty() {
            return Err(StorageError::invalid_key(key, "key must not be empty"));
        }
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl)
                .map_err(|err| StorageError::backend(format!("ttl out of range: {err}")))?;

        Ok(SignedUpload {
            url: format!(
                "memory://{key}?contentType={content_type}&expires={}&token={}",
                expires_at.timestamp(),
                Uuid::new_v4()
            ),
            key: key.to_string(),
            expires_at,
        })
    }
}
