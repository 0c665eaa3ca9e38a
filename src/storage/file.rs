//! Filesystem-backed object store for single-node deployments.

use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use uuid::Uuid;

use super::{clamp_range, ByteStream, ObjectStore, SignedUpload, StorageError};
use crate::constants::defaults;

/// Object store rooted at a local directory. Keys map to relative paths
/// under the root; traversal outside the root is rejected.
#[derive(Debug, Clone)]
pub struct FileObjectStore {
    root: PathBuf,
    read_chunk_bytes: usize,
}

impl FileObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            read_chunk_bytes: defaults::READ_CHUNK_BYTES,
        }
    }

    pub fn with_read_chunk_bytes(root: impl Into<PathBuf>, read_chunk_bytes: usize) -> Self {
        Self {
            root: root.into(),
            read_chunk_bytes: read_chunk_bytes.max(1),
        }
    }

    /// Resolve a key to a path under the root, rejecting empty, absolute,
    /// and traversing keys.
    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty() {
            return Err(StorageError::invalid_key(key, "key must not be empty"));
        }
        let relative = Path::new(key);
        if relative.is_absolute() {
            return Err(StorageError::invalid_key(key, "key must be relative"));
        }
        for component in relative.components() {
            match component {
                Component::Normal(_) => {}
                _ => {
                    return Err(StorageError::invalid_key(
                        key,
                        "key must not contain '..', '.', or root components",
                    ))
                }
            }
        }
        Ok(self.root.join(relative))
    }
}

struct RangedRead {
    file: fs::File,
    remaining: u64,
    key: String,
    chunk_bytes: usize,
}

#[async_trait]
impl ObjectStore for FileObjectStore {
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.object_path(key)?;
        match fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StorageError::io("exists", key, err)),
        }
    }

    async fn read_range(&self, key: &str, start: u64, end: u64) -> Result<ByteStream, StorageError> {
        let path = self.object_path(key)?;

        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::not_found(key))
            }
            Err(err) => return Err(StorageError::io("read_range", key, err)),
        };

        let (offset, count) = match clamp_range(metadata.len(), start, end) {
            Some(range) => range,
            None => return Ok(Box::pin(stream::empty())),
        };

        let mut file = fs::File::open(&path)
            .await
            .map_err(|err| StorageError::io("read_range", key, err))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|err| StorageError::io("read_range", key, err))?;

        let state = RangedRead {
            file,
            remaining: count,
            key: key.to_string(),
            chunk_bytes: self.read_chunk_bytes,
        };

        let stream = stream::unfold(state, |mut state| async move {
            if state.remaining == 0 {
                return None;
            }
            let take = state.chunk_bytes.min(state.remaining.min(usize::MAX as u64) as usize);
            let mut buf = vec![0u8; take];
            match state.file.read(&mut buf).await {
                Ok(0) => {
                    state.remaining = 0;
                    Some((
                        Err(StorageError::backend(format!(
                            "object '{}' truncated during ranged read",
                            state.key
                        ))),
                        state,
                    ))
                }
                Ok(n) => {
                    buf.truncate(n);
                    state.remaining -= n as u64;
                    Some((Ok(buf), state))
                }
                Err(err) => {
                    state.remaining = 0;
                    let key = state.key.clone();
                    Some((Err(StorageError::io("read_range", key, err)), state))
                }
            }
        });

        Ok(Box::pin(stream))
    }

    async fn write(&self, key: &str, contents: &[u8]) -> Result<(), StorageError> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| StorageError::io("write", key, err))?;
        }
        fs::write(&path, contents)
            .await
            .map_err(|err| StorageError::io("write", key, err))
    }

    async fn signed_upload_url(
        &self,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> Result<SignedUpload, StorageError> {
        let path = self.object_path(key)?;
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl)
                .map_err(|err| StorageError::backend(format!("ttl out of range: {err}")))?;

        Ok(SignedUpload {
            url: format!(
                "file://{}?contentType={content_type}&expires={}&token={}",
                path.display(),
                expires_at.timestamp(),
                Uuid::new_v4()
            ),
            key: key.to_string(),
            expires_at,
        })
    }
}
