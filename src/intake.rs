//! # Upload Intake
//!
//! Front door of the pipeline. A caller announces an upload by filename and
//! content type; intake mints a collision-proof storage key, issues a signed
//! upload URL the client PUTs the file to directly, and records a `pending`
//! batch row pointing at the key. Orchestration picks the batch up once the
//! caller confirms the upload finished.
//!
//! The file body never passes through this service. Only the key and the
//! original filename are kept; the filename is display metadata, while the
//! sanitized copy embedded in the key is purely cosmetic for operators
//! browsing the bucket.

use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::ObjectStoreConfig;
use crate::error::Result;
use crate::events::{EventPublisher, IngestEvent};
use crate::models::{BatchUpload, NewBatchUpload};
use crate::persistence::BatchStore;
use crate::storage::{ObjectStore, SignedUpload};

/// A batch row plus the signed URL its file should be uploaded to.
#[derive(Debug, Clone)]
pub struct PendingUpload {
    pub batch: BatchUpload,
    pub upload: SignedUpload,
}

#[derive(Debug, Clone)]
pub struct UploadIntake {
    objects: Arc<dyn ObjectStore>,
    store: Arc<dyn BatchStore>,
    events: EventPublisher,
    config: ObjectStoreConfig,
}

impl UploadIntake {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        store: Arc<dyn BatchStore>,
        events: EventPublisher,
        config: ObjectStoreConfig,
    ) -> Self {
        Self {
            objects,
            store,
            events,
            config,
        }
    }

    /// Issue a signed upload slot and create the pending batch for it.
    #[instrument(skip(self), fields(original_filename = original_filename))]
    pub async fn begin_upload(
        &self,
        original_filename: &str,
        content_type: &str,
    ) -> Result<PendingUpload> {
        let storage_key = self.build_storage_key(original_filename);
        let upload = self
            .objects
            .signed_upload_url(&storage_key, content_type, self.config.signed_url_ttl())
            .await?;

        let batch = self
            .store
            .create_batch(NewBatchUpload {
                storage_key: storage_key.clone(),
                original_filename: original_filename.to_string(),
            })
            .await?;

        if let Err(publish_error) = self.events.publish(IngestEvent::UploadAccepted {
            batch_upload_id: batch.id,
            storage_key: storage_key.clone(),
            original_filename: original_filename.to_string(),
        }) {
            warn!(error = %publish_error, "failed to publish upload acceptance event");
        }

        info!(
            batch_upload_id = batch.id,
            storage_key = %storage_key,
            expires_at = %upload.expires_at,
            "upload slot issued"
        );
        Ok(PendingUpload { batch, upload })
    }

    /// Keys look like `uploads/<uuid>/<sanitized-filename>`. The UUID makes
    /// the key unique even when the same file is uploaded twice.
    fn build_storage_key(&self, original_filename: &str) -> String {
        let prefix = self.config.key_prefix.trim_matches('/');
        let filename = sanitize_filename(original_filename);
        if prefix.is_empty() {
            format!("{}/{}", Uuid::new_v4(), filename)
        } else {
            format!("{}/{}/{}", prefix, Uuid::new_v4(), filename)
        }
    }
}

/// Reduce a client-supplied filename to a safe key segment: strip any path,
/// keep ASCII alphanumerics plus `.`, `-`, `_`, and map the rest to `_`.
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let sanitized: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.chars().all(|c| matches!(c, '.' | '_')) {
        "upload".to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryBatchStore;
    use crate::storage::MemoryObjectStore;

    fn intake() -> (UploadIntake, Arc<MemoryBatchStore>) {
        let store = Arc::new(MemoryBatchStore::new());
        let intake = UploadIntake::new(
            Arc::new(MemoryObjectStore::new()),
            store.clone(),
            EventPublisher::new(16),
            ObjectStoreConfig::default(),
        );
        (intake, store)
    }

    #[test]
    fn test_sanitize_filename_strips_paths_and_odd_characters() {
        assert_eq!(sanitize_filename("eligibility.csv"), "eligibility.csv");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\feeds\\member list.csv"), "member_list.csv");
        assert_eq!(sanitize_filename("...."), "upload");
        assert_eq!(sanitize_filename(""), "upload");
    }

    #[tokio::test]
    async fn test_begin_upload_creates_pending_batch_with_matching_key() {
        let (intake, store) = intake();

        let pending = intake
            .begin_upload("members 2024.csv", "text/csv")
            .await
            .unwrap();

        assert!(pending.batch.is_pending());
        assert_eq!(pending.batch.original_filename, "members 2024.csv");
        assert!(pending.batch.storage_key.starts_with("uploads/"));
        assert!(pending.batch.storage_key.ends_with("/members_2024.csv"));
        assert_eq!(pending.upload.key, pending.batch.storage_key);

        let stored = store.find_batch(pending.batch.id).await.unwrap().unwrap();
        assert_eq!(stored.storage_key, pending.batch.storage_key);
    }

    #[tokio::test]
    async fn test_repeated_uploads_of_same_filename_get_distinct_keys() {
        let (intake, _store) = intake();

        let first = intake.begin_upload("feed.csv", "text/csv").await.unwrap();
        let second = intake.begin_upload("feed.csv", "text/csv").await.unwrap();

        assert_ne!(first.batch.storage_key, second.batch.storage_key);
        assert_ne!(first.batch.id, second.batch.id);
    }
}
