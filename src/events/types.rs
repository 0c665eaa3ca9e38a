//! Typed lifecycle events emitted by the ingestion pipeline.

use serde::Serialize;

use crate::constants::events;

/// Every observable transition in a batch's life. Serialized form is the
/// bare field object; the event name travels separately via [`Self::name`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum IngestEvent {
    /// A signed upload was issued and a pending batch row created.
    UploadAccepted {
        batch_upload_id: i64,
        storage_key: String,
        original_filename: String,
    },
    /// The orchestrator claimed the batch and began the file scan.
    BatchProcessingStarted { batch_upload_id: i64 },
    /// The scan finished; row count and chunk boundaries are known.
    BatchPartitioned {
        batch_upload_id: i64,
        num_rows: i64,
        num_chunks: usize,
    },
    ChunkStarted {
        batch_upload_id: i64,
        chunk_number: i32,
    },
    ChunkCompleted {
        batch_upload_id: i64,
        chunk_number: i32,
        succeeded: i64,
        failed: i64,
    },
    ChunkFailed {
        batch_upload_id: i64,
        chunk_number: i32,
        message: String,
    },
    /// Exactly one publisher call per batch carries this event.
    BatchCompleted {
        batch_upload_id: i64,
        num_rows: i64,
        succeeded: i64,
        errored: i64,
    },
    BatchFailed {
        batch_upload_id: i64,
        message: String,
    },
}

impl IngestEvent {
    /// Stable dotted event name consumers subscribe on.
    pub fn name(&self) -> &'static str {
        match self {
            Self::UploadAccepted { .. } => events::UPLOAD_ACCEPTED,
            Self::BatchProcessingStarted { .. } => events::BATCH_PROCESSING_STARTED,
            Self::BatchPartitioned { .. } => events::BATCH_PARTITIONED,
            Self::ChunkStarted { .. } => events::CHUNK_STARTED,
            Self::ChunkCompleted { .. } => events::CHUNK_COMPLETED,
            Self::ChunkFailed { .. } => events::CHUNK_FAILED,
            Self::BatchCompleted { .. } => events::BATCH_COMPLETED,
            Self::BatchFailed { .. } => events::BATCH_FAILED,
        }
    }

    /// The batch this event belongs to.
    pub fn batch_upload_id(&self) -> i64 {
        match self {
            Self::UploadAccepted { batch_upload_id, .. }
            | Self::BatchProcessingStarted { batch_upload_id }
            | Self::BatchPartitioned { batch_upload_id, .. }
            | Self::ChunkStarted { batch_upload_id, .. }
            | Self::ChunkCompleted { batch_upload_id, .. }
            | Self::ChunkFailed { batch_upload_id, .. }
            | Self::BatchCompleted { batch_upload_id, .. }
            | Self::BatchFailed { batch_upload_id, .. } => *batch_upload_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_stable() {
        let event = IngestEvent::BatchCompleted {
            batch_upload_id: 7,
            num_rows: 10,
            succeeded: 9,
            errored: 1,
        };
        assert_eq!(event.name(), "batch.completed");
        assert_eq!(event.batch_upload_id(), 7);
    }

    #[test]
    fn test_events_serialize_to_bare_field_objects() {
        let event = IngestEvent::ChunkCompleted {
            batch_upload_id: 3,
            chunk_number: 2,
            succeeded: 99,
            failed: 1,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["chunk_number"], 2);
        assert_eq!(value["succeeded"], 99);
        assert!(value.get("ChunkCompleted").is_none());
    }
}
