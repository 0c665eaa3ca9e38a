pub mod batch_upload;
pub mod chunk_audit_log;
pub mod upload_error;

// Re-export core models for easy access
pub use batch_upload::{BatchStatus, BatchUpload, NewBatchUpload};
pub use chunk_audit_log::{ChunkAuditLog, ChunkStatus, NewChunkAuditLog};
pub use upload_error::{NewUploadError, UploadError};
