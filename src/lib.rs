#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Eligibility Core Rust
//!
//! Streaming ingestion engine for member eligibility files. Clients upload
//! delimited-text feeds (CSV and friends) to an object store through signed
//! URLs; this crate scans each file in constant memory, partitions it into
//! row-bounded chunks, processes the chunks on parallel workers, and
//! converges every batch to exactly one terminal `completed` or `failed`
//! transition no matter how work is interleaved, retried, or redelivered.
//!
//! ## Architecture
//!
//! A batch flows through four stages:
//!
//! 1. **Intake** ([`intake`]) issues a signed upload URL and a `pending`
//!    batch row. The file body goes straight to the object store.
//! 2. **Orchestration** ([`pipeline::BatchOrchestrator`]) claims the batch,
//!    streams the file once to count rows and compute chunk byte boundaries,
//!    then enqueues one task per chunk.
//! 3. **Chunk execution** ([`pipeline::ChunkWorker`]) re-reads exactly its
//!    byte range, runs each record through a [`processing::RecordProcessor`],
//!    records row errors, and folds tallies into the batch atomically.
//! 4. **Completion** ([`pipeline::CompletionCoordinator`]) checks the
//!    counters under the per-batch lock; exactly one caller wins the
//!    `completed` transition and publishes `batch.completed`.
//!
//! ## Key Guarantees
//!
//! - **Constant memory**: files stream through [`pipeline::LineStream`];
//!   peak usage is one line plus one read buffer, independent of file size.
//! - **Exactly-once completion** over at-least-once delivery: chunk tallies
//!   commit together with the chunk's `completed` audit marker, so
//!   redelivered tasks cannot double-count, and the winning completion call
//!   is decided under a row lock.
//! - **Row-level containment**: a bad record (or a panicking processor)
//!   becomes an error row; the chunk and batch keep going.
//!
//! ## Module Organization
//!
//! - [`intake`] - Signed-URL upload admission
//! - [`pipeline`] - Line streaming, planning, orchestration, chunk execution
//! - [`dispatch`] - Chunk task queueing and the in-process worker pool
//! - [`processing`] - The per-record processor seam and its error contract
//! - [`persistence`] - Batch/chunk/error bookkeeping (PostgreSQL and in-memory)
//! - [`storage`] - Byte-range object store abstraction (filesystem and in-memory)
//! - [`models`] - Row types and their SQL
//! - [`database`] - Connection pooling and embedded migrations
//! - [`events`] - Lifecycle event broadcasting
//! - [`config`] - Layered configuration management
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use eligibility_core::config::IngestConfig;
//! use eligibility_core::dispatch::{ChunkDispatcher, WorkerPoolDispatcher};
//! use eligibility_core::events::EventPublisher;
//! use eligibility_core::persistence::{BatchStore, MemoryBatchStore};
//! use eligibility_core::pipeline::{
//!     BatchOrchestrator, ChunkReader, ChunkWorker, CompletionCoordinator,
//! };
//! use eligibility_core::processing::NoopProcessor;
//! use eligibility_core::storage::{MemoryObjectStore, ObjectStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = IngestConfig::default();
//! let objects: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
//! let store: Arc<dyn BatchStore> = Arc::new(MemoryBatchStore::new());
//! let events = EventPublisher::new(config.events.channel_capacity);
//!
//! let coordinator = CompletionCoordinator::new(store.clone(), events.clone());
//! let worker = ChunkWorker::new(
//!     store.clone(),
//!     ChunkReader::new(objects.clone(), config.pipeline.clone()),
//!     Arc::new(NoopProcessor),
//!     coordinator.clone(),
//!     events.clone(),
//! );
//! let pool = Arc::new(WorkerPoolDispatcher::start(
//!     worker,
//!     store.clone(),
//!     events.clone(),
//!     &config.dispatch,
//! ));
//! let orchestrator = BatchOrchestrator::new(
//!     store,
//!     objects,
//!     pool.clone() as Arc<dyn ChunkDispatcher>,
//!     coordinator,
//!     events,
//!     config.pipeline.clone(),
//! );
//! # let batch_upload_id = 1;
//! orchestrator.run(batch_upload_id).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! Unit tests run against the in-memory store and object store; integration
//! tests marked `#[ignore]` exercise the PostgreSQL store when
//! `DATABASE_URL` is set:
//!
//! ```bash
//! cargo test --lib            # Unit tests
//! cargo test -- --ignored     # PostgreSQL-backed tests
//! ```

pub mod config;
pub mod constants;
pub mod database;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod intake;
pub mod logging;
pub mod models;
pub mod persistence;
pub mod pipeline;
pub mod processing;
pub mod storage;

pub use config::{
    ConfigManager, DatabaseConfig, DispatchConfig, EventsConfig, IngestConfig, ObjectStoreConfig,
    PipelineConfig,
};
pub use constants::events as system_events;
pub use error::{IngestError, Result};
pub use events::{EventPublisher, IngestEvent};
pub use intake::{PendingUpload, UploadIntake};
pub use models::{BatchStatus, BatchUpload, ChunkAuditLog, ChunkStatus, UploadError};
pub use persistence::{BatchStore, CompletionOutcome, MemoryBatchStore};
pub use pipeline::{BatchOrchestrator, ChunkWorker, CompletionCoordinator, LineStream};
pub use storage::{FileObjectStore, MemoryObjectStore, ObjectStore};
