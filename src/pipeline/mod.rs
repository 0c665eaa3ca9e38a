//! # Ingestion Pipeline
//!
//! The processing core: stream an uploaded delimited-text file in constant
//! memory, partition it into row-bounded chunks, execute chunks in parallel,
//! and converge the batch to exactly one terminal transition.
//!
//! The stages connect like this:
//!
//! ```text
//! BatchOrchestrator ── ChunkPlanner ──> ChunkTask per boundary ──> dispatcher
//!                                                                     │
//! ChunkWorker <── task ───────────────────────────────────────────────┘
//!     │  ChunkReader -> RecordProcessor per row -> tallies + error rows
//!     └─> CompletionCoordinator (exactly-once `batch.completed`)
//! ```
//!
//! [`LineStream`] underpins both the planner's full-file scan and the
//! worker's range reads, so byte offsets agree on both sides by
//! construction.

pub mod batch_orchestrator;
pub mod chunk_planner;
pub mod chunk_reader;
pub mod chunk_worker;
pub mod completion_coordinator;
pub mod line_stream;

pub use batch_orchestrator::{BatchOrchestrator, OrchestrationOutcome};
pub use chunk_planner::{ChunkBoundary, ChunkPlan, ChunkPlanner};
pub use chunk_reader::ChunkReader;
pub use chunk_worker::{ChunkRunOutcome, ChunkWorker};
pub use completion_coordinator::CompletionCoordinator;
pub use line_stream::{is_blank_line, LineStream};
