//! # Ingestion Lifecycle Events
//!
//! In-process pub/sub for batch lifecycle transitions. The pipeline publishes
//! a typed [`IngestEvent`] at each observable moment (upload accepted, batch
//! partitioned, chunk finished, batch completed or failed); downstream
//! consumers such as case-creation workflows or notification senders
//! subscribe through the [`EventPublisher`].
//!
//! Publishing never blocks the pipeline: events fan out over a broadcast
//! channel, and having zero subscribers is a normal state, not an error.

pub mod publisher;
pub mod types;

pub use publisher::{EventPublisher, PublishError, PublishedEvent};
pub use types::IngestEvent;
