//! # Completion Coordinator
//!
//! Every chunk worker calls [`CompletionCoordinator::check_and_finalize`]
//! after folding in its tallies, and so does the orchestrator for zero-row
//! batches. The store performs the actual check-and-transition under the
//! per-batch lock, so no matter how many of those calls race, exactly one
//! observes [`CompletionOutcome::Completed`]. That winning call is the only
//! one that publishes `batch.completed`.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::events::{EventPublisher, IngestEvent};
use crate::persistence::{BatchStore, CompletionOutcome, StoreError};

#[derive(Debug, Clone)]
pub struct CompletionCoordinator {
    store: Arc<dyn BatchStore>,
    events: EventPublisher,
}

impl CompletionCoordinator {
    pub fn new(store: Arc<dyn BatchStore>, events: EventPublisher) -> Self {
        Self { store, events }
    }

    /// Run the completion check for a batch and publish `batch.completed` if
    /// this call won the transition. Callers invoke this unconditionally
    /// after contributing progress; losing is the common case and is cheap.
    #[instrument(skip(self), fields(batch_upload_id = batch_upload_id))]
    pub async fn check_and_finalize(
        &self,
        batch_upload_id: i64,
    ) -> Result<CompletionOutcome, StoreError> {
        let outcome = self.store.complete_if_fully_processed(batch_upload_id).await?;

        match &outcome {
            CompletionOutcome::Completed { counters } => {
                info!(
                    batch_upload_id = batch_upload_id,
                    num_rows = counters.num_rows.unwrap_or(counters.num_rows_processed),
                    succeeded = counters.num_rows_succeeded,
                    errored = counters.num_rows_errored,
                    "batch fully processed"
                );
                let event = IngestEvent::BatchCompleted {
                    batch_upload_id,
                    num_rows: counters.num_rows.unwrap_or(counters.num_rows_processed),
                    succeeded: counters.num_rows_succeeded,
                    errored: counters.num_rows_errored,
                };
                if let Err(error) = self.events.publish(event) {
                    warn!(
                        batch_upload_id = batch_upload_id,
                        error = %error,
                        "failed to publish batch completion event"
                    );
                }
            }
            CompletionOutcome::NotYetComplete { counters } => {
                debug!(
                    batch_upload_id = batch_upload_id,
                    processed = counters.num_rows_processed,
                    remaining = counters.remaining(),
                    "batch not yet fully processed"
                );
            }
            CompletionOutcome::AlreadyCompleted => {
                debug!(batch_upload_id = batch_upload_id, "batch already completed");
            }
            CompletionOutcome::BatchFailed => {
                debug!(
                    batch_upload_id = batch_upload_id,
                    "batch is failed; completion check skipped"
                );
            }
            CompletionOutcome::BatchMissing => {
                warn!(
                    batch_upload_id = batch_upload_id,
                    "completion check ran for a batch that does not exist"
                );
            }
        }

        Ok(outcome)
    }
}
