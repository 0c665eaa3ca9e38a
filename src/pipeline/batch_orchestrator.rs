//! # Batch Orchestrator
//!
//! Drives one uploaded batch from `pending` to dispatched work: claim the
//! batch, scan the file into a chunk plan, record the row total, then hand
//! every chunk to the dispatcher. Orchestration is fail-fast; any error
//! while scanning or enqueueing marks the whole batch `failed` rather than
//! leaving it half-dispatched and silently stuck.
//!
//! Orchestration itself can be retried (an at-least-once trigger may fire
//! twice): re-running on a terminal batch is a no-op, `mark_batch_processing`
//! tolerates an already-processing batch, the row total is set-once, and
//! re-dispatched chunks dedupe in the worker.

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use crate::config::PipelineConfig;
use crate::dispatch::{ChunkDispatcher, ChunkTask};
use crate::error::{IngestError, Result};
use crate::events::{EventPublisher, IngestEvent};
use crate::persistence::BatchStore;

use super::chunk_planner::ChunkPlanner;
use super::completion_coordinator::CompletionCoordinator;

/// How an orchestration run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestrationOutcome {
    /// Chunks are queued; workers drive the batch to its terminal state.
    Dispatched { num_rows: i64, num_chunks: usize },
    /// The file held a header and no data rows; the batch completed here.
    CompletedEmpty,
    /// The batch was already terminal; nothing was done.
    AlreadyFinished,
}

#[derive(Debug, Clone)]
pub struct BatchOrchestrator {
    store: Arc<dyn BatchStore>,
    planner: ChunkPlanner,
    dispatcher: Arc<dyn ChunkDispatcher>,
    coordinator: CompletionCoordinator,
    events: EventPublisher,
    config: PipelineConfig,
}

impl BatchOrchestrator {
    pub fn new(
        store: Arc<dyn BatchStore>,
        objects: Arc<dyn crate::storage::ObjectStore>,
        dispatcher: Arc<dyn ChunkDispatcher>,
        coordinator: CompletionCoordinator,
        events: EventPublisher,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            planner: ChunkPlanner::new(objects, config.clone()),
            dispatcher,
            coordinator,
            events,
            config,
        }
    }

    /// Orchestrate a batch end to end: claim, scan, record, dispatch.
    #[instrument(skip(self), fields(batch_upload_id = batch_upload_id))]
    pub async fn run(&self, batch_upload_id: i64) -> Result<OrchestrationOutcome> {
        let batch = self
            .store
            .find_batch(batch_upload_id)
            .await?
            .ok_or_else(|| IngestError::batch_not_found(batch_upload_id))?;

        if batch.is_terminal() {
            info!(status = %batch.status, "batch already finished; skipping orchestration");
            return Ok(OrchestrationOutcome::AlreadyFinished);
        }

        self.store.mark_batch_processing(batch_upload_id).await?;
        self.publish(IngestEvent::BatchProcessingStarted { batch_upload_id });

        let plan = match self.planner.scan(batch_upload_id, &batch.storage_key).await {
            Ok(plan) => plan,
            Err(scan_error) => return self.fail_batch(batch_upload_id, scan_error).await,
        };

        if let Err(store_error) = self
            .store
            .set_batch_num_rows(batch_upload_id, plan.num_rows)
            .await
        {
            return self.fail_batch(batch_upload_id, store_error.into()).await;
        }
        self.publish(IngestEvent::BatchPartitioned {
            batch_upload_id,
            num_rows: plan.num_rows,
            num_chunks: plan.boundaries.len(),
        });

        if plan.boundaries.is_empty() {
            // No data rows means no worker will ever run the completion
            // check, so it happens here.
            self.coordinator.check_and_finalize(batch_upload_id).await?;
            info!("batch had no data rows; completed directly");
            return Ok(OrchestrationOutcome::CompletedEmpty);
        }

        for boundary in &plan.boundaries {
            let task = ChunkTask::from_boundary(
                batch_upload_id,
                &batch.storage_key,
                &plan.headers,
                self.config.chunk_size,
                boundary,
            );
            if let Err(dispatch_error) = self.dispatcher.dispatch(task).await {
                return self.fail_batch(batch_upload_id, dispatch_error.into()).await;
            }
        }

        info!(
            num_rows = plan.num_rows,
            num_chunks = plan.boundaries.len(),
            "batch partitioned and dispatched"
        );
        Ok(OrchestrationOutcome::Dispatched {
            num_rows: plan.num_rows,
            num_chunks: plan.boundaries.len(),
        })
    }

    /// Transition the batch to `failed` and propagate the original error.
    async fn fail_batch(
        &self,
        batch_upload_id: i64,
        cause: IngestError,
    ) -> Result<OrchestrationOutcome> {
        error!(error = %cause, "batch orchestration failed");
        if let Err(store_error) = self
            .store
            .mark_batch_failed(batch_upload_id, &cause.to_string())
            .await
        {
            warn!(error = %store_error, "could not mark batch failed");
        }
        self.publish(IngestEvent::BatchFailed {
            batch_upload_id,
            message: cause.to_string(),
        });
        Err(cause)
    }

    fn publish(&self, event: IngestEvent) {
        if let Err(publish_error) = self.events.publish(event) {
            warn!(error = %publish_error, "failed to publish batch lifecycle event");
        }
    }
}
