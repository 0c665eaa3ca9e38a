//! # Worker Pool Dispatcher
//!
//! In-process [`ChunkDispatcher`] backed by a bounded mpsc queue and a fixed
//! set of tokio worker tasks. Each failed attempt is classified: transient
//! errors re-enqueue the task after an exponential backoff delay, permanent
//! errors and exhausted retry budgets mark the whole batch `failed`.
//!
//! Retries re-enter the same queue via a detached sleep task instead of
//! blocking a worker, so one flapping chunk cannot stall the pool. Shutdown
//! drops the queue sender; workers drain whatever is already enqueued
//! (including retries still sleeping at that point, which hold their own
//! sender clones) and then exit.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::DispatchConfig;
use crate::events::{EventPublisher, IngestEvent};
use crate::persistence::BatchStore;
use crate::pipeline::ChunkWorker;

use super::{ChunkDispatcher, ChunkTask, DispatchError, RetryPolicy};

const QUEUE_DEPTH_PER_WORKER: usize = 16;

#[derive(Debug, Clone)]
struct QueuedTask {
    task: ChunkTask,
    /// 1-indexed attempt about to run.
    attempt: u32,
}

/// Fixed-size pool executing chunk tasks with bounded retry.
#[derive(Debug)]
pub struct WorkerPoolDispatcher {
    sender: Mutex<Option<mpsc::Sender<QueuedTask>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPoolDispatcher {
    /// Spawn the worker tasks and return the dispatcher handle.
    pub fn start(
        worker: ChunkWorker,
        store: Arc<dyn BatchStore>,
        events: EventPublisher,
        config: &DispatchConfig,
    ) -> Self {
        let worker_count = config.worker_count.max(1);
        let policy = RetryPolicy::from_config(config);
        let (sender, receiver) =
            mpsc::channel::<QueuedTask>(worker_count * QUEUE_DEPTH_PER_WORKER);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let mut handles = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let runner = WorkerRunner {
                worker_id,
                worker: worker.clone(),
                store: store.clone(),
                events: events.clone(),
                policy,
                retry_sender: sender.downgrade(),
            };
            let receiver = receiver.clone();
            handles.push(tokio::spawn(async move {
                runner.run(receiver).await;
            }));
        }

        info!(worker_count = worker_count, "chunk worker pool started");
        Self {
            sender: Mutex::new(Some(sender)),
            handles: Mutex::new(handles),
        }
    }

    /// Stop accepting tasks and wait for the workers to drain and exit.
    pub async fn shutdown(&self) {
        self.sender.lock().take();
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(join_error) = handle.await {
                warn!(error = %join_error, "chunk worker task did not shut down cleanly");
            }
        }
        info!("chunk worker pool stopped");
    }
}

#[async_trait]
impl ChunkDispatcher for WorkerPoolDispatcher {
    async fn dispatch(&self, task: ChunkTask) -> Result<(), DispatchError> {
        let sender = self.sender.lock().clone().ok_or(DispatchError::Closed)?;
        let queued = QueuedTask { task, attempt: 1 };
        sender.send(queued).await.map_err(|send_error| {
            let queued = send_error.0;
            DispatchError::enqueue(
                queued.task.batch_upload_id,
                queued.task.chunk_number,
                "worker pool queue is closed",
            )
        })
    }
}

/// Per-worker execution state; owns retry scheduling for the tasks it runs.
///
/// Holds only a weak handle to the queue. Workers exit when every strong
/// sender is gone, so a strong handle here would keep the queue open and
/// the pool would never drain.
struct WorkerRunner {
    worker_id: usize,
    worker: ChunkWorker,
    store: Arc<dyn BatchStore>,
    events: EventPublisher,
    policy: RetryPolicy,
    retry_sender: mpsc::WeakSender<QueuedTask>,
}

impl WorkerRunner {
    async fn run(&self, receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedTask>>>) {
        loop {
            let queued = { receiver.lock().await.recv().await };
            match queued {
                Some(queued) => self.run_attempt(queued).await,
                None => {
                    debug!(worker_id = self.worker_id, "queue closed; worker exiting");
                    break;
                }
            }
        }
    }

    async fn run_attempt(&self, queued: QueuedTask) {
        let QueuedTask { task, attempt } = queued;
        debug!(
            worker_id = self.worker_id,
            batch_upload_id = task.batch_upload_id,
            chunk_number = task.chunk_number,
            attempt = attempt,
            "running chunk attempt"
        );

        let failure = match self.worker.execute(&task).await {
            Ok(_outcome) => return,
            Err(error) => error,
        };

        if failure.is_transient() {
            if let Some(delay) = self.policy.backoff(attempt) {
                // Upgrade before spawning: a scheduled retry holds a strong
                // sender through its sleep, keeping the queue open until it
                // lands even if shutdown starts in the meantime.
                if let Some(sender) = self.retry_sender.upgrade() {
                    warn!(
                        batch_upload_id = task.batch_upload_id,
                        chunk_number = task.chunk_number,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure,
                        "chunk attempt failed; retry scheduled"
                    );
                    let retry = QueuedTask { task, attempt: attempt + 1 };
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if sender.send(retry).await.is_err() {
                            warn!("worker pool closed before a scheduled retry could run");
                        }
                    });
                } else {
                    warn!(
                        batch_upload_id = task.batch_upload_id,
                        chunk_number = task.chunk_number,
                        error = %failure,
                        "worker pool closed; retry abandoned, batch left for the stalled sweep"
                    );
                }
                return;
            }
        }

        self.give_up(&task, attempt, &failure).await;
    }

    /// Permanent failure or exhausted budget: the batch cannot finish.
    async fn give_up(&self, task: &ChunkTask, attempt: u32, failure: &crate::error::IngestError) {
        let message = format!(
            "chunk {} failed after {} attempt(s): {}",
            task.chunk_number, attempt, failure
        );
        error!(
            batch_upload_id = task.batch_upload_id,
            chunk_number = task.chunk_number,
            error = %failure,
            "chunk retries exhausted; failing batch"
        );

        match self
            .store
            .mark_batch_failed(task.batch_upload_id, &message)
            .await
        {
            Ok(true) => {
                if let Err(publish_error) = self.events.publish(IngestEvent::BatchFailed {
                    batch_upload_id: task.batch_upload_id,
                    message,
                }) {
                    warn!(error = %publish_error, "failed to publish batch failure event");
                }
            }
            Ok(false) => {
                debug!(
                    batch_upload_id = task.batch_upload_id,
                    "batch already terminal; failure not recorded"
                );
            }
            Err(store_error) => {
                warn!(
                    batch_upload_id = task.batch_upload_id,
                    error = %store_error,
                    "could not mark batch failed"
                );
            }
        }
    }
}
