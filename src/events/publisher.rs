use serde_json::Value;
use tokio::sync::broadcast;

use super::types::IngestEvent;

/// Broadcast publisher for batch lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub name: String,
    pub context: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a lifecycle event to all current subscribers.
    pub fn publish(&self, event: IngestEvent) -> Result<(), PublishError> {
        let published = PublishedEvent {
            name: event.name().to_string(),
            context: serde_json::to_value(&event)?,
            published_at: chrono::Utc::now(),
        };

        // broadcast::send errors only when there are no subscribers; the
        // pipeline publishes regardless of whether anyone is listening
        match self.sender.send(published) {
            Ok(_) => Ok(()),
            Err(broadcast::error::SendError(_)) => Ok(()),
        }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Error types for event publishing
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(crate::constants::defaults::EVENT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let publisher = EventPublisher::new(8);
        let result = publisher.publish(IngestEvent::BatchProcessingStarted { batch_upload_id: 1 });
        assert!(result.is_ok());
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_name_and_context() {
        let publisher = EventPublisher::new(8);
        let mut receiver = publisher.subscribe();

        publisher
            .publish(IngestEvent::BatchPartitioned {
                batch_upload_id: 42,
                num_rows: 1000,
                num_chunks: 4,
            })
            .unwrap();

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.name, "batch.partitioned");
        assert_eq!(event.context["batch_upload_id"], 42);
        assert_eq!(event.context["num_chunks"], 4);
    }

    #[tokio::test]
    async fn test_clones_share_the_same_channel() {
        let publisher = EventPublisher::new(8);
        let clone = publisher.clone();
        let mut receiver = publisher.subscribe();

        clone
            .publish(IngestEvent::ChunkStarted {
                batch_upload_id: 1,
                chunk_number: 3,
            })
            .unwrap();

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.name, "chunk.started");
    }
}
