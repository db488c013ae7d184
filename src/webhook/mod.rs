//! Webhook ingestion.
//!
//! The bank calls the receive side, which must always answer 200 (the bank
//! disables a webhook that keeps failing). It only forwards the payload to
//! the queue. The queue pushes it back to the process side, which decodes,
//! dedups and persists.

pub mod decode;
pub mod dto;
pub mod processor;
#[cfg(feature = "server")]
pub mod routes;

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::queue::{MessageQueue, OutgoingMessage};

pub use dto::{normalize_payload, Normalized, WebhookTransaction, WireType};
pub use processor::{ProcessOutcome, ProcessResponse, WebhookProcessor};

pub struct WebhookReceiver {
    queue: Arc<dyn MessageQueue>,
    topic: String,
}

impl WebhookReceiver {
    pub fn new(queue: Arc<dyn MessageQueue>, topic: impl Into<String>) -> Self {
        Self {
            queue,
            topic: topic.into(),
        }
    }

    /// Forward one bank webhook to the queue. Never fails: every problem is
    /// logged and swallowed here.
    pub async fn receive(&self, body: &[u8]) {
        let message = match normalize_payload(body) {
            Ok(Normalized::Transaction(json)) => {
                OutgoingMessage::new(json).with_attribute("format", "transaction")
            }
            Ok(Normalized::Raw) => OutgoingMessage::new(body.to_vec()).with_attribute("format", "raw"),
            Err(err) => {
                warn!("Could not normalize bank webhook, forwarding raw: {}", err);
                OutgoingMessage::new(body.to_vec()).with_attribute("format", "raw")
            }
        };

        match self.queue.publish(&self.topic, message).await {
            Ok(id) => debug!("Queued webhook as message {}", id),
            Err(err) => error!("Failed to publish webhook to {}: {}", self.topic, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueueError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingQueue {
        published: Mutex<Vec<(String, OutgoingMessage)>>,
        fail: bool,
    }

    #[async_trait]
    impl MessageQueue for CollectingQueue {
        async fn publish(&self, topic: &str, message: OutgoingMessage) -> Result<String, QueueError> {
            if self.fail {
                return Err(QueueError::Closed);
            }
            let mut published = self.published.lock().unwrap();
            published.push((topic.to_string(), message));
            Ok(published.len().to_string())
        }
    }

    #[tokio::test]
    async fn test_raw_payload_is_forwarded() {
        let queue = Arc::new(CollectingQueue::default());
        let receiver = WebhookReceiver::new(queue.clone(), "bank-webhooks");

        receiver.receive(b"{\"hello\":1}").await;

        let published = queue.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "bank-webhooks");
        assert_eq!(published[0].1.data, b"{\"hello\":1}".to_vec());
        assert_eq!(published[0].1.attributes["format"], "raw");
    }

    #[tokio::test]
    async fn test_publish_failure_is_swallowed() {
        let logs = crate::test_support::capture_logs();
        let queue = Arc::new(CollectingQueue {
            fail: true,
            ..CollectingQueue::default()
        });
        let receiver = WebhookReceiver::new(queue, "bank-webhooks");

        receiver.receive(b"anything").await;

        let errors = logs.at_level(tracing::Level::ERROR);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Queue closed"));
    }
}
