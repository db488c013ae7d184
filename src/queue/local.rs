// In-process push queue
//
// Delivers every published message to a PushHandler (the webhook processor)
// wrapped in a push envelope, with the broker's acknowledgement contract:
// 2xx and 4xx acknowledge, 5xx is redelivered with exponential backoff
// until the attempt budget is spent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::QueueError;
use crate::queue::{MessageQueue, OutgoingMessage, PushEnvelope};

/// Receiver side of a push subscription.
#[async_trait]
pub trait PushHandler: Send + Sync {
    /// Handle one push body and return the HTTP status the endpoint answers.
    async fn handle_push(&self, body: &[u8]) -> u16;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

struct Delivery {
    topic: String,
    message_id: String,
    body: Vec<u8>,
}

pub struct LocalPushQueue {
    sender: mpsc::UnboundedSender<Delivery>,
    pending: Arc<watch::Sender<usize>>,
    subscription: String,
}

impl LocalPushQueue {
    /// Start the delivery loop on the current tokio runtime.
    pub fn spawn(
        handler: Arc<dyn PushHandler>,
        subscription: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (pending, _) = watch::channel(0usize);
        let pending = Arc::new(pending);

        tokio::spawn(dispatch(receiver, handler, policy, Arc::clone(&pending)));

        Self {
            sender,
            pending,
            subscription: subscription.into(),
        }
    }

    /// Wait until every published message is acknowledged or dropped.
    pub async fn flush(&self) {
        let mut rx = self.pending.subscribe();
        // Err only when the sender is gone, which cannot happen while self lives
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

#[async_trait]
impl MessageQueue for LocalPushQueue {
    async fn publish(&self, topic: &str, message: OutgoingMessage) -> Result<String, QueueError> {
        let message_id = Uuid::new_v4().to_string();
        let envelope = PushEnvelope::wrap(message_id.clone(), &message, self.subscription.clone());
        let body = serde_json::to_vec(&envelope)?;

        self.pending.send_modify(|n| *n += 1);
        let delivery = Delivery {
            topic: topic.to_string(),
            message_id: message_id.clone(),
            body,
        };
        if self.sender.send(delivery).is_err() {
            self.pending.send_modify(|n| *n -= 1);
            return Err(QueueError::Closed);
        }

        Ok(message_id)
    }
}

async fn dispatch(
    mut receiver: mpsc::UnboundedReceiver<Delivery>,
    handler: Arc<dyn PushHandler>,
    policy: RetryPolicy,
    pending: Arc<watch::Sender<usize>>,
) {
    while let Some(delivery) = receiver.recv().await {
        let handler = Arc::clone(&handler);
        let pending = Arc::clone(&pending);
        tokio::spawn(async move {
            deliver(handler.as_ref(), policy, &delivery).await;
            pending.send_modify(|n| *n -= 1);
        });
    }
}

async fn deliver(handler: &dyn PushHandler, policy: RetryPolicy, delivery: &Delivery) {
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 0..max_attempts {
        let status = handler.handle_push(&delivery.body).await;
        if status < 500 {
            debug!(
                "Message {} on {} acknowledged with {}",
                delivery.message_id, delivery.topic, status
            );
            return;
        }

        if attempt + 1 < max_attempts {
            let wait = policy.backoff(attempt);
            warn!(
                "Delivery of message {} failed with {}, retrying in {:?}",
                delivery.message_id, status, wait
            );
            tokio::time::sleep(wait).await;
        }
    }

    error!(
        "Dropping message {} on {} after {} failed deliveries",
        delivery.message_id, delivery.topic, max_attempts
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedHandler {
        statuses: Mutex<Vec<u16>>,
        calls: AtomicUsize,
        bodies: Mutex<Vec<Vec<u8>>>,
    }

    impl ScriptedHandler {
        fn new(statuses: Vec<u16>) -> Arc<Self> {
            Arc::new(Self {
                statuses: Mutex::new(statuses),
                calls: AtomicUsize::new(0),
                bodies: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl PushHandler for ScriptedHandler {
        async fn handle_push(&self, body: &[u8]) -> u16 {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.bodies.lock().unwrap().push(body.to_vec());
            let mut statuses = self.statuses.lock().unwrap();
            if statuses.len() > 1 {
                statuses.remove(0)
            } else {
                statuses[0]
            }
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_delivers_envelope_and_acks() {
        let handler = ScriptedHandler::new(vec![200]);
        let queue = LocalPushQueue::spawn(handler.clone(), "local-sub", fast_policy(3));

        let id = queue
            .publish("webhooks", OutgoingMessage::new(b"payload".to_vec()))
            .await
            .unwrap();
        queue.flush().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        let body = handler.bodies.lock().unwrap()[0].clone();
        let envelope: PushEnvelope = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope.message.message_id, id);
        assert_eq!(envelope.message.data, "cGF5bG9hZA==");
        assert_eq!(envelope.subscription, "local-sub");
    }

    #[tokio::test]
    async fn test_server_error_is_redelivered() {
        let handler = ScriptedHandler::new(vec![500, 500, 200]);
        let queue = LocalPushQueue::spawn(handler.clone(), "s", fast_policy(5));

        queue.publish("t", OutgoingMessage::new(b"x".to_vec())).await.unwrap();
        queue.flush().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_bad_request_is_not_redelivered() {
        let handler = ScriptedHandler::new(vec![400]);
        let queue = LocalPushQueue::spawn(handler.clone(), "s", fast_policy(5));

        queue.publish("t", OutgoingMessage::new(b"x".to_vec())).await.unwrap();
        queue.flush().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let handler = ScriptedHandler::new(vec![503]);
        let queue = LocalPushQueue::spawn(handler.clone(), "s", fast_policy(4));

        queue.publish("t", OutgoingMessage::new(b"x".to_vec())).await.unwrap();
        queue.flush().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
    }
}
