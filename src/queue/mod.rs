//! Message queue gateway.
//!
//! The webhook receive endpoint publishes here; the broker (or
//! [`LocalPushQueue`] in local runs) pushes each message back to the
//! process endpoint wrapped in a [`PushEnvelope`].

pub mod local;
pub mod pubsub;

use std::collections::HashMap;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

pub use local::{LocalPushQueue, PushHandler, RetryPolicy};
pub use pubsub::PubSubPublisher;

/// A message about to be published. `data` is the raw payload, encoded
/// by the backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutgoingMessage {
    pub data: Vec<u8>,
    pub attributes: HashMap<String, String>,
}

impl OutgoingMessage {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Publish one message; returns the broker-assigned message id.
    async fn publish(&self, topic: &str, message: OutgoingMessage) -> Result<String, QueueError>;
}

// ============================================================================
// PUSH ENVELOPE
// ============================================================================

/// Body of a push delivery:
/// `{message:{data, messageId, publishTime, attributes?}, subscription}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEnvelope {
    pub message: PushMessage,
    #[serde(default)]
    pub subscription: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    /// Base64 of the published payload
    pub data: String,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub publish_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<HashMap<String, String>>,
}

impl PushEnvelope {
    /// Wrap a published message the way a push subscription delivers it.
    pub fn wrap(
        message_id: impl Into<String>,
        message: &OutgoingMessage,
        subscription: impl Into<String>,
    ) -> Self {
        let attributes = (!message.attributes.is_empty()).then(|| message.attributes.clone());
        Self {
            message: PushMessage {
                data: STANDARD.encode(&message.data),
                message_id: message_id.into(),
                publish_time: chrono::Utc::now().to_rfc3339(),
                attributes,
            },
            subscription: subscription.into(),
        }
    }
}
