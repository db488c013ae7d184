// Google Cloud Pub/Sub publisher over the REST API
//
// POST {base}/v1/{topic}:publish
// {"messages":[{"data":"<base64>","attributes":{...}}]} -> {"messageIds":["..."]}

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::QueueError;
use crate::queue::{MessageQueue, OutgoingMessage};

pub const DEFAULT_PUBSUB_URL: &str = "https://pubsub.googleapis.com";

#[derive(Serialize)]
struct PublishRequest<'a> {
    messages: Vec<WireMessage<'a>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    data: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    attributes: &'a HashMap<String, String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PubSubPublisher {
    client: Client,
    base_url: String,
    access_token: Option<String>,
}

impl PubSubPublisher {
    pub fn new(base_url: impl Into<String>, access_token: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token,
        }
    }

    fn publish_url(&self, topic: &str) -> String {
        format!("{}/v1/{}:publish", self.base_url, topic)
    }
}

#[async_trait]
impl MessageQueue for PubSubPublisher {
    async fn publish(&self, topic: &str, message: OutgoingMessage) -> Result<String, QueueError> {
        let body = PublishRequest {
            messages: vec![WireMessage {
                data: STANDARD.encode(&message.data),
                attributes: &message.attributes,
            }],
        };

        let mut request = self.client.post(self.publish_url(topic)).json(&body);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(QueueError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: PublishResponse = resp.json().await?;
        let id = parsed
            .message_ids
            .into_iter()
            .next()
            .ok_or(QueueError::MissingMessageId)?;

        debug!("Published message {} to {}", id, topic);
        Ok(id)
    }
}
