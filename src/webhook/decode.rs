// Push delivery decoding
//
// envelope JSON -> base64 data -> JSON payload -> transaction DTO
// Each stage fails with its own DecodeError variant.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;

use crate::error::DecodeError;
use crate::queue::{PushEnvelope, PushMessage};
use crate::webhook::dto::WebhookTransaction;

pub fn parse_envelope(body: &[u8]) -> Result<PushEnvelope, DecodeError> {
    serde_json::from_slice(body).map_err(|e| DecodeError::Envelope(e.to_string()))
}

pub fn decode_data(message: &PushMessage) -> Result<Vec<u8>, DecodeError> {
    if message.data.is_empty() {
        return Err(DecodeError::Envelope("message.data is empty".to_string()));
    }
    Ok(STANDARD.decode(message.data.trim())?)
}

pub fn parse_json(data: &[u8]) -> Result<Value, DecodeError> {
    serde_json::from_slice(data).map_err(|e| DecodeError::Json(e.to_string()))
}

pub fn validate_transaction(payload: Value) -> Result<WebhookTransaction, DecodeError> {
    let dto: WebhookTransaction =
        serde_json::from_value(payload).map_err(|e| DecodeError::Schema(e.to_string()))?;
    dto.validate().map_err(DecodeError::Schema)?;
    Ok(dto)
}

/// Run every stage over a push body.
pub fn decode_push(body: &[u8]) -> Result<WebhookTransaction, DecodeError> {
    let envelope = parse_envelope(body)?;
    let data = decode_data(&envelope.message)?;
    let payload = parse_json(&data)?;
    validate_transaction(payload)
}
