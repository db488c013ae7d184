// Webhook HTTP surface
//
// GET  /webhook          validation ping, 200
// POST /webhook          bank-facing, always 200
// POST /webhook/process  queue-facing, 200 / 400 / 500
// GET  /health

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::webhook::{WebhookProcessor, WebhookReceiver};

/// Shared application state
#[derive(Clone)]
pub struct WebhookState {
    pub receiver: Arc<WebhookReceiver>,
    pub processor: Arc<WebhookProcessor>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// GET /health
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: crate::VERSION,
    })
}

/// GET /webhook - the bank checks the URL before enabling it
async fn validate_webhook() -> StatusCode {
    StatusCode::OK
}

/// POST /webhook
async fn receive_webhook(State(state): State<WebhookState>, body: Bytes) -> StatusCode {
    state.receiver.receive(&body).await;
    StatusCode::OK
}

/// POST /webhook/process
async fn process_webhook(State(state): State<WebhookState>, body: Bytes) -> impl IntoResponse {
    let (status, response) = state.processor.handle_blocking(body.to_vec()).await;
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response))
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // Bank side answers 200 to a body of any size
        .route(
            "/webhook",
            get(validate_webhook)
                .post(receive_webhook)
                .layer(DefaultBodyLimit::disable()),
        )
        .route("/webhook/process", axum::routing::post(process_webhook))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
