//! Webhook HTTP handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, instrument};

use super::types::AckResponse;
use crate::api::AppState;

/// `POST /webhooks/{source}`
///
/// Any `source` is accepted; all mentions go through the same gateway. A body
/// that is not JSON is treated like one without `data`.
#[instrument(skip(state, body), fields(body_len = body.len()))]
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(source): Path<String>,
    body: Bytes,
) -> (StatusCode, Json<AckResponse>) {
    debug!(source = %source, "Webhook received");

    let payload = serde_json::from_slice::<Value>(&body).unwrap_or(Value::Null);
    let (status, ack) = state.gateway.handle(&payload);
    (status, Json(ack))
}
