//! HMAC-SHA512 Webhook Signatures
//!
//! Inbound webhooks carry `X-Signature`: the hex HMAC-SHA512 of the raw body
//! keyed by the shared webhook secret.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha512;
use thiserror::Error;
use tracing::warn;

use crate::api::AppState;

type HmacSha512 = Hmac<Sha512>;

/// Header carrying the signature.
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Largest webhook body accepted for verification.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Signature check failures.
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("Missing signature")]
    Missing,
    #[error("Invalid signature")]
    Invalid,
    #[error("Unreadable body")]
    Body,
}

impl IntoResponse for SignatureError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Missing | Self::Invalid => StatusCode::UNAUTHORIZED,
            Self::Body => StatusCode::BAD_REQUEST,
        };
        (status, Json(json!({ "status": "nok", "error": self.to_string() }))).into_response()
    }
}

/// Sign a payload with HMAC-SHA512 and return the hex-encoded signature.
#[must_use]
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        HmacSha512::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify an HMAC-SHA512 signature against a payload.
#[must_use]
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let expected = sign_payload(secret, payload);
    let signature = signature.trim().to_ascii_lowercase();
    // Constant-time comparison
    expected.len() == signature.len()
        && expected
            .as_bytes()
            .iter()
            .zip(signature.as_bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// Middleware rejecting unsigned or mis-signed webhooks.
///
/// A no-op when no secret is configured.
pub async fn require_signature(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, SignatureError> {
    let Some(secret) = state.webhook_secret.as_deref() else {
        return Ok(next.run(request).await);
    };

    let signature = request
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or(SignatureError::Missing)?;

    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| SignatureError::Body)?;

    if !verify_signature(secret, &bytes, &signature) {
        warn!(path = %parts.uri.path(), "Webhook signature mismatch");
        return Err(SignatureError::Invalid);
    }

    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}
