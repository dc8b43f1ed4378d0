//! API Router and Application State
//!
//! Central routing configuration and shared state.

mod metrics;

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    middleware::from_fn_with_state,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::{
    config::Config,
    mentions::{self, MentionGateway},
    ratelimit::{slow_down, SlowDown},
    replies::ReplyDispatcher,
};

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<Config>,
    /// Mention pipeline entry point
    pub gateway: MentionGateway,
    /// Reply dispatcher, for metrics
    pub dispatcher: Arc<dyn ReplyDispatcher>,
    /// Inbound slow-down policy
    pub slow_down: SlowDown,
    /// Webhook signature secret (check disabled if unset)
    pub webhook_secret: Option<Arc<str>>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(
        config: Config,
        gateway: MentionGateway,
        dispatcher: Arc<dyn ReplyDispatcher>,
    ) -> Self {
        let slow_down = SlowDown::new(config.inbound_slow_down);
        let webhook_secret = config.webhook_secret.as_deref().map(Arc::from);
        Self {
            config: Arc::new(config),
            gateway,
            dispatcher,
            slow_down,
            webhook_secret,
        }
    }

    /// Check if webhook signatures are verified.
    #[must_use]
    pub const fn has_signature_check(&self) -> bool {
        self.webhook_secret.is_some()
    }
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    let webhook_routes = Router::new()
        .route("/webhooks/{source}", post(mentions::handlers::receive_webhook))
        .layer(from_fn_with_state(state.clone(), mentions::require_signature));

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Queue counters
        .route("/metrics", get(metrics::get_metrics))
        // Inbound mentions
        .merge(webhook_routes)
        // Middleware
        .layer(from_fn_with_state(state.clone(), slow_down))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        // State
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    /// Service status
    status: &'static str,
    /// Whether replies go through the Redis queue
    durable_queue: bool,
    /// Whether webhook signatures are verified
    signature_check: bool,
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        durable_queue: state.dispatcher.is_durable(),
        signature_check: state.has_signature_check(),
    })
}
