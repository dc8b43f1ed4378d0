//! Axum middleware for inbound slow-down.
//!
//! Requests past the configured budget are not rejected; each one is held
//! back for a fixed delay before it reaches the handler, so a webhook burst
//! from the source network degrades into latency instead of errors.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;
use tracing::debug;

use crate::api::AppState;
use crate::ratelimit::{Admission, RateLimit, RateLimiterState};

/// Delay applied to each request over budget.
pub const SLOW_DOWN_DELAY: Duration = Duration::from_millis(1000);

/// Shared inbound slow-down policy.
#[derive(Clone)]
pub struct SlowDown {
    limit: RateLimit,
    delay: Duration,
    state: Arc<Mutex<RateLimiterState>>,
}

impl SlowDown {
    #[must_use]
    pub fn new(limit: RateLimit) -> Self {
        Self::with_delay(limit, SLOW_DOWN_DELAY)
    }

    #[must_use]
    pub fn with_delay(limit: RateLimit, delay: Duration) -> Self {
        Self {
            limit,
            delay,
            state: Arc::new(Mutex::new(RateLimiterState::new())),
        }
    }

    /// Returns how long the current request must wait before proceeding.
    pub async fn delay_for(&self, now: Instant) -> Option<Duration> {
        let mut state = self.state.lock().await;
        match state.try_admit(&self.limit, now) {
            Admission::Admit => None,
            Admission::Deny { .. } => Some(self.delay),
        }
    }
}

/// Middleware delaying requests that exceed the inbound budget.
pub async fn slow_down(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(delay) = state.slow_down.delay_for(Instant::now()).await {
        debug!(
            path = %request.uri().path(),
            delay_ms = delay.as_millis() as u64,
            "Inbound budget exceeded, slowing down request"
        );
        tokio::time::sleep(delay).await;
    }

    next.run(request).await
}
