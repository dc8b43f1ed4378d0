//! Reply dispatcher interface and the inline (no broker) implementation.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use super::processor::{ProcessOutcome, ReplyProcessor};
use super::types::{DispatchError, QueueMetrics, ReplyJob};
use crate::ratelimit::{Admission, RateLimit, RateLimiterState};

/// Accepts reply jobs for publishing.
#[async_trait]
pub trait ReplyDispatcher: Send + Sync {
    /// Hands `job` over for its single publish attempt.
    async fn enqueue(&self, job: ReplyJob) -> Result<(), DispatchError>;

    /// Queue counters for external observability.
    async fn metrics(&self) -> QueueMetrics;

    /// Whether jobs survive a process restart.
    fn is_durable(&self) -> bool;
}

/// Publishes synchronously inside `enqueue`.
///
/// Used when no Redis is configured. The same throughput ceiling applies: a
/// call waits for admission, and a rate-limited publish imposes a cool-down
/// on later calls. The rate-limited job itself is dropped.
pub struct InlineDispatcher {
    processor: ReplyProcessor,
    limit: RateLimit,
    cool_down: Duration,
    state: Mutex<RateLimiterState>,
}

impl InlineDispatcher {
    #[must_use]
    pub fn new(processor: ReplyProcessor, limit: RateLimit, cool_down: Duration) -> Self {
        Self {
            processor,
            limit,
            cool_down,
            state: Mutex::new(RateLimiterState::new()),
        }
    }

    async fn wait_for_admission(&self) {
        loop {
            let admission = {
                let mut state = self.state.lock().await;
                state.try_admit(&self.limit, Instant::now().into_std())
            };
            match admission {
                Admission::Admit => return,
                Admission::Deny { retry_after } => tokio::time::sleep(retry_after).await,
            }
        }
    }
}

#[async_trait]
impl ReplyDispatcher for InlineDispatcher {
    #[instrument(skip(self, job), fields(reply_id = %job.id))]
    async fn enqueue(&self, job: ReplyJob) -> Result<(), DispatchError> {
        self.wait_for_admission().await;

        match self.processor.process(&job).await {
            ProcessOutcome::Published { hash } => {
                info!(hash = %hash, reply_to = %job.reply_to, "Reply published");
            }
            ProcessOutcome::RateLimited { retry_after } => {
                let cool_down = self.cool_down.max(retry_after.unwrap_or_default());
                self.state
                    .lock()
                    .await
                    .throttle(cool_down, Instant::now().into_std());
                warn!(
                    cool_down_ms = cool_down.as_millis() as u64,
                    "Rate limited while publishing inline, reply dropped"
                );
            }
            ProcessOutcome::Failed { error } => {
                error!(error = %error, "Error processing reply");
            }
        }

        Ok(())
    }

    async fn metrics(&self) -> QueueMetrics {
        QueueMetrics::default()
    }

    fn is_durable(&self) -> bool {
        false
    }
}
