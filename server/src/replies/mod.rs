//! Reply Dispatch
//!
//! Outbound replies are enqueued by the mention pipeline and published by a
//! rate-limited consumer. With Redis configured the queue is durable and
//! drained by a background worker; otherwise replies publish inline.

mod dispatcher;
mod durable;
mod processor;
mod types;

use std::sync::Arc;

use fred::prelude::Client;
use tracing::{info, warn};

pub use dispatcher::{InlineDispatcher, ReplyDispatcher};
pub use durable::{DurableDispatcher, ReplyQueueKeys, WorkerHandle};
pub use processor::{ChannelPublishers, ProcessOutcome, ReplyProcessor};
pub use types::{
    Channel, DispatchError, QueueMetrics, QueuedReply, ReplyJob, GENERIC_ERROR_REPLY,
    MAX_DELIVERY_ATTEMPTS,
};

use crate::config::ReplyQueueConfig;

/// Chooses the dispatcher once at startup.
///
/// Returns the worker handle when a durable queue was started so the caller
/// can stop it on shutdown.
pub fn build_dispatcher(
    config: &ReplyQueueConfig,
    redis: Option<Client>,
    processor: ReplyProcessor,
) -> (Arc<dyn ReplyDispatcher>, Option<WorkerHandle>) {
    if let Some(redis) = redis {
        let dispatcher = DurableDispatcher::new(redis, config.clone(), processor);
        let worker = dispatcher.start();
        info!(
            prefix = %config.key_prefix,
            max = config.rate_limit.max,
            duration_ms = config.rate_limit.duration.as_millis() as u64,
            "Durable reply queue started"
        );
        (Arc::new(dispatcher), Some(worker))
    } else {
        warn!("No Redis configured, replies are published inline and lost on restart");
        let dispatcher = InlineDispatcher::new(processor, config.rate_limit, config.cool_down);
        (Arc::new(dispatcher), None)
    }
}
