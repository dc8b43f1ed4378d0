//! Reply processing: route a job to its channel's publisher and classify the result.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use super::types::{Channel, ReplyJob};
use crate::publish::{PublishError, PublishOptions, Publisher};

/// One publish adapter per supported channel.
#[derive(Clone)]
pub struct ChannelPublishers {
    pub farcaster: Arc<dyn Publisher>,
}

impl ChannelPublishers {
    #[must_use]
    pub fn for_channel(&self, channel: Channel) -> &dyn Publisher {
        match channel {
            Channel::Farcaster => self.farcaster.as_ref(),
        }
    }
}

/// Result of processing one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Published { hash: String },
    RateLimited { retry_after: Option<Duration> },
    Failed { error: String },
}

/// Publishes reply jobs.
#[derive(Clone)]
pub struct ReplyProcessor {
    publishers: ChannelPublishers,
}

impl ReplyProcessor {
    #[must_use]
    pub const fn new(publishers: ChannelPublishers) -> Self {
        Self { publishers }
    }

    /// Makes the single publish attempt for `job`.
    #[instrument(skip(self, job), fields(reply_id = %job.id, channel = %job.channel))]
    pub async fn process(&self, job: &ReplyJob) -> ProcessOutcome {
        debug!(text = %job.text, "Publishing reply");

        let options = PublishOptions {
            embeds: job.embeds.clone(),
            reply_to: Some(job.reply_to.clone()),
        };

        match self
            .publishers
            .for_channel(job.channel)
            .publish(&job.text, options)
            .await
        {
            Ok(hash) => ProcessOutcome::Published { hash },
            Err(PublishError::RateLimited { retry_after }) => {
                ProcessOutcome::RateLimited { retry_after }
            }
            Err(e) => ProcessOutcome::Failed {
                error: e.to_string(),
            },
        }
    }
}
