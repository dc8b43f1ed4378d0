//! Reply Queue Types

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::publish::Embed;

/// Reply text used whenever a failure has no better user-facing message.
pub const GENERIC_ERROR_REPLY: &str = "There was an issue with your prompt. Please try again.";

/// Delivery attempts configured per job. Duplicate public replies are worse
/// than a dropped one, so this stays at one.
pub const MAX_DELIVERY_ATTEMPTS: u32 = 1;

static JOB_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Social network a reply is published to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Farcaster,
}

impl Channel {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Farcaster => "farcaster",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One outbound reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyJob {
    pub id: String,
    pub text: String,
    pub reply_to: String,
    #[serde(default)]
    pub embeds: Vec<Embed>,
    pub channel: Channel,
}

impl ReplyJob {
    /// Reply carrying the agent's message and follow-up embeds.
    #[must_use]
    pub fn success(
        channel: Channel,
        reply_to: impl Into<String>,
        text: impl Into<String>,
        embeds: Vec<Embed>,
    ) -> Self {
        let reply_to = reply_to.into();
        Self {
            id: Self::next_id(&reply_to),
            text: text.into(),
            reply_to,
            embeds,
            channel,
        }
    }

    /// Reply reporting a failure; an empty text becomes [`GENERIC_ERROR_REPLY`].
    #[must_use]
    pub fn error(channel: Channel, reply_to: impl Into<String>, text: Option<&str>) -> Self {
        let reply_to = reply_to.into();
        let text = text
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(GENERIC_ERROR_REPLY);
        Self {
            id: Self::next_id(&reply_to),
            text: text.to_string(),
            reply_to,
            embeds: Vec::new(),
            channel,
        }
    }

    /// `replyTo-{target}-{unix_millis}-{seq}`, unique per process even within one millisecond.
    fn next_id(reply_to: &str) -> String {
        let seq = JOB_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        format!(
            "replyTo-{reply_to}-{}-{seq}",
            Utc::now().timestamp_millis()
        )
    }
}

/// Envelope stored in Redis for the durable queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedReply {
    pub job: ReplyJob,
    pub max_attempts: u32,
    pub attempts_made: u32,
    pub rate_limited_requeues: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedReply {
    #[must_use]
    pub fn new(job: ReplyJob) -> Self {
        Self {
            job,
            max_attempts: MAX_DELIVERY_ATTEMPTS,
            attempts_made: 0,
            rate_limited_requeues: 0,
            enqueued_at: Utc::now(),
        }
    }

    #[must_use]
    pub const fn has_attempts_left(&self) -> bool {
        self.attempts_made < self.max_attempts
    }

    /// Spends one attempt. Returns `false`, leaving the envelope untouched,
    /// when the budget is already used up.
    pub fn begin_attempt(&mut self) -> bool {
        if !self.has_attempts_left() {
            return false;
        }
        self.attempts_made += 1;
        true
    }

    /// Gives back the attempt spent on a publish the network refused with a
    /// rate limit, and counts the requeue.
    pub fn refund_rate_limited_attempt(&mut self) {
        self.attempts_made = self.attempts_made.saturating_sub(1);
        self.rate_limited_requeues += 1;
    }
}

/// Read-only queue counters. `None` when no durable queue backs the dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waiting: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delayed: Option<u64>,
}

/// Dispatch errors.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Redis error: {0}")]
    Redis(#[from] fred::prelude::Error),
    #[error("JSON serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}
