//! Outbound Publishing
//!
//! Adapters that post reply text back to a social network. Each supported
//! channel has exactly one [`Publisher`].

pub mod farcaster;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use farcaster::NeynarPublisher;

/// Link attached to a published post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    pub url: String,
}

/// Options for a single publish call.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub embeds: Vec<Embed>,
    /// Identifier (hash) of the post being replied to
    pub reply_to: Option<String>,
}

/// Publish failures, with rate limiting kept distinct from everything else.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Rate limited by publisher")]
    RateLimited { retry_after: Option<Duration> },
    #[error("Publisher rejected post: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("Publisher request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Unexpected publisher response: {0}")]
    InvalidResponse(String),
}

/// Posts text to one social network.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes `text` and returns the hash of the new post.
    async fn publish(&self, text: &str, options: PublishOptions) -> Result<String, PublishError>;
}
