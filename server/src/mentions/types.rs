//! Mention Types

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::replies::DispatchError;

/// Inbound cast that mentions the bot.
#[derive(Debug, Clone, Deserialize)]
pub struct MentionEvent {
    pub text: String,
    pub author: MentionAuthor,
    pub hash: String,
    #[serde(default)]
    pub embeds: Vec<MentionEmbed>,
}

/// Author of a mention.
#[derive(Debug, Clone, Deserialize)]
pub struct MentionAuthor {
    pub fid: Option<u64>,
    pub username: Option<String>,
    pub custody_address: Option<String>,
    #[serde(default)]
    pub verified_addresses: VerifiedAddresses,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifiedAddresses {
    #[serde(default)]
    pub eth_addresses: Vec<String>,
}

/// Embed attached to a mention. Only URL embeds are used.
#[derive(Debug, Clone, Deserialize)]
pub struct MentionEmbed {
    pub url: Option<String>,
}

impl MentionEvent {
    /// First verified address, else the custody address.
    #[must_use]
    pub fn author_address(&self) -> Option<&str> {
        self.author
            .verified_addresses
            .eth_addresses
            .first()
            .or(self.author.custody_address.as_ref())
            .map(String::as_str)
    }

    /// URLs of all embeds that carry one.
    #[must_use]
    pub fn image_urls(&self) -> Vec<String> {
        self.embeds.iter().filter_map(|e| e.url.clone()).collect()
    }
}

/// Acknowledgement status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Ok,
    Nok,
}

/// Body returned to the webhook caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AckResponse {
    pub status: AckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AckResponse {
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            status: AckStatus::Ok,
            error: None,
        }
    }

    #[must_use]
    pub const fn nok() -> Self {
        Self {
            status: AckStatus::Nok,
            error: None,
        }
    }

    #[must_use]
    pub fn nok_with(error: impl Into<String>) -> Self {
        Self {
            status: AckStatus::Nok,
            error: Some(error.into()),
        }
    }
}

/// Failures inside the background mention pipeline.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Failed to enqueue reply: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("Mention pipeline panicked: {0}")]
    Panicked(String),
}
