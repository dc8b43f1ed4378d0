//! Farcaster publishing through the Neynar API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{Embed, PublishError, PublishOptions, Publisher};

/// Request timeout for a single publish call.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum body size kept in a `Rejected` error.
const MAX_ERROR_BODY: usize = 500;

/// Neynar cast publisher using a managed signer.
#[derive(Clone)]
pub struct NeynarPublisher {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    signer_uuid: String,
}

#[derive(Serialize)]
struct PublishCastRequest<'a> {
    signer_uuid: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "<[Embed]>::is_empty")]
    embeds: &'a [Embed],
    #[serde(skip_serializing_if = "Option::is_none")]
    parent: Option<&'a str>,
}

#[derive(Deserialize)]
struct PublishCastResponse {
    cast: PublishedCast,
}

#[derive(Deserialize)]
struct PublishedCast {
    hash: String,
}

impl NeynarPublisher {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        signer_uuid: impl Into<String>,
    ) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .timeout(PUBLISH_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            signer_uuid: signer_uuid.into(),
        })
    }
}

/// Reads a `Retry-After` header expressed in seconds.
fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl Publisher for NeynarPublisher {
    #[instrument(skip(self, text, options), fields(reply_to = ?options.reply_to))]
    async fn publish(&self, text: &str, options: PublishOptions) -> Result<String, PublishError> {
        let body = PublishCastRequest {
            signer_uuid: &self.signer_uuid,
            text,
            embeds: &options.embeds,
            parent: options.reply_to.as_deref(),
        };

        let resp = self
            .client
            .post(format!("{}/v2/farcaster/cast", self.api_url))
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(PublishError::RateLimited {
                retry_after: retry_after(resp.headers()),
            });
        }
        if !status.is_success() {
            let body: String = resp
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(MAX_ERROR_BODY)
                .collect();
            return Err(PublishError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: PublishCastResponse = resp
            .json()
            .await
            .map_err(|e| PublishError::InvalidResponse(e.to_string()))?;

        debug!(hash = %parsed.cast.hash, "Cast published");
        Ok(parsed.cast.hash)
    }
}
