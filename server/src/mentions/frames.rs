//! Frame payload store.
//!
//! Success replies embed a link to `{FRAME_HANDLER_URL}/frames/{correlation_id}`.
//! The frame handler reads the payload stored here under the same id.

use std::time::Duration;

use fred::interfaces::KeysInterface;
use fred::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::extract::StructuredReply;
use crate::publish::Embed;
use crate::replies::DispatchError;

/// Data a frame renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FramePayload {
    pub reply: StructuredReply,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<serde_json::Value>,
}

/// Embed linking a reply to its frame.
#[must_use]
pub fn frame_embed(frame_handler_url: &str, correlation_id: Uuid) -> Embed {
    Embed {
        url: format!(
            "{}/frames/{correlation_id}",
            frame_handler_url.trim_end_matches('/')
        ),
    }
}

/// `{prefix}:frame:{correlation_id}`
fn frame_key(prefix: &str, correlation_id: Uuid) -> String {
    format!("{prefix}:frame:{correlation_id}")
}

/// Redis-backed frame payloads with a TTL.
#[derive(Clone)]
pub struct FrameStore {
    redis: Client,
    prefix: String,
    ttl: Duration,
}

impl FrameStore {
    #[must_use]
    pub fn new(redis: Client, prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            redis,
            prefix: prefix.into(),
            ttl,
        }
    }


    pub async fn store(
        &self,
        correlation_id: Uuid,
        payload: &FramePayload,
    ) -> Result<(), DispatchError> {
        let value = serde_json::to_string(payload)?;
        self.redis
            .set::<(), _, _>(
                frame_key(&self.prefix, correlation_id),
                value,
                Some(Expiration::EX(self.ttl.as_secs().max(1) as i64)),
                None,
                false,
            )
            .await?;
        Ok(())
    }
}
