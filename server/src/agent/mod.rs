//! Agent Invocation
//!
//! The AI agent is an external collaborator: it receives the cleaned prompt
//! plus context about the author and returns free text that should contain a
//! JSON reply payload.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use http::HttpAgent;

/// Context forwarded with every prompt.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentContext {
    pub correlation_id: Uuid,
    pub cast_hash: String,
    pub author_fid: Option<u64>,
    pub author_username: Option<String>,
    pub author_address: Option<String>,
    pub image_urls: Vec<String>,
}

/// Raw agent result.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AgentOutput {
    /// Free text, expected to contain a (possibly fenced) JSON object
    #[serde(default)]
    pub output: String,
    /// Structured transaction intent, when the agent produced one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<serde_json::Value>,
}

/// Nested failure detail returned by the agent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentFailureCause {
    /// Human-readable reason, safe to show to the end user
    pub error: Option<String>,
}

/// Agent invocation errors.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Agent rejected request: {message}")]
    Rejected {
        message: String,
        cause: Option<AgentFailureCause>,
    },
    #[error("Agent request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Agent did not answer within {0:?}")]
    Timeout(std::time::Duration),
    #[error("Unexpected agent response: {0}")]
    InvalidResponse(String),
}

impl AgentError {
    /// The nested, user-facing cause message, if the agent supplied one.
    #[must_use]
    pub fn cause_message(&self) -> Option<&str> {
        match self {
            Self::Rejected {
                cause: Some(cause), ..
            } => cause.error.as_deref().filter(|e| !e.trim().is_empty()),
            _ => None,
        }
    }
}

/// Invokes the AI agent.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn invoke(&self, prompt: &str, context: &AgentContext)
        -> Result<AgentOutput, AgentError>;
}
