//! Audit Trail
//!
//! Every inbound mention leaves at least one audit record, correlated by the
//! per-event correlation id. Writes are fire-and-forget: a failing sink is
//! logged and never blocks or fails the reply path.

mod sink;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

pub use sink::{LogAuditSink, PgAuditSink};

/// Outcome recorded for a mention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditStatus {
    Ok,
    Nok,
    NotTriggered,
}

impl AuditStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Nok => "nok",
            Self::NotTriggered => "not-triggered",
        }
    }
}

/// One audit entry.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub correlation_id: Uuid,
    pub status: AuditStatus,
    pub error_message: Option<String>,
    pub cast_hash: Option<String>,
    pub cast_text: Option<String>,
    pub author_fid: Option<u64>,
    pub author_address: Option<String>,
    pub prompt: Option<String>,
    pub agent_response: Option<serde_json::Value>,
    pub token_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    #[must_use]
    pub fn new(correlation_id: Uuid, status: AuditStatus) -> Self {
        Self {
            correlation_id,
            status,
            error_message: None,
            cast_hash: None,
            cast_text: None,
            author_fid: None,
            author_address: None,
            prompt: None,
            agent_response: None,
            token_address: None,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// Audit errors.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persists audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: &AuditRecord) -> Result<(), AuditError>;
}

/// Fire-and-forget front for an [`AuditSink`].
#[derive(Clone)]
pub struct AuditLog {
    sink: Arc<dyn AuditSink>,
}

impl AuditLog {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Writes the record on a background task.
    pub fn record(&self, entry: AuditRecord) {
        let sink = self.sink.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.record(&entry).await {
                error!(
                    correlation_id = %entry.correlation_id,
                    status = entry.status.as_str(),
                    error = %e,
                    "Failed to write audit record"
                );
            }
        });
    }
}
