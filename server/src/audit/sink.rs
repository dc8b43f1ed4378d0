//! Audit sink implementations.
//!
//! Uses runtime queries (`sqlx::query`) to avoid requiring a live database at
//! compile time.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::info;

use super::{AuditError, AuditRecord, AuditSink};

/// Writes audit records to the `mention_audit` table.
#[derive(Clone)]
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn record(&self, entry: &AuditRecord) -> Result<(), AuditError> {
        sqlx::query(
            r"
            INSERT INTO mention_audit
                (correlation_id, status, error_message, cast_hash, cast_text, author_fid,
                 author_address, prompt, agent_response, token_address, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ",
        )
        .bind(entry.correlation_id)
        .bind(entry.status.as_str())
        .bind(entry.error_message.as_deref())
        .bind(entry.cast_hash.as_deref())
        .bind(entry.cast_text.as_deref())
        .bind(entry.author_fid.map(|fid| fid as i64))
        .bind(entry.author_address.as_deref())
        .bind(entry.prompt.as_deref())
        .bind(entry.agent_response.as_ref())
        .bind(entry.token_address.as_deref())
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Emits audit records as structured log lines (no database configured).
#[derive(Clone, Copy, Debug, Default)]
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn record(&self, entry: &AuditRecord) -> Result<(), AuditError> {
        info!(
            target: "mentionbot_server::audit",
            correlation_id = %entry.correlation_id,
            status = entry.status.as_str(),
            cast_hash = entry.cast_hash.as_deref().unwrap_or_default(),
            error_message = entry.error_message.as_deref().unwrap_or_default(),
            token_address = entry.token_address.as_deref().unwrap_or_default(),
            "Mention audit"
        );
        Ok(())
    }
}
