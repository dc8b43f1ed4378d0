//! Mention Gateway
//!
//! Validates an inbound mention, answers the webhook immediately and runs
//! the agent pipeline on a background task.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::extract::{parse_structured_output, StructuredReply, TriggerTag};
use super::frames::{frame_embed, FramePayload, FrameStore};
use super::types::{AckResponse, GatewayError, MentionEvent};
use crate::agent::{Agent, AgentContext, AgentError, AgentOutput};
use crate::audit::{AuditLog, AuditRecord, AuditStatus};
use crate::config::Config;
use crate::replies::{Channel, ReplyDispatcher, ReplyJob};

/// Error returned to callers whose body carries no `data`.
pub const NO_DATA_ERROR: &str = "No data received.";

/// Error returned when `data` is not a cast.
pub const INVALID_CAST_ERROR: &str = "Invalid cast data.";

/// Gateway behavior knobs, taken from [`Config`].
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub trigger: TriggerTag,
    pub default_chain: String,
    pub frame_handler_url: String,
    pub agent_timeout: Duration,
    pub help_on_failure: bool,
}

impl GatewaySettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            trigger: TriggerTag::new(&config.trigger_tag, config.trigger_case_sensitive),
            default_chain: config.default_chain.clone(),
            frame_handler_url: config.frame_handler_url.clone(),
            agent_timeout: config.agent_timeout(),
            help_on_failure: config.agent_help_on_failure,
        }
    }
}

/// Acknowledgement plus the spawned pipeline, if one was started.
pub struct Accepted {
    pub status: StatusCode,
    pub ack: AckResponse,
    pub pipeline: Option<JoinHandle<()>>,
}

/// Entry point for inbound mentions.
#[derive(Clone)]
pub struct MentionGateway {
    settings: Arc<GatewaySettings>,
    agent: Arc<dyn Agent>,
    dispatcher: Arc<dyn ReplyDispatcher>,
    audit: AuditLog,
    frames: Option<FrameStore>,
}

impl MentionGateway {
    pub fn new(
        settings: GatewaySettings,
        agent: Arc<dyn Agent>,
        dispatcher: Arc<dyn ReplyDispatcher>,
        audit: AuditLog,
        frames: Option<FrameStore>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            agent,
            dispatcher,
            audit,
            frames,
        }
    }

    /// Handles one webhook payload and returns the acknowledgement.
    pub fn handle(&self, payload: &Value) -> (StatusCode, AckResponse) {
        let accepted = self.accept(payload);
        (accepted.status, accepted.ack)
    }

    /// Like [`Self::handle`], also returning the background pipeline task.
    pub fn accept(&self, payload: &Value) -> Accepted {
        let correlation_id = Uuid::now_v7();

        let Some(data) = payload.get("data").filter(|d| !d.is_null()) else {
            warn!(correlation_id = %correlation_id, "Webhook without data");
            self.audit.record(
                AuditRecord::new(correlation_id, AuditStatus::Nok).with_error(NO_DATA_ERROR),
            );
            return Accepted {
                status: StatusCode::BAD_REQUEST,
                ack: AckResponse::nok_with(NO_DATA_ERROR),
                pipeline: None,
            };
        };

        let event: MentionEvent = match serde_json::from_value(data.clone()) {
            Ok(event) => event,
            Err(e) => {
                warn!(correlation_id = %correlation_id, error = %e, "Webhook data is not a cast");
                self.audit.record(
                    AuditRecord::new(correlation_id, AuditStatus::Nok)
                        .with_error(format!("{INVALID_CAST_ERROR} {e}")),
                );
                return Accepted {
                    status: StatusCode::OK,
                    ack: AckResponse::nok_with(INVALID_CAST_ERROR),
                    pipeline: None,
                };
            }
        };

        let intent = self.settings.trigger.detect(&event.text);
        if !intent.triggered {
            info!(
                correlation_id = %correlation_id,
                cast_hash = %event.hash,
                tag = self.settings.trigger.as_str(),
                "Mention does not contain trigger tag"
            );
            self.audit
                .record(audit_record(correlation_id, AuditStatus::NotTriggered, &event));
            return Accepted {
                status: StatusCode::OK,
                ack: AckResponse::nok(),
                pipeline: None,
            };
        }

        info!(
            correlation_id = %correlation_id,
            cast_hash = %event.hash,
            author_fid = ?event.author.fid,
            "Mention accepted"
        );

        let pipeline = self.spawn_pipeline(correlation_id, event, intent.prompt);
        Accepted {
            status: StatusCode::OK,
            ack: AckResponse::ok(),
            pipeline: Some(pipeline),
        }
    }

    /// Runs the pipeline behind a panic-catching boundary.
    fn spawn_pipeline(
        &self,
        correlation_id: Uuid,
        event: MentionEvent,
        prompt: String,
    ) -> JoinHandle<()> {
        let gateway = self.clone();
        let span = info_span!("mention", correlation_id = %correlation_id);

        tokio::spawn(
            async move {
                let inner = gateway.clone();
                let cast = event.clone();
                let outcome =
                    tokio::spawn(async move { inner.run(correlation_id, &cast, &prompt).await })
                        .await
                        .unwrap_or_else(|e| Err(GatewayError::Panicked(e.to_string())));

                if let Err(e) = outcome {
                    error!(error = %e, "Mention pipeline failed");
                    gateway.audit.record(
                        audit_record(correlation_id, AuditStatus::Nok, &event)
                            .with_error(e.to_string()),
                    );
                }
            }
            .instrument(span),
        )
    }

    async fn run(
        &self,
        correlation_id: Uuid,
        event: &MentionEvent,
        prompt: &str,
    ) -> Result<(), GatewayError> {
        let context = AgentContext {
            correlation_id,
            cast_hash: event.hash.clone(),
            author_fid: event.author.fid,
            author_username: event.author.username.clone(),
            author_address: event.author_address().map(str::to_string),
            image_urls: event.image_urls(),
        };

        match self.invoke_agent(prompt, &context).await {
            Ok(output) => self.on_success(correlation_id, event, prompt, output).await,
            Err(e) => self.on_failure(correlation_id, event, prompt, &context, &e).await,
        }
    }

    async fn invoke_agent(
        &self,
        prompt: &str,
        context: &AgentContext,
    ) -> Result<AgentOutput, AgentError> {
        let timeout = self.settings.agent_timeout;
        tokio::time::timeout(timeout, self.agent.invoke(prompt, context))
            .await
            .unwrap_or(Err(AgentError::Timeout(timeout)))
    }

    async fn on_success(
        &self,
        correlation_id: Uuid,
        event: &MentionEvent,
        prompt: &str,
        output: AgentOutput,
    ) -> Result<(), GatewayError> {
        let reply = parse_structured_output(&output.output, &self.settings.default_chain);

        if let Some(frames) = &self.frames {
            let payload = FramePayload {
                reply: reply.clone(),
                transaction: output.transaction.clone(),
            };
            if let Err(e) = frames.store(correlation_id, &payload).await {
                warn!(error = %e, "Failed to store frame payload");
            }
        }

        let mut record = audit_record(correlation_id, AuditStatus::Ok, event);
        record.prompt = Some(prompt.to_string());
        record.agent_response = serde_json::to_value(&output).ok();
        record.token_address.clone_from(&reply.token_address);
        self.audit.record(record);

        let embed = frame_embed(&self.settings.frame_handler_url, correlation_id);
        let job = ReplyJob::success(Channel::Farcaster, &event.hash, reply.message, vec![embed]);
        info!(reply_id = %job.id, "Enqueueing reply");
        self.dispatcher.enqueue(job).await?;
        Ok(())
    }

    async fn on_failure(
        &self,
        correlation_id: Uuid,
        event: &MentionEvent,
        prompt: &str,
        context: &AgentContext,
        failure: &AgentError,
    ) -> Result<(), GatewayError> {
        warn!(error = %failure, "Agent invocation failed");

        let mut text = failure.cause_message().map(str::to_string);
        if self.settings.help_on_failure {
            if let Some(help) = self.help_message(event, context).await {
                text = Some(help);
            }
        }

        let mut record = audit_record(correlation_id, AuditStatus::Nok, event)
            .with_error(failure.to_string());
        record.prompt = Some(prompt.to_string());
        self.audit.record(record);

        let job = ReplyJob::error(Channel::Farcaster, &event.hash, text.as_deref());
        info!(reply_id = %job.id, "Enqueueing error reply");
        self.dispatcher.enqueue(job).await?;
        Ok(())
    }

    /// Asks the agent to describe itself; `None` unless it answers usefully.
    async fn help_message(&self, event: &MentionEvent, context: &AgentContext) -> Option<String> {
        let username = event.author.username.as_deref().unwrap_or("there");
        let prompt = format!("Hi, I'm @{username}, what can you do?");

        match self.invoke_agent(&prompt, context).await {
            Ok(output) => {
                let fallback = StructuredReply::fallback(&self.settings.default_chain);
                let reply = parse_structured_output(&output.output, &self.settings.default_chain);
                (reply != fallback && !reply.message.trim().is_empty()).then_some(reply.message)
            }
            Err(e) => {
                warn!(error = %e, "Help request failed");
                None
            }
        }
    }
}

fn audit_record(correlation_id: Uuid, status: AuditStatus, event: &MentionEvent) -> AuditRecord {
    let mut record = AuditRecord::new(correlation_id, status);
    record.cast_hash = Some(event.hash.clone());
    record.cast_text = Some(event.text.clone());
    record.author_fid = event.author.fid;
    record.author_address = event.author_address().map(str::to_string);
    record
}
