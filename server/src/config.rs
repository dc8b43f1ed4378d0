//! Server Configuration
//!
//! Loads configuration from environment variables.

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

use crate::ratelimit::RateLimit;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:3000")
    pub bind_address: String,

    /// Handle whose presence in a mention activates the bot (e.g., "@bot")
    pub trigger_tag: String,

    /// Whether the trigger tag match is case-sensitive (default: true)
    pub trigger_case_sensitive: bool,

    /// Chain identifier used when the agent output does not name one
    pub default_chain: String,

    /// Base URL of the frame handler linked from success replies
    pub frame_handler_url: String,

    /// Agent API endpoint
    pub agent_api_url: String,

    /// Agent API key
    pub agent_api_key: String,

    /// End-to-end deadline for one agent invocation in seconds (default: 60)
    pub agent_timeout_secs: u64,

    /// Ask the agent for a help message when the main invocation fails
    pub agent_help_on_failure: bool,

    /// Neynar API base URL
    pub neynar_api_url: String,

    /// Neynar API key
    pub neynar_api_key: String,

    /// Neynar managed signer used to publish replies
    pub neynar_signer_uuid: String,

    /// Shared secret for the `X-Signature` webhook check (optional; check disabled if unset)
    pub webhook_secret: Option<String>,

    /// Redis connection URL (optional; replies are dispatched inline if unset)
    pub redis_url: Option<String>,

    /// `PostgreSQL` connection URL for the audit log (optional; audit goes to logs if unset)
    pub database_url: Option<String>,

    /// Reply queue settings
    pub replies: ReplyQueueConfig,

    /// Frame payload TTL in seconds (default: 604800 = 7 days)
    pub frame_ttl_secs: u64,

    /// Inbound request slow-down: requests allowed per window before delaying
    pub inbound_slow_down: RateLimit,

    /// Observability settings
    pub observability: ObservabilityConfig,
}

/// Reply queue configuration.
#[derive(Debug, Clone)]
pub struct ReplyQueueConfig {
    /// Prefix for Redis keys (e.g., "mentionbot:replies")
    pub key_prefix: String,
    /// Publish throughput ceiling
    pub rate_limit: RateLimit,
    /// Pause imposed on the worker after a 429 from the publisher
    pub cool_down: Duration,
    /// Delay before a freshly enqueued job becomes claimable
    pub initial_delay: Duration,
    /// How many times a rate-limited job is put back before it is counted failed
    pub max_rate_limited_requeues: u32,
}

/// Tracing and OpenTelemetry configuration.
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// OTLP collector endpoint (optional; JSON stdout only if unset)
    pub otlp_endpoint: Option<String>,
    /// Service name reported to the collector
    pub service_name: String,
    /// Default filter directive when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for ReplyQueueConfig {
    fn default() -> Self {
        Self {
            key_prefix: "mentionbot:replies".into(),
            rate_limit: RateLimit::new(2, Duration::from_millis(1000)),
            cool_down: Duration::from_millis(5000),
            initial_delay: Duration::from_millis(1000),
            max_rate_limited_requeues: 5,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = ReplyQueueConfig::default();

        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".into()),
            trigger_tag: env::var("TRIGGER_TAG").unwrap_or_else(|_| "@bot".into()),
            trigger_case_sensitive: parse_var("TRIGGER_CASE_SENSITIVE").unwrap_or(true),
            default_chain: env::var("DEFAULT_CHAIN").unwrap_or_else(|_| "baseSepolia".into()),
            frame_handler_url: env::var("FRAME_HANDLER_URL")
                .context("FRAME_HANDLER_URL must be set")?
                .trim_end_matches('/')
                .to_string(),
            agent_api_url: env::var("AGENT_API_URL").context("AGENT_API_URL must be set")?,
            agent_api_key: env::var("AGENT_API_KEY").context("AGENT_API_KEY must be set")?,
            agent_timeout_secs: parse_var("AGENT_TIMEOUT_SECS").unwrap_or(60),
            agent_help_on_failure: parse_var("AGENT_HELP_ON_FAILURE").unwrap_or(false),
            neynar_api_url: env::var("NEYNAR_API_URL")
                .unwrap_or_else(|_| "https://api.neynar.com".into()),
            neynar_api_key: env::var("NEYNAR_API_KEY").context("NEYNAR_API_KEY must be set")?,
            neynar_signer_uuid: env::var("NEYNAR_SIGNER_UUID")
                .context("NEYNAR_SIGNER_UUID must be set")?,
            webhook_secret: non_empty_var("WEBHOOK_SECRET"),
            redis_url: non_empty_var("REDIS_URL"),
            database_url: non_empty_var("DATABASE_URL"),
            replies: ReplyQueueConfig {
                key_prefix: env::var("REPLY_QUEUE_PREFIX").unwrap_or(defaults.key_prefix),
                rate_limit: env::var("REPLY_RATE_LIMIT")
                    .ok()
                    .and_then(|v| parse_rate_limit(&v, Duration::from_millis))
                    .unwrap_or(defaults.rate_limit),
                cool_down: parse_var("REPLY_COOL_DOWN_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.cool_down),
                initial_delay: parse_var("REPLY_INITIAL_DELAY_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.initial_delay),
                max_rate_limited_requeues: parse_var("REPLY_MAX_RATE_LIMITED_REQUEUES")
                    .unwrap_or(defaults.max_rate_limited_requeues),
            },
            frame_ttl_secs: parse_var("FRAME_TTL_SECS").unwrap_or(604_800),
            inbound_slow_down: env::var("INBOUND_SLOW_DOWN")
                .ok()
                .and_then(|v| parse_rate_limit(&v, Duration::from_secs))
                .unwrap_or_else(|| RateLimit::new(200, Duration::from_secs(60))),
            observability: ObservabilityConfig {
                otlp_endpoint: non_empty_var("OTEL_EXPORTER_OTLP_ENDPOINT"),
                service_name: env::var("OTEL_SERVICE_NAME")
                    .unwrap_or_else(|_| "mentionbot-server".into()),
                log_level: env::var("LOG_LEVEL")
                    .unwrap_or_else(|_| "mentionbot_server=debug,tower_http=info".into()),
            },
        })
    }

    /// Deadline for a single agent invocation.
    #[must_use]
    pub const fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    /// Redis key prefix for frame payloads; frames share the reply queue namespace.
    #[must_use]
    pub fn frame_key_prefix(&self) -> &str {
        &self.replies.key_prefix
    }

    /// Check if a durable reply queue is configured.
    #[must_use]
    pub const fn has_durable_queue(&self) -> bool {
        self.redis_url.is_some()
    }

    /// Create a default configuration for testing.
    ///
    /// No Redis and no database: replies run inline and audit goes to the log.
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            bind_address: "127.0.0.1:3000".into(),
            trigger_tag: "@bot".into(),
            trigger_case_sensitive: true,
            default_chain: "baseSepolia".into(),
            frame_handler_url: "https://frames.test".into(),
            agent_api_url: "http://localhost:9999/agent".into(),
            agent_api_key: "test-key".into(),
            agent_timeout_secs: 5,
            agent_help_on_failure: false,
            neynar_api_url: "http://localhost:9998".into(),
            neynar_api_key: "test-neynar-key".into(),
            neynar_signer_uuid: "test-signer".into(),
            webhook_secret: None,
            redis_url: None,
            database_url: None,
            replies: ReplyQueueConfig::default(),
            frame_ttl_secs: 3600,
            inbound_slow_down: RateLimit::new(200, Duration::from_secs(60)),
            observability: ObservabilityConfig {
                otlp_endpoint: None,
                service_name: "mentionbot-test".into(),
                log_level: "mentionbot_server=debug".into(),
            },
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parses a limit from "max,duration" format, the duration unit chosen by `unit`.
fn parse_rate_limit(val: &str, unit: fn(u64) -> Duration) -> Option<RateLimit> {
    let parts: Vec<&str> = val.split(',').collect();
    if parts.len() == 2 {
        let max = parts[0].trim().parse().ok()?;
        let duration: u64 = parts[1].trim().parse().ok()?;
        if max == 0 || duration == 0 {
            return None;
        }
        Some(RateLimit::new(max, unit(duration)))
    } else {
        None
    }
}
