//! Observability: structured JSON logs, with optional OpenTelemetry export.
//!
//! ```rust,no_run
//! # use mentionbot_server::{config::ObservabilityConfig, observability};
//! # let config = ObservabilityConfig {
//! #     otlp_endpoint: None,
//! #     service_name: String::new(),
//! #     log_level: String::new(),
//! # };
//! // In main(), before any logging:
//! let _otel_guard = observability::init(&config)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod tracing;

pub use self::tracing::{init, OtelGuard, RedactingJsonFields, RedactingJsonFormat};
