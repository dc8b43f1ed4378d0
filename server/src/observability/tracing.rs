//! OpenTelemetry tracer provider and tracing-subscriber initialization.
//!
//! Installs a layered `tracing_subscriber` registry with a JSON stdout layer.
//! When an OTLP endpoint is configured, spans and logs are also bridged to
//! the collector.

use std::fmt::Write as _;

use anyhow::{Context as _, Result};
use opentelemetry::KeyValue;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::WithExportConfig as _;
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::trace::{BatchSpanProcessor, SdkTracerProvider, SpanData, SpanExporter};
use opentelemetry_sdk::Resource;
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::field::RecordFields;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields};
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::ObservabilityConfig;

/// Shuts down the `OTel` providers when dropped.
///
/// Keep it bound until the end of `main`.
pub struct OtelGuard {
    inner: Option<OtelGuardInner>,
}

struct OtelGuardInner {
    tracer_provider: SdkTracerProvider,
    logger_provider: SdkLoggerProvider,
}

impl Drop for OtelGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            if let Err(e) = inner.tracer_provider.shutdown() {
                tracing::warn!(error = %e, "OTel tracer provider shutdown error");
            }
            if let Err(e) = inner.logger_provider.shutdown() {
                tracing::warn!(error = %e, "OTel logger provider shutdown error");
            }
        }
    }
}

/// Value written in place of a secret-bearing field.
const REDACTED: &str = "[redacted]";

/// Collects fields as JSON, masking secret-bearing names.
#[derive(Default)]
struct RedactingVisitor {
    fields: Map<String, Value>,
}

impl RedactingVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        let value = if is_forbidden_attribute_key(field.name()) {
            Value::from(REDACTED)
        } else {
            value
        };
        self.fields.insert(field.name().to_owned(), value);
    }
}

impl Visit for RedactingVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.insert(field, Value::from(format!("{value:?}")));
    }
}

/// Span field formatter storing redacted fields as a JSON object.
#[derive(Clone, Copy, Debug, Default)]
pub struct RedactingJsonFields;

impl<'writer> FormatFields<'writer> for RedactingJsonFields {
    fn format_fields<R: RecordFields>(&self, mut writer: Writer<'writer>, fields: R) -> std::fmt::Result {
        let mut visitor = RedactingVisitor::default();
        fields.record(&mut visitor);
        write!(writer, "{}", Value::Object(visitor.fields))
    }

    fn add_fields(
        &self,
        current: &'writer mut FormattedFields<Self>,
        fields: &tracing::span::Record<'_>,
    ) -> std::fmt::Result {
        let mut merged: Map<String, Value> =
            serde_json::from_str(&current.fields).unwrap_or_default();
        let mut visitor = RedactingVisitor::default();
        fields.record(&mut visitor);
        merged.extend(visitor.fields);
        current.fields = Value::Object(merged).to_string();
        Ok(())
    }
}

/// One JSON object per event: `timestamp`, `level`, `target`, `fields` and
/// the enclosing `spans`, with secret-bearing fields masked.
#[derive(Clone, Copy, Debug, Default)]
pub struct RedactingJsonFormat;

impl<S, N> FormatEvent<S, N> for RedactingJsonFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let meta = event.metadata();
        let mut visitor = RedactingVisitor::default();
        event.record(&mut visitor);

        let mut line = Map::new();
        line.insert(
            "timestamp".into(),
            Value::from(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)),
        );
        line.insert("level".into(), Value::from(meta.level().to_string()));
        line.insert("target".into(), Value::from(meta.target()));
        line.insert("fields".into(), Value::Object(visitor.fields));

        if let Some(scope) = ctx.event_scope() {
            let spans: Vec<Value> = scope
                .from_root()
                .map(|span| {
                    let mut fields: Map<String, Value> = span
                        .extensions()
                        .get::<FormattedFields<N>>()
                        .and_then(|f| serde_json::from_str(&f.fields).ok())
                        .unwrap_or_default();
                    fields.insert("name".into(), Value::from(span.name()));
                    Value::Object(fields)
                })
                .collect();
            line.insert("spans".into(), Value::Array(spans));
        }

        writeln!(writer, "{}", Value::Object(line))
    }
}

/// JSON stdout layer that never prints secret-bearing field values.
fn json_layer<S>() -> tracing_subscriber::fmt::Layer<S, RedactingJsonFields, RedactingJsonFormat>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    tracing_subscriber::fmt::layer()
        .fmt_fields(RedactingJsonFields)
        .event_format(RedactingJsonFormat)
}

/// Strips secret-bearing attributes before spans leave the process.
#[derive(Debug)]
struct RedactingSpanExporter<E> {
    inner: E,
}

impl<E> SpanExporter for RedactingSpanExporter<E>
where
    E: SpanExporter,
{
    async fn export(&self, mut batch: Vec<SpanData>) -> OTelSdkResult {
        for span in &mut batch {
            span.attributes
                .retain(|kv| !is_forbidden_attribute_key(kv.key.as_str()));
            for event in &mut span.events.events {
                event
                    .attributes
                    .retain(|kv| !is_forbidden_attribute_key(kv.key.as_str()));
            }
        }

        self.inner.export(batch).await
    }

    fn shutdown(&mut self) -> OTelSdkResult {
        self.inner.shutdown()
    }

    fn force_flush(&mut self) -> OTelSdkResult {
        self.inner.force_flush()
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.inner.set_resource(resource);
    }
}

fn is_forbidden_attribute_key(key: &str) -> bool {
    const FORBIDDEN_PATTERNS: [&str; 8] = [
        "secret",
        "api_key",
        "apikey",
        "authorization",
        "signature",
        "signer",
        "password",
        "credential",
    ];

    let lowered = key.to_ascii_lowercase();
    FORBIDDEN_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(pattern))
}

fn env_filter(config: &ObservabilityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},hyper=off,tonic=off,h2=off", config.log_level)))
}

fn build_resource(config: &ObservabilityConfig) -> Resource {
    let deployment_env =
        std::env::var("DEPLOYMENT_ENVIRONMENT").unwrap_or_else(|_| "local".to_owned());

    Resource::builder()
        .with_service_name(config.service_name.clone())
        .with_attributes([
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            KeyValue::new("deployment.environment", deployment_env),
        ])
        .build()
}

/// Initialise the `tracing` subscriber, with OTLP export when configured.
///
/// Without an endpoint only the JSON stdout layer is installed and the
/// returned guard is a no-op.
pub fn init(config: &ObservabilityConfig) -> Result<OtelGuard> {
    let Some(endpoint) = config.otlp_endpoint.as_deref() else {
        Registry::default()
            .with(env_filter(config))
            .with(json_layer())
            .init();

        return Ok(OtelGuard { inner: None });
    };

    let resource = build_resource(config);

    let span_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .context("Failed to build OTLP span exporter")?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_resource(resource.clone())
        .with_span_processor(
            BatchSpanProcessor::builder(RedactingSpanExporter {
                inner: span_exporter,
            })
            .build(),
        )
        .build();

    let log_exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .context("Failed to build OTLP log exporter")?;

    let logger_provider = SdkLoggerProvider::builder()
        .with_resource(resource)
        .with_batch_exporter(log_exporter)
        .build();

    let otel_trace_layer = tracing_opentelemetry::layer().with_tracer(
        opentelemetry::trace::TracerProvider::tracer(&tracer_provider, "mentionbot-server"),
    );
    let otel_log_layer = OpenTelemetryTracingBridge::new(&logger_provider);

    Registry::default()
        .with(env_filter(config))
        .with(otel_trace_layer)
        .with(otel_log_layer)
        .with(json_layer())
        .init();

    Ok(OtelGuard {
        inner: Some(OtelGuardInner {
            tracer_provider,
            logger_provider,
        }),
    })
}
