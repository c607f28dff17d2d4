//! Tracing setup.
//!
//! Always installs a formatted stderr layer filtered by `RUST_LOG` (or the
//! configured `log_level`). When an OTLP endpoint is configured, traces and
//! logs are also exported over gRPC.

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use kioskconf::TelemetryConfig;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Timeout for OTLP exports - prevents blocking on unavailable endpoints
const EXPORT_TIMEOUT: Duration = Duration::from_secs(5);

const SERVICE_NAME: &str = "kiosk";

struct Providers {
    tracer: SdkTracerProvider,
    logger: SdkLoggerProvider,
}

static PROVIDERS: OnceLock<Providers> = OnceLock::new();

fn otlp_providers(endpoint: &str) -> Result<Providers> {
    let resource = Resource::builder_empty()
        .with_service_name(SERVICE_NAME)
        .with_attributes(vec![KeyValue::new(
            "service.version",
            env!("CARGO_PKG_VERSION"),
        )])
        .build();

    let endpoint = if endpoint.starts_with("http") {
        endpoint.to_string()
    } else {
        format!("http://{}", endpoint)
    };

    let trace_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.clone())
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP span exporter")?;

    let tracer = SdkTracerProvider::builder()
        .with_span_processor(
            opentelemetry_sdk::trace::BatchSpanProcessor::builder(trace_exporter).build(),
        )
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource.clone())
        .build();

    let log_exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP log exporter")?;

    let logger = SdkLoggerProvider::builder()
        .with_log_processor(
            opentelemetry_sdk::logs::BatchLogProcessor::builder(log_exporter).build(),
        )
        .with_resource(resource)
        .build();

    Ok(Providers { tracer, logger })
}

/// Install the global subscriber.
pub fn init(config: &TelemetryConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let providers = if config.otlp_enabled() {
        Some(otlp_providers(config.otlp_endpoint.trim())?)
    } else {
        None
    };

    let trace_layer = providers
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer.tracer(SERVICE_NAME)));
    let log_layer = providers.as_ref().map(|p| {
        opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(&p.logger)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(trace_layer)
        .with(log_layer)
        .try_init()
        .context("tracing subscriber already installed")?;

    if let Some(providers) = providers {
        global::set_tracer_provider(providers.tracer.clone());
        let _ = PROVIDERS.set(providers);
        tracing::info!(endpoint = %config.otlp_endpoint, "🔭 OTLP export enabled for traces and logs");
    }

    Ok(())
}

/// Flush and stop the OTLP exporters, if any were started.
pub fn shutdown() {
    let Some(providers) = PROVIDERS.get() else {
        return;
    };
    tracing::info!("🔭 Flushing telemetry");
    if let Err(e) = providers.tracer.shutdown() {
        eprintln!("trace provider shutdown failed: {e}");
    }
    if let Err(e) = providers.logger.shutdown() {
        eprintln!("log provider shutdown failed: {e}");
    }
}
