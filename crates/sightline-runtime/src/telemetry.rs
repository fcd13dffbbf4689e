//! Tracing subscriber and OpenTelemetry pipeline initialisation.
//!
//! Library crates only emit `tracing` events. The binary calls
//! [`init_tracing`] once at startup and holds the returned
//! [`TelemetryGuard`] until exit.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP collector base URL (e.g. `http://localhost:4318`). When set the OTLP HTTP exporter is activated. |
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `SIGHTLINE_LOG_FORMAT=json` | Emit newline-delimited JSON logs. |
//!
//! # Example
//!
//! ```rust,no_run
//! use sightline_runtime::telemetry::{TelemetryConfig, init_tracing};
//!
//! let _guard = init_tracing(&TelemetryConfig::from_env("sightline"));
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// How the process wants its logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub json: bool,
    pub otlp_endpoint: Option<String>,
}

impl TelemetryConfig {
    /// Read `SIGHTLINE_LOG_FORMAT` and `OTEL_EXPORTER_OTLP_ENDPOINT`.
    pub fn from_env(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            json: std::env::var("SIGHTLINE_LOG_FORMAT").as_deref() == Ok("json"),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        }
    }
}

/// Install the global `tracing` subscriber.
///
/// The filter comes from `RUST_LOG` (default `info`). With an OTLP endpoint
/// configured, spans are also exported over OTLP/HTTP; if the exporter fails
/// to build, logging falls back to the console only.
pub fn init_tracing(config: &TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let provider = config
        .otlp_endpoint
        .as_deref()
        .and_then(|endpoint| build_provider(&config.service_name, endpoint));

    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("sightline")));
    let json_layer = config.json.then(|| tracing_subscriber::fmt::layer().json());
    let compact_layer = (!config.json).then(|| tracing_subscriber::fmt::layer().compact());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer)
        .with(json_layer)
        .with(compact_layer)
        .init();

    TelemetryGuard(provider)
}

/// Shuts down the OTel [`SdkTracerProvider`] on drop, flushing pending spans.
pub struct TelemetryGuard(Option<SdkTracerProvider>);

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("[sightline] OpenTelemetry provider shutdown error: {e}");
            }
        }
    }
}

fn build_provider(service_name: &str, endpoint: &str) -> Option<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[sightline] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            // The loop is synchronous; there is no async runtime for a batch
            // exporter to spawn onto.
            .with_simple_exporter(exporter)
            .build(),
    )
}
