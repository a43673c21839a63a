//! Logging, tracing and metrics export for the operator process
//!
//! Logs always go to stdout, as JSON lines or text. When an OTLP endpoint is
//! configured, spans and the `meshroll` metrics are pushed there as well.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::{runtime, Resource};
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "info,meshroll=debug,kube=info,tower=warn,hyper=warn";

/// Resource attribute naming the namespace the operator is scoped to
pub const WATCH_SCOPE_ATTRIBUTE: &str = "meshroll.watch_scope";

/// Errors that can occur during telemetry initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The OTLP span or metric exporter could not be built
    #[error("failed to build OTLP {signal} exporter: {message}")]
    Exporter {
        /// `traces` or `metrics`
        signal: &'static str,
        /// Exporter error
        message: String,
    },

    /// A global subscriber was already installed
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Configuration for telemetry initialization
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name reported on spans and metrics
    pub service_name: String,

    /// OTLP gRPC endpoint (e.g. "http://otel-collector:4317"); `None` keeps
    /// everything local
    pub otlp_endpoint: Option<String>,

    /// Emit logs as JSON lines instead of human-readable text
    pub json_logs: bool,

    /// Namespace the controller watches; `None` when cluster-wide
    pub watch_namespace: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "meshroll-operator".to_string(),
            otlp_endpoint: None,
            json_logs: true,
            watch_namespace: None,
        }
    }
}

impl TelemetryConfig {
    fn resource(&self) -> Resource {
        Resource::new([
            KeyValue::new(SERVICE_NAME, self.service_name.clone()),
            KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
            KeyValue::new(
                WATCH_SCOPE_ATTRIBUTE,
                self.watch_namespace.clone().unwrap_or_else(|| "*".to_string()),
            ),
        ])
    }
}

/// Install the global subscriber, and the OTLP pipelines when configured
///
/// Call once, from inside the tokio runtime.
pub fn init_telemetry(config: TelemetryConfig) -> Result<(), TelemetryError> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let otel_layer = match &config.otlp_endpoint {
        Some(endpoint) => {
            let provider = install_otlp(endpoint, config.resource())?;
            let tracer = provider.tracer(config.service_name.clone());
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    // Option<Layer> implements Layer, so exactly one of these formats
    let json_layer = config.json_logs.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
    });
    let text_layer = (!config.json_logs).then(|| tracing_subscriber::fmt::layer());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|e| TelemetryError::SubscriberInit(e.to_string()))
}

/// Register OTLP span and metric exporters as the global providers
fn install_otlp(endpoint: &str, resource: Resource) -> Result<TracerProvider, TelemetryError> {
    let spans = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| TelemetryError::Exporter {
            signal: "traces",
            message: e.to_string(),
        })?;
    let metrics = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| TelemetryError::Exporter {
            signal: "metrics",
            message: e.to_string(),
        })?;

    let meter_provider = SdkMeterProvider::builder()
        .with_reader(PeriodicReader::builder(metrics, runtime::Tokio).build())
        .with_resource(resource.clone())
        .build();
    global::set_meter_provider(meter_provider);

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(spans, runtime::Tokio)
        .with_resource(resource)
        .build();
    global::set_tracer_provider(tracer_provider.clone());
    Ok(tracer_provider)
}
