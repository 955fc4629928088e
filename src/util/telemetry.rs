use std::time::Duration;

use opentelemetry::{KeyValue, global};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{self, Protocol, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::util::env;

pub type Result<T> = core::result::Result<T, Box<dyn std::error::Error>>;

const TRACER_NAME: &str = env!("CARGO_PKG_NAME");
const DEFAULT_FILTER: &str = "aula_server=debug,tower_http=debug,axum=debug,sqlx=info,info";

/// Holds the OTLP providers for shutdown. When no collector endpoint is
/// configured the providers are absent and only the fmt subscriber runs.
pub struct Telemetry {
    providers: Option<Providers>,
}

struct Providers {
    logger: SdkLoggerProvider,
    tracer: SdkTracerProvider,
    meter: SdkMeterProvider,
}

impl Telemetry {
    /// Builds and registers the global subscriber. Call once, before any
    /// tracing output.
    pub async fn init() -> Result<Telemetry> {
        let Some(collector_url) = env::otel_endpoint().await? else {
            tracing_subscriber::registry()
                .with(EnvFilter::new(DEFAULT_FILTER))
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_line_number(true),
                )
                .init();

            return Ok(Self { providers: None });
        };

        let resource = base_attrs(TRACER_NAME, env!("CARGO_PKG_VERSION"));
        let providers = Providers::build(collector_url, resource)?;

        global::set_tracer_provider(providers.tracer.clone());
        let tracer = global::tracer(TRACER_NAME);

        tracing_subscriber::registry()
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .with(OpenTelemetryTracingBridge::new(&providers.logger))
            .with(tracing_opentelemetry::MetricsLayer::new(
                providers.meter.clone(),
            ))
            .with(EnvFilter::new(DEFAULT_FILTER))
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .init();

        Ok(Self {
            providers: Some(providers),
        })
    }

    pub fn shutdown(self) {
        let Some(providers) = self.providers else {
            return;
        };

        if let Err(e) = providers.meter.shutdown() {
            eprintln!("error during metering shutdown: {e:?}");
        }

        if let Err(e) = providers.logger.shutdown() {
            eprintln!("error during logging shutdown: {e:?}");
        }

        if let Err(e) = providers.tracer.shutdown() {
            eprintln!("error during tracing shutdown: {e:?}");
        }
    }
}

impl Providers {
    fn build(collector_url: &str, resource: Resource) -> Result<Self> {
        let log_exporter = opentelemetry_otlp::LogExporter::builder()
            .with_tonic()
            .with_protocol(Protocol::Grpc)
            .with_endpoint(Endpoint::Logs.to_url(collector_url))
            .with_timeout(Duration::from_secs(5))
            .build()?;

        let span_exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_protocol(Protocol::Grpc)
            .with_endpoint(Endpoint::Traces.to_url(collector_url))
            .with_timeout(Duration::from_secs(5))
            .build()?;

        let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_protocol(Protocol::Grpc)
            .with_endpoint(Endpoint::Metrics.to_url(collector_url))
            .with_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            logger: SdkLoggerProvider::builder()
                .with_batch_exporter(log_exporter)
                .with_resource(resource.clone())
                .build(),
            tracer: SdkTracerProvider::builder()
                .with_batch_exporter(span_exporter)
                .with_resource(resource.clone())
                .build(),
            meter: SdkMeterProvider::builder()
                .with_periodic_exporter(metric_exporter)
                .with_resource(resource)
                .build(),
        })
    }
}

fn base_attrs(name: &'static str, version: &'static str) -> Resource {
    Resource::builder()
        .with_attributes([
            KeyValue::new("service.name", name),
            KeyValue::new("service.version", version),
        ])
        .build()
}

enum Endpoint {
    Logs,
    Traces,
    Metrics,
}

impl Endpoint {
    pub fn to_url(&self, collector_endpoint: &str) -> String {
        let location: &str = match self {
            Endpoint::Logs => "/v1/logs",
            Endpoint::Traces => "/v1/traces",
            Endpoint::Metrics => "/v1/metrics",
        };
        format!("{collector_endpoint}{location}")
    }
}
