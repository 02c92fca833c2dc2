use crate::logging::config::OpenTelemetryConfig;
use crate::logging::layers::BoxLayer;
use anyhow::{anyhow, Context, Result};
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::{resource::Resource, trace::SdkTracerProvider};
use tracing::Subscriber;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::registry::LookupSpan;

/// Flushes and shuts the tracer provider down when the command finishes.
pub struct OpenTelemetryGuard {
    provider: SdkTracerProvider,
}

impl Drop for OpenTelemetryGuard {
    fn drop(&mut self) {
        if let Err(err) = self.provider.force_flush() {
            eprintln!("warning: failed to flush spans: {}", err);
        }
        let _ = self.provider.shutdown();
    }
}

/// OTLP/gRPC span export for the configured endpoint.
pub fn otlp_layer<S>(config: &OpenTelemetryConfig) -> Result<(BoxLayer<S>, OpenTelemetryGuard)>
where
    S: Subscriber + for<'span> LookupSpan<'span> + Send + Sync + 'static,
{
    let endpoint = config
        .endpoint_url()
        .ok_or_else(|| anyhow!("no valid OTLP endpoint configured"))?;
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.as_str())
        .build()
        .context("failed to build OTLP exporter")?;

    let provider = SdkTracerProvider::builder()
        .with_resource(
            Resource::builder()
                .with_service_name(config.service_name.clone())
                .build(),
        )
        .with_batch_exporter(exporter)
        .build();

    let layer = OpenTelemetryLayer::new(provider.tracer("stepline"));
    Ok((Box::new(layer), OpenTelemetryGuard { provider }))
}
