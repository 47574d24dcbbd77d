use clap::ValueEnum;
use opentelemetry::trace::{TraceContextExt, TraceId, TracerProvider};
use opentelemetry_otlp::WithExportConfig;
use tracing::Span;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Initialize the global tracing subscriber and, when `tracing_url` is set, an
/// OpenTelemetry OTLP pipeline sampled at `sample_ratio`.
pub async fn init(
    log_filter: &str,
    log_format: LogFormat,
    tracing_url: Option<&str>,
    sample_ratio: f64,
) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_new(log_filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer_text = (log_format == LogFormat::Text).then(tracing_subscriber::fmt::layer);
    let fmt_layer_json = (log_format == LogFormat::Json)
        .then(|| tracing_subscriber::fmt::layer().json().flatten_event(true));

    let otel_layer = if let Some(url) = tracing_url {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(url)
            .build()?;
        let sampler = opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(sample_ratio);
        let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
            .with_sampler(sampler)
            .with_batch_exporter(exporter)
            .build();
        opentelemetry::global::set_tracer_provider(provider.clone());
        let tracer = provider.tracer("tenant-router");
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    Registry::default()
        .with(env_filter)
        .with(fmt_layer_text)
        .with(fmt_layer_json)
        .with(otel_layer)
        .try_init()?;

    Ok(())
}

/// Current span's OpenTelemetry trace id, for correlating log lines with traces.
pub fn get_trace_id() -> TraceId {
    use tracing_opentelemetry::OpenTelemetrySpanExt;
    Span::current().context().span().span_context().trace_id()
}
