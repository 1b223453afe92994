//! OTLP-backed export pipelines.
//!
//! Builds span and metric exporters over gRPC (tonic) or HTTP (protobuf
//! binary), wires authentication headers into the transport, and wraps the
//! resulting providers behind the pipeline traits.

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::metrics::{Meter, MeterProvider as _};
use opentelemetry::trace::{Span as _, SpanKind as OtelSpanKind, Status, Tracer as _, TracerProvider as _};
use opentelemetry::{otel_debug, otel_warn, InstrumentationScope, KeyValue};
use opentelemetry_otlp::{
    Compression, MetricExporter, Protocol as OtlpProtocol, SpanExporter, WithExportConfig,
    WithHttpConfig, WithTonicConfig,
};
use opentelemetry_sdk::error::OTelSdkError;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{
    BatchConfigBuilder, BatchSpanProcessor, SdkTracer, SdkTracerProvider, Span,
};
use opentelemetry_sdk::Resource;
use tonic::metadata::{Ascii, MetadataKey, MetadataMap, MetadataValue};

use crate::command::SpanKind;
use crate::config::{Protocol, TelemetryConfig};
use crate::export::{
    CounterHandle, ExporterFactory, GaugeHandle, HistogramHandle, MetricPipeline, PipelineError,
    SpanHandle, TracePipeline,
};

const SCOPE_NAME: &str = "telemetryflow";

/// Builds OTLP pipelines from a validated configuration.
#[derive(Debug, Default)]
pub struct OtlpExporterFactory;

impl OtlpExporterFactory {
    pub fn new() -> Self {
        OtlpExporterFactory
    }
}

impl ExporterFactory for OtlpExporterFactory {
    fn create_resource(&self, config: &TelemetryConfig) -> Resource {
        Resource::builder()
            .with_attributes(
                config
                    .resource_attributes()
                    .into_iter()
                    .map(|(key, value)| KeyValue::new(key, value)),
            )
            .build()
    }

    fn create_trace_pipeline(
        &self,
        config: &TelemetryConfig,
        resource: Resource,
    ) -> Result<Arc<dyn TracePipeline>, PipelineError> {
        let exporter = match config.protocol() {
            Protocol::Grpc => {
                let mut builder = SpanExporter::builder()
                    .with_tonic()
                    .with_endpoint(grpc_endpoint(config))
                    .with_timeout(config.timeout())
                    .with_metadata(auth_metadata(config));
                if config.compression() {
                    builder = builder.with_compression(Compression::Gzip);
                }
                builder.build()
            }
            Protocol::Http => SpanExporter::builder()
                .with_http()
                .with_endpoint(format!("{}/v1/traces", config.endpoint_url()))
                .with_protocol(OtlpProtocol::HttpBinary)
                .with_timeout(config.timeout())
                .with_headers(config.auth_headers())
                .build(),
        }
        .map_err(|err| PipelineError::InternalFailure(err.to_string()))?;

        let processor = BatchSpanProcessor::builder(exporter)
            .with_batch_config(
                BatchConfigBuilder::default()
                    .with_max_queue_size(config.batch_max_size())
                    .with_scheduled_delay(config.batch_timeout())
                    .build(),
            )
            .build();
        let provider = SdkTracerProvider::builder()
            .with_span_processor(processor)
            .with_resource(resource)
            .build();
        let scope = InstrumentationScope::builder(SCOPE_NAME)
            .with_version(config.service_version().to_owned())
            .build();
        let tracer = provider.tracer_with_scope(scope);

        otel_debug!(name: "telemetryflow.trace_pipeline.ready", protocol = config.protocol().to_string());
        Ok(Arc::new(OtlpTracePipeline { provider, tracer }))
    }

    fn create_metric_pipeline(
        &self,
        config: &TelemetryConfig,
        resource: Resource,
    ) -> Result<Arc<dyn MetricPipeline>, PipelineError> {
        let exporter = match config.protocol() {
            Protocol::Grpc => {
                let mut builder = MetricExporter::builder()
                    .with_tonic()
                    .with_endpoint(grpc_endpoint(config))
                    .with_timeout(config.timeout())
                    .with_metadata(auth_metadata(config));
                if config.compression() {
                    builder = builder.with_compression(Compression::Gzip);
                }
                builder.build()
            }
            Protocol::Http => MetricExporter::builder()
                .with_http()
                .with_endpoint(format!("{}/v1/metrics", config.endpoint_url()))
                .with_protocol(OtlpProtocol::HttpBinary)
                .with_timeout(config.timeout())
                .with_headers(config.auth_headers())
                .build(),
        }
        .map_err(|err| PipelineError::InternalFailure(err.to_string()))?;

        let reader = PeriodicReader::builder(exporter)
            .with_interval(config.batch_timeout())
            .build();
        let provider = SdkMeterProvider::builder()
            .with_reader(reader)
            .with_resource(resource)
            .build();
        let meter = provider.meter(SCOPE_NAME);

        otel_debug!(name: "telemetryflow.metric_pipeline.ready", protocol = config.protocol().to_string());
        Ok(Arc::new(OtlpMetricPipeline { provider, meter }))
    }
}

/// Tonic requires a scheme on the endpoint URI.
fn grpc_endpoint(config: &TelemetryConfig) -> String {
    let endpoint = config.endpoint();
    if endpoint.contains("://") {
        endpoint.to_owned()
    } else {
        let scheme = if config.insecure() { "http" } else { "https" };
        format!("{scheme}://{endpoint}")
    }
}

fn auth_metadata(config: &TelemetryConfig) -> MetadataMap {
    let mut metadata = MetadataMap::new();
    for (name, value) in config.auth_headers() {
        let lowered = name.to_lowercase();
        let key = MetadataKey::<Ascii>::from_bytes(lowered.as_bytes());
        let value = MetadataValue::try_from(value.as_str());
        match (key, value) {
            (Ok(key), Ok(value)) => {
                metadata.insert(key, value);
            }
            _ => {
                otel_warn!(name: "telemetryflow.export.invalid_header", header = lowered);
            }
        }
    }
    metadata
}

fn map_sdk_error(err: OTelSdkError) -> PipelineError {
    match err {
        OTelSdkError::AlreadyShutdown => PipelineError::AlreadyShutdown,
        OTelSdkError::Timeout(duration) => PipelineError::Timeout(duration),
        other => PipelineError::InternalFailure(other.to_string()),
    }
}

struct OtlpTracePipeline {
    provider: SdkTracerProvider,
    tracer: SdkTracer,
}

impl TracePipeline for OtlpTracePipeline {
    fn start_span(
        &self,
        name: &str,
        kind: SpanKind,
        attributes: Vec<KeyValue>,
    ) -> Box<dyn SpanHandle> {
        let span = self
            .tracer
            .span_builder(name.to_owned())
            .with_kind(otel_span_kind(kind))
            .with_attributes(attributes)
            .start(&self.tracer);
        Box::new(OtlpSpanHandle { span })
    }

    fn force_flush(&self) -> Result<(), PipelineError> {
        self.provider.force_flush().map_err(map_sdk_error)
    }

    fn shutdown(&self, _timeout: Option<Duration>) -> Result<(), PipelineError> {
        self.provider.shutdown().map_err(map_sdk_error)
    }
}

fn otel_span_kind(kind: SpanKind) -> OtelSpanKind {
    match kind {
        SpanKind::Internal => OtelSpanKind::Internal,
        SpanKind::Server => OtelSpanKind::Server,
        SpanKind::Client => OtelSpanKind::Client,
        SpanKind::Producer => OtelSpanKind::Producer,
        SpanKind::Consumer => OtelSpanKind::Consumer,
    }
}

struct OtlpSpanHandle {
    span: Span,
}

impl SpanHandle for OtlpSpanHandle {
    fn add_event(&mut self, name: String, attributes: Vec<KeyValue>) {
        self.span.add_event(name, attributes);
    }

    fn set_ok(&mut self) {
        self.span.set_status(Status::Ok);
    }

    fn set_error(&mut self, message: String) {
        self.span.set_status(Status::error(message));
    }

    fn record_exception(&mut self, message: String) {
        self.span.add_event(
            "exception",
            vec![KeyValue::new("exception.message", message)],
        );
    }

    fn end(&mut self) {
        self.span.end();
    }
}

struct OtlpMetricPipeline {
    provider: SdkMeterProvider,
    meter: Meter,
}

impl MetricPipeline for OtlpMetricPipeline {
    fn create_counter(&self, name: &str) -> Arc<dyn CounterHandle> {
        let counter = self
            .meter
            .u64_counter(name.to_owned())
            .with_description(format!("Counter for {name}"))
            .build();
        Arc::new(OtlpCounter(counter))
    }

    fn create_gauge(&self, name: &str) -> Arc<dyn GaugeHandle> {
        let gauge = self
            .meter
            .f64_up_down_counter(name.to_owned())
            .with_description(format!("Gauge for {name}"))
            .build();
        Arc::new(OtlpGauge(gauge))
    }

    fn create_histogram(&self, name: &str, unit: Option<&str>) -> Arc<dyn HistogramHandle> {
        let mut builder = self
            .meter
            .f64_histogram(name.to_owned())
            .with_description(format!("Histogram for {name}"));
        if let Some(unit) = unit {
            builder = builder.with_unit(unit.to_owned());
        }
        Arc::new(OtlpHistogram(builder.build()))
    }

    fn force_flush(&self) -> Result<(), PipelineError> {
        self.provider.force_flush().map_err(map_sdk_error)
    }

    fn shutdown(&self, _timeout: Option<Duration>) -> Result<(), PipelineError> {
        self.provider.shutdown().map_err(map_sdk_error)
    }
}

struct OtlpCounter(opentelemetry::metrics::Counter<u64>);

impl CounterHandle for OtlpCounter {
    fn add(&self, value: u64, attributes: &[KeyValue]) {
        self.0.add(value, attributes);
    }
}

struct OtlpGauge(opentelemetry::metrics::UpDownCounter<f64>);

impl GaugeHandle for OtlpGauge {
    fn add(&self, value: f64, attributes: &[KeyValue]) {
        self.0.add(value, attributes);
    }
}

struct OtlpHistogram(opentelemetry::metrics::Histogram<f64>);

impl HistogramHandle for OtlpHistogram {
    fn record(&self, value: f64, attributes: &[KeyValue]) {
        self.0.record(value, attributes);
    }
}
