//! Export pipelines: the seam between the session core and the wire.
//!
//! The session core never touches OTLP directly; it drives the traits in
//! this module. [`otlp::OtlpExporterFactory`] is the production
//! implementation, [`in_memory::InMemoryExporterFactory`] the test double.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;
use thiserror::Error;

use crate::config::TelemetryConfig;

pub mod in_memory;
pub mod otlp;

/// Errors raised by pipeline operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PipelineError {
    /// The pipeline was already shut down.
    #[error("pipeline already shut down")]
    AlreadyShutdown,

    /// The operation did not finish within the given timeout.
    #[error("pipeline operation timed out after {0:?}")]
    Timeout(Duration),

    /// The underlying exporter failed.
    #[error("pipeline failure: {0}")]
    InternalFailure(String),
}

/// Builds the export pipelines a session runs on.
pub trait ExporterFactory: Send + Sync + fmt::Debug {
    /// The resource describing this service, attached to all telemetry.
    fn create_resource(&self, config: &TelemetryConfig) -> Resource;

    /// Builds the trace pipeline, or fails if the transport cannot be set up.
    fn create_trace_pipeline(
        &self,
        config: &TelemetryConfig,
        resource: Resource,
    ) -> Result<Arc<dyn TracePipeline>, PipelineError>;

    /// Builds the metric pipeline, or fails if the transport cannot be set up.
    fn create_metric_pipeline(
        &self,
        config: &TelemetryConfig,
        resource: Resource,
    ) -> Result<Arc<dyn MetricPipeline>, PipelineError>;
}

/// Span lifecycle operations backed by a tracer provider.
pub trait TracePipeline: Send + Sync {
    /// Starts a span and returns a handle the caller must eventually end.
    fn start_span(
        &self,
        name: &str,
        kind: crate::command::SpanKind,
        attributes: Vec<KeyValue>,
    ) -> Box<dyn SpanHandle>;

    fn force_flush(&self) -> Result<(), PipelineError>;

    fn shutdown(&self, timeout: Option<Duration>) -> Result<(), PipelineError>;
}

/// An open span. Dropping a handle without calling [`end`](SpanHandle::end)
/// loses the span's explicit end time.
pub trait SpanHandle: Send {
    fn add_event(&mut self, name: String, attributes: Vec<KeyValue>);

    fn set_ok(&mut self);

    fn set_error(&mut self, message: String);

    /// Records an exception event on the span, separate from its status.
    fn record_exception(&mut self, message: String);

    fn end(&mut self);
}

/// Instrument creation and flush/shutdown backed by a meter provider.
pub trait MetricPipeline: Send + Sync {
    fn create_counter(&self, name: &str) -> Arc<dyn CounterHandle>;

    fn create_gauge(&self, name: &str) -> Arc<dyn GaugeHandle>;

    fn create_histogram(&self, name: &str, unit: Option<&str>) -> Arc<dyn HistogramHandle>;

    fn force_flush(&self) -> Result<(), PipelineError>;

    fn shutdown(&self, timeout: Option<Duration>) -> Result<(), PipelineError>;
}

/// A monotonic counter instrument.
pub trait CounterHandle: Send + Sync {
    fn add(&self, value: u64, attributes: &[KeyValue]);
}

/// An up-down instrument used for gauge-like values.
pub trait GaugeHandle: Send + Sync {
    fn add(&self, value: f64, attributes: &[KeyValue]);
}

/// A histogram instrument.
pub trait HistogramHandle: Send + Sync {
    fn record(&self, value: f64, attributes: &[KeyValue]);
}
