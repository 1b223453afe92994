//! In-memory exporter factory for tests.
//!
//! Counts every interaction instead of exporting anything, and can be told
//! to fail pipeline construction or shutdown so error paths are testable
//! without a collector.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;

use crate::command::SpanKind;
use crate::config::TelemetryConfig;
use crate::export::{
    CounterHandle, ExporterFactory, GaugeHandle, HistogramHandle, MetricPipeline, PipelineError,
    SpanHandle, TracePipeline,
};

#[derive(Default)]
struct Recorded {
    trace_pipelines: AtomicUsize,
    metric_pipelines: AtomicUsize,
    counters: AtomicUsize,
    gauges: AtomicUsize,
    histograms: AtomicUsize,
    counter_adds: AtomicUsize,
    gauge_adds: AtomicUsize,
    histogram_records: AtomicUsize,
    spans_started: AtomicUsize,
    spans_ended: AtomicUsize,
    spans_failed: AtomicUsize,
    span_events: AtomicUsize,
    exceptions_recorded: AtomicUsize,
    trace_flushes: AtomicUsize,
    metric_flushes: AtomicUsize,
    trace_shutdowns: AtomicUsize,
    metric_shutdowns: AtomicUsize,
    fail_metric_pipeline: Mutex<Option<String>>,
    fail_trace_pipeline: Mutex<Option<String>>,
    fail_shutdown: Mutex<Option<String>>,
}

/// Factory producing pipelines that record interactions in memory.
#[derive(Default)]
pub struct InMemoryExporterFactory {
    recorded: Arc<Recorded>,
}

impl std::fmt::Debug for InMemoryExporterFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryExporterFactory")
            .field(
                "trace_pipelines",
                &self.recorded.trace_pipelines.load(Ordering::Relaxed),
            )
            .field(
                "metric_pipelines",
                &self.recorded.metric_pipelines.load(Ordering::Relaxed),
            )
            .finish()
    }
}

impl InMemoryExporterFactory {
    pub fn new() -> Self {
        InMemoryExporterFactory::default()
    }

    /// Makes `create_trace_pipeline` fail with the given message.
    pub fn fail_trace_pipeline(&self, message: &str) {
        if let Ok(mut slot) = self.recorded.fail_trace_pipeline.lock() {
            *slot = Some(message.to_owned());
        }
    }

    /// Makes `create_metric_pipeline` fail with the given message.
    pub fn fail_metric_pipeline(&self, message: &str) {
        if let Ok(mut slot) = self.recorded.fail_metric_pipeline.lock() {
            *slot = Some(message.to_owned());
        }
    }

    /// Makes every pipeline `shutdown` call fail with the given message.
    pub fn fail_shutdown(&self, message: &str) {
        if let Ok(mut slot) = self.recorded.fail_shutdown.lock() {
            *slot = Some(message.to_owned());
        }
    }

    pub fn trace_pipelines_created(&self) -> usize {
        self.recorded.trace_pipelines.load(Ordering::Relaxed)
    }

    pub fn metric_pipelines_created(&self) -> usize {
        self.recorded.metric_pipelines.load(Ordering::Relaxed)
    }

    pub fn counters_created(&self) -> usize {
        self.recorded.counters.load(Ordering::Relaxed)
    }

    pub fn gauges_created(&self) -> usize {
        self.recorded.gauges.load(Ordering::Relaxed)
    }

    pub fn histograms_created(&self) -> usize {
        self.recorded.histograms.load(Ordering::Relaxed)
    }

    pub fn counter_adds(&self) -> usize {
        self.recorded.counter_adds.load(Ordering::Relaxed)
    }

    pub fn gauge_adds(&self) -> usize {
        self.recorded.gauge_adds.load(Ordering::Relaxed)
    }

    pub fn histogram_records(&self) -> usize {
        self.recorded.histogram_records.load(Ordering::Relaxed)
    }

    pub fn spans_started(&self) -> usize {
        self.recorded.spans_started.load(Ordering::Relaxed)
    }

    pub fn spans_ended(&self) -> usize {
        self.recorded.spans_ended.load(Ordering::Relaxed)
    }

    pub fn spans_failed(&self) -> usize {
        self.recorded.spans_failed.load(Ordering::Relaxed)
    }

    pub fn span_events(&self) -> usize {
        self.recorded.span_events.load(Ordering::Relaxed)
    }

    pub fn exceptions_recorded(&self) -> usize {
        self.recorded.exceptions_recorded.load(Ordering::Relaxed)
    }

    pub fn trace_flushes(&self) -> usize {
        self.recorded.trace_flushes.load(Ordering::Relaxed)
    }

    pub fn metric_flushes(&self) -> usize {
        self.recorded.metric_flushes.load(Ordering::Relaxed)
    }

    pub fn trace_shutdowns(&self) -> usize {
        self.recorded.trace_shutdowns.load(Ordering::Relaxed)
    }

    pub fn metric_shutdowns(&self) -> usize {
        self.recorded.metric_shutdowns.load(Ordering::Relaxed)
    }
}

impl ExporterFactory for InMemoryExporterFactory {
    fn create_resource(&self, config: &TelemetryConfig) -> Resource {
        Resource::builder_empty()
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
        _config: &TelemetryConfig,
        _resource: Resource,
    ) -> Result<Arc<dyn TracePipeline>, PipelineError> {
        if let Ok(slot) = self.recorded.fail_trace_pipeline.lock() {
            if let Some(message) = slot.as_ref() {
                return Err(PipelineError::InternalFailure(message.clone()));
            }
        }
        self.recorded.trace_pipelines.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(InMemoryTracePipeline {
            recorded: self.recorded.clone(),
        }))
    }

    fn create_metric_pipeline(
        &self,
        _config: &TelemetryConfig,
        _resource: Resource,
    ) -> Result<Arc<dyn MetricPipeline>, PipelineError> {
        if let Ok(slot) = self.recorded.fail_metric_pipeline.lock() {
            if let Some(message) = slot.as_ref() {
                return Err(PipelineError::InternalFailure(message.clone()));
            }
        }
        self.recorded.metric_pipelines.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(InMemoryMetricPipeline {
            recorded: self.recorded.clone(),
        }))
    }
}

impl Recorded {
    fn shutdown_result(&self) -> Result<(), PipelineError> {
        if let Ok(slot) = self.fail_shutdown.lock() {
            if let Some(message) = slot.as_ref() {
                return Err(PipelineError::InternalFailure(message.clone()));
            }
        }
        Ok(())
    }
}

struct InMemoryTracePipeline {
    recorded: Arc<Recorded>,
}

impl TracePipeline for InMemoryTracePipeline {
    fn start_span(
        &self,
        _name: &str,
        _kind: SpanKind,
        _attributes: Vec<KeyValue>,
    ) -> Box<dyn SpanHandle> {
        self.recorded.spans_started.fetch_add(1, Ordering::Relaxed);
        Box::new(InMemorySpanHandle {
            recorded: self.recorded.clone(),
            failed: false,
        })
    }

    fn force_flush(&self) -> Result<(), PipelineError> {
        self.recorded.trace_flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn shutdown(&self, _timeout: Option<Duration>) -> Result<(), PipelineError> {
        self.recorded.trace_shutdowns.fetch_add(1, Ordering::Relaxed);
        self.recorded.shutdown_result()
    }
}

struct InMemorySpanHandle {
    recorded: Arc<Recorded>,
    failed: bool,
}

impl SpanHandle for InMemorySpanHandle {
    fn add_event(&mut self, _name: String, _attributes: Vec<KeyValue>) {
        self.recorded.span_events.fetch_add(1, Ordering::Relaxed);
    }

    fn set_ok(&mut self) {
        self.failed = false;
    }

    fn set_error(&mut self, _message: String) {
        self.failed = true;
    }

    fn record_exception(&mut self, _message: String) {
        self.recorded.exceptions_recorded.fetch_add(1, Ordering::Relaxed);
    }

    fn end(&mut self) {
        self.recorded.spans_ended.fetch_add(1, Ordering::Relaxed);
        if self.failed {
            self.recorded.spans_failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

struct InMemoryMetricPipeline {
    recorded: Arc<Recorded>,
}

impl MetricPipeline for InMemoryMetricPipeline {
    fn create_counter(&self, _name: &str) -> Arc<dyn CounterHandle> {
        self.recorded.counters.fetch_add(1, Ordering::Relaxed);
        Arc::new(InMemoryCounter {
            recorded: self.recorded.clone(),
        })
    }

    fn create_gauge(&self, _name: &str) -> Arc<dyn GaugeHandle> {
        self.recorded.gauges.fetch_add(1, Ordering::Relaxed);
        Arc::new(InMemoryGauge {
            recorded: self.recorded.clone(),
        })
    }

    fn create_histogram(&self, _name: &str, _unit: Option<&str>) -> Arc<dyn HistogramHandle> {
        self.recorded.histograms.fetch_add(1, Ordering::Relaxed);
        Arc::new(InMemoryHistogram {
            recorded: self.recorded.clone(),
        })
    }

    fn force_flush(&self) -> Result<(), PipelineError> {
        self.recorded.metric_flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn shutdown(&self, _timeout: Option<Duration>) -> Result<(), PipelineError> {
        self.recorded.metric_shutdowns.fetch_add(1, Ordering::Relaxed);
        self.recorded.shutdown_result()
    }
}

struct InMemoryCounter {
    recorded: Arc<Recorded>,
}

impl CounterHandle for InMemoryCounter {
    fn add(&self, _value: u64, _attributes: &[KeyValue]) {
        self.recorded.counter_adds.fetch_add(1, Ordering::Relaxed);
    }
}

struct InMemoryGauge {
    recorded: Arc<Recorded>,
}

impl GaugeHandle for InMemoryGauge {
    fn add(&self, _value: f64, _attributes: &[KeyValue]) {
        self.recorded.gauge_adds.fetch_add(1, Ordering::Relaxed);
    }
}

struct InMemoryHistogram {
    recorded: Arc<Recorded>,
}

impl HistogramHandle for InMemoryHistogram {
    fn record(&self, _value: f64, _attributes: &[KeyValue]) {
        self.recorded.histogram_records.fetch_add(1, Ordering::Relaxed);
    }
}
