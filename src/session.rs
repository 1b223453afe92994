//! Session core: the state machine behind every client.
//!
//! The core owns the export pipelines and three pieces of shared state, each
//! behind its own lock so recording never contends with lifecycle changes:
//!
//! * `lifecycle`: the [`SessionState`], the active configuration and the
//!   pipelines. Held only for state transitions and pipeline lookup.
//! * `active_spans`: span handles registered by `start_span` and consumed by
//!   `end_span`.
//! * `instruments`: per-kind caches so repeated recordings against the same
//!   metric name reuse one instrument.
//!
//! Monotonic `metrics_sent` / `logs_sent` / `spans_sent` counters are plain
//! atomics and never require a lock.
//!
//! Recording operations are deliberately forgiving: when the session is not
//! `Ready` they drop the data with a diagnostic instead of failing, so
//! instrumented code never has to care about SDK lifecycle. Lifecycle
//! operations (`initialize`, `shutdown`) report their errors.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use opentelemetry::{otel_debug, otel_info, otel_warn, KeyValue};
use thiserror::Error;

use crate::attributes::{to_key_values, AttributeMap};
use crate::command::{
    Command, CommandHandler, CommandOutput, LogRecord, SeverityLevel, SpanId, SpanKind,
};
use crate::config::{SignalType, TelemetryConfig};
use crate::export::{
    CounterHandle, ExporterFactory, GaugeHandle, HistogramHandle, MetricPipeline, PipelineError,
    SpanHandle, TracePipeline,
};
use crate::query::{Query, QueryHandler, QueryOutput, SessionStatus};

/// Lifecycle of a [`SessionCore`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No pipelines exist; recording operations are dropped.
    Uninitialized,
    /// `initialize` is building pipelines.
    Initializing,
    /// Pipelines are up; all operations are live.
    Ready,
    /// `shutdown` is flushing and tearing down pipelines.
    ShuttingDown,
}

/// Errors raised by session operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SessionError {
    /// A recording operation was issued through the strict client facade
    /// before `initialize`.
    #[error("telemetry client is not initialized; call initialize() first")]
    NotInitialized,

    /// Pipeline construction failed; the session rolled back to
    /// `Uninitialized`.
    #[error("initialization failed: {0}")]
    Initialization(PipelineError),

    /// Shutdown finished but one or more flush/shutdown steps failed.
    #[error("shutdown completed with {} error(s)", failures.len())]
    ShutdownIncomplete { failures: Vec<PipelineError> },

    /// A pipeline operation failed outside initialize/shutdown.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// A state lock was poisoned by a panicking thread.
    #[error("session state lock poisoned")]
    LockPoisoned,
}

impl<T> From<PoisonError<T>> for SessionError {
    fn from(_: PoisonError<T>) -> Self {
        SessionError::LockPoisoned
    }
}

struct Lifecycle {
    state: SessionState,
    started_at: Option<Instant>,
    config: Option<TelemetryConfig>,
    trace_pipeline: Option<Arc<dyn TracePipeline>>,
    metric_pipeline: Option<Arc<dyn MetricPipeline>>,
}

#[derive(Default)]
struct Instruments {
    counters: HashMap<String, Arc<dyn CounterHandle>>,
    gauges: HashMap<String, Arc<dyn GaugeHandle>>,
    histograms: HashMap<String, Arc<dyn HistogramHandle>>,
}

/// Owns pipelines, active spans, instrument caches and sent counters.
pub struct SessionCore {
    factory: Arc<dyn ExporterFactory>,
    lifecycle: Mutex<Lifecycle>,
    active_spans: Mutex<HashMap<SpanId, Box<dyn SpanHandle>>>,
    instruments: Mutex<Instruments>,
    metrics_sent: AtomicU64,
    logs_sent: AtomicU64,
    spans_sent: AtomicU64,
}

impl SessionCore {
    pub fn new(factory: Arc<dyn ExporterFactory>) -> Self {
        SessionCore {
            factory,
            lifecycle: Mutex::new(Lifecycle {
                state: SessionState::Uninitialized,
                started_at: None,
                config: None,
                trace_pipeline: None,
                metric_pipeline: None,
            }),
            active_spans: Mutex::new(HashMap::new()),
            instruments: Mutex::new(Instruments::default()),
            metrics_sent: AtomicU64::new(0),
            logs_sent: AtomicU64::new(0),
            spans_sent: AtomicU64::new(0),
        }
    }

    /// Builds the export pipelines for all enabled signals and moves the
    /// session to `Ready`.
    ///
    /// Idempotent: initializing an already-ready session is a no-op. On
    /// failure every pipeline built so far is torn down and the session
    /// returns to `Uninitialized`.
    pub fn initialize(&self, config: TelemetryConfig) -> Result<(), SessionError> {
        let mut lifecycle = self.lifecycle.lock()?;
        if lifecycle.state == SessionState::Ready {
            otel_debug!(name: "telemetryflow.session.already_initialized");
            return Ok(());
        }
        lifecycle.state = SessionState::Initializing;

        let resource = self.factory.create_resource(&config);

        let trace_pipeline = if config.is_signal_enabled(SignalType::Traces) {
            match self.factory.create_trace_pipeline(&config, resource.clone()) {
                Ok(pipeline) => Some(pipeline),
                Err(err) => {
                    lifecycle.state = SessionState::Uninitialized;
                    return Err(SessionError::Initialization(err));
                }
            }
        } else {
            None
        };

        let metric_pipeline = if config.is_signal_enabled(SignalType::Metrics) {
            match self.factory.create_metric_pipeline(&config, resource) {
                Ok(pipeline) => Some(pipeline),
                Err(err) => {
                    // roll back the half-built session
                    if let Some(traces) = &trace_pipeline {
                        if let Err(shutdown_err) = traces.shutdown(None) {
                            otel_warn!(
                                name: "telemetryflow.session.rollback_failed",
                                error = shutdown_err.to_string()
                            );
                        }
                    }
                    lifecycle.state = SessionState::Uninitialized;
                    return Err(SessionError::Initialization(err));
                }
            }
        } else {
            None
        };

        otel_info!(
            name: "telemetryflow.session.initialized",
            service_name = config.service_name().to_owned(),
            endpoint = config.endpoint().to_owned()
        );
        lifecycle.trace_pipeline = trace_pipeline;
        lifecycle.metric_pipeline = metric_pipeline;
        lifecycle.config = Some(config);
        lifecycle.started_at = Some(Instant::now());
        lifecycle.state = SessionState::Ready;
        Ok(())
    }

    /// Flushes and tears down all pipelines, collecting every failure.
    ///
    /// No-op unless the session is `Ready`. Active spans and cached
    /// instruments are dropped unconditionally; the session always ends up
    /// `Uninitialized`, even when some steps failed.
    pub fn shutdown(&self, timeout: Option<Duration>) -> Result<(), SessionError> {
        let (trace_pipeline, metric_pipeline) = {
            let mut lifecycle = self.lifecycle.lock()?;
            if lifecycle.state != SessionState::Ready {
                otel_debug!(name: "telemetryflow.session.shutdown_skipped");
                return Ok(());
            }
            lifecycle.state = SessionState::ShuttingDown;
            (
                lifecycle.trace_pipeline.take(),
                lifecycle.metric_pipeline.take(),
            )
        };

        let mut failures = Vec::new();
        if let Some(pipeline) = trace_pipeline {
            if let Err(err) = pipeline.force_flush() {
                failures.push(err);
            }
            if let Err(err) = pipeline.shutdown(timeout) {
                failures.push(err);
            }
        }
        if let Some(pipeline) = metric_pipeline {
            if let Err(err) = pipeline.force_flush() {
                failures.push(err);
            }
            if let Err(err) = pipeline.shutdown(timeout) {
                failures.push(err);
            }
        }

        if let Ok(mut spans) = self.active_spans.lock() {
            if !spans.is_empty() {
                otel_warn!(
                    name: "telemetryflow.session.spans_dropped_on_shutdown",
                    count = spans.len() as u64
                );
            }
            spans.clear();
        }
        if let Ok(mut instruments) = self.instruments.lock() {
            *instruments = Instruments::default();
        }

        {
            let mut lifecycle = self.lifecycle.lock()?;
            lifecycle.config = None;
            lifecycle.started_at = None;
            lifecycle.state = SessionState::Uninitialized;
        }

        if failures.is_empty() {
            otel_info!(name: "telemetryflow.session.shutdown_complete");
            Ok(())
        } else {
            Err(SessionError::ShutdownIncomplete { failures })
        }
    }

    /// Forces all pending telemetry to export now. No-op unless `Ready`.
    pub fn flush(&self) -> Result<(), SessionError> {
        let (trace_pipeline, metric_pipeline) = {
            let lifecycle = self.lifecycle.lock()?;
            if lifecycle.state != SessionState::Ready {
                return Ok(());
            }
            (
                lifecycle.trace_pipeline.clone(),
                lifecycle.metric_pipeline.clone(),
            )
        };

        if let Some(pipeline) = trace_pipeline {
            pipeline.force_flush()?;
        }
        if let Some(pipeline) = metric_pipeline {
            pipeline.force_flush()?;
        }
        Ok(())
    }

    fn trace_pipeline(&self) -> Option<Arc<dyn TracePipeline>> {
        let lifecycle = self.lifecycle.lock().ok()?;
        if lifecycle.state == SessionState::Ready {
            lifecycle.trace_pipeline.clone()
        } else {
            None
        }
    }

    fn metric_pipeline(&self) -> Option<Arc<dyn MetricPipeline>> {
        let lifecycle = self.lifecycle.lock().ok()?;
        if lifecycle.state == SessionState::Ready {
            lifecycle.metric_pipeline.clone()
        } else {
            None
        }
    }

    /// Starts a span and registers it as active.
    ///
    /// Returns `None` when the session is not ready or traces are disabled;
    /// the span is dropped silently in that case.
    pub fn start_span(
        &self,
        name: &str,
        kind: SpanKind,
        attributes: &AttributeMap,
    ) -> Option<SpanId> {
        let pipeline = self.trace_pipeline()?;
        let handle = pipeline.start_span(name, kind, to_key_values(attributes));
        let span_id = SpanId::new();
        if let Ok(mut spans) = self.active_spans.lock() {
            spans.insert(span_id, handle);
            self.spans_sent.fetch_add(1, Ordering::Relaxed);
            Some(span_id)
        } else {
            None
        }
    }

    /// Ends an active span, marking it failed when `error` is given.
    ///
    /// Unknown ids are swallowed with a diagnostic: the span may have been
    /// dropped by a concurrent shutdown, which is not the caller's fault.
    pub fn end_span(&self, span_id: SpanId, error: Option<String>) {
        let handle = match self.active_spans.lock() {
            Ok(mut spans) => spans.remove(&span_id),
            Err(_) => None,
        };
        match handle {
            Some(mut handle) => {
                match error {
                    Some(message) => {
                        handle.record_exception(message.clone());
                        handle.set_error(message);
                    }
                    None => handle.set_ok(),
                }
                handle.end();
            }
            None => {
                otel_warn!(
                    name: "telemetryflow.span.not_found",
                    span_id = span_id.to_string()
                );
            }
        }
    }

    /// Attaches an event to an active span; unknown ids are swallowed.
    pub fn add_span_event(&self, span_id: SpanId, name: String, attributes: &AttributeMap) {
        if let Ok(mut spans) = self.active_spans.lock() {
            match spans.get_mut(&span_id) {
                Some(handle) => handle.add_event(name, to_key_values(attributes)),
                None => {
                    otel_warn!(
                        name: "telemetryflow.span.not_found",
                        span_id = span_id.to_string()
                    );
                }
            }
        }
    }

    /// Increments a monotonic counter, creating the instrument on first use.
    pub fn record_counter(&self, name: &str, value: u64, attributes: &AttributeMap) {
        let Some(pipeline) = self.metric_pipeline() else {
            return;
        };
        let counter = {
            let Ok(mut instruments) = self.instruments.lock() else {
                return;
            };
            instruments
                .counters
                .entry(name.to_owned())
                .or_insert_with(|| pipeline.create_counter(name))
                .clone()
        };
        counter.add(value, &to_key_values(attributes));
        self.metrics_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Adjusts an up-down gauge, creating the instrument on first use.
    pub fn record_gauge(&self, name: &str, value: f64, attributes: &AttributeMap) {
        let Some(pipeline) = self.metric_pipeline() else {
            return;
        };
        let gauge = {
            let Ok(mut instruments) = self.instruments.lock() else {
                return;
            };
            instruments
                .gauges
                .entry(name.to_owned())
                .or_insert_with(|| pipeline.create_gauge(name))
                .clone()
        };
        gauge.add(value, &to_key_values(attributes));
        self.metrics_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a histogram observation, creating the instrument on first use.
    pub fn record_histogram(
        &self,
        name: &str,
        value: f64,
        unit: Option<&str>,
        attributes: &AttributeMap,
    ) {
        let Some(pipeline) = self.metric_pipeline() else {
            return;
        };
        let histogram = {
            let Ok(mut instruments) = self.instruments.lock() else {
                return;
            };
            instruments
                .histograms
                .entry(name.to_owned())
                .or_insert_with(|| pipeline.create_histogram(name, unit))
                .clone()
        };
        histogram.record(value, &to_key_values(attributes));
        self.metrics_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a generic metric value through a gauge instrument.
    ///
    /// Counts twice in `metrics_sent`: once for the gauge recording it
    /// delegates to, once for itself. Long-standing behavior that status
    /// consumers depend on.
    pub fn record_metric(&self, name: &str, value: f64, attributes: &AttributeMap) {
        self.record_gauge(name, value, attributes);
        self.metrics_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Emits a log record.
    ///
    /// When `span_id` names an active span the record is attached to it as a
    /// span event carrying a `log.severity` attribute; otherwise only the
    /// `logs_sent` counter advances.
    pub fn emit_log(
        &self,
        message: String,
        severity: SeverityLevel,
        attributes: &AttributeMap,
        span_id: Option<SpanId>,
    ) {
        {
            let Ok(lifecycle) = self.lifecycle.lock() else {
                return;
            };
            if lifecycle.state != SessionState::Ready {
                return;
            }
        }

        if let Some(span_id) = span_id {
            if let Ok(mut spans) = self.active_spans.lock() {
                if let Some(handle) = spans.get_mut(&span_id) {
                    let mut kvs = to_key_values(attributes);
                    kvs.push(KeyValue::new("log.severity", severity.as_str()));
                    handle.add_event(message, kvs);
                } else {
                    otel_warn!(
                        name: "telemetryflow.span.not_found",
                        span_id = span_id.to_string()
                    );
                }
            }
        }
        self.logs_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Emits a batch of log records.
    pub fn emit_batch_logs(&self, logs: Vec<LogRecord>) {
        for log in logs {
            self.emit_log(log.message, log.severity, &log.attributes, None);
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.lifecycle
            .lock()
            .map(|lifecycle| lifecycle.state == SessionState::Ready)
            .unwrap_or(false)
    }

    pub fn uptime(&self) -> Option<Duration> {
        self.lifecycle
            .lock()
            .ok()
            .and_then(|lifecycle| lifecycle.started_at.map(|t| t.elapsed()))
    }

    pub fn metrics_sent(&self) -> u64 {
        self.metrics_sent.load(Ordering::Relaxed)
    }

    pub fn logs_sent(&self) -> u64 {
        self.logs_sent.load(Ordering::Relaxed)
    }

    pub fn spans_sent(&self) -> u64 {
        self.spans_sent.load(Ordering::Relaxed)
    }

    pub fn active_span_count(&self) -> usize {
        self.active_spans.lock().map(|spans| spans.len()).unwrap_or(0)
    }

    fn status(&self) -> Result<SessionStatus, SessionError> {
        let lifecycle = self.lifecycle.lock()?;
        let (service_name, endpoint, protocol, enabled_signals) = match &lifecycle.config {
            Some(config) => (
                config.service_name().to_owned(),
                config.endpoint().to_owned(),
                config.protocol(),
                config.enabled_signals(),
            ),
            None => (
                String::new(),
                String::new(),
                crate::config::Protocol::Grpc,
                Vec::new(),
            ),
        };
        Ok(SessionStatus {
            initialized: lifecycle.state == SessionState::Ready,
            uptime_seconds: lifecycle.started_at.map(|t| t.elapsed().as_secs_f64()),
            service_name,
            endpoint,
            protocol,
            enabled_signals,
            metrics_sent: self.metrics_sent(),
            logs_sent: self.logs_sent(),
            spans_sent: self.spans_sent(),
            active_spans: self.active_span_count(),
            sdk_version: env!("CARGO_PKG_VERSION").to_owned(),
        })
    }
}

impl CommandHandler for SessionCore {
    fn handle(&self, command: Command) -> Result<CommandOutput, SessionError> {
        match command {
            Command::Initialize { config, .. } => {
                self.initialize(*config)?;
                Ok(CommandOutput::None)
            }
            Command::Shutdown { timeout, .. } => {
                self.shutdown(timeout)?;
                Ok(CommandOutput::None)
            }
            Command::Flush { .. } => {
                self.flush()?;
                Ok(CommandOutput::None)
            }
            Command::RecordMetric {
                name,
                value,
                attributes,
                ..
            } => {
                self.record_metric(&name, value, &attributes);
                Ok(CommandOutput::None)
            }
            Command::RecordCounter {
                name,
                value,
                attributes,
                ..
            } => {
                self.record_counter(&name, value, &attributes);
                Ok(CommandOutput::None)
            }
            Command::RecordGauge {
                name,
                value,
                attributes,
                ..
            } => {
                self.record_gauge(&name, value, &attributes);
                Ok(CommandOutput::None)
            }
            Command::RecordHistogram {
                name,
                value,
                unit,
                attributes,
                ..
            } => {
                self.record_histogram(&name, value, unit.as_deref(), &attributes);
                Ok(CommandOutput::None)
            }
            Command::EmitLog {
                message,
                severity,
                attributes,
                span_id,
                ..
            } => {
                self.emit_log(message, severity, &attributes, span_id);
                Ok(CommandOutput::None)
            }
            Command::EmitBatchLogs { logs, .. } => {
                self.emit_batch_logs(logs);
                Ok(CommandOutput::None)
            }
            Command::StartSpan {
                name,
                kind,
                attributes,
                ..
            } => Ok(CommandOutput::SpanStarted(
                self.start_span(&name, kind, &attributes),
            )),
            Command::EndSpan { span_id, error, .. } => {
                self.end_span(span_id, error);
                Ok(CommandOutput::None)
            }
            Command::AddSpanEvent {
                span_id,
                name,
                attributes,
                ..
            } => {
                self.add_span_event(span_id, name, &attributes);
                Ok(CommandOutput::None)
            }
        }
    }
}

impl QueryHandler for SessionCore {
    fn handle(&self, query: Query) -> Result<QueryOutput, SessionError> {
        match query {
            Query::GetSdkStatus => Ok(QueryOutput::Status(Box::new(self.status()?))),
            other => {
                otel_debug!(
                    name: "telemetryflow.query.no_local_answer",
                    kind = other.kind().to_string()
                );
                Err(SessionError::NotInitialized)
            }
        }
    }
}
