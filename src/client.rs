//! The public client facade.
//!
//! [`TelemetryClient`] wires a [`SessionCore`] to a command and a query bus
//! and exposes ergonomic methods on top. Unlike the forgiving core, the
//! facade is strict: recording through a client that was never initialized
//! returns [`SessionError::NotInitialized`] instead of dropping data, so
//! misuse shows up at the call site.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::attributes::AttributeMap;
use crate::command::{
    Command, CommandBus, CommandKind, CommandOutput, DispatchError, LogRecord, SeverityLevel,
    SpanId, SpanKind,
};
use crate::config::TelemetryConfig;
use crate::export::ExporterFactory;
use crate::query::{Query, QueryBus, QueryError, QueryKind, QueryOutput, SessionStatus};
use crate::session::{SessionCore, SessionError};

const ALL_COMMAND_KINDS: [CommandKind; 12] = [
    CommandKind::Initialize,
    CommandKind::Shutdown,
    CommandKind::Flush,
    CommandKind::RecordMetric,
    CommandKind::RecordCounter,
    CommandKind::RecordGauge,
    CommandKind::RecordHistogram,
    CommandKind::EmitLog,
    CommandKind::EmitBatchLogs,
    CommandKind::StartSpan,
    CommandKind::EndSpan,
    CommandKind::AddSpanEvent,
];

/// Client for recording metrics, logs and spans against one collector.
///
/// Created through the [`TelemetryBuilder`](crate::TelemetryBuilder). All
/// methods take `&self`; the client is `Send + Sync` and meant to be shared
/// across threads behind an `Arc` or by reference.
pub struct TelemetryClient {
    config: TelemetryConfig,
    core: Arc<SessionCore>,
    commands: CommandBus,
    queries: QueryBus,
}

impl TelemetryClient {
    pub(crate) fn new(config: TelemetryConfig, factory: Arc<dyn ExporterFactory>) -> Self {
        let core = Arc::new(SessionCore::new(factory));
        let mut commands = CommandBus::new();
        for kind in ALL_COMMAND_KINDS {
            commands.register(kind, core.clone());
        }
        let mut queries = QueryBus::new();
        queries.register(QueryKind::GetSdkStatus, core.clone());
        TelemetryClient {
            config,
            core,
            commands,
            queries,
        }
    }

    /// The validated configuration this client runs on.
    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// Whether the session is ready to record.
    pub fn is_initialized(&self) -> bool {
        self.core.is_initialized()
    }

    /// Builds the export pipelines. Must be called before recording.
    pub fn initialize(&self) -> Result<(), DispatchError> {
        self.commands.dispatch(Command::Initialize {
            config: Box::new(self.config.clone()),
            timestamp: SystemTime::now(),
        })?;
        Ok(())
    }

    /// Flushes and tears down all pipelines, aggregating every failure.
    pub fn shutdown(&self, timeout: Option<Duration>) -> Result<(), DispatchError> {
        self.commands.dispatch(Command::Shutdown {
            timeout,
            timestamp: SystemTime::now(),
        })?;
        Ok(())
    }

    /// Forces all pending telemetry to export now.
    pub fn flush(&self) -> Result<(), DispatchError> {
        self.ensure_initialized()?;
        self.commands.dispatch(Command::Flush {
            timestamp: SystemTime::now(),
        })?;
        Ok(())
    }

    /// Records a generic metric value.
    pub fn record_metric(
        &self,
        name: &str,
        value: f64,
        attributes: AttributeMap,
    ) -> Result<(), DispatchError> {
        self.ensure_initialized()?;
        self.commands.dispatch(Command::RecordMetric {
            name: name.to_owned(),
            value,
            attributes,
            timestamp: SystemTime::now(),
        })?;
        Ok(())
    }

    /// Increments a monotonic counter.
    pub fn increment_counter(
        &self,
        name: &str,
        value: u64,
        attributes: AttributeMap,
    ) -> Result<(), DispatchError> {
        self.ensure_initialized()?;
        self.commands.dispatch(Command::RecordCounter {
            name: name.to_owned(),
            value,
            attributes,
            timestamp: SystemTime::now(),
        })?;
        Ok(())
    }

    /// Adjusts an up-down gauge.
    pub fn record_gauge(
        &self,
        name: &str,
        value: f64,
        attributes: AttributeMap,
    ) -> Result<(), DispatchError> {
        self.ensure_initialized()?;
        self.commands.dispatch(Command::RecordGauge {
            name: name.to_owned(),
            value,
            attributes,
            timestamp: SystemTime::now(),
        })?;
        Ok(())
    }

    /// Records a histogram observation.
    pub fn record_histogram(
        &self,
        name: &str,
        value: f64,
        unit: Option<&str>,
        attributes: AttributeMap,
    ) -> Result<(), DispatchError> {
        self.ensure_initialized()?;
        self.commands.dispatch(Command::RecordHistogram {
            name: name.to_owned(),
            value,
            unit: unit.map(str::to_owned),
            attributes,
            timestamp: SystemTime::now(),
        })?;
        Ok(())
    }

    /// Emits a log record, optionally attached to an active span.
    pub fn log(
        &self,
        message: &str,
        severity: SeverityLevel,
        attributes: AttributeMap,
        span_id: Option<SpanId>,
    ) -> Result<(), DispatchError> {
        self.ensure_initialized()?;
        self.commands.dispatch(Command::EmitLog {
            message: message.to_owned(),
            severity,
            attributes,
            span_id,
            timestamp: SystemTime::now(),
        })?;
        Ok(())
    }

    /// Emits a batch of log records.
    pub fn log_batch(&self, logs: Vec<LogRecord>) -> Result<(), DispatchError> {
        self.ensure_initialized()?;
        self.commands.dispatch(Command::EmitBatchLogs {
            logs,
            timestamp: SystemTime::now(),
        })?;
        Ok(())
    }

    /// Emits a debug-level log record.
    pub fn log_debug(&self, message: &str) -> Result<(), DispatchError> {
        self.log(message, SeverityLevel::Debug, AttributeMap::new(), None)
    }

    /// Emits an info-level log record.
    pub fn log_info(&self, message: &str) -> Result<(), DispatchError> {
        self.log(message, SeverityLevel::Info, AttributeMap::new(), None)
    }

    /// Emits a warn-level log record.
    pub fn log_warn(&self, message: &str) -> Result<(), DispatchError> {
        self.log(message, SeverityLevel::Warn, AttributeMap::new(), None)
    }

    /// Emits an error-level log record.
    pub fn log_error(&self, message: &str) -> Result<(), DispatchError> {
        self.log(message, SeverityLevel::Error, AttributeMap::new(), None)
    }

    /// Starts a span and returns a guard that ends it on drop.
    ///
    /// The guard's span id is `None` when the traces signal is disabled; all
    /// guard operations become no-ops in that case.
    pub fn start_span(
        &self,
        name: &str,
        kind: SpanKind,
        attributes: AttributeMap,
    ) -> Result<SpanGuard<'_>, DispatchError> {
        self.ensure_initialized()?;
        let output = self.commands.dispatch(Command::StartSpan {
            name: name.to_owned(),
            kind,
            attributes,
            timestamp: SystemTime::now(),
        })?;
        let span_id = match output {
            CommandOutput::SpanStarted(span_id) => span_id,
            _ => None,
        };
        Ok(SpanGuard {
            client: self,
            span_id,
            error: None,
            ended: false,
        })
    }

    /// Local SDK status: configured identity plus live counters.
    pub fn status(&self) -> Result<SessionStatus, QueryError> {
        match self.queries.dispatch(Query::GetSdkStatus)? {
            QueryOutput::Status(status) => {
                let mut status = *status;
                // identity fields come from the client's own config so the
                // answer is stable even after shutdown clears the session
                status.service_name = self.config.service_name().to_owned();
                status.endpoint = self.config.endpoint().to_owned();
                status.protocol = self.config.protocol();
                status.enabled_signals = self.config.enabled_signals();
                Ok(status)
            }
            other => Err(QueryError::Session(SessionError::Pipeline(
                crate::export::PipelineError::InternalFailure(format!(
                    "unexpected status output: {other:?}"
                )),
            ))),
        }
    }

    fn ensure_initialized(&self) -> Result<(), DispatchError> {
        if self.core.is_initialized() {
            Ok(())
        } else {
            Err(SessionError::NotInitialized.into())
        }
    }
}

/// RAII guard for an active span.
///
/// Ends the span when dropped, carrying any error recorded through
/// [`fail`](SpanGuard::fail). Call [`end`](SpanGuard::end) to end it
/// explicitly and observe dispatch errors.
pub struct SpanGuard<'a> {
    client: &'a TelemetryClient,
    span_id: Option<SpanId>,
    error: Option<String>,
    ended: bool,
}

impl SpanGuard<'_> {
    /// The span's id, or `None` when tracing is disabled.
    pub fn id(&self) -> Option<SpanId> {
        self.span_id
    }

    /// Attaches an event to the span.
    pub fn add_event(&self, name: &str, attributes: AttributeMap) -> Result<(), DispatchError> {
        let Some(span_id) = self.span_id else {
            return Ok(());
        };
        self.client.commands.dispatch(Command::AddSpanEvent {
            span_id,
            name: name.to_owned(),
            attributes,
            timestamp: SystemTime::now(),
        })?;
        Ok(())
    }

    /// Marks the span as failed; the message is recorded when it ends.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    /// Ends the span now.
    pub fn end(mut self) -> Result<(), DispatchError> {
        self.ended = true;
        let Some(span_id) = self.span_id else {
            return Ok(());
        };
        self.client.commands.dispatch(Command::EndSpan {
            span_id,
            error: self.error.take(),
            timestamp: SystemTime::now(),
        })?;
        Ok(())
    }
}

impl Drop for SpanGuard<'_> {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        if let Some(span_id) = self.span_id {
            // dispatch failures cannot surface from a destructor
            let _ = self.client.commands.dispatch(Command::EndSpan {
                span_id,
                error: self.error.take(),
                timestamp: SystemTime::now(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::TelemetryBuilder;
    use crate::export::in_memory::InMemoryExporterFactory;

    fn test_client(factory: Arc<InMemoryExporterFactory>) -> TelemetryClient {
        TelemetryBuilder::new()
            .with_api_key("tfk_test", "tfs_test")
            .with_endpoint("collector.example.com:4317")
            .with_service("test-service", None)
            .with_exporter_factory(factory)
            .build()
            .unwrap()
    }

    #[test]
    fn recording_before_initialize_is_an_error() {
        let client = test_client(Arc::new(InMemoryExporterFactory::new()));
        let err = client
            .increment_counter("requests", 1, AttributeMap::new())
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Session(SessionError::NotInitialized)
        ));

        assert!(client.log_info("hello").is_err());
        assert!(client.flush().is_err());
        assert!(client
            .start_span("op", SpanKind::Internal, AttributeMap::new())
            .is_err());
    }

    #[test]
    fn span_guard_ends_span_on_drop() {
        let factory = Arc::new(InMemoryExporterFactory::new());
        let client = test_client(factory.clone());
        client.initialize().unwrap();

        {
            let span = client
                .start_span("op", SpanKind::Internal, AttributeMap::new())
                .unwrap();
            assert!(span.id().is_some());
            assert_eq!(factory.spans_ended(), 0);
        }
        assert_eq!(factory.spans_ended(), 1);
        assert_eq!(factory.spans_failed(), 0);
    }

    #[test]
    fn span_guard_fail_marks_error_status() {
        let factory = Arc::new(InMemoryExporterFactory::new());
        let client = test_client(factory.clone());
        client.initialize().unwrap();

        let mut span = client
            .start_span("op", SpanKind::Client, AttributeMap::new())
            .unwrap();
        span.fail("connection refused");
        span.end().unwrap();
        assert_eq!(factory.spans_failed(), 1);
    }

    #[test]
    fn span_guard_explicit_end_prevents_double_end() {
        let factory = Arc::new(InMemoryExporterFactory::new());
        let client = test_client(factory.clone());
        client.initialize().unwrap();

        let span = client
            .start_span("op", SpanKind::Internal, AttributeMap::new())
            .unwrap();
        span.end().unwrap();
        assert_eq!(factory.spans_ended(), 1);
    }

    #[test]
    fn disabled_traces_yield_inert_guards() {
        let factory = Arc::new(InMemoryExporterFactory::new());
        let client = TelemetryBuilder::new()
            .with_api_key("tfk_test", "tfs_test")
            .with_endpoint("collector.example.com:4317")
            .with_service("test-service", None)
            .with_signals(true, true, false)
            .with_exporter_factory(factory.clone())
            .build()
            .unwrap();
        client.initialize().unwrap();

        let span = client
            .start_span("op", SpanKind::Internal, AttributeMap::new())
            .unwrap();
        assert!(span.id().is_none());
        span.add_event("ignored", AttributeMap::new()).unwrap();
        span.end().unwrap();
        assert_eq!(factory.spans_started(), 0);
    }

    #[test]
    fn status_keeps_identity_after_shutdown() {
        let factory = Arc::new(InMemoryExporterFactory::new());
        let client = test_client(factory);
        client.initialize().unwrap();
        client
            .increment_counter("requests", 1, AttributeMap::new())
            .unwrap();
        client.shutdown(None).unwrap();

        let status = client.status().unwrap();
        assert!(!status.initialized);
        assert_eq!(status.service_name, "test-service");
        assert_eq!(status.endpoint, "collector.example.com:4317");
        assert_eq!(status.metrics_sent, 1);
        assert_eq!(status.sdk_version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn log_helpers_advance_counter() {
        let factory = Arc::new(InMemoryExporterFactory::new());
        let client = test_client(factory);
        client.initialize().unwrap();

        client.log_debug("d").unwrap();
        client.log_info("i").unwrap();
        client.log_warn("w").unwrap();
        client.log_error("e").unwrap();
        client
            .log_batch(vec![LogRecord {
                message: "b".to_owned(),
                severity: SeverityLevel::Info,
                attributes: AttributeMap::new(),
            }])
            .unwrap();

        assert_eq!(client.status().unwrap().logs_sent, 5);
    }
}
