//! Write-side dispatch: commands that mutate telemetry state.
//!
//! Every state-changing operation of the SDK is expressed as a [`Command`]
//! value and routed through the [`CommandBus`] to whichever handler is
//! registered for its [`CommandKind`]. Commands carry everything the handler
//! needs; they are validated before dispatch so handlers only ever see
//! well-formed input.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use thiserror::Error;
use uuid::Uuid;

use crate::attributes::AttributeMap;
use crate::config::TelemetryConfig;
use crate::session::SessionError;

/// Opaque identifier for an active span, handed out by
/// [`Command::StartSpan`] and required to end the span later.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SpanId(Uuid);

impl SpanId {
    pub(crate) fn new() -> Self {
        SpanId(Uuid::new_v4())
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The role a span plays in a trace.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SpanKind {
    /// Internal operation (default).
    #[default]
    Internal,
    /// Handles an inbound request.
    Server,
    /// Issues an outbound request.
    Client,
    /// Produces a message for asynchronous consumption.
    Producer,
    /// Consumes an asynchronously produced message.
    Consumer,
}

/// Log record severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SeverityLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl SeverityLevel {
    /// Canonical lowercase name, as attached to emitted log events.
    pub fn as_str(&self) -> &'static str {
        match self {
            SeverityLevel::Trace => "trace",
            SeverityLevel::Debug => "debug",
            SeverityLevel::Info => "info",
            SeverityLevel::Warn => "warn",
            SeverityLevel::Error => "error",
            SeverityLevel::Fatal => "fatal",
        }
    }
}

impl fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single log record inside an [`Command::EmitBatchLogs`] payload.
#[derive(Clone, Debug)]
pub struct LogRecord {
    pub message: String,
    pub severity: SeverityLevel,
    pub attributes: AttributeMap,
}

/// A command was constructed without a required field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{command} command is missing required field '{field}'")]
pub struct CommandError {
    command: CommandKind,
    field: &'static str,
}

/// Discriminant of a [`Command`], used as the routing key on the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Initialize,
    Shutdown,
    Flush,
    RecordMetric,
    RecordCounter,
    RecordGauge,
    RecordHistogram,
    EmitLog,
    EmitBatchLogs,
    StartSpan,
    EndSpan,
    AddSpanEvent,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandKind::Initialize => "initialize",
            CommandKind::Shutdown => "shutdown",
            CommandKind::Flush => "flush",
            CommandKind::RecordMetric => "record_metric",
            CommandKind::RecordCounter => "record_counter",
            CommandKind::RecordGauge => "record_gauge",
            CommandKind::RecordHistogram => "record_histogram",
            CommandKind::EmitLog => "emit_log",
            CommandKind::EmitBatchLogs => "emit_batch_logs",
            CommandKind::StartSpan => "start_span",
            CommandKind::EndSpan => "end_span",
            CommandKind::AddSpanEvent => "add_span_event",
        };
        f.write_str(name)
    }
}

/// A state-changing operation, tagged by [`CommandKind`].
///
/// Each variant carries the timestamp at which the caller issued it, so
/// handlers and future transports can preserve ordering information.
#[derive(Clone, Debug)]
pub enum Command {
    /// Builds the export pipelines and moves the session to `Ready`.
    Initialize {
        config: Box<TelemetryConfig>,
        timestamp: SystemTime,
    },
    /// Flushes and tears down all pipelines.
    Shutdown {
        timeout: Option<Duration>,
        timestamp: SystemTime,
    },
    /// Forces all pending telemetry to export now.
    Flush { timestamp: SystemTime },
    /// Records a generic metric value (delegates to a gauge instrument).
    RecordMetric {
        name: String,
        value: f64,
        attributes: AttributeMap,
        timestamp: SystemTime,
    },
    /// Increments a monotonic counter.
    RecordCounter {
        name: String,
        value: u64,
        attributes: AttributeMap,
        timestamp: SystemTime,
    },
    /// Adjusts an up-down gauge.
    RecordGauge {
        name: String,
        value: f64,
        attributes: AttributeMap,
        timestamp: SystemTime,
    },
    /// Records a histogram observation.
    RecordHistogram {
        name: String,
        value: f64,
        unit: Option<String>,
        attributes: AttributeMap,
        timestamp: SystemTime,
    },
    /// Emits a single log record, optionally attached to an active span.
    EmitLog {
        message: String,
        severity: SeverityLevel,
        attributes: AttributeMap,
        span_id: Option<SpanId>,
        timestamp: SystemTime,
    },
    /// Emits a batch of log records.
    EmitBatchLogs {
        logs: Vec<LogRecord>,
        timestamp: SystemTime,
    },
    /// Starts a span and registers it as active.
    StartSpan {
        name: String,
        kind: SpanKind,
        attributes: AttributeMap,
        timestamp: SystemTime,
    },
    /// Ends an active span, recording an error status if one is given.
    EndSpan {
        span_id: SpanId,
        error: Option<String>,
        timestamp: SystemTime,
    },
    /// Attaches an event to an active span.
    AddSpanEvent {
        span_id: SpanId,
        name: String,
        attributes: AttributeMap,
        timestamp: SystemTime,
    },
}

impl Command {
    /// The routing key for this command.
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Initialize { .. } => CommandKind::Initialize,
            Command::Shutdown { .. } => CommandKind::Shutdown,
            Command::Flush { .. } => CommandKind::Flush,
            Command::RecordMetric { .. } => CommandKind::RecordMetric,
            Command::RecordCounter { .. } => CommandKind::RecordCounter,
            Command::RecordGauge { .. } => CommandKind::RecordGauge,
            Command::RecordHistogram { .. } => CommandKind::RecordHistogram,
            Command::EmitLog { .. } => CommandKind::EmitLog,
            Command::EmitBatchLogs { .. } => CommandKind::EmitBatchLogs,
            Command::StartSpan { .. } => CommandKind::StartSpan,
            Command::EndSpan { .. } => CommandKind::EndSpan,
            Command::AddSpanEvent { .. } => CommandKind::AddSpanEvent,
        }
    }

    /// Checks required fields, returning the first violation found.
    pub fn validate(&self) -> Result<(), CommandError> {
        let missing = |field| CommandError {
            command: self.kind(),
            field,
        };
        match self {
            Command::RecordMetric { name, .. }
            | Command::RecordCounter { name, .. }
            | Command::RecordGauge { name, .. }
            | Command::RecordHistogram { name, .. } => {
                if name.is_empty() {
                    return Err(missing("name"));
                }
            }
            Command::EmitLog { message, .. } => {
                if message.is_empty() {
                    return Err(missing("message"));
                }
            }
            Command::EmitBatchLogs { logs, .. } => {
                if logs.iter().any(|log| log.message.is_empty()) {
                    return Err(missing("message"));
                }
            }
            Command::StartSpan { name, .. } | Command::AddSpanEvent { name, .. } => {
                if name.is_empty() {
                    return Err(missing("name"));
                }
            }
            Command::Initialize { .. }
            | Command::Shutdown { .. }
            | Command::Flush { .. }
            | Command::EndSpan { .. } => {}
        }
        Ok(())
    }
}

/// Result of a successfully handled command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandOutput {
    /// The command produced no value.
    None,
    /// A span was started; `None` means the command was dropped because the
    /// session is not ready.
    SpanStarted(Option<SpanId>),
}

/// Errors surfaced by [`CommandBus::dispatch`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DispatchError {
    /// No handler is registered for the command's kind.
    #[error("no handler registered for command '{0}'")]
    Unhandled(CommandKind),

    /// The command failed field validation.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The handler failed while executing the command.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Executes commands of the kinds it was registered for.
pub trait CommandHandler: Send + Sync {
    fn handle(&self, command: Command) -> Result<CommandOutput, SessionError>;
}

/// Routes commands to registered handlers by kind.
///
/// Registration is last-wins: registering a second handler for a kind
/// silently replaces the first.
#[derive(Default)]
pub struct CommandBus {
    handlers: HashMap<CommandKind, Arc<dyn CommandHandler>>,
}

impl CommandBus {
    pub fn new() -> Self {
        CommandBus::default()
    }

    /// Registers `handler` for `kind`, replacing any previous registration.
    pub fn register(&mut self, kind: CommandKind, handler: Arc<dyn CommandHandler>) {
        self.handlers.insert(kind, handler);
    }

    /// Validates `command` and routes it to its handler.
    pub fn dispatch(&self, command: Command) -> Result<CommandOutput, DispatchError> {
        command.validate()?;
        let handler = self
            .handlers
            .get(&command.kind())
            .ok_or_else(|| DispatchError::Unhandled(command.kind()))?;
        Ok(handler.handle(command)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler(AtomicUsize);

    impl CommandHandler for CountingHandler {
        fn handle(&self, _command: Command) -> Result<CommandOutput, SessionError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(CommandOutput::None)
        }
    }

    fn flush() -> Command {
        Command::Flush {
            timestamp: SystemTime::now(),
        }
    }

    #[test]
    fn dispatch_routes_to_registered_handler() {
        let mut bus = CommandBus::new();
        let handler = Arc::new(CountingHandler(AtomicUsize::new(0)));
        bus.register(CommandKind::Flush, handler.clone());

        let output = bus.dispatch(flush()).unwrap();
        assert_eq!(output, CommandOutput::None);
        assert_eq!(handler.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_rejects_unhandled_kinds() {
        let bus = CommandBus::new();
        let err = bus.dispatch(flush()).unwrap_err();
        assert!(matches!(err, DispatchError::Unhandled(CommandKind::Flush)));
        assert!(err.to_string().contains("flush"));
    }

    #[test]
    fn registration_is_last_wins() {
        let mut bus = CommandBus::new();
        let first = Arc::new(CountingHandler(AtomicUsize::new(0)));
        let second = Arc::new(CountingHandler(AtomicUsize::new(0)));
        bus.register(CommandKind::Flush, first.clone());
        bus.register(CommandKind::Flush, second.clone());

        bus.dispatch(flush()).unwrap();
        assert_eq!(first.0.load(Ordering::SeqCst), 0);
        assert_eq!(second.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn validation_rejects_empty_metric_name() {
        let command = Command::RecordCounter {
            name: String::new(),
            value: 1,
            attributes: AttributeMap::new(),
            timestamp: SystemTime::now(),
        };
        let err = command.validate().unwrap_err();
        assert!(err.to_string().contains("record_counter"));
        assert!(err.to_string().contains("'name'"));
    }

    #[test]
    fn validation_rejects_empty_log_message_in_batch() {
        let command = Command::EmitBatchLogs {
            logs: vec![
                LogRecord {
                    message: "ok".to_owned(),
                    severity: SeverityLevel::Info,
                    attributes: AttributeMap::new(),
                },
                LogRecord {
                    message: String::new(),
                    severity: SeverityLevel::Info,
                    attributes: AttributeMap::new(),
                },
            ],
            timestamp: SystemTime::now(),
        };
        assert!(command.validate().is_err());
    }

    #[test]
    fn span_ids_are_unique() {
        let a = SpanId::new();
        let b = SpanId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn severity_levels_are_ordered() {
        assert!(SeverityLevel::Trace < SeverityLevel::Debug);
        assert!(SeverityLevel::Error < SeverityLevel::Fatal);
        assert_eq!(SeverityLevel::Warn.as_str(), "warn");
    }
}
