//! Read-side dispatch: queries over telemetry state.
//!
//! Queries mirror the command side: a [`Query`] value is routed through the
//! [`QueryBus`] by its [`QueryKind`]. The session core answers
//! [`Query::GetSdkStatus`] locally; the remaining kinds define the contract
//! for collector-backed read models and stay unhandled until such a backend
//! is registered.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use thiserror::Error;

use crate::attributes::AttributeMap;
use crate::command::SeverityLevel;
use crate::config::{Protocol, SignalType};
use crate::session::SessionError;

/// Aggregation applied by [`Query::AggregateMetrics`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Aggregation {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

/// Discriminant of a [`Query`], used as the routing key on the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryKind {
    GetMetric,
    AggregateMetrics,
    GetLogs,
    GetTrace,
    SearchTraces,
    GetHealth,
    GetSdkStatus,
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryKind::GetMetric => "get_metric",
            QueryKind::AggregateMetrics => "aggregate_metrics",
            QueryKind::GetLogs => "get_logs",
            QueryKind::GetTrace => "get_trace",
            QueryKind::SearchTraces => "search_traces",
            QueryKind::GetHealth => "get_health",
            QueryKind::GetSdkStatus => "get_sdk_status",
        };
        f.write_str(name)
    }
}

/// A read-only request, tagged by [`QueryKind`].
#[derive(Clone, Debug)]
pub enum Query {
    /// Raw data points for one metric in a time range.
    GetMetric {
        name: String,
        start: Option<SystemTime>,
        end: Option<SystemTime>,
    },
    /// A single aggregated value for one metric in a time range.
    AggregateMetrics {
        name: String,
        aggregation: Aggregation,
        start: Option<SystemTime>,
        end: Option<SystemTime>,
    },
    /// Log records, optionally filtered by minimum severity.
    GetLogs {
        min_severity: Option<SeverityLevel>,
        limit: usize,
        start: Option<SystemTime>,
        end: Option<SystemTime>,
    },
    /// All spans of one trace.
    GetTrace { trace_id: String },
    /// Traces matching the given filters.
    SearchTraces {
        service_name: Option<String>,
        min_duration: Option<Duration>,
        limit: usize,
    },
    /// Collector-side health.
    GetHealth,
    /// Local SDK status; answered by the session without touching the wire.
    GetSdkStatus,
}

impl Query {
    /// The routing key for this query.
    pub fn kind(&self) -> QueryKind {
        match self {
            Query::GetMetric { .. } => QueryKind::GetMetric,
            Query::AggregateMetrics { .. } => QueryKind::AggregateMetrics,
            Query::GetLogs { .. } => QueryKind::GetLogs,
            Query::GetTrace { .. } => QueryKind::GetTrace,
            Query::SearchTraces { .. } => QueryKind::SearchTraces,
            Query::GetHealth => QueryKind::GetHealth,
            Query::GetSdkStatus => QueryKind::GetSdkStatus,
        }
    }
}

/// One raw metric data point.
#[derive(Clone, Debug, Serialize)]
pub struct MetricDataPoint {
    pub value: f64,
    pub timestamp: SystemTime,
    pub attributes: AttributeMap,
}

/// Answer to [`Query::GetMetric`].
#[derive(Clone, Debug, Serialize)]
pub struct MetricQueryResult {
    pub name: String,
    pub data_points: Vec<MetricDataPoint>,
}

/// Answer to [`Query::AggregateMetrics`].
#[derive(Clone, Debug, Serialize)]
pub struct AggregatedMetricResult {
    pub name: String,
    pub value: f64,
    pub sample_count: u64,
}

/// One log record returned by [`Query::GetLogs`].
#[derive(Clone, Debug, Serialize)]
pub struct LogEntry {
    pub message: String,
    pub severity: String,
    pub timestamp: SystemTime,
    pub attributes: AttributeMap,
}

/// Summary of one span inside a trace.
#[derive(Clone, Debug, Serialize)]
pub struct SpanInfo {
    pub name: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub duration: Duration,
    pub is_error: bool,
}

/// Answer to [`Query::GetTrace`] and one element of a trace search result.
#[derive(Clone, Debug, Serialize)]
pub struct TraceQueryResult {
    pub trace_id: String,
    pub spans: Vec<SpanInfo>,
}

/// Answer to [`Query::GetHealth`].
#[derive(Clone, Debug, Serialize)]
pub struct HealthQueryResult {
    pub healthy: bool,
    pub components: HashMap<String, bool>,
}

/// Answer to [`Query::GetSdkStatus`]: a local snapshot of session state.
#[derive(Clone, Debug, Serialize)]
pub struct SessionStatus {
    pub initialized: bool,
    pub uptime_seconds: Option<f64>,
    pub service_name: String,
    pub endpoint: String,
    pub protocol: Protocol,
    pub enabled_signals: Vec<SignalType>,
    pub metrics_sent: u64,
    pub logs_sent: u64,
    pub spans_sent: u64,
    pub active_spans: usize,
    pub sdk_version: String,
}

/// Result of a successfully handled query.
#[derive(Clone, Debug)]
pub enum QueryOutput {
    Metric(MetricQueryResult),
    Aggregated(AggregatedMetricResult),
    Logs(Vec<LogEntry>),
    Trace(TraceQueryResult),
    Traces(Vec<TraceQueryResult>),
    Health(HealthQueryResult),
    Status(Box<SessionStatus>),
}

/// Errors surfaced by [`QueryBus::dispatch`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum QueryError {
    /// No handler is registered for the query's kind.
    #[error("no handler registered for query '{0}'")]
    Unhandled(QueryKind),

    /// The handler failed while answering the query.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Answers queries of the kinds it was registered for.
pub trait QueryHandler: Send + Sync {
    fn handle(&self, query: Query) -> Result<QueryOutput, SessionError>;
}

/// Routes queries to registered handlers by kind.
///
/// Registration is last-wins, like the command bus.
#[derive(Default)]
pub struct QueryBus {
    handlers: HashMap<QueryKind, Arc<dyn QueryHandler>>,
}

impl QueryBus {
    pub fn new() -> Self {
        QueryBus::default()
    }

    /// Registers `handler` for `kind`, replacing any previous registration.
    pub fn register(&mut self, kind: QueryKind, handler: Arc<dyn QueryHandler>) {
        self.handlers.insert(kind, handler);
    }

    /// Routes `query` to its handler.
    pub fn dispatch(&self, query: Query) -> Result<QueryOutput, QueryError> {
        let handler = self
            .handlers
            .get(&query.kind())
            .ok_or_else(|| QueryError::Unhandled(query.kind()))?;
        Ok(handler.handle(query)?)
    }
}
