//! Aggregate root for SDK configuration.
//!
//! A [`TelemetryConfig`] is produced once by the
//! [`TelemetryBuilder`](crate::TelemetryBuilder), validated in full at
//! construction, and owned exclusively by the session that consumes it.
//! Every constructed config is valid: violations are collected and reported
//! together in a single [`ConfigError`] rather than one at a time.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::credentials::Credentials;

/// OTLP transport protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// OTLP over gRPC (default).
    Grpc,
    /// OTLP over HTTP with protobuf encoding.
    Http,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Grpc => f.write_str("grpc"),
            Protocol::Http => f.write_str("http"),
        }
    }
}

/// A telemetry signal that can be enabled or disabled independently.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    /// Metric instruments (counters, gauges, histograms).
    Metrics,
    /// Log records.
    Logs,
    /// Trace spans.
    Traces,
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalType::Metrics => f.write_str("metrics"),
            SignalType::Logs => f.write_str("logs"),
            SignalType::Traces => f.write_str("traces"),
        }
    }
}

/// One or more configuration fields failed validation.
///
/// All violations found during construction are aggregated into a single
/// error, joined by `"; "`, so a caller sees every problem at once.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid configuration: {}", violations.join("; "))]
pub struct ConfigError {
    violations: Vec<String>,
}

impl ConfigError {
    pub(crate) fn new(violations: Vec<String>) -> Self {
        ConfigError { violations }
    }

    /// The individual violation messages.
    pub fn violations(&self) -> &[String] {
        &self.violations
    }
}

/// Aggregate root holding all connection, signal, retry and batch settings.
///
/// Immutable after construction; use the builder to derive a new config.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    // Required
    pub(crate) credentials: Credentials,
    pub(crate) endpoint: String,
    pub(crate) service_name: String,

    // Connection
    pub(crate) protocol: Protocol,
    pub(crate) insecure: bool,
    pub(crate) timeout: Duration,
    pub(crate) compression: bool,

    // Retry
    pub(crate) retry_enabled: bool,
    pub(crate) max_retries: u32,
    pub(crate) retry_backoff: Duration,

    // Signals
    pub(crate) enable_metrics: bool,
    pub(crate) enable_logs: bool,
    pub(crate) enable_traces: bool,
    pub(crate) exemplars_enabled: bool,

    // Resource
    pub(crate) service_version: String,
    pub(crate) service_namespace: String,
    pub(crate) environment: String,
    pub(crate) custom_attributes: HashMap<String, String>,

    // Batching
    pub(crate) batch_timeout: Duration,
    pub(crate) batch_max_size: usize,

    // Advanced
    pub(crate) collector_id: Option<String>,
    pub(crate) rate_limit: u32,
}

impl TelemetryConfig {
    /// Validates the assembled fields, collecting every violation.
    pub(crate) fn validate(self) -> Result<Self, ConfigError> {
        let mut violations = Vec::new();

        if self.endpoint.is_empty() {
            violations.push("Endpoint is required".to_owned());
        }
        if self.service_name.is_empty() {
            violations.push("Service name is required".to_owned());
        }
        if self.timeout.is_zero() {
            violations.push("Timeout must be positive".to_owned());
        }
        if self.batch_max_size == 0 {
            violations.push("Batch max size must be positive".to_owned());
        }
        if self.rate_limit == 0 {
            violations.push("Rate limit must be positive".to_owned());
        }

        if violations.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::new(violations))
        }
    }

    /// The configured credentials.
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// The collector endpoint as configured (`host:port`).
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The service name attached to all emitted telemetry.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// The service version resource attribute.
    pub fn service_version(&self) -> &str {
        &self.service_version
    }

    /// The configured transport protocol.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Whether TLS verification is disabled.
    pub fn insecure(&self) -> bool {
        self.insecure
    }

    /// Export timeout passed through to the transport.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether gzip compression is requested.
    pub fn compression(&self) -> bool {
        self.compression
    }

    /// Batch export interval.
    pub fn batch_timeout(&self) -> Duration {
        self.batch_timeout
    }

    /// Maximum batch queue size.
    pub fn batch_max_size(&self) -> usize {
        self.batch_max_size
    }

    /// The full endpoint URL for the configured protocol.
    ///
    /// HTTP endpoints are prefixed with `http://` or `https://` depending on
    /// the insecure flag; gRPC endpoints are returned unchanged.
    pub fn endpoint_url(&self) -> String {
        match self.protocol {
            Protocol::Http => {
                let scheme = if self.insecure { "http" } else { "https" };
                format!("{scheme}://{}", self.endpoint)
            }
            Protocol::Grpc => self.endpoint.clone(),
        }
    }

    /// The ordered subset of signals currently enabled.
    pub fn enabled_signals(&self) -> Vec<SignalType> {
        let mut signals = Vec::with_capacity(3);
        if self.enable_metrics {
            signals.push(SignalType::Metrics);
        }
        if self.enable_logs {
            signals.push(SignalType::Logs);
        }
        if self.enable_traces {
            signals.push(SignalType::Traces);
        }
        signals
    }

    /// Whether a specific signal is enabled.
    pub fn is_signal_enabled(&self, signal: SignalType) -> bool {
        match signal {
            SignalType::Metrics => self.enable_metrics,
            SignalType::Logs => self.enable_logs,
            SignalType::Traces => self.enable_traces,
        }
    }

    /// Resource attributes for all telemetry emitted by the session.
    ///
    /// Fixed service/environment keys are merged with user-supplied custom
    /// attributes; a custom attribute under the same key wins.
    pub fn resource_attributes(&self) -> HashMap<String, String> {
        let mut attrs = HashMap::from([
            ("service.name".to_owned(), self.service_name.clone()),
            ("service.version".to_owned(), self.service_version.clone()),
            (
                "service.namespace".to_owned(),
                self.service_namespace.clone(),
            ),
            (
                "deployment.environment".to_owned(),
                self.environment.clone(),
            ),
        ]);
        attrs.extend(
            self.custom_attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        attrs
    }

    /// Authentication headers, including the collector id header if set.
    pub fn auth_headers(&self) -> HashMap<String, String> {
        let mut headers = self.credentials.auth_headers();
        if let Some(collector_id) = &self.collector_id {
            headers.insert(
                "X-TelemetryFlow-Collector-ID".to_owned(),
                collector_id.clone(),
            );
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::TelemetryBuilder;

    fn base_builder() -> TelemetryBuilder {
        TelemetryBuilder::new()
            .with_api_key("tfk_test", "tfs_test")
            .with_endpoint("collector.example.com:4317")
            .with_service("test-service", None)
    }

    #[test]
    fn validation_collects_all_violations() {
        let err = base_builder()
            .with_endpoint("")
            .with_service("", None)
            .build_config()
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("Endpoint is required"));
        assert!(message.contains("Service name is required"));
        assert!(message.contains("; "));
    }

    #[test]
    fn zero_timeout_and_batch_size_are_rejected_together() {
        let err = base_builder()
            .with_timeout(Duration::ZERO)
            .with_batch_settings(None, Some(0))
            .build_config()
            .unwrap_err();

        match err {
            crate::BuilderError::Config(config_err) => {
                assert_eq!(config_err.violations().len(), 2);
                assert!(config_err.to_string().contains("Timeout must be positive"));
                assert!(config_err
                    .to_string()
                    .contains("Batch max size must be positive"));
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn endpoint_url_respects_protocol_and_insecure_flag() {
        let grpc = base_builder().build_config().unwrap();
        assert_eq!(grpc.endpoint_url(), "collector.example.com:4317");

        let https = base_builder()
            .with_protocol(Protocol::Http)
            .build_config()
            .unwrap();
        assert_eq!(https.endpoint_url(), "https://collector.example.com:4317");

        let http = base_builder()
            .with_protocol(Protocol::Http)
            .with_insecure(true)
            .build_config()
            .unwrap();
        assert_eq!(http.endpoint_url(), "http://collector.example.com:4317");
    }

    #[test]
    fn enabled_signals_keeps_metrics_logs_traces_order() {
        let all = base_builder().build_config().unwrap();
        assert_eq!(
            all.enabled_signals(),
            vec![SignalType::Metrics, SignalType::Logs, SignalType::Traces]
        );

        let partial = base_builder()
            .with_signals(true, false, true)
            .build_config()
            .unwrap();
        assert_eq!(
            partial.enabled_signals(),
            vec![SignalType::Metrics, SignalType::Traces]
        );
        assert!(!partial.is_signal_enabled(SignalType::Logs));
    }

    #[test]
    fn custom_resource_attributes_overwrite_fixed_keys() {
        let config = base_builder()
            .with_custom_attribute("team", "platform")
            .with_custom_attribute("service.version", "9.9.9")
            .build_config()
            .unwrap();

        let attrs = config.resource_attributes();
        assert_eq!(attrs.get("service.name").map(String::as_str), Some("test-service"));
        assert_eq!(attrs.get("team").map(String::as_str), Some("platform"));
        // last-write-wins: the custom attribute shadows the fixed key
        assert_eq!(attrs.get("service.version").map(String::as_str), Some("9.9.9"));
    }

    #[test]
    fn auth_headers_include_collector_id_when_set() {
        let without = base_builder().build_config().unwrap();
        assert!(!without
            .auth_headers()
            .contains_key("X-TelemetryFlow-Collector-ID"));

        let with = base_builder()
            .with_collector_id("col-7")
            .build_config()
            .unwrap();
        assert_eq!(
            with.auth_headers()
                .get("X-TelemetryFlow-Collector-ID")
                .map(String::as_str),
            Some("col-7")
        );
    }
}
