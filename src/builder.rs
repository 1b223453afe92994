//! Fluent builder for configuring and creating a [`TelemetryClient`].
//!
//! The builder is a plain mutable bag of settings: no invariants are
//! enforced while chaining. Validation happens exactly once, at
//! [`build`](TelemetryBuilder::build), which produces an immutable
//! [`TelemetryConfig`] or an aggregated [`BuilderError`].
//!
//! ```no_run
//! use telemetryflow::TelemetryBuilder;
//!
//! let client = TelemetryBuilder::new()
//!     .with_api_key("tfk_xxx", "tfs_xxx")
//!     .with_endpoint("api.telemetryflow.id:4317")
//!     .with_service("my-service", Some("1.2.0"))
//!     .with_environment("production")
//!     .build()?;
//! # Ok::<(), telemetryflow::BuilderError>(())
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::client::TelemetryClient;
use crate::config::{ConfigError, Protocol, TelemetryConfig};
use crate::credentials::{Credentials, CredentialsError};
use crate::export::otlp::OtlpExporterFactory;
use crate::export::ExporterFactory;

/// API key id environment variable.
pub const TELEMETRYFLOW_API_KEY_ID: &str = "TELEMETRYFLOW_API_KEY_ID";
/// API key secret environment variable.
pub const TELEMETRYFLOW_API_KEY_SECRET: &str = "TELEMETRYFLOW_API_KEY_SECRET";
/// Collector endpoint environment variable.
pub const TELEMETRYFLOW_ENDPOINT: &str = "TELEMETRYFLOW_ENDPOINT";
/// Service name environment variable.
pub const TELEMETRYFLOW_SERVICE_NAME: &str = "TELEMETRYFLOW_SERVICE_NAME";
/// Service version environment variable.
pub const TELEMETRYFLOW_SERVICE_VERSION: &str = "TELEMETRYFLOW_SERVICE_VERSION";
/// Service namespace environment variable.
pub const TELEMETRYFLOW_SERVICE_NAMESPACE: &str = "TELEMETRYFLOW_SERVICE_NAMESPACE";
/// Deployment environment variable; `ENV` and `ENVIRONMENT` are fallbacks.
pub const TELEMETRYFLOW_ENVIRONMENT: &str = "TELEMETRYFLOW_ENVIRONMENT";
/// Disable TLS verification when set to `true`.
pub const TELEMETRYFLOW_INSECURE: &str = "TELEMETRYFLOW_INSECURE";
/// Transport protocol, `grpc` (default) or `http`.
pub const TELEMETRYFLOW_PROTOCOL: &str = "TELEMETRYFLOW_PROTOCOL";
/// Enable gzip compression when set to `true`.
pub const TELEMETRYFLOW_COMPRESSION: &str = "TELEMETRYFLOW_COMPRESSION";
/// Export timeout in seconds.
pub const TELEMETRYFLOW_TIMEOUT: &str = "TELEMETRYFLOW_TIMEOUT";
/// Enable export retries when set to `true`.
pub const TELEMETRYFLOW_RETRY_ENABLED: &str = "TELEMETRYFLOW_RETRY_ENABLED";
/// Maximum number of export retries.
pub const TELEMETRYFLOW_MAX_RETRIES: &str = "TELEMETRYFLOW_MAX_RETRIES";
/// Retry backoff in milliseconds.
pub const TELEMETRYFLOW_RETRY_BACKOFF: &str = "TELEMETRYFLOW_RETRY_BACKOFF";
/// Batch export interval in milliseconds.
pub const TELEMETRYFLOW_BATCH_TIMEOUT: &str = "TELEMETRYFLOW_BATCH_TIMEOUT";
/// Maximum batch queue size.
pub const TELEMETRYFLOW_BATCH_MAX_SIZE: &str = "TELEMETRYFLOW_BATCH_MAX_SIZE";
/// Enable the traces signal when set to `true`.
pub const TELEMETRYFLOW_ENABLE_TRACES: &str = "TELEMETRYFLOW_ENABLE_TRACES";
/// Enable the metrics signal when set to `true`.
pub const TELEMETRYFLOW_ENABLE_METRICS: &str = "TELEMETRYFLOW_ENABLE_METRICS";
/// Enable the logs signal when set to `true`.
pub const TELEMETRYFLOW_ENABLE_LOGS: &str = "TELEMETRYFLOW_ENABLE_LOGS";
/// Enable exemplar collection when set to `true`.
pub const TELEMETRYFLOW_ENABLE_EXEMPLARS: &str = "TELEMETRYFLOW_ENABLE_EXEMPLARS";
/// Rate limit in requests per minute; `0` leaves the default in place.
pub const TELEMETRYFLOW_RATE_LIMIT: &str = "TELEMETRYFLOW_RATE_LIMIT";
/// Collector identity environment variable.
pub const TELEMETRYFLOW_COLLECTOR_ID: &str = "TELEMETRYFLOW_COLLECTOR_ID";

/// Default collector endpoint.
pub const DEFAULT_ENDPOINT: &str = "api.telemetryflow.id:4317";
const DEFAULT_SERVICE_VERSION: &str = "1.0.0";
const DEFAULT_SERVICE_NAMESPACE: &str = "telemetryflow";
const DEFAULT_ENVIRONMENT: &str = "production";

/// Errors raised while building a client.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BuilderError {
    /// One or more required builder fields were never supplied.
    #[error("{}", .0.join("; "))]
    MissingFields(Vec<String>),

    /// The supplied API key pair failed validation.
    #[error(transparent)]
    Credentials(#[from] CredentialsError),

    /// The assembled configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Chainable builder for [`TelemetryClient`] instances.
#[derive(Debug, Default)]
pub struct TelemetryBuilder {
    api_key_id: Option<String>,
    api_key_secret: Option<String>,
    endpoint: Option<String>,
    service_name: Option<String>,
    service_version: Option<String>,
    service_namespace: Option<String>,
    environment: Option<String>,
    protocol: Option<Protocol>,
    insecure: bool,
    timeout: Option<Duration>,
    compression: Option<bool>,
    retry_enabled: Option<bool>,
    max_retries: Option<u32>,
    retry_backoff: Option<Duration>,
    enable_metrics: Option<bool>,
    enable_logs: Option<bool>,
    enable_traces: Option<bool>,
    exemplars_enabled: Option<bool>,
    collector_id: Option<String>,
    custom_attributes: HashMap<String, String>,
    batch_timeout: Option<Duration>,
    batch_max_size: Option<usize>,
    rate_limit: Option<u32>,
    exporter_factory: Option<Arc<dyn ExporterFactory>>,
}

impl TelemetryBuilder {
    /// Creates a builder with all defaults.
    pub fn new() -> Self {
        TelemetryBuilder::default()
    }

    /// Sets the API key credentials (`tfk_` id, `tfs_` secret).
    pub fn with_api_key(mut self, key_id: impl Into<String>, key_secret: impl Into<String>) -> Self {
        self.api_key_id = Some(key_id.into());
        self.api_key_secret = Some(key_secret.into());
        self
    }

    /// Loads the API key pair from `TELEMETRYFLOW_API_KEY_ID` /
    /// `TELEMETRYFLOW_API_KEY_SECRET`.
    pub fn with_api_key_from_env(mut self) -> Self {
        self.api_key_id = std::env::var(TELEMETRYFLOW_API_KEY_ID).ok();
        self.api_key_secret = std::env::var(TELEMETRYFLOW_API_KEY_SECRET).ok();
        self
    }

    /// Sets the collector endpoint (`host:port`).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Loads the endpoint from `TELEMETRYFLOW_ENDPOINT`, falling back to the
    /// default endpoint.
    pub fn with_endpoint_from_env(mut self) -> Self {
        self.endpoint = Some(
            std::env::var(TELEMETRYFLOW_ENDPOINT).unwrap_or_else(|_| DEFAULT_ENDPOINT.to_owned()),
        );
        self
    }

    /// Sets the service name and, optionally, its version.
    pub fn with_service(mut self, name: impl Into<String>, version: Option<&str>) -> Self {
        self.service_name = Some(name.into());
        if let Some(version) = version {
            self.service_version = Some(version.to_owned());
        }
        self
    }

    /// Loads service name/version from the environment.
    pub fn with_service_from_env(mut self) -> Self {
        self.service_name = std::env::var(TELEMETRYFLOW_SERVICE_NAME).ok();
        self.service_version = Some(
            std::env::var(TELEMETRYFLOW_SERVICE_VERSION)
                .unwrap_or_else(|_| DEFAULT_SERVICE_VERSION.to_owned()),
        );
        self
    }

    /// Sets the service namespace.
    pub fn with_service_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.service_namespace = Some(namespace.into());
        self
    }

    /// Sets the deployment environment (e.g. `production`, `staging`).
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Loads the environment from `TELEMETRYFLOW_ENVIRONMENT`, `ENV` or
    /// `ENVIRONMENT`, in that order.
    pub fn with_environment_from_env(mut self) -> Self {
        self.environment = std::env::var(TELEMETRYFLOW_ENVIRONMENT)
            .or_else(|_| std::env::var("ENV"))
            .or_else(|_| std::env::var("ENVIRONMENT"))
            .ok()
            .or_else(|| Some(DEFAULT_ENVIRONMENT.to_owned()));
        self
    }

    /// Sets the transport protocol.
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Uses gRPC transport (the default).
    pub fn with_grpc(self) -> Self {
        self.with_protocol(Protocol::Grpc)
    }

    /// Uses HTTP transport.
    pub fn with_http(self) -> Self {
        self.with_protocol(Protocol::Http)
    }

    /// Disables (or re-enables) TLS verification.
    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Sets the export timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enables or disables gzip compression.
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression = Some(enabled);
        self
    }

    /// Configures retry behavior.
    pub fn with_retry(mut self, enabled: bool, max_retries: u32, backoff: Option<Duration>) -> Self {
        self.retry_enabled = Some(enabled);
        self.max_retries = Some(max_retries);
        if backoff.is_some() {
            self.retry_backoff = backoff;
        }
        self
    }

    /// Selects which signals are enabled.
    pub fn with_signals(mut self, metrics: bool, logs: bool, traces: bool) -> Self {
        self.enable_metrics = Some(metrics);
        self.enable_logs = Some(logs);
        self.enable_traces = Some(traces);
        self
    }

    /// Enables only the metrics signal.
    pub fn with_metrics_only(self) -> Self {
        self.with_signals(true, false, false)
    }

    /// Enables only the logs signal.
    pub fn with_logs_only(self) -> Self {
        self.with_signals(false, true, false)
    }

    /// Enables only the traces signal.
    pub fn with_traces_only(self) -> Self {
        self.with_signals(false, false, true)
    }

    /// Enables or disables exemplar collection.
    pub fn with_exemplars(mut self, enabled: bool) -> Self {
        self.exemplars_enabled = Some(enabled);
        self
    }

    /// Sets the collector identity header value.
    pub fn with_collector_id(mut self, collector_id: impl Into<String>) -> Self {
        self.collector_id = Some(collector_id.into());
        self
    }

    /// Loads the collector id from `TELEMETRYFLOW_COLLECTOR_ID`.
    pub fn with_collector_id_from_env(mut self) -> Self {
        self.collector_id = std::env::var(TELEMETRYFLOW_COLLECTOR_ID).ok();
        self
    }

    /// Adds a single custom resource attribute.
    pub fn with_custom_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_attributes.insert(key.into(), value.into());
        self
    }

    /// Adds multiple custom resource attributes.
    pub fn with_custom_attributes(mut self, attributes: HashMap<String, String>) -> Self {
        self.custom_attributes.extend(attributes);
        self
    }

    /// Configures batch export settings.
    pub fn with_batch_settings(mut self, timeout: Option<Duration>, max_size: Option<usize>) -> Self {
        if timeout.is_some() {
            self.batch_timeout = timeout;
        }
        if max_size.is_some() {
            self.batch_max_size = max_size;
        }
        self
    }

    /// Sets the rate limit in requests per minute.
    pub fn with_rate_limit(mut self, rate_limit: u32) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    /// Overrides the exporter factory consumed by the session core.
    ///
    /// The default factory builds OTLP pipelines; tests typically install
    /// [`InMemoryExporterFactory`](crate::export::in_memory::InMemoryExporterFactory)
    /// here instead.
    pub fn with_exporter_factory(mut self, factory: Arc<dyn ExporterFactory>) -> Self {
        self.exporter_factory = Some(factory);
        self
    }

    /// Loads every supported `TELEMETRYFLOW_*` variable from the environment.
    ///
    /// Unparsable numeric values leave the corresponding default in place.
    pub fn with_auto_configuration(mut self) -> Self {
        self = self
            .with_api_key_from_env()
            .with_endpoint_from_env()
            .with_service_from_env()
            .with_environment_from_env()
            .with_collector_id_from_env();

        self.service_namespace = Some(
            std::env::var(TELEMETRYFLOW_SERVICE_NAMESPACE)
                .unwrap_or_else(|_| DEFAULT_SERVICE_NAMESPACE.to_owned()),
        );
        self.insecure = env_bool(TELEMETRYFLOW_INSECURE, false);
        self.protocol = Some(
            match std::env::var(TELEMETRYFLOW_PROTOCOL).as_deref() {
                Ok(value) if value.eq_ignore_ascii_case("http") => Protocol::Http,
                _ => Protocol::Grpc,
            },
        );
        self.compression = Some(env_bool(TELEMETRYFLOW_COMPRESSION, false));
        self.timeout = Some(Duration::from_secs(env_u64(TELEMETRYFLOW_TIMEOUT, 10)));
        self.retry_enabled = Some(env_bool(TELEMETRYFLOW_RETRY_ENABLED, true));
        self.max_retries = Some(env_u64(TELEMETRYFLOW_MAX_RETRIES, 3) as u32);
        self.retry_backoff = Some(Duration::from_millis(env_u64(
            TELEMETRYFLOW_RETRY_BACKOFF,
            500,
        )));
        self.batch_timeout = Some(Duration::from_millis(env_u64(
            TELEMETRYFLOW_BATCH_TIMEOUT,
            5000,
        )));
        self.batch_max_size = Some(env_u64(TELEMETRYFLOW_BATCH_MAX_SIZE, 512) as usize);
        self.enable_traces = Some(env_bool(TELEMETRYFLOW_ENABLE_TRACES, true));
        self.enable_metrics = Some(env_bool(TELEMETRYFLOW_ENABLE_METRICS, true));
        self.enable_logs = Some(env_bool(TELEMETRYFLOW_ENABLE_LOGS, true));
        self.exemplars_enabled = Some(env_bool(TELEMETRYFLOW_ENABLE_EXEMPLARS, true));

        // 0 means "unlimited requested": keep the default rate limit.
        let rate_limit = env_u64(TELEMETRYFLOW_RATE_LIMIT, 0) as u32;
        if rate_limit > 0 {
            self.rate_limit = Some(rate_limit);
        }

        self
    }

    /// Validates the builder and assembles the immutable configuration.
    pub fn build_config(&self) -> Result<TelemetryConfig, BuilderError> {
        let mut missing = Vec::new();
        if self.api_key_id.as_deref().unwrap_or_default().is_empty() {
            missing.push("API key ID is required".to_owned());
        }
        if self.api_key_secret.as_deref().unwrap_or_default().is_empty() {
            missing.push("API key secret is required".to_owned());
        }
        if self.service_name.is_none() {
            missing.push("Service name is required".to_owned());
        }
        if !missing.is_empty() {
            return Err(BuilderError::MissingFields(missing));
        }

        let credentials = Credentials::new(
            self.api_key_id.clone().unwrap_or_default(),
            self.api_key_secret.clone().unwrap_or_default(),
        )?;

        let config = TelemetryConfig {
            credentials,
            endpoint: self
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_owned()),
            service_name: self.service_name.clone().unwrap_or_default(),
            protocol: self.protocol.unwrap_or(Protocol::Grpc),
            insecure: self.insecure,
            timeout: self.timeout.unwrap_or(Duration::from_secs(30)),
            compression: self.compression.unwrap_or(true),
            retry_enabled: self.retry_enabled.unwrap_or(true),
            max_retries: self.max_retries.unwrap_or(3),
            retry_backoff: self.retry_backoff.unwrap_or(Duration::from_secs(5)),
            enable_metrics: self.enable_metrics.unwrap_or(true),
            enable_logs: self.enable_logs.unwrap_or(true),
            enable_traces: self.enable_traces.unwrap_or(true),
            exemplars_enabled: self.exemplars_enabled.unwrap_or(true),
            service_version: self
                .service_version
                .clone()
                .unwrap_or_else(|| DEFAULT_SERVICE_VERSION.to_owned()),
            service_namespace: self
                .service_namespace
                .clone()
                .unwrap_or_else(|| DEFAULT_SERVICE_NAMESPACE.to_owned()),
            environment: self
                .environment
                .clone()
                .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_owned()),
            custom_attributes: self.custom_attributes.clone(),
            batch_timeout: self.batch_timeout.unwrap_or(Duration::from_secs(10)),
            batch_max_size: self.batch_max_size.unwrap_or(512),
            collector_id: self.collector_id.clone(),
            rate_limit: self.rate_limit.unwrap_or(1000),
        };

        Ok(config.validate()?)
    }

    /// Builds the configured [`TelemetryClient`].
    pub fn build(self) -> Result<TelemetryClient, BuilderError> {
        let config = self.build_config()?;
        let factory = self
            .exporter_factory
            .unwrap_or_else(|| Arc::new(OtlpExporterFactory::new()));
        Ok(TelemetryClient::new(config, factory))
    }
}

/// Creates a client configured entirely from `TELEMETRYFLOW_*` variables.
pub fn from_env() -> Result<TelemetryClient, BuilderError> {
    TelemetryBuilder::new().with_auto_configuration().build()
}

/// Creates a client with the minimal required settings.
pub fn new_simple(
    api_key_id: &str,
    api_key_secret: &str,
    endpoint: &str,
    service_name: &str,
) -> Result<TelemetryClient, BuilderError> {
    TelemetryBuilder::new()
        .with_api_key(api_key_id, api_key_secret)
        .with_endpoint(endpoint)
        .with_service(service_name, None)
        .build()
}

fn env_bool(var: &str, default: bool) -> bool {
    match std::env::var(var) {
        Ok(value) => value.eq_ignore_ascii_case("true"),
        Err(_) => default,
    }
}

fn env_u64(var: &str, default: u64) -> u64 {
    std::env::var(var)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_collects_missing_required_fields() {
        let err = TelemetryBuilder::new().build_config().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("API key ID is required"));
        assert!(message.contains("API key secret is required"));
        assert!(message.contains("Service name is required"));
    }

    #[test]
    fn build_surfaces_credential_errors() {
        let err = TelemetryBuilder::new()
            .with_api_key("bogus", "tfs_ok")
            .with_service("svc", None)
            .build_config()
            .unwrap_err();
        assert!(matches!(err, BuilderError::Credentials(_)));
    }

    #[test]
    fn defaults_are_applied() {
        let config = TelemetryBuilder::new()
            .with_api_key("tfk_a", "tfs_b")
            .with_service("svc", None)
            .build_config()
            .unwrap();

        assert_eq!(config.endpoint(), DEFAULT_ENDPOINT);
        assert_eq!(config.protocol(), Protocol::Grpc);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.service_version(), DEFAULT_SERVICE_VERSION);
        assert!(config.compression());
        assert_eq!(config.batch_max_size(), 512);
    }

    #[test]
    fn auto_configuration_reads_environment() {
        temp_env::with_vars(
            [
                (TELEMETRYFLOW_API_KEY_ID, Some("tfk_env")),
                (TELEMETRYFLOW_API_KEY_SECRET, Some("tfs_env")),
                (TELEMETRYFLOW_ENDPOINT, Some("collector.internal:4318")),
                (TELEMETRYFLOW_SERVICE_NAME, Some("env-service")),
                (TELEMETRYFLOW_SERVICE_VERSION, Some("2.0.0")),
                (TELEMETRYFLOW_PROTOCOL, Some("http")),
                (TELEMETRYFLOW_INSECURE, Some("true")),
                (TELEMETRYFLOW_TIMEOUT, Some("7")),
                (TELEMETRYFLOW_ENABLE_LOGS, Some("false")),
                (TELEMETRYFLOW_BATCH_MAX_SIZE, Some("128")),
                (TELEMETRYFLOW_RATE_LIMIT, Some("250")),
            ],
            || {
                let config = TelemetryBuilder::new()
                    .with_auto_configuration()
                    .build_config()
                    .unwrap();

                assert_eq!(config.credentials().key_id(), "tfk_env");
                assert_eq!(config.endpoint(), "collector.internal:4318");
                assert_eq!(config.service_name(), "env-service");
                assert_eq!(config.service_version(), "2.0.0");
                assert_eq!(config.protocol(), Protocol::Http);
                assert!(config.insecure());
                assert_eq!(config.timeout(), Duration::from_secs(7));
                assert!(!config.is_signal_enabled(crate::SignalType::Logs));
                assert_eq!(config.batch_max_size(), 128);
                assert_eq!(config.endpoint_url(), "http://collector.internal:4318");
            },
        );
    }

    #[test]
    fn auto_configuration_ignores_unparsable_numbers() {
        temp_env::with_vars(
            [
                (TELEMETRYFLOW_API_KEY_ID, Some("tfk_env")),
                (TELEMETRYFLOW_API_KEY_SECRET, Some("tfs_env")),
                (TELEMETRYFLOW_SERVICE_NAME, Some("env-service")),
                (TELEMETRYFLOW_TIMEOUT, Some("not-a-number")),
                (TELEMETRYFLOW_BATCH_MAX_SIZE, Some("many")),
            ],
            || {
                let config = TelemetryBuilder::new()
                    .with_auto_configuration()
                    .build_config()
                    .unwrap();
                assert_eq!(config.timeout(), Duration::from_secs(10));
                assert_eq!(config.batch_max_size(), 512);
            },
        );
    }

    #[test]
    fn rate_limit_of_zero_keeps_default() {
        temp_env::with_vars(
            [
                (TELEMETRYFLOW_API_KEY_ID, Some("tfk_env")),
                (TELEMETRYFLOW_API_KEY_SECRET, Some("tfs_env")),
                (TELEMETRYFLOW_SERVICE_NAME, Some("env-service")),
                (TELEMETRYFLOW_RATE_LIMIT, Some("0")),
            ],
            || {
                let config = TelemetryBuilder::new()
                    .with_auto_configuration()
                    .build_config()
                    .unwrap();
                // 0 would fail validation; the builder keeps the default instead
                assert_eq!(config.rate_limit, 1000);
            },
        );
    }
}
