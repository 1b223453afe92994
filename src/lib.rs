//! TelemetryFlow client SDK.
//!
//! Records metrics, logs and trace spans and ships them to a TelemetryFlow
//! collector over OTLP (gRPC or HTTP). The SDK is built around three parts:
//!
//! * A [`TelemetryBuilder`] that assembles and validates an immutable
//!   [`TelemetryConfig`], from code or from `TELEMETRYFLOW_*` environment
//!   variables.
//! * A session core holding the export pipelines, the active-span registry
//!   and per-name instrument caches, driven through a command/query bus.
//! * A [`TelemetryClient`] facade with ergonomic recording methods and an
//!   RAII [`SpanGuard`](client::SpanGuard) for span lifecycles.
//!
//! # Getting started
//!
//! ```no_run
//! use telemetryflow::{SpanKind, TelemetryBuilder};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = TelemetryBuilder::new()
//!     .with_api_key("tfk_your_key", "tfs_your_secret")
//!     .with_endpoint("api.telemetryflow.id:4317")
//!     .with_service("checkout", Some("1.4.2"))
//!     .build()?;
//! client.initialize()?;
//!
//! client.increment_counter("orders_placed", 1, Default::default())?;
//!
//! let mut span = client.start_span("charge-card", SpanKind::Client, Default::default())?;
//! if let Err(err) = charge_card() {
//!     span.fail(err.to_string());
//! }
//! span.end()?;
//!
//! client.shutdown(None)?;
//! # Ok(())
//! # }
//! # fn charge_card() -> Result<(), std::io::Error> { Ok(()) }
//! ```
//!
//! Recording through an uninitialized client returns
//! [`SessionError::NotInitialized`](session::SessionError::NotInitialized);
//! the underlying session core, reachable through the command bus, instead
//! drops data silently so embedded instrumentation can never fail its host.

pub mod attributes;
pub mod builder;
pub mod client;
pub mod command;
pub mod config;
pub mod credentials;
pub mod export;
pub mod query;
pub mod session;

pub use attributes::AttributeMap;
pub use builder::{from_env, new_simple, BuilderError, TelemetryBuilder};
pub use client::{SpanGuard, TelemetryClient};
pub use command::{LogRecord, SeverityLevel, SpanId, SpanKind};
pub use config::{ConfigError, Protocol, SignalType, TelemetryConfig};
pub use credentials::{Credentials, CredentialsError};
pub use query::SessionStatus;
pub use session::{SessionError, SessionState};
