//! OpenTelemetry telemetry core.
//!
//! Provides:
//! - Service resource shared by all three signals
//! - OTLP/HTTP exporters and the providers buffering in front of them
//! - W3C trace context + baggage propagation over HTTP headers
//! - Scoped spans, per-operation metrics and trace-correlated logs
//! - Idempotent, error-joining provider shutdown

pub mod exporter;
pub mod logging;
pub mod metrics;
pub mod propagation;
pub mod provider;
pub mod resource;
pub mod shutdown;
pub mod span;

use thiserror::Error;

pub use exporter::ExporterError;
pub use provider::{StartupFailure, Telemetry};
pub use shutdown::ShutdownError;

/// Instrumentation scope name for the service's tracer, meter and logger.
pub const INSTRUMENTATION_SCOPE: &str = "todo-service";

/// Error raised while bringing telemetry up.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// An exporter or provider could not be constructed. `cleanup` reports
    /// the shutdown of whatever had already been built.
    #[error("telemetry startup failed: {source}{}", cleanup_suffix(.cleanup))]
    Startup {
        #[source]
        source: ExporterError,
        cleanup: Result<(), ShutdownError>,
    },

    #[error("telemetry construction task failed: {0}")]
    Task(String),

    #[error("failed to install log subscriber: {0}")]
    Subscriber(String),
}

fn cleanup_suffix(cleanup: &Result<(), ShutdownError>) -> String {
    match cleanup {
        Ok(()) => String::new(),
        Err(e) => format!(" (cleanup: {e})"),
    }
}
