//! OTLP/HTTP exporters for traces, metrics and logs.
//!
//! Exporters only own the transport. Buffering is left to the providers'
//! batch processors and periodic reader.

use axum::http::Uri;
use opentelemetry_otlp::{
    ExporterBuildError, LogExporter, MetricExporter, Protocol, SpanExporter, WithExportConfig,
};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Telemetry signal carried by an exporter or provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Traces,
    Metrics,
    Logs,
}

impl Signal {
    /// Collector path for this signal under the base endpoint.
    pub fn path(self) -> &'static str {
        match self {
            Signal::Traces => "/v1/traces",
            Signal::Metrics => "/v1/metrics",
            Signal::Logs => "/v1/logs",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Signal::Traces => "traces",
            Signal::Metrics => "metrics",
            Signal::Logs => "logs",
        };
        f.write_str(name)
    }
}

/// Error raised while constructing an exporter.
#[derive(Debug, Error)]
pub enum ExporterError {
    #[error("malformed collector endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("failed to create {signal} exporter: {source}")]
    Build {
        signal: Signal,
        #[source]
        source: ExporterBuildError,
    },
}

/// Where and how the exporters reach the collector.
#[derive(Debug, Clone)]
pub struct CollectorEndpoint {
    base: String,
    timeout: Duration,
    insecure: bool,
}

impl CollectorEndpoint {
    /// Validate a base endpoint such as `http://localhost:4318`.
    ///
    /// Plain `http` means an unauthenticated, unencrypted channel.
    pub fn parse(endpoint: &str, timeout: Duration) -> Result<Self, ExporterError> {
        let invalid = |reason: &str| ExporterError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        };

        let uri: Uri = endpoint.parse().map_err(|e: axum::http::uri::InvalidUri| invalid(&e.to_string()))?;
        let insecure = match uri.scheme_str() {
            Some("http") => true,
            Some("https") => false,
            Some(other) => return Err(invalid(&format!("unsupported scheme {other}"))),
            None => return Err(invalid("missing scheme")),
        };
        if uri.host().is_none() {
            return Err(invalid("missing host"));
        }

        Ok(Self {
            base: endpoint.trim_end_matches('/').to_string(),
            timeout,
            insecure,
        })
    }

    /// Full URL for one signal, e.g. `http://localhost:4318/v1/traces`.
    pub fn signal_url(&self, signal: Signal) -> String {
        format!("{}{}", self.base, signal.path())
    }

    pub fn is_insecure(&self) -> bool {
        self.insecure
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

pub fn span_exporter(endpoint: &CollectorEndpoint) -> Result<SpanExporter, ExporterError> {
    SpanExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(endpoint.signal_url(Signal::Traces))
        .with_timeout(endpoint.timeout())
        .build()
        .map_err(|source| ExporterError::Build {
            signal: Signal::Traces,
            source,
        })
}

pub fn metric_exporter(endpoint: &CollectorEndpoint) -> Result<MetricExporter, ExporterError> {
    MetricExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(endpoint.signal_url(Signal::Metrics))
        .with_timeout(endpoint.timeout())
        .build()
        .map_err(|source| ExporterError::Build {
            signal: Signal::Metrics,
            source,
        })
}

pub fn log_exporter(endpoint: &CollectorEndpoint) -> Result<LogExporter, ExporterError> {
    LogExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(endpoint.signal_url(Signal::Logs))
        .with_timeout(endpoint.timeout())
        .build()
        .map_err(|source| ExporterError::Build {
            signal: Signal::Logs,
            source,
        })
}

/// Source of the three signal exporters a [`Telemetry`](super::Telemetry) is built from.
///
/// Each method is called at most once, in the order traces, metrics, logs.
pub trait ExporterSource {
    type Spans: opentelemetry_sdk::trace::SpanExporter + 'static;
    type Metrics: opentelemetry_sdk::metrics::exporter::PushMetricExporter;
    type Logs: opentelemetry_sdk::logs::LogExporter + 'static;

    fn span_exporter(&self) -> Result<Self::Spans, ExporterError>;
    fn metric_exporter(&self) -> Result<Self::Metrics, ExporterError>;
    fn log_exporter(&self) -> Result<Self::Logs, ExporterError>;
}

impl ExporterSource for CollectorEndpoint {
    type Spans = SpanExporter;
    type Metrics = MetricExporter;
    type Logs = LogExporter;

    fn span_exporter(&self) -> Result<SpanExporter, ExporterError> {
        span_exporter(self)
    }

    fn metric_exporter(&self) -> Result<MetricExporter, ExporterError> {
        metric_exporter(self)
    }

    fn log_exporter(&self) -> Result<LogExporter, ExporterError> {
        log_exporter(self)
    }
}
