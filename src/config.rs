//! Configuration parsing for the todo service.
//!
//! Supports:
//! - CLI arguments via clap
//! - Environment variable overrides (including the standard `OTEL_*` names)
//! - Defaults matching a local collector on `localhost:4318`

use clap::Parser;
use std::time::Duration;

/// Todo OTel: a todo list HTTP service exporting traces, metrics and logs over OTLP.
#[derive(Parser, Debug, Clone)]
#[command(name = "todo-otel")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Host address to bind to
    #[arg(long, env = "TODO_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "TODO_PORT", default_value_t = 43521)]
    pub port: u16,

    /// OTLP/HTTP collector base endpoint (signal paths are appended)
    #[arg(
        long,
        env = "OTEL_EXPORTER_OTLP_ENDPOINT",
        default_value = "http://localhost:4318"
    )]
    pub otlp_endpoint: String,

    /// Service name attached to all exported telemetry
    #[arg(long, env = "OTEL_SERVICE_NAME", default_value = "todo-service")]
    pub service_name: String,

    /// Service namespace attached to all exported telemetry
    #[arg(long, env = "TODO_SERVICE_NAMESPACE", default_value = "rust")]
    pub service_namespace: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Emit console logs as JSON lines
    #[arg(long, env = "TODO_LOG_JSON", default_value_t = false)]
    pub log_json: bool,

    /// Timeout for a single export request to the collector
    #[arg(long, env = "OTEL_EXPORTER_OTLP_TIMEOUT", default_value_t = 10_000)]
    pub export_timeout_ms: u64,

    /// Maximum delay between two span/log batch exports
    #[arg(long, env = "TODO_BATCH_DELAY_MS", default_value_t = 5_000)]
    pub batch_delay_ms: u64,

    /// Maximum number of spans/log records per export batch
    #[arg(long, env = "TODO_BATCH_SIZE", default_value_t = 512)]
    pub batch_size: usize,

    /// Interval between two metric exports
    #[arg(long, env = "OTEL_METRIC_EXPORT_INTERVAL", default_value_t = 60_000)]
    pub metric_interval_ms: u64,

    /// Deadline for receiving a request body
    #[arg(long, env = "TODO_READ_TIMEOUT_MS", default_value_t = 1_000)]
    pub read_timeout_ms: u64,

    /// Deadline for producing a response
    #[arg(long, env = "TODO_WRITE_TIMEOUT_MS", default_value_t = 10_000)]
    pub write_timeout_ms: u64,

    /// How long in-flight requests may run after shutdown starts
    #[arg(long, env = "TODO_GRACE_PERIOD_MS", default_value_t = 5_000)]
    pub grace_period_ms: u64,

    /// Shared deadline for flushing and closing all telemetry providers
    #[arg(long, env = "TODO_SHUTDOWN_TIMEOUT_MS", default_value_t = 5_000)]
    pub shutdown_timeout_ms: u64,
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Service version reported in the resource.
    pub fn service_version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// Socket address string the listener binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_millis(self.export_timeout_ms)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn metric_interval(&self) -> Duration {
        Duration::from_millis(self.metric_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Create a configuration for tests: loopback, random port, short deadlines.
    pub fn test_config() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0, // Random port
            log_level: "debug".into(),
            export_timeout_ms: 500,
            batch_delay_ms: 100,
            grace_period_ms: 500,
            shutdown_timeout_ms: 1_000,
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 43521,
            otlp_endpoint: "http://localhost:4318".into(),
            service_name: "todo-service".into(),
            service_namespace: "rust".into(),
            log_level: "info".into(),
            log_json: false,
            export_timeout_ms: 10_000,
            batch_delay_ms: 5_000,
            batch_size: 512,
            metric_interval_ms: 60_000,
            read_timeout_ms: 1_000,
            write_timeout_ms: 10_000,
            grace_period_ms: 5_000,
            shutdown_timeout_ms: 5_000,
        }
    }
}
