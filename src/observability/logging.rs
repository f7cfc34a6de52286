//! Structured logging.
//!
//! Configures two `tracing` layers:
//! - Console output, human readable or JSON lines
//! - A bridge turning log events into OpenTelemetry log records
//!
//! Records emitted while a span is attached carry that span's trace and span
//! ids, so logs can be joined with traces in the backend.

use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use tracing::Subscriber;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use super::TelemetryError;
use crate::config::Config;

/// Targets never forwarded to the collector: exporting the exporter's own
/// transport logs would feed back into the log pipeline.
const BRIDGE_SILENCED: &str = "hyper=off,h2=off,tower=off,reqwest=off,opentelemetry=off";

/// Build the console + OpenTelemetry subscriber without installing it.
pub fn build_subscriber(
    config: &Config,
    provider: &SdkLoggerProvider,
) -> Result<impl Subscriber + Send + Sync + 'static, TelemetryError> {
    let console_filter = parse_filter(&config.log_level)?;
    let bridge_filter = parse_filter(&format!("{},{BRIDGE_SILENCED}", config.log_level))?;

    let console: Box<dyn Layer<Registry> + Send + Sync> = if config.log_json {
        fmt::layer()
            .json()
            .with_target(true)
            .with_filter(console_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_filter(console_filter)
            .boxed()
    };

    let bridge = OpenTelemetryTracingBridge::new(provider).with_filter(bridge_filter);

    Ok(tracing_subscriber::registry().with(console).with(bridge))
}

/// Install the logging subscriber process-wide.
///
/// Fails if the level is malformed or a global subscriber is already set.
pub fn init_logging(config: &Config, provider: &SdkLoggerProvider) -> Result<(), TelemetryError> {
    build_subscriber(config, provider)?
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        json = config.log_json,
        "Logging initialized"
    );
    Ok(())
}

/// Initialize tracing for tests (only logs errors).
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("error")
        .with_test_writer()
        .try_init();
}

fn parse_filter(directives: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(directives)
        .map_err(|e| TelemetryError::Subscriber(format!("invalid log filter {directives:?}: {e}")))
}
