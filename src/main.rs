//! Todo OTel: a todo list HTTP service instrumented with OpenTelemetry.
//!
//! # Usage
//!
//! ```bash
//! todo-otel --port 43521 --otlp-endpoint http://localhost:4318 --log-level info
//! ```
//!
//! Environment variables can also be used:
//! - `TODO_PORT`: Port to listen on
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: Collector base endpoint
//! - `OTEL_SERVICE_NAME`: Service name reported in telemetry
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

use todo_otel::config::Config;
use todo_otel::lifecycle::{self, LifecycleError};

/// Print startup banner with version and configuration.
fn print_banner(config: &Config) {
    let version = config.service_version();
    println!(
        r#"
  Todo OTel v{}

  Configuration:
    Listen:     http://{}
    Collector:  {}
    Service:    {}/{}
    Log Level:  {}

  Press Ctrl+C to shutdown gracefully.
"#,
        version,
        config.listen_addr(),
        config.otlp_endpoint,
        config.service_namespace,
        config.service_name,
        config.log_level
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration from CLI arguments and environment
    let config = Config::parse_args();

    print_banner(&config);

    match lifecycle::run(config).await {
        Ok(()) => Ok(()),
        // Telemetry that failed to flush is reported but does not fail the exit.
        Err(LifecycleError::Shutdown(e)) => {
            eprintln!("warning: {e}");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
