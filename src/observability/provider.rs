//! Tracer, meter and logger providers.
//!
//! Each provider wraps one exporter behind a buffering policy:
//! - spans and log records go through batch processors (size or delay trigger)
//! - metrics are collected by a periodic reader
//!
//! Providers are the factories for the named tracer, meter and logger
//! handles used by request handlers.

use opentelemetry::global;
use opentelemetry::logs::LoggerProvider as _;
use opentelemetry::metrics::{Meter, MeterProvider as _};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::logs::{BatchLogProcessor, SdkLogger, SdkLoggerProvider};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{BatchSpanProcessor, SdkTracer, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use std::sync::Arc;
use std::time::Duration;

use super::exporter::{CollectorEndpoint, ExporterError, ExporterSource, Signal};
use super::resource::{build_resource, ServiceIdentity};
use super::shutdown::{ShutdownError, Teardown};
use super::TelemetryError;
use crate::config::Config;

/// Buffering policy shared by the span and log batch processors.
#[derive(Debug, Clone, Copy)]
pub struct BatchPolicy {
    /// Maximum number of items in one export batch
    pub max_batch_size: usize,
    /// Maximum number of items buffered before new ones are dropped
    pub max_queue_size: usize,
    /// Maximum time between two exports
    pub scheduled_delay: Duration,
    /// Interval between two metric collections
    pub metric_interval: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            max_batch_size: 512,
            max_queue_size: 2048,
            scheduled_delay: Duration::from_secs(5),
            metric_interval: Duration::from_secs(60),
        }
    }
}

impl BatchPolicy {
    /// Create a BatchPolicy from application config values.
    pub fn from_config(config: &Config) -> Self {
        let max_batch_size = config.batch_size.max(1);
        Self {
            max_batch_size,
            max_queue_size: (max_batch_size * 4).max(BatchPolicy::default().max_queue_size),
            scheduled_delay: config.batch_delay(),
            metric_interval: config.metric_interval(),
        }
    }

    fn span_batch_config(&self) -> opentelemetry_sdk::trace::BatchConfig {
        opentelemetry_sdk::trace::BatchConfigBuilder::default()
            .with_max_export_batch_size(self.max_batch_size)
            .with_max_queue_size(self.max_queue_size)
            .with_scheduled_delay(self.scheduled_delay)
            .build()
    }

    fn log_batch_config(&self) -> opentelemetry_sdk::logs::BatchConfig {
        opentelemetry_sdk::logs::BatchConfigBuilder::default()
            .with_max_export_batch_size(self.max_batch_size)
            .with_max_queue_size(self.max_queue_size)
            .with_scheduled_delay(self.scheduled_delay)
            .build()
    }
}

/// The three providers bound to one resource, plus their teardown.
pub struct Telemetry {
    resource: Resource,
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
    logger_provider: SdkLoggerProvider,
    teardown: Teardown,
}

/// Telemetry construction that stopped before all three providers were built.
pub enum StartupFailure {
    /// Nothing needs releasing.
    Aborted(TelemetryError),
    /// An exporter failed after earlier providers were already built.
    Partial {
        source: ExporterError,
        teardown: Teardown,
    },
}

impl StartupFailure {
    /// Providers that were built and still need to be shut down.
    pub fn built(&self) -> Vec<Signal> {
        match self {
            StartupFailure::Aborted(_) => Vec::new(),
            StartupFailure::Partial { teardown, .. } => teardown.signals(),
        }
    }

    /// Shut down whatever was built and fold the outcome into the startup error.
    pub async fn release(self, timeout: Duration) -> TelemetryError {
        match self {
            StartupFailure::Aborted(err) => err,
            StartupFailure::Partial { source, teardown } => {
                tracing::debug!(
                    built = ?teardown.signals(),
                    "Releasing partially built telemetry"
                );
                let cleanup = teardown.shutdown(timeout).await;
                TelemetryError::Startup { source, cleanup }
            }
        }
    }
}

impl Telemetry {
    /// Build exporters and providers in order (traces, metrics, logs).
    ///
    /// The tracer and meter providers become the process-wide globals as soon
    /// as each is built. If a later step fails, everything built so far is
    /// shut down and the returned error carries that cleanup's outcome.
    pub async fn init(config: &Config) -> Result<Self, TelemetryError> {
        match Self::build(config).await {
            Ok(telemetry) => Ok(telemetry),
            Err(failure) => Err(failure.release(config.shutdown_timeout()).await),
        }
    }

    /// Like [`Telemetry::init`], but leaves releasing a partial build to the caller.
    pub async fn build(config: &Config) -> Result<Self, StartupFailure> {
        let identity = ServiceIdentity::from_config(config);
        let policy = BatchPolicy::from_config(config);
        let endpoint = CollectorEndpoint::parse(&config.otlp_endpoint, config.export_timeout())
            .map_err(|source| {
                StartupFailure::Aborted(TelemetryError::Startup {
                    source,
                    cleanup: Ok(()),
                })
            })?;

        tracing::debug!(
            endpoint = %config.otlp_endpoint,
            insecure = endpoint.is_insecure(),
            "Building OTLP exporters"
        );

        // Exporter construction may block (HTTP client setup), keep it off the async workers.
        tokio::task::spawn_blocking(move || build_providers(&identity, &endpoint, &policy))
            .await
            .map_err(|e| StartupFailure::Aborted(TelemetryError::Task(e.to_string())))?
    }

    /// Assemble telemetry from already-built providers.
    ///
    /// Used to plug in alternative exporters (for example in-memory ones).
    /// Nothing is registered globally.
    pub fn from_providers(
        resource: Resource,
        tracer_provider: SdkTracerProvider,
        meter_provider: SdkMeterProvider,
        logger_provider: SdkLoggerProvider,
    ) -> Self {
        let teardown = Teardown::new();
        teardown.register(Arc::new(tracer_provider.clone()));
        teardown.register(Arc::new(meter_provider.clone()));
        teardown.register(Arc::new(logger_provider.clone()));
        Self {
            resource,
            tracer_provider,
            meter_provider,
            logger_provider,
            teardown,
        }
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Named tracer from the tracer provider.
    pub fn tracer(&self, name: &'static str) -> SdkTracer {
        self.tracer_provider.tracer(name)
    }

    /// Named meter from the meter provider.
    pub fn meter(&self, name: &'static str) -> Meter {
        self.meter_provider.meter(name)
    }

    /// Named logger from the logger provider.
    pub fn logger(&self, name: &'static str) -> SdkLogger {
        self.logger_provider.logger(name)
    }

    pub fn logger_provider(&self) -> &SdkLoggerProvider {
        &self.logger_provider
    }

    /// Flush and close all providers within one shared deadline.
    ///
    /// Idempotent: a second call releases nothing and returns the same result.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), ShutdownError> {
        self.teardown.shutdown(timeout).await
    }
}

/// Build providers step by step, registering each in the teardown once built.
///
/// On failure the partially filled teardown is handed back so the caller can
/// release what was already constructed.
fn build_providers<S: ExporterSource>(
    identity: &ServiceIdentity,
    source: &S,
    policy: &BatchPolicy,
) -> Result<Telemetry, StartupFailure> {
    let teardown = Teardown::new();
    let resource = build_resource(identity);

    let tracer_provider = match source.span_exporter() {
        Ok(exporter) => SdkTracerProvider::builder()
            .with_resource(resource.clone())
            .with_span_processor(
                BatchSpanProcessor::builder(exporter)
                    .with_batch_config(policy.span_batch_config())
                    .build(),
            )
            .build(),
        Err(source) => return Err(StartupFailure::Partial { source, teardown }),
    };
    teardown.register(Arc::new(tracer_provider.clone()));
    global::set_tracer_provider(tracer_provider.clone());

    let meter_provider = match source.metric_exporter() {
        Ok(exporter) => SdkMeterProvider::builder()
            .with_resource(resource.clone())
            .with_reader(
                PeriodicReader::builder(exporter)
                    .with_interval(policy.metric_interval)
                    .build(),
            )
            .build(),
        Err(source) => return Err(StartupFailure::Partial { source, teardown }),
    };
    teardown.register(Arc::new(meter_provider.clone()));
    global::set_meter_provider(meter_provider.clone());

    let logger_provider = match source.log_exporter() {
        Ok(exporter) => SdkLoggerProvider::builder()
            .with_resource(resource.clone())
            .with_log_processor(
                BatchLogProcessor::builder(exporter)
                    .with_batch_config(policy.log_batch_config())
                    .build(),
            )
            .build(),
        Err(source) => return Err(StartupFailure::Partial { source, teardown }),
    };
    teardown.register(Arc::new(logger_provider.clone()));

    Ok(Telemetry {
        resource,
        tracer_provider,
        meter_provider,
        logger_provider,
        teardown,
    })
}
