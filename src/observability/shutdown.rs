//! Exactly-once provider shutdown with error joining.
//!
//! Each provider is registered in a [`Teardown`] as soon as it has been
//! constructed. Shutting the teardown down visits every slot in registration
//! order under one shared deadline, and collects every failure instead of
//! stopping at the first one.

use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tokio::time::Instant;

use super::exporter::Signal;

/// A provider that flushes and releases its exporter on shutdown.
///
/// `shutdown` blocks until pending batches are exported.
pub trait ManagedProvider: Send + Sync + 'static {
    fn signal(&self) -> Signal;
    fn shutdown(&self) -> OTelSdkResult;
}

impl ManagedProvider for SdkTracerProvider {
    fn signal(&self) -> Signal {
        Signal::Traces
    }

    fn shutdown(&self) -> OTelSdkResult {
        SdkTracerProvider::shutdown(self)
    }
}

impl ManagedProvider for SdkMeterProvider {
    fn signal(&self) -> Signal {
        Signal::Metrics
    }

    fn shutdown(&self) -> OTelSdkResult {
        SdkMeterProvider::shutdown(self)
    }
}

impl ManagedProvider for SdkLoggerProvider {
    fn signal(&self) -> Signal {
        Signal::Logs
    }

    fn shutdown(&self) -> OTelSdkResult {
        SdkLoggerProvider::shutdown(self)
    }
}

/// One provider that failed to shut down cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    pub signal: Signal,
    pub message: String,
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} provider: {}", self.signal, self.message)
    }
}

/// Joined shutdown failures of every provider that did not close cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("telemetry shutdown failed: {}", join(.failures))]
pub struct ShutdownError {
    pub failures: Vec<ProviderFailure>,
}

fn join(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Wraps a provider so its shutdown runs at most once.
///
/// Later calls, including concurrent ones, observe the first call's result.
pub struct ProviderSlot {
    provider: Arc<dyn ManagedProvider>,
    outcome: OnceCell<Result<(), ProviderFailure>>,
}

impl ProviderSlot {
    pub fn new(provider: Arc<dyn ManagedProvider>) -> Self {
        Self {
            provider,
            outcome: OnceCell::new(),
        }
    }

    pub fn signal(&self) -> Signal {
        self.provider.signal()
    }

    /// Flush and close the provider, giving up when `deadline` passes.
    pub async fn shutdown(&self, deadline: Instant) -> Result<(), ProviderFailure> {
        self.outcome
            .get_or_init(|| async {
                let signal = self.provider.signal();
                let provider = Arc::clone(&self.provider);
                let task = tokio::task::spawn_blocking(move || provider.shutdown());

                let message = match tokio::time::timeout_at(deadline, task).await {
                    Ok(Ok(Ok(()))) => {
                        tracing::debug!(%signal, "Telemetry provider shut down");
                        return Ok(());
                    }
                    Ok(Ok(Err(e))) => e.to_string(),
                    Ok(Err(e)) => format!("shutdown task failed: {e}"),
                    Err(_) => "shutdown deadline exceeded".to_string(),
                };
                Err(ProviderFailure { signal, message })
            })
            .await
            .clone()
    }
}

/// Ordered set of constructed providers awaiting shutdown.
#[derive(Default)]
pub struct Teardown {
    slots: Mutex<Vec<Arc<ProviderSlot>>>,
}

impl Teardown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a successfully constructed provider.
    pub fn register(&self, provider: Arc<dyn ManagedProvider>) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(ProviderSlot::new(provider)));
    }

    /// Signals of the registered providers, in registration order.
    pub fn signals(&self) -> Vec<Signal> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|slot| slot.signal())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shut every registered provider down within `timeout`, joining all failures.
    ///
    /// Safe to call repeatedly: providers already shut down are not touched
    /// again and report their first result.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), ShutdownError> {
        let deadline = Instant::now() + timeout;
        let slots: Vec<Arc<ProviderSlot>> = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut failures = Vec::new();
        for slot in slots {
            if let Err(failure) = slot.shutdown(deadline).await {
                failures.push(failure);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ShutdownError { failures })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_sdk::error::OTelSdkError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeProvider {
        signal_kind: Option<Signal>,
        fail: bool,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl FakeProvider {
        fn new(signal: Signal) -> Arc<Self> {
            Arc::new(Self {
                signal_kind: Some(signal),
                ..Self::default()
            })
        }

        fn failing(signal: Signal) -> Arc<Self> {
            Arc::new(Self {
                signal_kind: Some(signal),
                fail: true,
                ..Self::default()
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ManagedProvider for FakeProvider {
        fn signal(&self) -> Signal {
            self.signal_kind.unwrap_or(Signal::Traces)
        }

        fn shutdown(&self) -> OTelSdkResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if self.fail {
                Err(OTelSdkError::InternalFailure("exporter unreachable".into()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let traces = FakeProvider::new(Signal::Traces);
        let teardown = Teardown::new();
        teardown.register(traces.clone());

        assert!(teardown.shutdown(Duration::from_secs(1)).await.is_ok());
        assert!(teardown.shutdown(Duration::from_secs(1)).await.is_ok());

        assert_eq!(traces.calls(), 1);
    }

    #[tokio::test]
    async fn test_all_failures_are_joined() {
        let traces = FakeProvider::failing(Signal::Traces);
        let metrics = FakeProvider::new(Signal::Metrics);
        let logs = FakeProvider::failing(Signal::Logs);

        let teardown = Teardown::new();
        teardown.register(traces.clone());
        teardown.register(metrics.clone());
        teardown.register(logs.clone());
        assert_eq!(
            teardown.signals(),
            vec![Signal::Traces, Signal::Metrics, Signal::Logs]
        );

        let err = teardown.shutdown(Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.failures.len(), 2);
        assert_eq!(err.failures[0].signal, Signal::Traces);
        assert_eq!(err.failures[1].signal, Signal::Logs);

        let message = err.to_string();
        assert!(message.contains("traces provider"));
        assert!(message.contains("logs provider"));

        // Every provider was visited despite the first failure.
        assert_eq!(metrics.calls(), 1);
    }

    #[tokio::test]
    async fn test_repeated_shutdown_returns_same_terminal_error() {
        let logs = FakeProvider::failing(Signal::Logs);
        let teardown = Teardown::new();
        teardown.register(logs.clone());

        let first = teardown.shutdown(Duration::from_secs(1)).await.unwrap_err();
        let second = teardown.shutdown(Duration::from_secs(1)).await.unwrap_err();

        assert_eq!(first, second);
        assert_eq!(logs.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_shutdown_runs_once() {
        let metrics = FakeProvider::new(Signal::Metrics);
        let teardown = Arc::new(Teardown::new());
        teardown.register(metrics.clone());

        let (a, b) = tokio::join!(
            teardown.shutdown(Duration::from_secs(1)),
            teardown.shutdown(Duration::from_secs(1))
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(metrics.calls(), 1);
    }

    #[tokio::test]
    async fn test_deadline_is_reported() {
        let slow = Arc::new(FakeProvider {
            signal_kind: Some(Signal::Metrics),
            delay: Duration::from_millis(300),
            ..FakeProvider::default()
        });
        let teardown = Teardown::new();
        teardown.register(slow);

        let err = teardown.shutdown(Duration::from_millis(20)).await.unwrap_err();
        assert_eq!(err.failures[0].message, "shutdown deadline exceeded");
    }

    #[tokio::test]
    async fn test_empty_teardown_is_clean() {
        let teardown = Teardown::new();
        assert!(teardown.is_empty());
        assert!(teardown.signals().is_empty());
        assert!(teardown.shutdown(Duration::from_millis(10)).await.is_ok());
    }
}
