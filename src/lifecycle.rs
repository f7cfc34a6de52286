//! Service lifecycle controller.
//!
//! State machine: `Init → Running → Draining → Stopped`.
//! - Init: telemetry providers are built; a failure skips Running entirely
//! - Running: the listener serves until a signal or a listener failure
//! - Draining: the listener drains within the grace period, then every
//!   telemetry provider is shut down under one shared deadline
//! - Stopped: terminal, the joined result is reported
//!
//! The current state is published on a watch channel.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::observability::logging::init_logging;
use crate::observability::propagation::install_global_propagator;
use crate::observability::{ShutdownError, StartupFailure, Telemetry, TelemetryError};
use crate::server::{self, ServerError, ServerHandle};
use crate::service::{create_router, AppState, TodoStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Init,
    Running,
    Draining,
    Stopped,
}

impl LifecycleState {
    /// Whether moving from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Init, Running) | (Init, Draining) | (Running, Draining) | (Draining, Stopped)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Init => "init",
            LifecycleState::Running => "running",
            LifecycleState::Draining => "draining",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    /// The listener failed. `shutdown` is the outcome of the telemetry
    /// teardown that followed.
    #[error("{source}{}", shutdown_suffix(.shutdown))]
    Listener {
        #[source]
        source: ServerError,
        shutdown: Result<(), ShutdownError>,
    },

    #[error(transparent)]
    Shutdown(#[from] ShutdownError),

    #[error("illegal lifecycle transition {from} -> {to}")]
    IllegalTransition {
        from: LifecycleState,
        to: LifecycleState,
    },
}

fn shutdown_suffix(shutdown: &Result<(), ShutdownError>) -> String {
    match shutdown {
        Ok(()) => String::new(),
        Err(e) => format!("; {e}"),
    }
}

/// Observable state plus the top-level cancellation signal.
pub struct Lifecycle {
    state: watch::Sender<LifecycleState>,
    cancel: CancellationToken,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(LifecycleState::Init);
        Self {
            state,
            cancel: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Token cancelled once when shutdown is requested.
    ///
    /// Cancellation is sticky: a request made before the listener starts is
    /// still observed when it does.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request shutdown. Repeated calls have no further effect.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    pub fn transition(&self, next: LifecycleState) -> Result<(), LifecycleError> {
        let mut result = Ok(());
        self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                tracing::debug!(from = %current, to = %next, "Lifecycle transition");
                *current = next;
                true
            } else {
                result = Err(LifecycleError::IllegalTransition {
                    from: *current,
                    to: next,
                });
                false
            }
        });
        result
    }
}

/// Cancel `cancel` on SIGINT (Ctrl+C) or, on unix, SIGTERM.
pub fn spawn_signal_listener(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            () = wait_for_signal() => cancel.cancel(),
            () = cancel.cancelled() => {}
        }
    })
}

async fn wait_for_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown"),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM, initiating shutdown");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Run the service: bring telemetry up, serve until a signal, then drain.
pub async fn run(config: Config) -> Result<(), LifecycleError> {
    let lifecycle = Lifecycle::new();
    let signals = spawn_signal_listener(lifecycle.cancellation_token());

    let result = start_and_serve(&lifecycle, &config).await;

    signals.abort();
    result
}

async fn start_and_serve(lifecycle: &Lifecycle, config: &Config) -> Result<(), LifecycleError> {
    let telemetry = match Telemetry::build(config).await {
        Ok(telemetry) => telemetry,
        Err(failure) => {
            return Err(abort_startup(lifecycle, failure, config.shutdown_timeout()).await);
        }
    };
    install_global_propagator();

    // Without a subscriber the service still runs, only console and log export are lost.
    if let Err(e) = init_logging(config, telemetry.logger_provider()) {
        eprintln!("warning: {e}");
    }

    let listener = match server::bind(&config.listen_addr()).await {
        Ok(listener) => listener,
        Err(source) => {
            tracing::error!(error = %source, "Failed to start listener");
            lifecycle.transition(LifecycleState::Draining)?;
            let shutdown = telemetry.shutdown(config.shutdown_timeout()).await;
            lifecycle.transition(LifecycleState::Stopped)?;
            return Err(LifecycleError::Listener { source, shutdown });
        }
    };

    serve(lifecycle, listener, telemetry, config).await
}

/// Release a partially built telemetry while `Draining` is published, then stop.
async fn abort_startup(
    lifecycle: &Lifecycle,
    failure: StartupFailure,
    timeout: Duration,
) -> LifecycleError {
    if let Err(e) = lifecycle.transition(LifecycleState::Draining) {
        return e;
    }
    let err = failure.release(timeout).await;
    match lifecycle.transition(LifecycleState::Stopped) {
        Ok(()) => err.into(),
        Err(e) => e,
    }
}

/// Serve on an already bound listener with already built telemetry.
///
/// Returns once the lifecycle reaches `Stopped`.
pub async fn serve(
    lifecycle: &Lifecycle,
    listener: TcpListener,
    telemetry: Telemetry,
    config: &Config,
) -> Result<(), LifecycleError> {
    let state = Arc::new(AppState::new(&telemetry, Arc::new(TodoStore::seeded())));
    let router = create_router(state, config.read_timeout(), config.write_timeout());

    lifecycle.transition(LifecycleState::Running)?;
    let mut server = match ServerHandle::spawn(listener, router, lifecycle.cancellation_token()) {
        Ok(server) => server,
        Err(source) => {
            lifecycle.transition(LifecycleState::Draining)?;
            return finish(lifecycle, &telemetry, config, Err(source)).await;
        }
    };
    tracing::info!(address = %server.local_addr(), "Server listening");

    let stopped_early = tokio::select! {
        () = lifecycle.cancel.cancelled() => None,
        result = server.stopped() => Some(result),
    };

    lifecycle.transition(LifecycleState::Draining)?;
    if let Some(Err(e)) = &stopped_early {
        tracing::error!(error = %e, "Listener stopped unexpectedly");
    }
    tracing::info!(
        grace_ms = config.grace_period_ms,
        "Draining in-flight requests"
    );
    let drained = server.drain(config.grace_period()).await;
    let listener_result = match stopped_early {
        Some(result) => result.and(drained),
        None => drained,
    };
    lifecycle.shutdown();

    finish(lifecycle, &telemetry, config, listener_result).await
}

/// Shut telemetry down, enter `Stopped` and join the listener and shutdown results.
async fn finish(
    lifecycle: &Lifecycle,
    telemetry: &Telemetry,
    config: &Config,
    listener: Result<(), ServerError>,
) -> Result<(), LifecycleError> {
    let shutdown = telemetry.shutdown(config.shutdown_timeout()).await;
    if let Err(e) = &shutdown {
        tracing::error!(error = %e, "Telemetry shutdown failed");
    }
    lifecycle.transition(LifecycleState::Stopped)?;
    tracing::info!("Service stopped");

    match (listener, shutdown) {
        (Ok(()), Ok(())) => Ok(()),
        (Ok(()), Err(e)) => Err(LifecycleError::Shutdown(e)),
        (Err(source), shutdown) => Err(LifecycleError::Listener { source, shutdown }),
    }
}
