//! HTTP listener and graceful drain.
//!
//! The listener runs as a background task so the controller can wait on a
//! shutdown signal at the same time. Every accepted connection is served by
//! its own tracked task. Draining stops accepting, asks open connections to
//! finish their in-flight requests, and once the grace period is over drops
//! whatever is still running.

use axum::Router;
use hyper::rt::Executor;
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder;
use hyper_util::service::TowerToHyperService;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::pin;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Pause after an accept error that is not tied to a single connection.
const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("listener failed: {0}")]
    Serve(#[source] io::Error),

    #[error("listener task failed: {0}")]
    Task(#[source] JoinError),
}

/// Bind the TCP listener.
pub async fn bind(addr: &str) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })
}

/// Spawns connection sub-tasks (HTTP/2 streams) so they are tracked and
/// dropped together with their connection on force-close.
#[derive(Clone)]
struct ConnectionExecutor {
    tracker: TaskTracker,
    force: CancellationToken,
}

impl<Fut> Executor<Fut> for ConnectionExecutor
where
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    fn execute(&self, fut: Fut) {
        let force = self.force.clone();
        self.tracker.spawn(async move {
            force.run_until_cancelled(fut).await;
        });
    }
}

/// A listener serving in the background.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    force: CancellationToken,
    connections: TaskTracker,
    task: JoinHandle<()>,
    accept_finished: bool,
}

impl ServerHandle {
    /// Start serving `router` on `listener` until `shutdown` is cancelled.
    pub fn spawn(
        listener: TcpListener,
        router: Router,
        shutdown: CancellationToken,
    ) -> Result<Self, ServerError> {
        let local_addr = listener.local_addr().map_err(ServerError::Serve)?;
        let force = CancellationToken::new();
        let connections = TaskTracker::new();

        let executor = ConnectionExecutor {
            tracker: connections.clone(),
            force: force.clone(),
        };
        let task = tokio::spawn(accept_loop(listener, router, shutdown.clone(), executor));

        Ok(Self {
            local_addr,
            shutdown,
            force,
            connections,
            task,
            accept_finished: false,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connections still being served.
    pub fn open_connections(&self) -> usize {
        self.connections.len()
    }

    /// Resolves when the accept loop ends, normally only after shutdown.
    ///
    /// Must not be polled again once it has resolved. Open connections are
    /// still served until [`ServerHandle::drain`].
    pub async fn stopped(&mut self) -> Result<(), ServerError> {
        let result = (&mut self.task).await;
        self.accept_finished = true;
        result.map_err(ServerError::Task)
    }

    /// Stop accepting, wait up to `grace` for in-flight requests, then force-close.
    pub async fn drain(mut self, grace: Duration) -> Result<(), ServerError> {
        self.shutdown.cancel();
        let accepted = if self.accept_finished {
            Ok(())
        } else {
            (&mut self.task).await.map_err(ServerError::Task)
        };

        self.connections.close();
        if tokio::time::timeout(grace, self.connections.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                grace_ms = grace.as_millis() as u64,
                open_connections = self.connections.len(),
                "Grace period elapsed, closing remaining connections"
            );
            self.force.cancel();
            self.connections.wait().await;
        }
        accepted
    }
}

async fn accept_loop(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
    executor: ConnectionExecutor,
) {
    loop {
        let accepted = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                tracing::trace!(%peer, "Connection accepted");
                let connection = serve_connection(
                    stream,
                    router.clone(),
                    shutdown.clone(),
                    executor.clone(),
                );
                executor.tracker.spawn(connection);
            }
            Err(e) if is_connection_error(&e) => {
                tracing::debug!(error = %e, "Connection failed during accept");
            }
            Err(e) => {
                tracing::error!(error = %e, "Accept failed");
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                }
            }
        }
    }
    tracing::info!("Shutdown signal received, no longer accepting connections");
}

async fn serve_connection(
    stream: TcpStream,
    router: Router,
    shutdown: CancellationToken,
    executor: ConnectionExecutor,
) {
    let force = executor.force.clone();
    let builder = Builder::new(executor);
    let mut conn = pin!(builder.serve_connection_with_upgrades(
        TokioIo::new(stream),
        TowerToHyperService::new(router),
    ));

    let result = tokio::select! {
        result = conn.as_mut() => Some(result),
        () = shutdown.cancelled() => {
            conn.as_mut().graceful_shutdown();
            force.run_until_cancelled(conn.as_mut()).await
        }
    };
    match result {
        Some(Err(e)) => tracing::debug!(error = %e, "Connection closed with error"),
        Some(Ok(())) => {}
        None => tracing::debug!("Connection force-closed"),
    }
}

fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}
