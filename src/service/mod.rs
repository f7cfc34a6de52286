//! HTTP surface of the todo service.
//!
//! Routes:
//! - `GET /todos`, `POST /todos`
//! - `GET /todos/{id}`, `PUT /todos/{id}`, `DELETE /todos/{id}`

pub mod handlers;
pub mod store;

pub use store::{Todo, TodoStore};

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry_sdk::trace::SdkTracer;
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::{RequestBodyTimeoutLayer, TimeoutLayer};

use crate::observability::metrics::OperationMetrics;
use crate::observability::propagation::composite_propagator;
use crate::observability::{Telemetry, INSTRUMENTATION_SCOPE};

/// Everything a handler needs, handed over at router construction.
pub struct AppState {
    pub store: Arc<TodoStore>,
    pub tracer: SdkTracer,
    pub metrics: OperationMetrics,
    pub propagator: Arc<TextMapCompositePropagator>,
}

impl AppState {
    /// Create handler state from telemetry providers and a store.
    pub fn new(telemetry: &Telemetry, store: Arc<TodoStore>) -> Self {
        Self {
            store,
            tracer: telemetry.tracer(INSTRUMENTATION_SCOPE),
            metrics: OperationMetrics::new(&telemetry.meter(INSTRUMENTATION_SCOPE)),
            propagator: Arc::new(composite_propagator()),
        }
    }
}

/// Build the router with request body (read) and response (write) deadlines.
///
/// A request still running when the write deadline passes is answered with
/// `408 Request Timeout`.
pub fn create_router(state: Arc<AppState>, read_timeout: Duration, write_timeout: Duration) -> Router {
    Router::new()
        .route("/todos", get(handlers::list_todos).post(handlers::add_todo))
        .route(
            "/todos/{id}",
            get(handlers::get_todo)
                .put(handlers::update_todo)
                .delete(handlers::delete_todo),
        )
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            write_timeout,
        ))
        .layer(RequestBodyTimeoutLayer::new(read_timeout))
        .with_state(state)
}
