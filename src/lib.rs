//! Todo OTel: a todo list HTTP service instrumented with OpenTelemetry.
//!
//! Every request produces a server span (with child spans for its internal
//! phases), trace-correlated log records, and a counter + duration histogram
//! sample. All three signals are exported over OTLP/HTTP to a collector.
//!
//! # Architecture
//!
//! - **Explicit dependencies**: handlers receive tracer, metrics, propagator
//!   and store through [`service::AppState`], never through package globals
//! - **Scoped spans**: [`observability::span::SpanScope`] ends its span on drop
//! - **Idempotent teardown**: every provider shuts down exactly once and
//!   failures are joined into one [`observability::shutdown::ShutdownError`]
//!
//! # Modules
//!
//! - [`config`]: CLI and environment configuration
//! - [`lifecycle`]: Init → Running → Draining → Stopped controller
//! - [`observability`]: Resource, exporters, providers, propagation, spans, metrics, logs
//! - [`server`]: HTTP listener with graceful drain
//! - [`service`]: Router, handlers and the in-memory todo store

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions, // service::store::TodoStore is fine
    clippy::must_use_candidate,      // Not all functions need #[must_use]
    clippy::missing_errors_doc,      // Error docs can be verbose
    clippy::missing_panics_doc,      // Panic docs can be verbose
    clippy::struct_excessive_bools,  // Config structs may have flags
    clippy::too_many_lines           // Some functions are inherently long
)]

pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod server;
pub mod service;

use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable) todo ID.
///
/// # Example
///
/// ```
/// let id = todo_otel::generate_todo_id();
/// assert!(id.len() == 36); // UUID string format
/// ```
#[must_use]
pub fn generate_todo_id() -> String {
    Uuid::now_v7().to_string()
}

/// Generate a fresh random identifier for this process instance.
#[must_use]
pub fn generate_instance_id() -> String {
    Uuid::new_v4().to_string()
}
