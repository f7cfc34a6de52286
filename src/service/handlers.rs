//! Instrumented request handlers.
//!
//! Every operation runs through [`instrumented`], which:
//! - extracts the caller's trace context from the request headers
//! - starts a `Server` root span named after the operation and makes it current
//! - logs the outcome inside that span so records are trace-correlated
//! - counts the operation and records its duration on every exit path
//!
//! Handler bodies are synchronous. The attached context guard is never held
//! across an await point.

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use opentelemetry::trace::SpanKind;
use opentelemetry::KeyValue;
use opentelemetry_semantic_conventions::trace::{
    HTTP_REQUEST_METHOD, HTTP_RESPONSE_STATUS_CODE, HTTP_ROUTE, URL_PATH,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use super::store::{NewTodo, StoreError, TodoUpdate};
use super::AppState;
use crate::observability::metrics::Outcome;
use crate::observability::propagation::extract_context;
use crate::observability::span::SpanScope;

/// Span attribute carrying the todo id once it is known.
pub const TODO_ID: &str = "todo.id";

/// The five operations of the todo API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ListTodos,
    GetTodo,
    AddTodo,
    UpdateTodo,
    DeleteTodo,
}

impl Operation {
    /// Root span name and `operation` metric attribute.
    pub fn name(self) -> &'static str {
        match self {
            Operation::ListTodos => "ListTodos",
            Operation::GetTodo => "GetTodo",
            Operation::AddTodo => "AddTodo",
            Operation::UpdateTodo => "UpdateTodo",
            Operation::DeleteTodo => "DeleteTodo",
        }
    }

    pub fn method(self) -> &'static str {
        match self {
            Operation::ListTodos | Operation::GetTodo => "GET",
            Operation::AddTodo => "POST",
            Operation::UpdateTodo => "PUT",
            Operation::DeleteTodo => "DELETE",
        }
    }

    pub fn route(self) -> &'static str {
        match self {
            Operation::ListTodos | Operation::AddTodo => "/todos",
            _ => "/todos/{id}",
        }
    }
}

/// Failure surfaced to the HTTP caller.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("invalid request body: {0}")]
    InvalidBody(#[source] serde_json::Error),

    #[error("request body rejected: {0}")]
    Body(#[from] BytesRejection),

    #[error(transparent)]
    NotFound(#[from] StoreError),
}

impl RequestError {
    pub fn status(&self) -> StatusCode {
        match self {
            RequestError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            RequestError::Body(rejection) => rejection.status(),
            RequestError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    pub fn outcome(&self) -> Outcome {
        match self {
            RequestError::InvalidBody(_) | RequestError::Body(_) => Outcome::Error,
            RequestError::NotFound(_) => Outcome::NotFound,
        }
    }

    /// Message safe to return to the caller.
    pub fn public_message(&self) -> &'static str {
        match self {
            RequestError::InvalidBody(_) => "invalid request body",
            RequestError::Body(_) => "request body rejected",
            RequestError::NotFound(_) => "todo not found",
        }
    }
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.public_message() });
        (self.status(), Json(body)).into_response()
    }
}

/// Run one operation inside its root span and record its telemetry.
///
/// Validation failures and rejected bodies mark the span as failed. Not-found is an expected
/// outcome: it is logged and counted separately but leaves the span status unset.
fn instrumented<F>(
    state: &AppState,
    operation: Operation,
    headers: &HeaderMap,
    path: &str,
    handle: F,
) -> Response
where
    F: FnOnce(&SpanScope) -> Result<Response, RequestError>,
{
    let parent = extract_context(state.propagator.as_ref(), headers);
    let scope = SpanScope::start(
        &state.tracer,
        operation.name(),
        SpanKind::Server,
        vec![
            KeyValue::new(HTTP_REQUEST_METHOD, operation.method()),
            KeyValue::new(HTTP_ROUTE, operation.route()),
            KeyValue::new(URL_PATH, path.to_string()),
        ],
        &parent,
    );
    let _attached = scope.attach();
    let started = Instant::now();

    let (response, outcome) = match handle(&scope) {
        Ok(response) => {
            tracing::info!(
                operation = operation.name(),
                status = response.status().as_u16(),
                "Operation succeeded"
            );
            (response, Outcome::Success)
        }
        Err(err) => {
            match &err {
                RequestError::InvalidBody(_) | RequestError::Body(_) => scope.record_error(&err),
                RequestError::NotFound(_) => scope.add_event("todo.not_found", Vec::new()),
            }
            tracing::error!(
                operation = operation.name(),
                error = %err,
                "Operation failed"
            );
            let outcome = err.outcome();
            (err.into_response(), outcome)
        }
    };

    scope.set_attribute(KeyValue::new(
        HTTP_RESPONSE_STATUS_CODE,
        i64::from(response.status().as_u16()),
    ));
    state
        .metrics
        .record(operation.name(), outcome, started.elapsed());
    response
}

/// Parse a JSON body inside a `decode` child span.
fn decode<T: DeserializeOwned>(scope: &SpanScope, body: &[u8]) -> Result<T, RequestError> {
    let span = scope.child("decode");
    serde_json::from_slice(body).map_err(|e| {
        let err = RequestError::InvalidBody(e);
        span.record_error(&err);
        err
    })
}

fn tag_id(scope: &SpanScope, id: &str) {
    scope.set_attribute(KeyValue::new(TODO_ID, id.to_string()));
}

/// `GET /todos`
pub async fn list_todos(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    instrumented(&state, Operation::ListTodos, &headers, uri.path(), |scope| {
        let todos = {
            let _read = scope.child("store.read");
            state.store.list()
        };
        Ok(Json(todos).into_response())
    })
}

/// `GET /todos/{id}`
pub async fn get_todo(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    instrumented(&state, Operation::GetTodo, &headers, uri.path(), |scope| {
        tag_id(scope, &id);
        let todo = {
            let _read = scope.child("store.read");
            state.store.get(&id)?
        };
        Ok(Json(todo).into_response())
    })
}

/// `POST /todos`
pub async fn add_todo(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    uri: Uri,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    instrumented(&state, Operation::AddTodo, &headers, uri.path(), |scope| {
        let body = body?;
        let new: NewTodo = decode(scope, &body)?;
        let todo = {
            let _write = scope.child("store.write");
            state.store.create(new)
        };
        tag_id(scope, &todo.id);
        scope.add_event("todo.created", vec![KeyValue::new(TODO_ID, todo.id.clone())]);
        Ok((StatusCode::CREATED, Json(todo)).into_response())
    })
}

/// `PUT /todos/{id}`
pub async fn update_todo(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    uri: Uri,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    instrumented(&state, Operation::UpdateTodo, &headers, uri.path(), |scope| {
        tag_id(scope, &id);
        let body = body?;
        let update: TodoUpdate = decode(scope, &body)?;
        let todo = {
            let _write = scope.child("store.write");
            state.store.update(&id, update)?
        };
        scope.add_event("todo.updated", Vec::new());
        Ok(Json(todo).into_response())
    })
}

/// `DELETE /todos/{id}`
pub async fn delete_todo(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    instrumented(&state, Operation::DeleteTodo, &headers, uri.path(), |scope| {
        tag_id(scope, &id);
        {
            let _write = scope.child("store.write");
            state.store.delete(&id)?;
        }
        scope.add_event("todo.deleted", Vec::new());
        Ok(StatusCode::NO_CONTENT.into_response())
    })
}
