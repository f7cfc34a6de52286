//! Scoped spans.
//!
//! A [`SpanScope`] owns one started span and ends it when dropped, so every
//! exit path of a handler (success, validation error, not found, panic
//! unwinding) ends the span exactly once.

use opentelemetry::trace::{SpanKind, Status, TraceContextExt, Tracer};
use opentelemetry::{Context, ContextGuard, KeyValue};
use opentelemetry_sdk::trace::SdkTracer;
use std::borrow::Cow;
use std::error::Error;

/// A started span plus the context that carries it as the active span.
pub struct SpanScope {
    tracer: SdkTracer,
    cx: Context,
}

impl SpanScope {
    /// Start a span as a child of `parent` (which may carry a remote span).
    pub fn start(
        tracer: &SdkTracer,
        name: impl Into<Cow<'static, str>>,
        kind: SpanKind,
        attributes: Vec<KeyValue>,
        parent: &Context,
    ) -> Self {
        let span = tracer
            .span_builder(name)
            .with_kind(kind)
            .with_attributes(attributes)
            .start_with_context(tracer, parent);

        Self {
            tracer: tracer.clone(),
            cx: parent.with_span(span),
        }
    }

    /// Start an internal child span for one phase of this scope's work.
    pub fn child(&self, name: impl Into<Cow<'static, str>>) -> SpanScope {
        SpanScope::start(&self.tracer, name, SpanKind::Internal, Vec::new(), &self.cx)
    }

    /// The context carrying this scope's span as active span.
    pub fn context(&self) -> &Context {
        &self.cx
    }

    /// Make this span current on this thread until the guard drops.
    ///
    /// The guard is `!Send`; hold it only across synchronous code.
    pub fn attach(&self) -> ContextGuard {
        self.cx.clone().attach()
    }

    pub fn set_attribute(&self, attribute: KeyValue) {
        self.cx.span().set_attribute(attribute);
    }

    pub fn add_event(&self, name: impl Into<Cow<'static, str>>, attributes: Vec<KeyValue>) {
        self.cx.span().add_event(name, attributes);
    }

    /// Record `err` as an exception event and mark the span as failed.
    pub fn record_error(&self, err: &dyn Error) {
        let span = self.cx.span();
        span.record_error(err);
        span.set_status(Status::error(err.to_string()));
    }
}

impl Drop for SpanScope {
    fn drop(&mut self) {
        self.cx.span().end();
    }
}
