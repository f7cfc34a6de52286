//! Test utilities and server harness for todo-otel tests.
//!
//! Provides:
//! - In-memory telemetry: spans, metrics and logs land in inspectable exporters
//!   that keep their contents after the providers shut down
//! - `TestApp`: the router driven in-process with `tower::ServiceExt::oneshot`
//! - `TestServer`: the full lifecycle serving on a random loopback port

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use opentelemetry::trace::{SpanId, SpanKind};
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::logs::{
    InMemoryLogExporter, LogBatch, LogExporter, SdkLogRecord, SdkLoggerProvider,
};
use opentelemetry_sdk::metrics::data::{AggregatedMetrics, MetricData};
use opentelemetry_sdk::metrics::{InMemoryMetricExporter, PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{
    BatchConfigBuilder, BatchSpanProcessor, InMemorySpanExporter, SdkTracerProvider, SpanData,
    SpanExporter,
};
use opentelemetry_sdk::Resource;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower::ServiceExt;

use todo_otel::config::Config;
use todo_otel::lifecycle::{self, Lifecycle, LifecycleError, LifecycleState};
use todo_otel::observability::metrics::{DURATION_HISTOGRAM, OPERATIONS_COUNTER};
use todo_otel::observability::resource::{build_resource, ServiceIdentity};
use todo_otel::observability::Telemetry;
use todo_otel::server;
use todo_otel::service::{create_router, AppState, TodoStore};

/// In-memory span exporter that keeps its spans when the provider shuts down.
#[derive(Debug, Clone, Default)]
pub struct RetainedSpans(InMemorySpanExporter);

impl RetainedSpans {
    pub fn finished(&self) -> Vec<SpanData> {
        self.0.get_finished_spans().unwrap()
    }
}

impl SpanExporter for RetainedSpans {
    async fn export(&self, batch: Vec<SpanData>) -> OTelSdkResult {
        self.0.export(batch).await
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.0.set_resource(resource);
    }
}

/// In-memory log exporter that keeps its records when the provider shuts down.
#[derive(Debug, Clone, Default)]
pub struct RetainedLogs(InMemoryLogExporter);

impl RetainedLogs {
    pub fn records(&self) -> Vec<SdkLogRecord> {
        self.0
            .get_emitted_logs()
            .unwrap()
            .into_iter()
            .map(|log| log.record)
            .collect()
    }
}

impl LogExporter for RetainedLogs {
    async fn export(&self, batch: LogBatch<'_>) -> OTelSdkResult {
        self.0.export(batch).await
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.0.set_resource(resource);
    }
}

/// Telemetry whose three providers export into memory.
pub struct TestTelemetry {
    pub spans: RetainedSpans,
    pub metrics: InMemoryMetricExporter,
    pub logs: RetainedLogs,
    meter_provider: SdkMeterProvider,
}

impl TestTelemetry {
    /// Build in-memory exporters and a [`Telemetry`] wired to them.
    ///
    /// Spans and log records are exported as soon as they end.
    pub fn new(config: &Config) -> (Self, Telemetry) {
        let spans = RetainedSpans::default();
        let tracer_provider = SdkTracerProvider::builder().with_simple_exporter(spans.clone());
        Self::assemble(config, spans, tracer_provider)
    }

    /// Like [`TestTelemetry::new`], but spans stay buffered until the provider
    /// is flushed or shut down.
    pub fn batched(config: &Config) -> (Self, Telemetry) {
        let spans = RetainedSpans::default();
        let processor = BatchSpanProcessor::builder(spans.clone())
            .with_batch_config(
                BatchConfigBuilder::default()
                    .with_scheduled_delay(Duration::from_secs(3600))
                    .build(),
            )
            .build();
        let tracer_provider = SdkTracerProvider::builder().with_span_processor(processor);
        Self::assemble(config, spans, tracer_provider)
    }

    fn assemble(
        config: &Config,
        spans: RetainedSpans,
        tracer_provider: opentelemetry_sdk::trace::TracerProviderBuilder,
    ) -> (Self, Telemetry) {
        let metrics = InMemoryMetricExporter::default();
        let logs = RetainedLogs::default();
        let resource = build_resource(&ServiceIdentity::from_config(config));

        let tracer_provider = tracer_provider.with_resource(resource.clone()).build();
        let meter_provider = SdkMeterProvider::builder()
            .with_resource(resource.clone())
            .with_reader(PeriodicReader::builder(metrics.clone()).build())
            .build();
        let logger_provider = SdkLoggerProvider::builder()
            .with_resource(resource.clone())
            .with_simple_exporter(logs.clone())
            .build();

        let telemetry = Telemetry::from_providers(
            resource,
            tracer_provider,
            meter_provider.clone(),
            logger_provider,
        );
        (
            Self {
                spans,
                metrics,
                logs,
                meter_provider,
            },
            telemetry,
        )
    }

    pub fn finished_spans(&self) -> Vec<SpanData> {
        self.spans.finished()
    }

    /// Root (server) spans with the given operation name.
    pub fn root_spans(&self, name: &str) -> Vec<SpanData> {
        self.finished_spans()
            .into_iter()
            .filter(|span| span.span_kind == SpanKind::Server && span.name == name)
            .collect()
    }

    /// Spans whose parent is `parent`.
    pub fn children_of(&self, parent: &SpanData) -> Vec<SpanData> {
        let parent_id = parent.span_context.span_id();
        self.finished_spans()
            .into_iter()
            .filter(|span| span.parent_span_id == parent_id && parent_id != SpanId::INVALID)
            .collect()
    }

    /// Current value of `todo.operations{operation, status}`.
    pub fn counter(&self, operation: &str, status: &str) -> u64 {
        self.meter_provider.force_flush().unwrap();
        let exported = self.metrics.get_finished_metrics().unwrap();
        let Some(latest) = exported.last() else {
            return 0;
        };
        latest
            .scope_metrics()
            .flat_map(|scope| scope.metrics())
            .filter(|metric| metric.name() == OPERATIONS_COUNTER)
            .filter_map(|metric| match metric.data() {
                AggregatedMetrics::U64(MetricData::Sum(sum)) => Some(sum),
                _ => None,
            })
            .flat_map(|sum| sum.data_points())
            .filter(|point| {
                let mut operation_matches = false;
                let mut status_matches = false;
                for kv in point.attributes() {
                    match kv.key.as_str() {
                        "operation" => operation_matches = kv.value.as_str() == operation,
                        "status" => status_matches = kv.value.as_str() == status,
                        _ => {}
                    }
                }
                operation_matches && status_matches
            })
            .map(|point| point.value())
            .sum()
    }

    /// Number of `todo.duration` samples for `operation`, across all outcomes.
    pub fn duration_samples(&self, operation: &str) -> u64 {
        self.meter_provider.force_flush().unwrap();
        let exported = self.metrics.get_finished_metrics().unwrap();
        let Some(latest) = exported.last() else {
            return 0;
        };
        latest
            .scope_metrics()
            .flat_map(|scope| scope.metrics())
            .filter(|metric| metric.name() == DURATION_HISTOGRAM)
            .filter_map(|metric| match metric.data() {
                AggregatedMetrics::F64(MetricData::Histogram(histogram)) => Some(histogram),
                _ => None,
            })
            .flat_map(|histogram| histogram.data_points())
            .filter(|point| {
                point
                    .attributes()
                    .any(|kv| kv.key.as_str() == "operation" && kv.value.as_str() == operation)
            })
            .map(|point| point.count())
            .sum()
    }
}

/// The router driven in-process, without a socket.
pub struct TestApp {
    pub router: Router,
    pub telemetry: TestTelemetry,
    pub store: Arc<TodoStore>,
    pub providers: Telemetry,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(Config::test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let (telemetry, providers) = TestTelemetry::new(&config);
        let store = Arc::new(TodoStore::seeded());
        let state = Arc::new(AppState::new(&providers, Arc::clone(&store)));
        let router = create_router(state, config.read_timeout(), config.write_timeout());
        Self {
            router,
            telemetry,
            store,
            providers,
        }
    }

    /// Send one request through the router.
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<&str>) -> Response<Body> {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a response body as JSON.
pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// The full lifecycle serving on a random loopback port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    pub telemetry: TestTelemetry,
    pub lifecycle: Arc<Lifecycle>,
    task: JoinHandle<Result<(), LifecycleError>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(Config::test_config()).await
    }

    pub async fn start_with(config: Config) -> Self {
        let (telemetry, providers) = TestTelemetry::new(&config);
        Self::launch(config, telemetry, providers).await
    }

    /// Start with spans buffered until telemetry shuts down.
    pub async fn start_batched() -> Self {
        let config = Config::test_config();
        let (telemetry, providers) = TestTelemetry::batched(&config);
        Self::launch(config, telemetry, providers).await
    }

    async fn launch(config: Config, telemetry: TestTelemetry, providers: Telemetry) -> Self {
        let listener = server::bind(&config.listen_addr()).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let lifecycle = Arc::new(Lifecycle::new());
        let running = Arc::clone(&lifecycle);
        let task = tokio::spawn(async move {
            lifecycle::serve(&running, listener, providers, &config).await
        });

        let mut states = lifecycle.subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|state| *state != LifecycleState::Init),
        )
        .await
        .unwrap()
        .unwrap();

        Self {
            addr,
            client: reqwest::Client::new(),
            telemetry,
            lifecycle,
            task,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Request shutdown and wait for the lifecycle to finish.
    pub async fn stop(self) -> Result<(), LifecycleError> {
        self.lifecycle.shutdown();
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .unwrap()
            .unwrap()
    }
}
