//! Per-operation metrics.
//!
//! Key metrics:
//! - todo.operations: Counter of handled operations by operation and outcome
//! - todo.duration: Histogram of operation duration in seconds
//!
//! Both carry `operation` and `status` attributes. Duration is recorded for
//! every outcome, including failures.

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;
use std::fmt;
use std::time::Duration;

/// Name of the operation counter.
pub const OPERATIONS_COUNTER: &str = "todo.operations";
/// Name of the duration histogram.
pub const DURATION_HISTOGRAM: &str = "todo.duration";

/// Result class of one handled operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error,
    NotFound,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Error => "error",
            Outcome::NotFound => "not_found",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counter and duration histogram shared by all request handlers.
///
/// Instruments are created once and are safe to record from any task.
#[derive(Debug, Clone)]
pub struct OperationMetrics {
    operations: Counter<u64>,
    duration: Histogram<f64>,
}

impl OperationMetrics {
    /// Create the instruments from a meter.
    pub fn new(meter: &Meter) -> Self {
        Self {
            operations: meter
                .u64_counter(OPERATIONS_COUNTER)
                .with_description("Number of todo operations")
                .with_unit("1")
                .build(),
            duration: meter
                .f64_histogram(DURATION_HISTOGRAM)
                .with_description("Duration of todo operations")
                .with_unit("s")
                .build(),
        }
    }

    /// Count one operation and record its duration.
    pub fn record(&self, operation: &'static str, outcome: Outcome, elapsed: Duration) {
        let attributes = [
            KeyValue::new("operation", operation),
            KeyValue::new("status", outcome.as_str()),
        ];
        self.duration.record(elapsed.as_secs_f64(), &attributes);
        self.operations.add(1, &attributes);
    }
}
