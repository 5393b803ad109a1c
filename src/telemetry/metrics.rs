//! Metric sink for the load engine.
//!
//! Runners on every schedule hammer the same operation-keyed instruments
//! concurrently, so implementations must be safe for concurrent update.
//! The production sink uses the OTel Meter API with the globally-registered
//! `MeterProvider`; instruments are created once from the `"dbramp"` meter.

use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};

/// Where the engine reports what it observed.
///
/// Aggregation is per operation name; the tenant name only survives in the
/// per-tenant count gauges.
pub trait MetricsSink: Send + Sync {
    /// One tenant was provisioned, taking `elapsed`.
    fn tenant_created(&self, elapsed: Duration);

    /// One operation invocation finished. Failures are recorded too —
    /// they still take measurable time.
    fn operation_observed(&self, operation: &str, tenant: &str, elapsed: Duration, ok: bool);

    /// A counting operation observed `value` rows for `tenant`.
    fn tenant_count(&self, operation: &str, tenant: &str, value: i64);
}

/// Returns the shared meter for dbramp instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("dbramp")
}

/// `MetricsSink` over OTel instruments.
pub struct OtelMetrics {
    tenants_created: Counter<u64>,
    tenant_creation_ms: Histogram<f64>,
    operation_duration_ms: Histogram<f64>,
    operation_errors: Counter<u64>,
    tenant_rows: Gauge<i64>,
}

impl OtelMetrics {
    pub fn new() -> Self {
        let meter = meter();
        Self {
            tenants_created: meter
                .u64_counter("dbramp.tenants.created")
                .with_description("Total number of tenants provisioned")
                .build(),
            tenant_creation_ms: meter
                .f64_histogram("dbramp.tenant.creation_ms")
                .with_description("Tenant provisioning duration in milliseconds")
                .with_unit("ms")
                .build(),
            operation_duration_ms: meter
                .f64_histogram("dbramp.operation.duration_ms")
                .with_description("Operation invocation duration in milliseconds")
                .with_unit("ms")
                .build(),
            operation_errors: meter
                .u64_counter("dbramp.operation.errors")
                .with_description("Number of failed operation invocations")
                .build(),
            tenant_rows: meter
                .i64_gauge("dbramp.tenant.rows")
                .with_description("Row counts observed by counting operations")
                .build(),
        }
    }
}

impl Default for OtelMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for OtelMetrics {
    fn tenant_created(&self, elapsed: Duration) {
        self.tenants_created.add(1, &[]);
        self.tenant_creation_ms
            .record(elapsed.as_secs_f64() * 1_000.0, &[]);
    }

    fn operation_observed(&self, operation: &str, _tenant: &str, elapsed: Duration, ok: bool) {
        let attrs = [KeyValue::new("operation", operation.to_string())];
        self.operation_duration_ms
            .record(elapsed.as_secs_f64() * 1_000.0, &attrs);
        if !ok {
            self.operation_errors.add(1, &attrs);
        }
    }

    fn tenant_count(&self, operation: &str, tenant: &str, value: i64) {
        self.tenant_rows.record(
            value,
            &[
                KeyValue::new("operation", operation.to_string()),
                KeyValue::new("tenant", tenant.to_string()),
            ],
        );
    }
}
