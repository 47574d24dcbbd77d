//! Reconcile/queue instrumentation (spec §4.2, §7 "Observability").

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::KeyValue;
use tokio::time::Instant;

#[derive(Clone)]
pub struct ReconcilerMetrics {
    operations: Counter<u64>,
    failures: Counter<u64>,
    duration: Histogram<f64>,
    retries: Counter<u64>,
    exhausted: Counter<u64>,
    queue_depth: Gauge<i64>,
    drift_fixed: Counter<u64>,
}

impl ReconcilerMetrics {
    pub fn new(meter: &Meter) -> Self {
        let operations = meter
            .u64_counter("tenant_reconcile_operations")
            .with_description("Total number of tenant reconcile attempts")
            .build();

        let failures = meter
            .u64_counter("tenant_reconcile_failures")
            .with_description("Number of tenant reconcile attempts that returned an error")
            .build();

        let duration = meter
            .f64_histogram("tenant_reconcile_duration_seconds")
            .with_description("Duration of one tenant reconcile attempt")
            .build();

        let retries = meter
            .u64_counter("tenant_reconcile_retries")
            .with_description("Number of reconcile attempts requeued after a retryable error")
            .build();

        let exhausted = meter
            .u64_counter("tenant_reconcile_exhausted")
            .with_description("Number of slugs that exhausted all retry attempts")
            .build();

        let queue_depth = meter
            .i64_gauge("tenant_queue_depth")
            .with_description("Number of slugs currently queued or in flight")
            .build();

        let drift_fixed = meter
            .u64_counter("tenant_drift_fixed")
            .with_description("Number of resources repaired by startup drift reconciliation")
            .build();

        Self {
            operations,
            failures,
            duration,
            retries,
            exhausted,
            queue_depth,
            drift_fixed,
        }
    }

    pub fn measure(&self, slug: &str) -> ReconcileMeasurer {
        self.operations
            .add(1, &[KeyValue::new("slug", slug.to_string())]);
        ReconcileMeasurer {
            start: Instant::now(),
            slug: slug.to_string(),
            duration: self.duration.clone(),
        }
    }

    pub fn failure_inc(&self, slug: &str) {
        self.failures
            .add(1, &[KeyValue::new("slug", slug.to_string())]);
    }

    pub fn retry_inc(&self, slug: &str) {
        self.retries
            .add(1, &[KeyValue::new("slug", slug.to_string())]);
    }

    pub fn exhausted_inc(&self, slug: &str) {
        self.exhausted
            .add(1, &[KeyValue::new("slug", slug.to_string())]);
    }

    pub fn queue_depth_set(&self, depth: i64) {
        self.queue_depth.record(depth, &[]);
    }

    pub fn drift_fixed_inc(&self, resource: &str) {
        self.drift_fixed
            .add(1, &[KeyValue::new("resource", resource.to_string())]);
    }
}

/// Records elapsed time into the duration histogram on drop.
pub struct ReconcileMeasurer {
    start: Instant,
    slug: String,
    duration: Histogram<f64>,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        self.duration.record(
            self.start.elapsed().as_secs_f64(),
            &[KeyValue::new("slug", self.slug.clone())],
        );
    }
}
