//! Metrics for the balancer daemon
//!
//! Prometheus collectors registered once in a global registry. The status
//! socket serves the text exposition; see [`crate::status`].

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use std::sync::OnceLock;

/// Cycle latency buckets in seconds
const CYCLE_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

static GLOBAL_METRICS: OnceLock<BalancerMetricsInner> = OnceLock::new();

struct BalancerMetricsInner {
    cycles_total: IntCounter,
    cycle_errors_total: IntCounter,
    cycle_duration_seconds: Histogram,
    migrations_total: IntCounterVec,
    is_leader: IntGauge,
}

impl BalancerMetricsInner {
    fn new() -> Self {
        Self {
            cycles_total: register_int_counter!(
                "vlb_cycles_total",
                "Completed balancing cycles"
            )
            .expect("failed to register vlb_cycles_total"),

            cycle_errors_total: register_int_counter!(
                "vlb_cycle_errors_total",
                "Balancing cycles that failed with an error"
            )
            .expect("failed to register vlb_cycle_errors_total"),

            cycle_duration_seconds: register_histogram!(
                "vlb_cycle_duration_seconds",
                "Wall-clock duration of balancing cycles",
                CYCLE_BUCKETS.to_vec()
            )
            .expect("failed to register vlb_cycle_duration_seconds"),

            migrations_total: register_int_counter_vec!(
                "vlb_migrations_total",
                "Executed migrations by outcome",
                &["outcome"]
            )
            .expect("failed to register vlb_migrations_total"),

            is_leader: register_int_gauge!(
                "vlb_is_leader",
                "1 while this instance holds leadership"
            )
            .expect("failed to register vlb_is_leader"),
        }
    }
}

/// Lightweight cloneable handle to the global metrics
#[derive(Clone)]
pub struct BalancerMetrics {
    _private: (),
}

impl Default for BalancerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BalancerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(BalancerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &'static BalancerMetricsInner {
        GLOBAL_METRICS.get().expect("metrics not initialized")
    }

    pub fn observe_cycle(&self, duration_secs: f64) {
        self.inner().cycles_total.inc();
        self.inner().cycle_duration_seconds.observe(duration_secs);
    }

    pub fn observe_cycle_error(&self) {
        self.inner().cycle_errors_total.inc();
    }

    pub fn observe_migration(&self, success: bool) {
        let outcome = if success { "succeeded" } else { "failed" };
        self.inner()
            .migrations_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn set_leader(&self, leader: bool) {
        self.inner().is_leader.set(i64::from(leader));
    }
}

/// Render all registered collectors in the Prometheus text format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
