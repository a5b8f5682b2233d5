//! Metrics and telemetry for the PQS tracker
//!
//! Prometheus counters for recordings, evictions, flushes and peer merges,
//! plus gauges for registry sizes.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram,
    CounterVec, Encoder, Gauge, GaugeVec, Histogram, TextEncoder,
};

lazy_static! {
    // === Usage Counters ===

    /// Recordings by registry kind and outcome (inserted, updated, skipped)
    pub static ref RECORDS_TOTAL: CounterVec = register_counter_vec!(
        "pqs_records_total",
        "Total query recordings by kind and outcome",
        &["kind", "outcome"]
    ).unwrap();

    /// Evicted records by registry kind and reason (capacity, stale)
    pub static ref EVICTIONS_TOTAL: CounterVec = register_counter_vec!(
        "pqs_evictions_total",
        "Total evicted query records by kind and reason",
        &["kind", "reason"]
    ).unwrap();

    // === Registry Gauges ===

    /// Distinct shapes tracked per registry
    pub static ref TRACKED_QUERIES: GaugeVec = register_gauge_vec!(
        "pqs_tracked_queries",
        "Number of distinct query shapes tracked",
        &["kind"]
    ).unwrap();

    // === Persistence ===

    /// Snapshot flush duration
    pub static ref FLUSH_DURATION: Histogram = register_histogram!(
        "pqs_flush_duration_seconds",
        "Snapshot flush latency in seconds",
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    /// Peer snapshot files that could not be merged
    pub static ref MERGE_FAILURES: CounterVec = register_counter_vec!(
        "pqs_merge_failures_total",
        "Total peer snapshot files skipped during merge",
        &["kind"]
    ).unwrap();

    // === System Health ===

    /// Health status (0=unhealthy, 1=healthy)
    pub static ref HEALTH_STATUS: Gauge = register_gauge!(
        "pqs_health_status",
        "Tracker health status (0=unhealthy, 1=healthy)"
    ).unwrap();
}

/// Initialize metrics system
pub fn init() {
    HEALTH_STATUS.set(1.0);
    tracing::info!("Metrics system initialized");
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder.encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer)
        .map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

/// Record one recording attempt
#[inline]
pub fn record_usage(kind: &str, outcome: &str) {
    RECORDS_TOTAL.with_label_values(&[kind, outcome]).inc();
}

/// Record evictions
#[inline]
pub fn record_evictions(kind: &str, reason: &str, count: usize) {
    if count > 0 {
        EVICTIONS_TOTAL
            .with_label_values(&[kind, reason])
            .inc_by(count as f64);
    }
}

/// Update registry size
#[inline]
pub fn update_tracked(kind: &str, count: usize) {
    TRACKED_QUERIES.with_label_values(&[kind]).set(count as f64);
}

/// Record a flush
#[inline]
pub fn record_flush(duration_secs: f64) {
    FLUSH_DURATION.observe(duration_secs);
}

/// Record a skipped peer file
#[inline]
pub fn record_merge_failure(kind: &str) {
    MERGE_FAILURES.with_label_values(&[kind]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        init();
        assert_eq!(HEALTH_STATUS.get(), 1.0);
    }

    #[test]
    fn test_record_usage() {
        record_usage("search", "inserted");
        let metrics = gather_metrics().expect("Failed to gather metrics");
        assert!(metrics.contains("pqs_records_total"));
    }

    #[test]
    fn test_zero_evictions_not_counted() {
        let before = EVICTIONS_TOTAL.with_label_values(&["test", "noop"]).get();
        record_evictions("test", "noop", 0);
        assert_eq!(EVICTIONS_TOTAL.with_label_values(&["test", "noop"]).get(), before);
    }
}
