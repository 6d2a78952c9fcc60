//! Metrics and telemetry for tsagg
//!
//! Prometheus metrics for query throughput, statistics pruning efficiency
//! and decode volume.

use crate::error::{Error, Result};
use crate::query::scan::ScanStats;
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec, Encoder,
    HistogramVec, TextEncoder,
};

lazy_static! {
    // === Query Counters ===

    /// Total queries by execution path and outcome
    pub static ref QUERIES_TOTAL: CounterVec = register_counter_vec!(
        "tsagg_queries_total",
        "Total aggregation queries",
        &["path", "status"]
    ).expect("tsagg_queries_total registers once");

    /// Series scans performed
    pub static ref SERIES_SCANNED_TOTAL: Counter = register_counter!(
        "tsagg_series_scanned_total",
        "Total series scans"
    ).expect("tsagg_series_scanned_total registers once");

    /// Series scans that stopped before exhausting the data
    pub static ref EARLY_EXITS_TOTAL: Counter = register_counter!(
        "tsagg_early_exits_total",
        "Series scans ended early because every function was final"
    ).expect("tsagg_early_exits_total registers once");

    // === Pruning Counters ===

    /// Units answered from statistics, by level
    pub static ref STATISTICS_HITS_TOTAL: CounterVec = register_counter_vec!(
        "tsagg_statistics_hits_total",
        "Files, chunks and pages answered from statistics",
        &["level"]
    ).expect("tsagg_statistics_hits_total registers once");

    /// Pages decoded
    pub static ref PAGES_DECODED_TOTAL: Counter = register_counter!(
        "tsagg_pages_decoded_total",
        "Total pages decoded"
    ).expect("tsagg_pages_decoded_total registers once");

    /// Points decoded
    pub static ref POINTS_DECODED_TOTAL: Counter = register_counter!(
        "tsagg_points_decoded_total",
        "Total points decoded"
    ).expect("tsagg_points_decoded_total registers once");

    // === Latency Histograms ===

    /// Query duration
    pub static ref QUERY_DURATION: HistogramVec = register_histogram_vec!(
        "tsagg_query_duration_seconds",
        "Aggregation query latency in seconds",
        &["path"],
        vec![0.0001, 0.001, 0.01, 0.1, 0.5, 1.0, 5.0]
    ).expect("tsagg_query_duration_seconds registers once");
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| Error::Serialization(format!("Failed to encode metrics: {}", e)))?;

    String::from_utf8(buffer)
        .map_err(|e| Error::Serialization(format!("Metrics contain invalid UTF-8: {}", e)))
}

/// Record a finished query
#[inline]
pub fn record_query(path: &str, duration_secs: f64, success: bool) {
    let status = if success { "success" } else { "error" };

    QUERIES_TOTAL.with_label_values(&[path, status]).inc();

    QUERY_DURATION
        .with_label_values(&[path])
        .observe(duration_secs);
}

/// Record the work done by one series scan
pub fn record_scan(stats: &ScanStats) {
    SERIES_SCANNED_TOTAL.inc();
    if stats.early_exit {
        EARLY_EXITS_TOTAL.inc();
    }
    for (level, hits) in [
        ("file", stats.files_from_statistics),
        ("chunk", stats.chunks_from_statistics),
        ("page", stats.pages_from_statistics),
    ] {
        if hits > 0 {
            STATISTICS_HITS_TOTAL
                .with_label_values(&[level])
                .inc_by(hits as f64);
        }
    }
    PAGES_DECODED_TOTAL.inc_by(stats.pages_decoded as f64);
    POINTS_DECODED_TOTAL.inc_by(stats.points_decoded as f64);
}
