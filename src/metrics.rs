/// Metrics and telemetry for the resolution layer
///
/// Prometheus-compatible metrics for monitoring:
/// - DID lookup outcomes and latencies
/// - Per-ledger answers and their trust classification
/// - State-proof verification results
/// - Resolution cache hit/miss rates
/// - Pool lifecycle events
use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Encoder, Histogram,
    IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    /// DID lookups by outcome (resolved / not_found)
    pub static ref DID_LOOKUPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "atlas_did_lookups_total",
        "Total number of multi-ledger DID lookups",
        &["outcome"]
    )
    .unwrap();

    /// End-to-end fan-out duration
    pub static ref DID_LOOKUP_DURATION_SECONDS: Histogram = register_histogram!(
        "atlas_did_lookup_duration_seconds",
        "Multi-ledger DID lookup latencies in seconds",
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0]
    )
    .unwrap();

    /// Verified per-ledger answers by ledger and classification
    pub static ref LEDGER_ANSWERS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "atlas_ledger_answers_total",
        "Verified per-ledger answers during fan-out",
        &["ledger", "classification"]
    )
    .unwrap();

    /// State-proof verifications by result
    pub static ref PROOF_VERIFICATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "atlas_proof_verifications_total",
        "State-proof verification attempts",
        &["result"]
    )
    .unwrap();

    /// Resolution cache hits
    pub static ref CACHE_HITS_TOTAL: IntCounter = register_int_counter!(
        "atlas_cache_hits_total",
        "Resolution cache hits"
    )
    .unwrap();

    /// Resolution cache misses
    pub static ref CACHE_MISSES_TOTAL: IntCounter = register_int_counter!(
        "atlas_cache_misses_total",
        "Resolution cache misses"
    )
    .unwrap();

    /// Pool opens by pool name
    pub static ref POOL_OPENS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "atlas_pool_opens_total",
        "Ledger pool connection opens",
        &["pool"]
    )
    .unwrap();

    /// Exhausted pool close attempts by pool name
    pub static ref POOL_CLOSE_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "atlas_pool_close_failures_total",
        "Ledger pool closes that exhausted their retries",
        &["pool"]
    )
    .unwrap();
}

/// Gather all registered metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Invalid UTF-8 in metrics: {}", e)))
}
