//! Metric recording helpers over the `metrics` facade.
//!
//! No-ops until a recorder is installed by the embedding application.

/// Record a successful model admission.
pub fn record_load_success(model: &str) {
    metrics::counter!("modelmem_loads_total", "model" => model.to_string()).increment(1);
}

/// Record a failed model admission (loader failure).
pub fn record_load_failure(model: &str) {
    metrics::counter!("modelmem_load_failures_total", "model" => model.to_string()).increment(1);
}

/// Record evictions performed by one pass (planned or background).
pub fn record_evictions(count: u64, bytes: u64) {
    metrics::counter!("modelmem_evictions_total").increment(count);
    metrics::counter!("modelmem_evicted_bytes_total").increment(bytes);
}

/// Record the current estimated usage.
pub fn record_usage(used_bytes: u64) {
    metrics::gauge!("modelmem_used_bytes").set(used_bytes as f64);
}
