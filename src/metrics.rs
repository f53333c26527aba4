use lazy_static::lazy_static;
use prometheus::{
    Counter, Encoder, Gauge, Histogram, IntCounterVec, TextEncoder, register_counter, register_gauge,
    register_histogram, register_int_counter_vec,
};

lazy_static! {
    pub static ref REQUEST_TOTAL: Counter =
        register_counter!("catalog_requests_total", "Total number of requests").unwrap();
    pub static ref RATE_LIMITED_TOTAL: Counter =
        register_counter!("catalog_rate_limited_total", "Requests rejected by the rate limiter").unwrap();
    pub static ref REQUEST_LATENCY: Histogram = register_histogram!(
        "catalog_request_latency_seconds",
        "Request latency in seconds"
    )
    .unwrap();
    pub static ref RATE_LIMIT_CLIENTS: Gauge =
        register_gauge!("catalog_rate_limit_clients", "Clients tracked by the rate limiter").unwrap();
    pub static ref LEDGER_UPDATES: IntCounterVec = register_int_counter_vec!(
        "catalog_ledger_updates_total",
        "Tag counter transactions by result",
        &["result"]
    )
    .unwrap();
    pub static ref TX_CONFLICTS: Counter =
        register_counter!("catalog_tx_conflicts_total", "Transaction commits rejected by a conflict").unwrap();
}

// Render the default registry in the text exposition format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}
