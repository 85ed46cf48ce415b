// ============================================================================
// PROMETHEUS METRICS
// ============================================================================
// Counters for the HTTP layer, the query cache, the rate limiter and the
// OTP flow. Exposed on /metrics.
// ============================================================================

use lazy_static::lazy_static;
use prometheus::{register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec};

lazy_static! {
    // ========================================================================
    // HTTP REQUEST METRICS
    // ========================================================================

    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "endpoint", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "endpoint"],
        vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0]
    )
    .unwrap();

    pub static ref HTTP_RESPONSE_SIZE_BYTES: HistogramVec = register_histogram_vec!(
        "http_response_size_bytes",
        "HTTP response size in bytes",
        &["method", "endpoint"],
        vec![100.0, 1000.0, 5000.0, 10000.0, 50000.0, 100000.0]
    )
    .unwrap();

    // ========================================================================
    // QUERY CACHE METRICS
    // ========================================================================

    /// Lookups per operation, `result` is `hit` or `miss`
    pub static ref QUERY_CACHE_LOOKUPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "query_cache_lookups_total",
        "Query cache lookups by operation and result",
        &["operation", "result"]
    )
    .unwrap();

    // ========================================================================
    // OTP / RATE LIMIT METRICS
    // ========================================================================

    pub static ref RATE_LIMIT_EXCEEDED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "rate_limit_exceeded_total",
        "Requests refused by the rate limiter",
        &["scope"]
    )
    .unwrap();

    pub static ref OTP_SEND_TOTAL: IntCounterVec = register_int_counter_vec!(
        "otp_send_total",
        "OTP send-code requests by outcome",
        &["outcome"]
    )
    .unwrap();

    pub static ref OTP_VERIFICATION_TOTAL: IntCounterVec = register_int_counter_vec!(
        "otp_verification_total",
        "OTP verify-code requests by outcome",
        &["outcome"]
    )
    .unwrap();
}

// ============================================================================
// HELPERS
// ============================================================================

pub fn record_http_request(method: &str, endpoint: &str, status: u16, duration_secs: f64, response_size: usize) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, endpoint, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, endpoint])
        .observe(duration_secs);

    HTTP_RESPONSE_SIZE_BYTES
        .with_label_values(&[method, endpoint])
        .observe(response_size as f64);
}

pub fn record_cache_lookup(operation: &str, result: &str) {
    QUERY_CACHE_LOOKUPS_TOTAL
        .with_label_values(&[operation, result])
        .inc();
}

pub fn record_rate_limit_exceeded(scope: &str) {
    RATE_LIMIT_EXCEEDED_TOTAL.with_label_values(&[scope]).inc();
}

pub fn record_otp_send(outcome: &str) {
    OTP_SEND_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_otp_verification(outcome: &str) {
    OTP_VERIFICATION_TOTAL.with_label_values(&[outcome]).inc();
}
