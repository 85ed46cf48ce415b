pub mod endpoints;
pub mod metrics;
pub mod middleware;

pub use endpoints::metrics_handler;
pub use metrics::{
    record_cache_lookup, record_http_request, record_otp_send, record_otp_verification,
    record_rate_limit_exceeded,
};
pub use middleware::metrics_middleware;
