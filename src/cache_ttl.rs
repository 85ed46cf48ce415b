//! Centralized TTL constants
//!
//! Default time-to-live values for the query cache and the OTP flow.
//! Operators override them through `shared::Config`.

use std::time::Duration;

// Default TTL constants (in seconds)
pub const TTL_QUERY_CACHE: u64 = 300; // 5 minutes
pub const TTL_OTP_CODE: u64 = 900; // 15 minutes

// Default query cache capacity (entries)
pub const QUERY_CACHE_CAPACITY: usize = 1_000;

pub fn query_cache_ttl() -> Duration {
    Duration::from_secs(TTL_QUERY_CACHE)
}

pub fn otp_code_ttl() -> chrono::Duration {
    chrono::Duration::seconds(TTL_OTP_CODE as i64)
}
