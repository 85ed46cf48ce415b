// ============================================================================
// RATE LIMITING SERVICE - Sliding window per identifier
// ============================================================================

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

use crate::observability::record_rate_limit_exceeded;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_attempts: u32,
    pub window: Duration,
}

/// Outcome of a single check. `reset_time` is when the oldest request
/// still inside the window leaves it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub reset_time: DateTime<Utc>,
    pub remaining: u32,
}

/// In-memory checks between two sweeps of idle identifiers.
pub const SWEEP_EVERY: u64 = 256;

/// Request timestamps of one identifier, with the window they were
/// recorded under.
#[derive(Debug)]
struct TrackedWindow {
    timestamps: VecDeque<DateTime<Utc>>,
    span: ChronoDuration,
}

impl TrackedWindow {
    fn is_idle_at(&self, now: DateTime<Utc>) -> bool {
        self.timestamps
            .back()
            .map_or(true, |newest| *newest <= now - self.span)
    }
}

enum RateLimitBackend {
    Memory {
        windows: DashMap<String, TrackedWindow>,
        checks: AtomicU64,
    },
    Redis(deadpool_redis::Pool),
}

/// Sliding-window limiter. The in-memory backend is process-local and
/// sweeps identifiers whose whole window has elapsed every `SWEEP_EVERY`
/// checks; the Redis backend shares windows between instances and lets
/// keys expire with `PEXPIRE`.
pub struct RateLimiter {
    backend: RateLimitBackend,
}

impl RateLimiter {
    pub fn in_memory() -> Self {
        Self {
            backend: RateLimitBackend::Memory {
                windows: DashMap::new(),
                checks: AtomicU64::new(0),
            },
        }
    }

    pub fn with_redis(pool: deadpool_redis::Pool) -> Self {
        Self {
            backend: RateLimitBackend::Redis(pool),
        }
    }

    /// Identifiers currently held by the in-memory backend.
    pub fn tracked_identifiers(&self) -> usize {
        match &self.backend {
            RateLimitBackend::Memory { windows, .. } => windows.len(),
            RateLimitBackend::Redis(_) => 0,
        }
    }

    /// Drop in-memory identifiers with no request left inside their
    /// window. Returns how many were removed.
    pub fn purge_idle(&self) -> usize {
        let RateLimitBackend::Memory { windows, .. } = &self.backend else {
            return 0;
        };

        let now = Utc::now();
        let before = windows.len();
        windows.retain(|_, window| !window.is_idle_at(now));
        let removed = before.saturating_sub(windows.len());
        if removed > 0 {
            debug!(removed, "idle rate-limit windows swept");
        }
        removed
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            RateLimitBackend::Memory { .. } => "memory",
            RateLimitBackend::Redis(_) => "redis",
        }
    }

    /// Record a request for `identifier` if it fits in the window.
    ///
    /// Never fails: a Redis outage lets the request through with a warning.
    pub async fn check_rate_limit(
        &self,
        identifier: &str,
        config: RateLimitConfig,
    ) -> RateLimitDecision {
        let now = Utc::now();

        let decision = match &self.backend {
            RateLimitBackend::Memory { windows, checks } => {
                let decision = {
                    let mut window = windows
                        .entry(identifier.to_string())
                        .or_insert_with(|| TrackedWindow {
                            timestamps: VecDeque::new(),
                            span: window_duration(config),
                        });
                    window.span = window_duration(config);
                    check_window(&mut window.timestamps, config, now)
                };

                if (checks.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY == 0 {
                    self.purge_idle();
                }
                decision
            }
            RateLimitBackend::Redis(pool) => {
                match check_redis_window(pool, identifier, config, now).await {
                    Ok(decision) => decision,
                    Err(e) => {
                        warn!("Rate limit check error for {}: {}", identifier, e);
                        // Fail open
                        RateLimitDecision {
                            allowed: true,
                            reset_time: now + window_duration(config),
                            remaining: config.max_attempts,
                        }
                    }
                }
            }
        };

        if decision.allowed {
            debug!(identifier, remaining = decision.remaining, "rate-limit window updated");
        } else {
            warn!("🚫 Rate limit exceeded for key: {}", identifier);
            record_rate_limit_exceeded(scope_of(identifier));
        }

        decision
    }
}

fn window_duration(config: RateLimitConfig) -> ChronoDuration {
    ChronoDuration::milliseconds(config.window.as_millis() as i64)
}

/// Metric label for an identifier such as `verify-code:alice@example.com`.
fn scope_of(identifier: &str) -> &str {
    identifier.split(':').next().unwrap_or(identifier)
}

/// Prune, count, and append in one step over an ordered window.
pub(crate) fn check_window(
    timestamps: &mut VecDeque<DateTime<Utc>>,
    config: RateLimitConfig,
    now: DateTime<Utc>,
) -> RateLimitDecision {
    let window = window_duration(config);
    let cutoff = now - window;

    while timestamps.front().is_some_and(|ts| *ts <= cutoff) {
        timestamps.pop_front();
    }

    if timestamps.len() as u32 >= config.max_attempts {
        let oldest = timestamps.front().copied().unwrap_or(now);
        return RateLimitDecision {
            allowed: false,
            reset_time: oldest + window,
            remaining: 0,
        };
    }

    timestamps.push_back(now);
    let oldest = timestamps.front().copied().unwrap_or(now);

    RateLimitDecision {
        allowed: true,
        reset_time: oldest + window,
        remaining: config.max_attempts - timestamps.len() as u32,
    }
}

// ============================================================================
// REDIS BACKEND
// ============================================================================

/// Sorted set of request timestamps (ms) per key. Returns
/// `{allowed, oldest_ms, count}`.
const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local max = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
if count >= max then
  local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
  local oldest_ts = now
  if oldest[2] then oldest_ts = tonumber(oldest[2]) end
  return {0, oldest_ts, count}
end
redis.call('ZADD', key, now, ARGV[4])
redis.call('PEXPIRE', key, window)
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
return {1, tonumber(oldest[2]), count + 1}
"#;

fn sliding_window_script() -> &'static redis::Script {
    static SCRIPT: OnceLock<redis::Script> = OnceLock::new();
    SCRIPT.get_or_init(|| redis::Script::new(SLIDING_WINDOW_SCRIPT))
}

async fn check_redis_window(
    pool: &deadpool_redis::Pool,
    identifier: &str,
    config: RateLimitConfig,
    now: DateTime<Utc>,
) -> anyhow::Result<RateLimitDecision> {
    let mut conn = pool.get().await?;
    let key = rate_limit_key(identifier);
    let window_ms = config.window.as_millis() as i64;
    let member = format!("{}-{}", now.timestamp_millis(), uuid::Uuid::new_v4());

    let (allowed, oldest_ms, count): (i64, i64, i64) = sliding_window_script()
        .key(&key)
        .arg(now.timestamp_millis())
        .arg(window_ms)
        .arg(config.max_attempts)
        .arg(member)
        .invoke_async(&mut conn)
        .await?;

    let oldest = Utc
        .timestamp_millis_opt(oldest_ms)
        .single()
        .unwrap_or(now);

    Ok(RateLimitDecision {
        allowed: allowed == 1,
        reset_time: oldest + window_duration(config),
        remaining: config.max_attempts.saturating_sub(count as u32),
    })
}

// ============================================================================
// RATE LIMIT CONFIGS
// ============================================================================

impl RateLimitConfig {
    pub fn new(max_attempts: u32, window_secs: u64) -> Self {
        Self {
            max_attempts,
            window: Duration::from_secs(window_secs),
        }
    }

    /// Code requests per email
    pub const SEND_CODE: Self = Self {
        max_attempts: 5,
        window: Duration::from_secs(15 * 60),
    };

    /// Verification attempts per email
    pub const VERIFY_CODE: Self = Self {
        max_attempts: 10,
        window: Duration::from_secs(15 * 60),
    };
}

// ============================================================================
// RATE LIMIT KEYS
// ============================================================================

pub fn rate_limit_key(identifier: &str) -> String {
    format!("ratelimit:{}", identifier)
}

pub fn send_code_identifier(email: &str) -> String {
    format!("send-code:{}", email)
}

pub fn verify_code_identifier(email: &str) -> String {
    format!("verify-code:{}", email)
}
