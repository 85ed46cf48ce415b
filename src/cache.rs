use crate::cache_key::query_key;
use crate::cache_ttl::{query_cache_ttl, QUERY_CACHE_CAPACITY};
use crate::observability::record_cache_lookup;
use lru::LruCache;
use parking_lot::{Mutex, RwLock}; // PERFORMANCE: Faster than std::sync, no poisoning
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// ============================================================================
// CACHE ENTRY STRUCTURES
// ============================================================================

#[derive(Clone)]
struct CacheEntry {
    data: serde_json::Value,
    timestamp: Instant,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub size: usize,
    pub capacity: usize,
    pub ttl_seconds: u64,
}

// ============================================================================
// QUERY CACHE
// ============================================================================

/// Time-bound memoization in front of read queries.
///
/// Entries are keyed by operation name plus canonical parameters and hold
/// the serialized result. A hit is served only while `now - timestamp <= ttl`;
/// the TTL is a single shared setting evaluated at read time. The map is
/// bounded and evicts the least recently used entry when full.
///
/// Two concurrent misses on the same key both run their fetch; the last
/// write wins.
pub struct QueryCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    ttl: RwLock<Duration>,
    stats: Mutex<CacheStats>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(query_cache_ttl(), QUERY_CACHE_CAPACITY)
    }
}

impl QueryCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        info!(
            "🎯 Initializing query cache (ttl: {}s, capacity: {})",
            ttl.as_secs(),
            capacity
        );
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl: RwLock::new(ttl),
            stats: Mutex::new(CacheStats {
                capacity: capacity.get(),
                ttl_seconds: ttl.as_secs(),
                ..CacheStats::default()
            }),
        }
    }

    /// Return the cached result for `operation(params)` or run `fetch` and
    /// remember its result. Errors from `fetch` propagate untouched and
    /// leave the cache as it was.
    pub async fn get_or_fetch<T, P, F, Fut, E>(
        &self,
        operation: &str,
        params: &P,
        fetch: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        P: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = query_key(operation, params);

        if let Some(data) = self.lookup(&key) {
            match serde_json::from_value::<T>(data) {
                Ok(value) => {
                    debug!("🎯 Query cache hit for key: {}", key);
                    self.update_stats(true);
                    record_cache_lookup(operation, "hit");
                    return Ok(value);
                }
                Err(e) => warn!("Discarding undecodable cache entry {}: {}", key, e),
            }
        }

        self.update_stats(false);
        record_cache_lookup(operation, "miss");

        let fresh = fetch().await?;

        match serde_json::to_value(&fresh) {
            Ok(data) => {
                let mut entries = self.entries.lock();
                entries.put(
                    key,
                    CacheEntry {
                        data,
                        timestamp: Instant::now(),
                    },
                );
            }
            Err(e) => warn!("Query result for {} is not cacheable: {}", operation, e),
        }

        Ok(fresh)
    }

    /// Drop every entry. Idempotent.
    pub fn clear_cache(&self) {
        let removed = {
            let mut entries = self.entries.lock();
            let len = entries.len();
            entries.clear();
            len
        };
        info!("🧹 Query cache cleared ({} entries removed)", removed);
    }

    /// Replace the TTL used by all later staleness checks, including the
    /// checks on entries written before the change.
    pub fn set_cache_ttl(&self, ttl: Duration) {
        *self.ttl.write() = ttl;
        self.stats.lock().ttl_seconds = ttl.as_secs();
        info!("⏱️ Query cache TTL set to {:?}", ttl);
    }

    pub fn ttl(&self) -> Duration {
        *self.ttl.read()
    }

    pub fn get_stats(&self) -> CacheStats {
        let mut stats = self.stats.lock().clone();
        stats.size = self.entries.lock().len();
        stats
    }

    fn lookup(&self, key: &str) -> Option<serde_json::Value> {
        let ttl = self.ttl();
        let mut entries = self.entries.lock();
        let fresh = entries
            .get(key)
            .filter(|entry| entry.timestamp.elapsed() <= ttl)
            .map(|entry| entry.data.clone());
        if fresh.is_none() {
            entries.pop(key);
        }
        fresh
    }

    fn update_stats(&self, hit: bool) {
        let mut stats = self.stats.lock();
        if hit {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        let total = stats.hits + stats.misses;
        stats.hit_rate = if total > 0 { stats.hits as f64 / total as f64 } else { 0.0 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    async fn counted_fetch(calls: &AtomicUsize, value: u32) -> Result<u32, String> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(value)
    }

    #[tokio::test]
    async fn second_call_within_ttl_is_served_from_cache() {
        let cache = QueryCache::default();
        let calls = AtomicUsize::new(0);
        let params = json!({ "pubkey": "02aa" });

        let first = cache.get_or_fetch("node", &params, || counted_fetch(&calls, 7)).await;
        let second = cache.get_or_fetch("node", &params, || counted_fetch(&calls, 8)).await;

        assert_eq!(first, Ok(7));
        assert_eq!(second, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_entry_is_fetched_again() {
        let cache = QueryCache::new(Duration::from_millis(40), 16);
        let calls = AtomicUsize::new(0);
        let params = json!({ "limit": 10 });

        cache.get_or_fetch("top_nodes", &params, || counted_fetch(&calls, 1)).await.unwrap();
        sleep(Duration::from_millis(80)).await;
        let value = cache.get_or_fetch("top_nodes", &params, || counted_fetch(&calls, 2)).await;

        assert_eq!(value, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn clear_forces_a_fetch() {
        let cache = QueryCache::default();
        let calls = AtomicUsize::new(0);
        let params = json!({ "limit": 5 });

        cache.get_or_fetch("top_nodes", &params, || counted_fetch(&calls, 1)).await.unwrap();
        cache.clear_cache();
        cache.clear_cache();
        cache.get_or_fetch("top_nodes", &params, || counted_fetch(&calls, 1)).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_fetch_is_not_cached() {
        let cache = QueryCache::default();
        let calls = AtomicUsize::new(0);
        let params = json!({ "pubkey": "02bb" });

        let failed: Result<u32, String> = cache
            .get_or_fetch("node", &params, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("store unavailable".to_string())
            })
            .await;
        assert_eq!(failed, Err("store unavailable".to_string()));
        assert_eq!(cache.get_stats().size, 0);

        let retried = cache.get_or_fetch("node", &params, || counted_fetch(&calls, 3)).await;
        assert_eq!(retried, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn shorter_ttl_applies_to_existing_entries() {
        let cache = QueryCache::default();
        let calls = AtomicUsize::new(0);
        let params = json!({ "pubkey": "02cc" });

        cache.get_or_fetch("node", &params, || counted_fetch(&calls, 1)).await.unwrap();
        sleep(Duration::from_millis(30)).await;
        cache.set_cache_ttl(Duration::from_millis(10));
        cache.get_or_fetch("node", &params, || counted_fetch(&calls, 1)).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.ttl(), Duration::from_millis(10));
    }

    #[tokio::test]
    async fn reordered_params_share_a_slot() {
        let cache = QueryCache::default();
        let calls = AtomicUsize::new(0);

        cache
            .get_or_fetch("top_nodes", &json!({ "limit": 10, "order": "capacity" }), || {
                counted_fetch(&calls, 1)
            })
            .await
            .unwrap();
        cache
            .get_or_fetch("top_nodes", &json!({ "order": "capacity", "limit": 10 }), || {
                counted_fetch(&calls, 1)
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_used() {
        let cache = QueryCache::new(Duration::from_secs(60), 2);
        let calls = AtomicUsize::new(0);

        for pubkey in ["a", "b", "c"] {
            cache
                .get_or_fetch("node", &json!({ "pubkey": pubkey }), || counted_fetch(&calls, 1))
                .await
                .unwrap();
        }
        assert_eq!(cache.get_stats().size, 2);

        // "a" was evicted when "c" came in.
        cache
            .get_or_fetch("node", &json!({ "pubkey": "a" }), || counted_fetch(&calls, 1))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn stats_track_hits_and_misses() {
        let cache = QueryCache::default();
        let calls = AtomicUsize::new(0);
        let params = json!({ "pubkey": "02dd" });

        cache.get_or_fetch("node", &params, || counted_fetch(&calls, 1)).await.unwrap();
        cache.get_or_fetch("node", &params, || counted_fetch(&calls, 1)).await.unwrap();
        cache.get_or_fetch("node", &params, || counted_fetch(&calls, 1)).await.unwrap();

        let stats = cache.get_stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(stats.size, 1);
    }
}
