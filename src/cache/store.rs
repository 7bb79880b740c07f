//! Cache Store
//!
//! Best-effort wrapper over a [`KeyValueService`]. Values are JSON-encoded on
//! write and decoded on read. Nothing here returns an error to the caller:
//! service failures and undecodable values both read as a miss.

use crate::best_effort::best_effort;
use crate::cache::key::CacheKey;
use crate::config::CacheConfig;
use crate::domain::ports::KeyValueServiceRef;
use crate::error::Result;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

// =============================================================================
// Cache Statistics
// =============================================================================

/// Counters for cache traffic
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub writes: AtomicU64,
    /// Service failures (including on writes)
    pub errors: AtomicU64,
    /// Values present but not decodable
    pub decode_failures: AtomicU64,
}

impl CacheStats {
    #[inline]
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`CacheStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub errors: u64,
    pub decode_failures: u64,
}

impl CacheStatsSnapshot {
    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// =============================================================================
// Cache Store
// =============================================================================

/// Best-effort cache in front of the durable store
#[derive(Clone)]
pub struct CacheStore {
    service: KeyValueServiceRef,
    default_ttl: Option<Duration>,
    stats: Arc<CacheStats>,
}

impl CacheStore {
    pub fn new(service: KeyValueServiceRef, config: &CacheConfig) -> Self {
        Self {
            service,
            default_ttl: config.default_ttl(),
            stats: Arc::new(CacheStats::default()),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.service.backend_name()
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    /// Look up and decode a value. Errors and parse failures read as `None`.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let storage_key = key.to_storage_key();
        let raw = match self.service.get(&storage_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.stats.record_miss();
                debug!(key = %key, "Cache miss");
                return None;
            }
            Err(e) => {
                self.stats.record_error();
                self.stats.record_miss();
                warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                self.stats.record_hit();
                debug!(key = %key, "Cache hit");
                Some(value)
            }
            Err(e) => {
                self.stats.record_decode_failure();
                self.stats.record_miss();
                warn!(key = %key, error = %e, "Undecodable cache value, treating as miss");
                None
            }
        }
    }

    /// Encode and store a value with an explicit TTL
    pub async fn set<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Option<Duration>) {
        let encoded = match serde_json::to_string(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache value not encodable, skipping write");
                return;
            }
        };

        let storage_key = key.to_storage_key();
        match best_effort("cache.set", self.service.set(&storage_key, encoded, ttl)).await {
            Some(()) => self.stats.record_write(),
            None => self.stats.record_error(),
        }
    }

    /// Store a value with the configured default TTL
    pub async fn set_default<T: Serialize>(&self, key: &CacheKey, value: &T) {
        self.set(key, value, self.default_ttl).await
    }

    /// Remove a key
    pub async fn delete(&self, key: &CacheKey) {
        let storage_key = key.to_storage_key();
        if best_effort("cache.delete", self.service.delete(&storage_key))
            .await
            .is_none()
        {
            self.stats.record_error();
        }
    }

    /// List keys under a prefix; empty on failure
    pub async fn list(&self, prefix: &str) -> Vec<String> {
        match best_effort("cache.list", self.service.keys(prefix)).await {
            Some(keys) => keys,
            None => {
                self.stats.record_error();
                Vec::new()
            }
        }
    }

    /// Batched lookup, results in key order
    pub async fn get_many<T: DeserializeOwned>(&self, keys: &[CacheKey]) -> Vec<Option<T>> {
        join_all(keys.iter().map(|key| self.get::<T>(key))).await
    }

    /// Batched write
    pub async fn set_many<T: Serialize>(&self, entries: &[(CacheKey, T)], ttl: Option<Duration>) {
        join_all(entries.iter().map(|(key, value)| self.set(key, value, ttl))).await;
    }

    /// Delete every key under `prefix`; returns how many were removed
    pub async fn invalidate_prefix(&self, prefix: &str) -> usize {
        let keys = self.list(prefix).await;
        let mut removed = 0;
        for key in keys {
            match best_effort("cache.delete", self.service.delete(&key)).await {
                Some(true) => removed += 1,
                Some(false) => {}
                None => self.stats.record_error(),
            }
        }
        removed
    }

    /// Raw reachability check, for health probing only
    pub async fn probe(&self) -> Result<()> {
        self.service.ping().await
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::MemoryKeyValue;
    use crate::domain::ports::KeyValueService;
    use crate::testing::FailingKeyValue;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    fn store_over(service: KeyValueServiceRef) -> CacheStore {
        CacheStore::new(service, &CacheConfig::default())
    }

    #[tokio::test]
    async fn test_round_trip_and_stats() {
        let store = store_over(Arc::new(MemoryKeyValue::new()));
        let key = CacheKey::tenant("g1");
        let value = Sample {
            name: "alpha".into(),
            count: 3,
        };

        assert!(store.get::<Sample>(&key).await.is_none());
        store.set_default(&key, &value).await;
        assert_eq!(store.get::<Sample>(&key).await, Some(value));

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
        assert!((stats.hit_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_unparseable_value_is_a_miss() {
        let kv = Arc::new(MemoryKeyValue::new());
        kv.set("tenant:g1", "{not json".into(), None).await.unwrap();
        let store = store_over(kv);

        assert!(store.get::<Sample>(&CacheKey::tenant("g1")).await.is_none());
        assert_eq!(store.stats().decode_failures, 1);
    }

    #[tokio::test]
    async fn test_failing_service_never_errors() {
        let store = store_over(Arc::new(FailingKeyValue));
        let key = CacheKey::tenant("g1");

        store
            .set_default(
                &key,
                &Sample {
                    name: "x".into(),
                    count: 1,
                },
            )
            .await;
        assert!(store.get::<Sample>(&key).await.is_none());
        store.delete(&key).await;
        assert!(store.list("tenant:").await.is_empty());
        assert!(store.probe().await.is_err());
        assert!(store.stats().errors >= 3);
    }

    #[tokio::test]
    async fn test_batch_and_prefix_invalidation() {
        let store = store_over(Arc::new(MemoryKeyValue::new()));
        let entries = vec![
            (CacheKey::member("g1", "u1"), 1u32),
            (CacheKey::member("g1", "u2"), 2u32),
            (CacheKey::member("g2", "u1"), 3u32),
        ];
        store.set_many(&entries, None).await;

        let keys: Vec<CacheKey> = entries.iter().map(|(k, _)| k.clone()).collect();
        let values = store.get_many::<u32>(&keys).await;
        assert_eq!(values, vec![Some(1), Some(2), Some(3)]);

        let removed = store.invalidate_prefix("member:g1:").await;
        assert_eq!(removed, 2);
        assert!(store.get::<u32>(&CacheKey::member("g1", "u1")).await.is_none());
        assert_eq!(store.get::<u32>(&CacheKey::member("g2", "u1")).await, Some(3));
    }
}
