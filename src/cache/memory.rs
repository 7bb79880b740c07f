//! In-Memory Key/Value Service
//!
//! DashMap-backed implementation of [`KeyValueService`] with per-entry TTL.
//! Expired entries are dropped lazily on read and when listing keys.

use crate::domain::ports::KeyValueService;
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

// =============================================================================
// Memory Key/Value Configuration
// =============================================================================

/// Configuration for the in-memory service
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyValueConfig {
    /// Number of shards for DashMap (0 = auto)
    pub shard_count: usize,
}

#[derive(Debug, Clone)]
struct MemoryValue {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryValue {
    #[inline]
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

// =============================================================================
// Memory Key/Value Service
// =============================================================================

/// In-process key/value service
pub struct MemoryKeyValue {
    entries: DashMap<String, MemoryValue>,
    /// Entries dropped because their TTL elapsed
    expirations: AtomicU64,
}

impl MemoryKeyValue {
    pub fn new() -> Self {
        Self::with_config(MemoryKeyValueConfig::default())
    }

    pub fn with_config(config: MemoryKeyValueConfig) -> Self {
        let entries = if config.shard_count > 0 {
            DashMap::with_shard_amount(config.shard_count)
        } else {
            DashMap::new()
        };

        Self {
            entries,
            expirations: AtomicU64::new(0),
        }
    }

    /// Number of stored entries, including ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    /// Drop every expired entry
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, v| !v.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        self.expirations.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }
}

impl Default for MemoryKeyValue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueService for MemoryKeyValue {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };

        if expired && self.entries.remove_if(key, |_, v| v.is_expired(now)).is_some() {
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .insert(key.to_string(), MemoryValue { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|r| r.key().starts_with(prefix) && !r.value().is_expired(now))
            .map(|r| r.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_operations() {
        let kv = MemoryKeyValue::new();

        kv.set("tenant:g1", "{}".into(), None).await.unwrap();
        assert_eq!(kv.get("tenant:g1").await.unwrap().as_deref(), Some("{}"));
        assert_eq!(kv.len(), 1);

        assert!(kv.delete("tenant:g1").await.unwrap());
        assert!(!kv.delete("tenant:g1").await.unwrap());
        assert!(kv.get("tenant:g1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let kv = MemoryKeyValue::new();

        kv.set("a", "1".into(), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        kv.set("b", "2".into(), None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(kv.get("a").await.unwrap().is_none());
        assert_eq!(kv.get("b").await.unwrap().as_deref(), Some("2"));
        assert_eq!(kv.expirations(), 1);
    }

    #[tokio::test]
    async fn test_keys_by_prefix() {
        let kv = MemoryKeyValue::with_config(MemoryKeyValueConfig { shard_count: 4 });

        kv.set("member:g1:u1", "x".into(), None).await.unwrap();
        kv.set("member:g1:u2", "x".into(), None).await.unwrap();
        kv.set("member:g2:u1", "x".into(), None).await.unwrap();
        kv.set("member:g1:u3", "x".into(), Some(Duration::from_millis(1)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;

        let keys = kv.keys("member:g1:").await.unwrap();
        assert_eq!(keys, vec!["member:g1:u1", "member:g1:u2"]);

        assert_eq!(kv.purge_expired(), 1);
        assert_eq!(kv.len(), 3);
    }
}
