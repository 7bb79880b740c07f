//! Test doubles
//!
//! Fault-injecting adapters for the backend ports and builders for fully
//! wired in-memory stacks.

use crate::blob::{BlobStore, MemoryObjectStore};
use crate::cache::{CacheStore, MemoryKeyValue};
use crate::config::{CacheConfig, MonitoringConfig};
use crate::domain::{
    Alert, AlertSink, KeyValueService, KeyValueServiceRef, ObjectMeta, ObjectStore,
    ObjectStoreRef, StoredObject, UpstreamProbe,
};
use crate::durable::DurableStore;
use crate::error::{Error, Result};
use crate::manager::StorageManager;
use crate::monitoring::MonitoringService;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Key/Value
// =============================================================================

/// Key/value service where every call fails
pub struct FailingKeyValue;

fn cache_down(operation: &str) -> Error {
    Error::Cache {
        operation: operation.to_string(),
        reason: "connection refused".into(),
    }
}

#[async_trait]
impl KeyValueService for FailingKeyValue {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(cache_down("get"))
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Option<Duration>) -> Result<()> {
        Err(cache_down("set"))
    }

    async fn delete(&self, _key: &str) -> Result<bool> {
        Err(cache_down("delete"))
    }

    async fn keys(&self, _prefix: &str) -> Result<Vec<String>> {
        Err(cache_down("keys"))
    }

    async fn ping(&self) -> Result<()> {
        Err(cache_down("ping"))
    }

    fn backend_name(&self) -> &str {
        "failing"
    }
}

// =============================================================================
// Object Store
// =============================================================================

/// In-memory object store whose calls can be made to fail
#[derive(Default)]
pub struct FlakyObjectStore {
    inner: MemoryObjectStore,
    fail_all: AtomicBool,
    fail_deletes: AtomicBool,
}

impl FlakyObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call, `ping` included
    pub fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Fail only `delete`
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    fn check(&self, operation: &str, key: &str) -> Result<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(Error::BlobBackend {
                operation: operation.to_string(),
                key: key.to_string(),
                reason: "injected failure".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FlakyObjectStore {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: Option<String>,
        custom: BTreeMap<String, String>,
    ) -> Result<ObjectMeta> {
        self.check("put", key)?;
        self.inner.put(key, data, content_type, custom).await
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        self.check("get", key)?;
        self.inner.get(key).await
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>> {
        self.check("head", key)?;
        self.inner.head(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check("delete", key)?;
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Error::BlobBackend {
                operation: "delete".into(),
                key: key.to_string(),
                reason: "injected delete failure".into(),
            });
        }
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        self.check("list", prefix)?;
        self.inner.list(prefix).await
    }

    async fn ping(&self) -> Result<()> {
        self.check("ping", "")?;
        self.inner.ping().await
    }

    fn backend_name(&self) -> &str {
        "flaky"
    }
}

// =============================================================================
// Upstream & Alerts
// =============================================================================

/// Upstream probe with a fixed outcome and delay
pub struct StubUpstream {
    delay: Duration,
    failure: Option<String>,
}

impl StubUpstream {
    pub fn healthy() -> Self {
        Self {
            delay: Duration::ZERO,
            failure: None,
        }
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            delay: Duration::ZERO,
            failure: Some(reason.into()),
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            failure: None,
        }
    }
}

#[async_trait]
impl UpstreamProbe for StubUpstream {
    async fn probe(&self) -> Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.failure {
            Some(reason) => Err(Error::Upstream(reason.clone())),
            None => Ok(()),
        }
    }

    fn target(&self) -> &str {
        "stub://upstream"
    }
}

/// Alert sink that keeps every delivered alert
#[derive(Default)]
pub struct RecordingAlertSink {
    delivered: Mutex<Vec<Alert>>,
}

impl RecordingAlertSink {
    pub fn delivered(&self) -> Vec<Alert> {
        self.delivered.lock().clone()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        self.delivered.lock().push(alert.clone());
        Ok(())
    }

    fn sink_name(&self) -> &str {
        "recording"
    }
}

// =============================================================================
// Wired Stacks
// =============================================================================

pub fn memory_cache() -> CacheStore {
    CacheStore::new(Arc::new(MemoryKeyValue::new()), &CacheConfig::default())
}

/// Manager over in-memory stores
pub async fn manager() -> StorageManager {
    manager_with(
        Arc::new(MemoryKeyValue::new()),
        Arc::new(MemoryObjectStore::new()),
    )
    .await
}

/// Manager over the given key/value service
pub async fn manager_with_cache(kv: KeyValueServiceRef) -> StorageManager {
    manager_with(kv, Arc::new(MemoryObjectStore::new())).await
}

/// Manager over the given backends and a fresh in-memory database
pub async fn manager_with(kv: KeyValueServiceRef, objects: ObjectStoreRef) -> StorageManager {
    let cache_config = CacheConfig::default();
    let cache = CacheStore::new(kv, &cache_config);
    let durable = DurableStore::in_memory().await.unwrap();
    let blob = BlobStore::new(objects);
    let monitoring = MonitoringService::new(
        durable.clone(),
        cache.clone(),
        blob.clone(),
        MonitoringConfig::default(),
    )
    .unwrap();

    StorageManager::new(
        cache,
        durable,
        blob,
        Arc::new(monitoring),
        cache_config.analytics_ttl(),
    )
}
