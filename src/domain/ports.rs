//! Domain Ports - Backend trait definitions for the storage layer
//!
//! These traits define the boundaries between the orchestration logic and the
//! external services it runs on. Adapters implement these traits to provide
//! concrete functionality (in-memory, local disk, HTTP).

use crate::domain::ops::Alert;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Key/Value Service Port
// =============================================================================

/// Port for the low-latency key/value cache service
///
/// Values are opaque strings; the cache layer owns encoding.
#[async_trait]
pub trait KeyValueService: Send + Sync {
    /// Get a value, `None` if absent or expired
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a value with an optional time-to-live
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    /// Delete a key; returns whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// List live keys starting with `prefix`
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Check service reachability
    async fn ping(&self) -> Result<()>;

    /// Adapter name for logs
    fn backend_name(&self) -> &str;
}

// =============================================================================
// Object Store Port
// =============================================================================

/// Metadata kept alongside every object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Full object key
    pub key: String,
    /// Payload size in bytes
    pub size_bytes: u64,
    /// MIME type hint
    pub content_type: Option<String>,
    /// User metadata
    pub custom: BTreeMap<String, String>,
    /// Last write time
    pub last_modified: DateTime<Utc>,
}

/// An object with its payload
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub meta: ObjectMeta,
    pub data: Bytes,
}

/// Port for the blob/object store
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write (or overwrite) an object together with its metadata
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: Option<String>,
        custom: BTreeMap<String, String>,
    ) -> Result<ObjectMeta>;

    /// Read an object, `None` if absent
    async fn get(&self, key: &str) -> Result<Option<StoredObject>>;

    /// Read only the metadata of an object
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>>;

    /// Delete an object; returns whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// List objects whose key starts with `prefix`, ordered by key
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Check store reachability
    async fn ping(&self) -> Result<()>;

    /// Adapter name for logs
    fn backend_name(&self) -> &str;
}

// =============================================================================
// Upstream Probe Port
// =============================================================================

/// Port for probing the upstream API the application depends on
#[async_trait]
pub trait UpstreamProbe: Send + Sync {
    /// Issue one probe request; latency is measured by the caller
    async fn probe(&self) -> Result<()>;

    /// Target description for logs and health output
    fn target(&self) -> &str;
}

// =============================================================================
// Alert Sink Port
// =============================================================================

/// Port for forwarding critical alerts to an external notification channel
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Deliver one alert
    async fn notify(&self, alert: &Alert) -> Result<()>;

    /// Sink name for logs
    fn sink_name(&self) -> &str;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type KeyValueServiceRef = Arc<dyn KeyValueService>;
pub type ObjectStoreRef = Arc<dyn ObjectStore>;
pub type UpstreamProbeRef = Arc<dyn UpstreamProbe>;
pub type AlertSinkRef = Arc<dyn AlertSink>;
