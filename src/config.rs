//! Storage layer configuration
//!
//! All settings have defaults so an empty YAML document (or no file at all)
//! yields a working in-memory/SQLite setup. The binary overlays CLI/env flags
//! on top of whatever the file provides.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default TTL for analytics aggregates: 5 minutes
pub const ANALYTICS_TTL_SECS: u64 = 5 * 60;

/// Telemetry retention window: 30 days
pub const TELEMETRY_RETENTION_DAYS: u32 = 30;

/// Pending verifications expire after 24 hours
pub const PENDING_VERIFICATION_HOURS: u32 = 24;

// =============================================================================
// Top-level Configuration
// =============================================================================

/// Configuration for the whole storage layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub blob: BlobConfig,
    pub monitoring: MonitoringConfig,
    pub retention: RetentionConfig,
    pub server: ServerConfig,
}

impl StorageConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&raw)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: StorageConfig = serde_yaml::from_str(raw)?;
        Ok(config)
    }

    /// Reject settings that can never work
    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(Error::Configuration("database.url must not be empty".into()));
        }
        if self.database.max_connections == 0 {
            return Err(Error::Configuration(
                "database.max_connections must be at least 1".into(),
            ));
        }
        if self.monitoring.probe_timeout_ms == 0 {
            return Err(Error::Configuration(
                "monitoring.probe_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.server.request_timeout_secs == 0 {
            return Err(Error::Configuration(
                "server.request_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.cache.analytics_ttl_secs == 0 {
            return Err(Error::Configuration(
                "cache.analytics_ttl_secs must be greater than 0".into(),
            ));
        }
        if let BlobBackendConfig::Local { root } = &self.blob.backend {
            if root.as_os_str().is_empty() {
                return Err(Error::Configuration("blob.backend.root must be set".into()));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Section Configurations
// =============================================================================

/// Relational store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection URL, e.g. `sqlite://data/storage.db?mode=rwc`
    pub url: String,
    /// Pool size
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 5,
        }
    }
}

/// Cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL for tenant/member entries (None = no expiry)
    pub default_ttl_secs: Option<u64>,
    /// TTL for analytics aggregates
    pub analytics_ttl_secs: u64,
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_secs.map(Duration::from_secs)
    }

    pub fn analytics_ttl(&self) -> Duration {
        Duration::from_secs(self.analytics_ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: Some(3600),
            analytics_ttl_secs: ANALYTICS_TTL_SECS,
        }
    }
}

/// Blob store settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    pub backend: BlobBackendConfig,
}

/// Which object store adapter to use
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BlobBackendConfig {
    #[default]
    Memory,
    Local { root: PathBuf },
}

/// Monitoring settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Per-probe timeout
    pub probe_timeout_ms: u64,
    /// Upstream API endpoint probed for latency
    pub upstream_url: Option<String>,
    /// Upstream latency above this raises a warning alert
    pub upstream_latency_warn_ms: u64,
    /// Webhook receiving critical alerts
    pub alert_webhook_url: Option<String>,
    /// Interval between periodic health checks in server mode
    pub health_interval_secs: u64,
}

impl MonitoringConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 5_000,
            upstream_url: None,
            upstream_latency_warn_ms: 1_000,
            alert_webhook_url: None,
            health_interval_secs: 300,
        }
    }
}

/// Retention windows
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub telemetry_days: u32,
    pub pending_verification_hours: u32,
    pub backup_retention_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            telemetry_days: TELEMETRY_RETENTION_DAYS,
            pending_verification_hours: PENDING_VERIFICATION_HOURS,
            backup_retention_days: 30,
        }
    }
}

/// Ops HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub request_timeout_secs: u64,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8090)),
            request_timeout_secs: 30,
        }
    }
}
