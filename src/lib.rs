//! Tenant Storage - Multi-tier Storage Orchestration
//!
//! One API over three heterogeneous stores for a multi-tenant application:
//! an ephemeral key/value cache, a durable relational store and a blob store.
//! On top of that sit tenant backup/restore, tenant-to-tenant migration and
//! operational health monitoring.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                          Feature callers / Ops API                           │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │  BackupService  │  │ MigrationService│  │     MonitoringService       │  │
//! │  └────────┬────────┘  └────────┬────────┘  │  (metrics, alerts, health)  │  │
//! │           └──────────┬─────────┘           └─────────────┬───────────────┘  │
//! │                      │                                   │ wraps every call  │
//! │          ┌───────────┴───────────────────────────────────┴──┐               │
//! │          │                  StorageManager                  │               │
//! │          │        (cache-aside reads, write-through)        │               │
//! │          └───────┬──────────────────┬──────────────────┬────┘               │
//! ├──────────────────┼──────────────────┼──────────────────┼────────────────────┤
//! │  ┌───────────────┴──┐  ┌────────────┴─────┐  ┌─────────┴────────┐           │
//! │  │    CacheStore    │  │   DurableStore   │  │    BlobStore     │           │
//! │  │  (fail-open KV)  │  │ (source of truth)│  │ (type/id/file)   │           │
//! │  └──────────────────┘  └──────────────────┘  └──────────────────┘           │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`manager`]: Orchestration layer feature code talks to
//! - [`cache`], [`durable`], [`blob`]: The three store wrappers
//! - [`monitoring`]: Metrics, alerts and health checks
//! - [`backup`]: Snapshot and all-or-nothing restore
//! - [`migration`]: Tenant copy and parity verification
//! - [`api`]: Operator HTTP endpoints
//! - [`domain`]: Records, operational types and backend ports
//! - [`error`]: Error types and handling

pub mod api;
pub mod backup;
pub mod best_effort;
pub mod blob;
pub mod cache;
pub mod config;
pub mod domain;
pub mod durable;
pub mod error;
pub mod manager;
pub mod migration;
pub mod monitoring;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use api::{ApiServer, RestRouter};
pub use backup::{BackupDocument, BackupService, RestoreSummary};
pub use blob::{BlobKey, BlobStore};
pub use cache::{CacheKey, CacheStore};
pub use config::StorageConfig;
pub use durable::{DurableStore, DurableTransaction};
pub use error::{Error, ErrorKind, Result};
pub use manager::StorageManager;
pub use migration::{MigrationReport, MigrationService, MigrationSummary};
pub use monitoring::{MonitoringService, SystemHealth};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
