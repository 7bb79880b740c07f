//! Blob Tier
//!
//! Binary payloads (attachments, exports, backup snapshots) keyed by
//! `type/id/filename`. Blobs are never cached.

pub mod key;
pub mod local;
pub mod memory;
pub mod store;

pub use key::BlobKey;
pub use local::{LocalObjectStore, LocalObjectStoreConfig};
pub use memory::MemoryObjectStore;
pub use store::{BlobStore, MoveOutcome};

use crate::config::{BlobBackendConfig, BlobConfig};
use crate::domain::ports::ObjectStoreRef;
use crate::error::Result;
use std::sync::Arc;

/// Build the configured object store adapter
pub async fn build_object_store(config: &BlobConfig) -> Result<ObjectStoreRef> {
    match &config.backend {
        BlobBackendConfig::Memory => Ok(Arc::new(MemoryObjectStore::new())),
        BlobBackendConfig::Local { root } => {
            Ok(Arc::new(LocalObjectStore::with_path(root.clone()).await?))
        }
    }
}
