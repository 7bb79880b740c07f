//! Blob Store
//!
//! Typed wrapper over an [`ObjectStore`]: structured keys, download that
//! distinguishes "absent" from backend failure, metadata read-modify-write,
//! and copy/move on top of plain put/get/delete.

use crate::blob::key::BlobKey;
use crate::domain::ports::{ObjectMeta, ObjectStoreRef, StoredObject};
use crate::error::{Error, Result};
use bytes::Bytes;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Result of a move
#[derive(Debug, Clone)]
pub struct MoveOutcome {
    /// Metadata of the object at its new key
    pub meta: ObjectMeta,
    /// False when the copy succeeded but the source could not be deleted,
    /// leaving the object under both keys
    pub source_removed: bool,
}

/// Blob store facade used by the storage manager
#[derive(Clone)]
pub struct BlobStore {
    backend: ObjectStoreRef,
}

impl BlobStore {
    pub fn new(backend: ObjectStoreRef) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.backend_name()
    }

    /// Store an object under `key`
    pub async fn upload(
        &self,
        key: &BlobKey,
        data: Bytes,
        content_type: Option<String>,
        metadata: BTreeMap<String, String>,
    ) -> Result<ObjectMeta> {
        let meta = self
            .backend
            .put(&key.to_storage_key(), data, content_type, metadata)
            .await?;
        debug!(key = %key, size = meta.size_bytes, "Uploaded object");
        Ok(meta)
    }

    /// Fetch an object; absence is [`Error::BlobNotFound`]
    pub async fn download(&self, key: &BlobKey) -> Result<StoredObject> {
        self.backend
            .get(&key.to_storage_key())
            .await?
            .ok_or_else(|| Error::BlobNotFound {
                key: key.to_string(),
            })
    }

    /// Delete an object; returns whether it existed
    pub async fn delete(&self, key: &BlobKey) -> Result<bool> {
        self.backend.delete(&key.to_storage_key()).await
    }

    pub async fn exists(&self, key: &BlobKey) -> Result<bool> {
        Ok(self.backend.head(&key.to_storage_key()).await?.is_some())
    }

    /// List objects under a raw prefix
    pub async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        self.backend.list(prefix).await
    }

    /// List every object of `kind` owned by `owner`
    pub async fn list_owned(&self, kind: &str, owner: &str) -> Result<Vec<ObjectMeta>> {
        self.backend.list(&BlobKey::owner_prefix(kind, owner)).await
    }

    pub async fn get_metadata(&self, key: &BlobKey) -> Result<Option<ObjectMeta>> {
        self.backend.head(&key.to_storage_key()).await
    }

    /// Merge `updates` into the object's user metadata.
    ///
    /// The backend has no partial metadata update, so the object is read in
    /// full and written back with the merged sidecar.
    pub async fn update_metadata(
        &self,
        key: &BlobKey,
        updates: BTreeMap<String, String>,
    ) -> Result<ObjectMeta> {
        let current = self.download(key).await?;
        let mut custom = current.meta.custom;
        custom.extend(updates);

        self.backend
            .put(
                &key.to_storage_key(),
                current.data,
                current.meta.content_type,
                custom,
            )
            .await
    }

    /// Copy an object with its metadata
    pub async fn copy(&self, from: &BlobKey, to: &BlobKey) -> Result<ObjectMeta> {
        let source = self.download(from).await?;
        self.backend
            .put(
                &to.to_storage_key(),
                source.data,
                source.meta.content_type,
                source.meta.custom,
            )
            .await
    }

    /// Copy then delete the source.
    ///
    /// A failed delete after a successful copy is reported through
    /// [`MoveOutcome::source_removed`] and logged; the copy is not undone.
    pub async fn move_object(&self, from: &BlobKey, to: &BlobKey) -> Result<MoveOutcome> {
        let meta = self.copy(from, to).await?;

        let source_removed = match self.backend.delete(&from.to_storage_key()).await {
            Ok(_) => true,
            Err(e) => {
                warn!(
                    from = %from,
                    to = %to,
                    error = %e,
                    "Move copied object but could not delete source; object now exists twice"
                );
                false
            }
        };

        Ok(MoveOutcome {
            meta,
            source_removed,
        })
    }

    /// Raw reachability check
    pub async fn probe(&self) -> Result<()> {
        self.backend.ping().await
    }
}
