//! Local Disk Object Store
//!
//! File-based [`ObjectStore`]. Every object is a `.data` file with a `.meta`
//! JSON sidecar holding its key, content type and user metadata. Key segments
//! are percent-encoded into directory and file names.

use crate::domain::ports::{ObjectMeta, ObjectStore, StoredObject};
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const DATA_EXTENSION: &str = "data";
const META_EXTENSION: &str = "meta";

// =============================================================================
// Local Store Configuration
// =============================================================================

/// Configuration for the local object store
#[derive(Debug, Clone)]
pub struct LocalObjectStoreConfig {
    /// Root directory for objects
    pub root_path: PathBuf,
    /// Whether to fsync object payloads
    pub sync_writes: bool,
}

impl Default for LocalObjectStoreConfig {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from("/var/lib/tenant-storage/blobs"),
            sync_writes: false,
        }
    }
}

// =============================================================================
// Sidecar Metadata
// =============================================================================

/// Metadata stored next to each object
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SidecarMetadata {
    key: String,
    size_bytes: u64,
    content_type: Option<String>,
    #[serde(default)]
    custom: BTreeMap<String, String>,
    last_modified: i64,
}

impl SidecarMetadata {
    fn into_meta(self) -> ObjectMeta {
        ObjectMeta {
            key: self.key,
            size_bytes: self.size_bytes,
            content_type: self.content_type,
            custom: self.custom,
            last_modified: DateTime::from_timestamp_millis(self.last_modified)
                .unwrap_or_else(Utc::now),
        }
    }
}

// =============================================================================
// Local Object Store
// =============================================================================

/// Object store rooted at a local directory
pub struct LocalObjectStore {
    root_path: PathBuf,
    /// Index of stored objects (key -> data file path), ordered for listing
    index: RwLock<BTreeMap<String, PathBuf>>,
    sync_writes: bool,
}

impl LocalObjectStore {
    /// Create a store rooted at `root_path`
    pub async fn with_path(root_path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_config(LocalObjectStoreConfig {
            root_path: root_path.into(),
            ..Default::default()
        })
        .await
    }

    pub async fn with_config(config: LocalObjectStoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.root_path).await?;

        let store = Self {
            root_path: config.root_path,
            index: RwLock::new(BTreeMap::new()),
            sync_writes: config.sync_writes,
        };

        store.rebuild_index().await?;
        Ok(store)
    }

    /// Rebuild the key index by scanning sidecars on disk
    async fn rebuild_index(&self) -> Result<()> {
        let mut found = BTreeMap::new();
        let mut pending = vec![self.root_path.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(e) => e,
                Err(_) => continue,
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                if path.extension().map(|e| e == META_EXTENSION).unwrap_or(false) {
                    let Ok(raw) = fs::read_to_string(&path).await else {
                        continue;
                    };
                    match serde_json::from_str::<SidecarMetadata>(&raw) {
                        Ok(meta) => {
                            let data_path = path.with_extension(DATA_EXTENSION);
                            if fs::metadata(&data_path).await.is_ok() {
                                found.insert(meta.key, data_path);
                            }
                        }
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "Skipping unreadable sidecar")
                        }
                    }
                }
            }
        }

        debug!(objects = found.len(), root = %self.root_path.display(), "Rebuilt object index");
        *self.index.write() = found;
        Ok(())
    }

    /// Data file path for a key: one directory per encoded segment
    fn data_path(&self, key: &str) -> PathBuf {
        let mut path = self.root_path.clone();
        let segments: Vec<&str> = key.split('/').collect();
        let (file, dirs) = match segments.split_last() {
            Some((file, dirs)) => (*file, dirs),
            None => (key, &[][..]),
        };
        for dir in dirs {
            path.push(urlencoding::encode(dir).as_ref());
        }
        path.push(format!("{}.{}", urlencoding::encode(file), DATA_EXTENSION));
        path
    }

    async fn read_sidecar(&self, data_path: &Path) -> Result<Option<SidecarMetadata>> {
        let meta_path = data_path.with_extension(META_EXTENSION);
        let raw = match fs::read_to_string(&meta_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn indexed_path(&self, key: &str) -> Option<PathBuf> {
        self.index.read().get(key).cloned()
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: Option<String>,
        custom: BTreeMap<String, String>,
    ) -> Result<ObjectMeta> {
        let data_path = self.data_path(key);
        let meta_path = data_path.with_extension(META_EXTENSION);

        if let Some(parent) = data_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&data_path).await?;
        file.write_all(&data).await?;
        file.flush().await?;
        if self.sync_writes {
            file.sync_all().await?;
        }

        let sidecar = SidecarMetadata {
            key: key.to_string(),
            size_bytes: data.len() as u64,
            content_type,
            custom,
            last_modified: Utc::now().timestamp_millis(),
        };
        fs::write(&meta_path, serde_json::to_vec(&sidecar)?).await?;

        self.index.write().insert(key.to_string(), data_path);
        Ok(sidecar.into_meta())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        let Some(data_path) = self.indexed_path(key) else {
            return Ok(None);
        };
        let Some(sidecar) = self.read_sidecar(&data_path).await? else {
            return Ok(None);
        };

        let data = match fs::read(&data_path).await {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(StoredObject {
            meta: sidecar.into_meta(),
            data,
        }))
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>> {
        let Some(data_path) = self.indexed_path(key) else {
            return Ok(None);
        };
        Ok(self.read_sidecar(&data_path).await?.map(SidecarMetadata::into_meta))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let data_path = {
            let mut index = self.index.write();
            index.remove(key)
        };
        let Some(data_path) = data_path else {
            return Ok(false);
        };

        let meta_path = data_path.with_extension(META_EXTENSION);
        for path in [&data_path, &meta_path] {
            match fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(Error::BlobBackend {
                        operation: "delete".into(),
                        key: key.to_string(),
                        reason: e.to_string(),
                    })
                }
            }
        }
        Ok(true)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let paths: Vec<PathBuf> = {
            let index = self.index.read();
            index
                .range(prefix.to_string()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(_, p)| p.clone())
                .collect()
        };

        let mut metas = Vec::with_capacity(paths.len());
        for path in paths {
            if let Some(sidecar) = self.read_sidecar(&path).await? {
                metas.push(sidecar.into_meta());
            }
        }
        Ok(metas)
    }

    async fn ping(&self) -> Result<()> {
        // Root must exist and be writable
        let probe_path = self.root_path.join(".health_check");
        fs::write(&probe_path, b"ok").await?;
        let _ = fs::remove_file(&probe_path).await;
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "local"
    }
}
