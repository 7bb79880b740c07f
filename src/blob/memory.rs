//! In-Memory Object Store
//!
//! DashMap-backed [`ObjectStore`] used for tests and single-process setups.

use crate::domain::ports::{ObjectMeta, ObjectStore, StoredObject};
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::BTreeMap;

/// Object store held entirely in memory
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: DashMap<String, StoredObject>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Total payload bytes held
    pub fn size_bytes(&self) -> u64 {
        self.objects.iter().map(|r| r.meta.size_bytes).sum()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: Option<String>,
        custom: BTreeMap<String, String>,
    ) -> Result<ObjectMeta> {
        let meta = ObjectMeta {
            key: key.to_string(),
            size_bytes: data.len() as u64,
            content_type,
            custom,
            last_modified: Utc::now(),
        };
        self.objects.insert(
            key.to_string(),
            StoredObject {
                meta: meta.clone(),
                data,
            },
        );
        Ok(meta)
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        Ok(self.objects.get(key).map(|r| r.value().clone()))
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>> {
        Ok(self.objects.get(key).map(|r| r.meta.clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.objects.remove(key).is_some())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let mut metas: Vec<ObjectMeta> = self
            .objects
            .iter()
            .filter(|r| r.key().starts_with(prefix))
            .map(|r| r.meta.clone())
            .collect();
        metas.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(metas)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_operations() {
        let store = MemoryObjectStore::new();

        store
            .put("files/g1/a.txt", Bytes::from("hello"), None, BTreeMap::new())
            .await
            .unwrap();
        store
            .put("files/g2/b.txt", Bytes::from("world!"), None, BTreeMap::new())
            .await
            .unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.size_bytes(), 11);

        let obj = store.get("files/g1/a.txt").await.unwrap().unwrap();
        assert_eq!(obj.data, Bytes::from("hello"));

        let listed = store.list("files/g1/").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, "files/g1/a.txt");

        assert!(store.delete("files/g1/a.txt").await.unwrap());
        assert!(store.head("files/g1/a.txt").await.unwrap().is_none());
    }
}
