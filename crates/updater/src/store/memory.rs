//! In-memory object store

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{ObjectStore, StoreError};

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    content_type: String,
}

/// Object store backed by a shared in-process map.
///
/// Clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<RwLock<BTreeMap<String, StoredObject>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All keys currently stored
    pub fn keys(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }

    /// Content type recorded for a key
    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .read()
            .get(key)
            .map(|object| object.content_type.clone())
    }

    /// Remove an object, returning whether it existed
    pub fn remove(&self, key: &str) -> bool {
        self.objects.write().remove(key).is_some()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), StoreError> {
        self.objects.write().insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.objects
            .read()
            .get(key)
            .map(|object| object.body.clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.objects.read().contains_key(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .objects
            .read()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get() {
        let store = MemoryStore::new();
        store.put("a/b.json", b"{}".to_vec(), "application/json").await.unwrap();

        assert_eq!(store.get("a/b.json").await.unwrap(), b"{}");
        assert_eq!(store.content_type("a/b.json").as_deref(), Some("application/json"));
        assert!(store.exists("a/b.json").await.unwrap());
        assert!(!store.exists("a/c.json").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = MemoryStore::new();
        let err = store.get("missing").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(key) if key == "missing"));
    }

    #[tokio::test]
    async fn test_list_prefix() {
        let store = MemoryStore::new();
        for key in ["p/b", "p/a", "q/c"] {
            store.put(key, Vec::new(), "text/plain").await.unwrap();
        }
        assert_eq!(store.list("p/").await.unwrap(), vec!["p/a", "p/b"]);
    }

    #[tokio::test]
    async fn test_clones_share_contents() {
        let store = MemoryStore::new();
        let clone = store.clone();
        store.put("k", b"v".to_vec(), "text/plain").await.unwrap();
        assert_eq!(clone.get("k").await.unwrap(), b"v");
        assert!(clone.remove("k"));
        assert!(!store.exists("k").await.unwrap());
    }
}
