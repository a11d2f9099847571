// prolly-seq/src/store/mem_store.rs

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::chunk_store::ChunkStore;
use crate::common::{hash_bytes, Hash};
use crate::error::Result;

#[derive(Debug, Default)]
struct InMemoryStoreInner {
    data: HashMap<Hash, Vec<u8>>,
}

/// An in-memory `ChunkStore` backed by `tokio::sync::RwLock`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<InMemoryStoreInner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store pre-populated with chunks, e.g. from a snapshot file.
    pub fn from_chunks(chunks: HashMap<Hash, Vec<u8>>) -> Self {
        InMemoryStore {
            inner: Arc::new(RwLock::new(InMemoryStoreInner { data: chunks })),
        }
    }

    /// Copies out every chunk, keyed by hash. Snapshot export reads the
    /// whole store through this.
    pub async fn all_chunks(&self) -> HashMap<Hash, Vec<u8>> {
        self.inner.read().await.data.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.data.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.data.is_empty()
    }
}

#[async_trait]
impl ChunkStore for InMemoryStore {
    async fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        let guard = self.inner.read().await;
        Ok(guard.data.get(hash).cloned())
    }

    async fn put(&self, bytes: Vec<u8>) -> Result<Hash> {
        let hash = hash_bytes(&bytes);
        let mut guard = self.inner.write().await;
        guard.data.entry(hash).or_insert(bytes);
        Ok(hash)
    }

    async fn delete_batch(&self, hashes: &[Hash]) -> Result<()> {
        if hashes.is_empty() {
            return Ok(());
        }
        let mut guard = self.inner.write().await;
        for hash in hashes {
            guard.data.remove(hash);
        }
        Ok(())
    }

    async fn all_hashes(&self) -> Result<Vec<Hash>> {
        let guard = self.inner.read().await;
        Ok(guard.data.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_is_idempotent_and_content_addressed() {
        let store = InMemoryStore::new();
        let h1 = store.put(b"abc".to_vec()).await.unwrap();
        let h2 = store.put(b"abc".to_vec()).await.unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1, hash_bytes(b"abc"));
        assert_eq!(store.len().await, 1);
        assert_eq!(store.get(&h1).await.unwrap().unwrap(), b"abc".to_vec());
    }

    #[tokio::test]
    async fn delete_batch_ignores_missing() {
        let store = InMemoryStore::new();
        let h = store.put(b"x".to_vec()).await.unwrap();
        let missing = hash_bytes(b"missing");
        store.delete_batch(&[h, missing]).await.unwrap();
        assert!(store.is_empty().await);
    }
}
