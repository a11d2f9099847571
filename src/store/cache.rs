// prolly-seq/src/store/cache.rs

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lru::LruCache;

use super::chunk_store::ChunkStore;
use crate::common::Hash;
use crate::error::{ProllyError, Result};

pub const DEFAULT_CACHE_CAPACITY: usize = 4096;

/// Read-through LRU chunk cache in front of any `ChunkStore`.
///
/// Chunks are immutable and content addressed, so cached bytes can never go
/// stale; the only interaction with mutation is eviction on `delete_batch`.
/// The lock guards plain map operations and is never held across an await.
pub struct CachingStore<S: ChunkStore> {
    inner: Arc<S>,
    cache: Mutex<LruCache<Hash, Arc<Vec<u8>>>>,
}

impl<S: ChunkStore> CachingStore<S> {
    pub fn new(inner: Arc<S>) -> Self {
        Self::with_capacity(inner, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(inner: Arc<S>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        CachingStore {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    fn lock_cache(&self) -> Result<std::sync::MutexGuard<'_, LruCache<Hash, Arc<Vec<u8>>>>> {
        self.cache
            .lock()
            .map_err(|_| ProllyError::StorageError("chunk cache lock poisoned".to_string()))
    }
}

impl<S: ChunkStore> fmt::Debug for CachingStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.cache.lock().map(|c| c.len()).unwrap_or(0);
        f.debug_struct("CachingStore")
            .field("inner", &self.inner)
            .field("cached_chunks", &len)
            .finish()
    }
}

#[async_trait]
impl<S: ChunkStore> ChunkStore for CachingStore<S> {
    async fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        if let Some(bytes) = self.lock_cache()?.get(hash).cloned() {
            return Ok(Some(bytes.as_ref().clone()));
        }
        let fetched = self.inner.get(hash).await?;
        if let Some(ref bytes) = fetched {
            self.lock_cache()?.put(*hash, Arc::new(bytes.clone()));
        }
        Ok(fetched)
    }

    async fn put(&self, bytes: Vec<u8>) -> Result<Hash> {
        let hash = self.inner.put(bytes.clone()).await?;
        self.lock_cache()?.put(hash, Arc::new(bytes));
        Ok(hash)
    }

    async fn delete_batch(&self, hashes: &[Hash]) -> Result<()> {
        {
            let mut cache = self.lock_cache()?;
            for hash in hashes {
                cache.pop(hash);
            }
        }
        self.inner.delete_batch(hashes).await
    }

    async fn all_hashes(&self) -> Result<Vec<Hash>> {
        self.inner.all_hashes().await
    }
}
