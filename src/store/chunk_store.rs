// prolly-seq/src/store/chunk_store.rs

use async_trait::async_trait;

use crate::common::Hash;
use crate::error::Result;

/// A content-addressed chunk store.
///
/// Implementations must be safe for concurrent reads and writes of distinct
/// keys, idempotent on `put`, and read-after-write consistent for hashes
/// written by the same writer. Sequences, cursors and the diff engine only
/// ever talk to persisted chunks through this trait.
#[async_trait]
pub trait ChunkStore: std::fmt::Debug + Send + Sync + 'static {
    /// Retrieves a chunk by its hash; `Ok(None)` when absent.
    async fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>>;

    /// Stores a chunk and returns its hash, computed over the exact bytes
    /// written with `crate::common::hash_bytes`. Writing bytes that already
    /// exist is a no-op.
    async fn put(&self, bytes: Vec<u8>) -> Result<Hash>;

    async fn exists(&self, hash: &Hash) -> Result<bool> {
        self.get(hash).await.map(|opt| opt.is_some())
    }

    /// Deletes a batch of chunks; missing hashes are ignored. Used by the
    /// garbage collector.
    async fn delete_batch(&self, hashes: &[Hash]) -> Result<()>;

    /// Every hash currently present. Used by the garbage collector's sweep.
    async fn all_hashes(&self) -> Result<Vec<Hash>>;
}
