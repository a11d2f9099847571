// Shared test helpers.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use prolly_seq::{
    ChunkStore, Hash, InMemoryStore, ProllyError, SortedMap, Value, ValueChanged,
};

/// Store decorator counting chunk reads, for asserting how much of a tree a
/// diff actually touched.
#[derive(Debug)]
pub struct CountingStore {
    inner: InMemoryStore,
    reads: AtomicU64,
}

impl CountingStore {
    pub fn new() -> Self {
        CountingStore {
            inner: InMemoryStore::new(),
            reads: AtomicU64::new(0),
        }
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn reset_reads(&self) {
        self.reads.store(0, Ordering::Relaxed);
    }
}

#[async_trait]
impl ChunkStore for CountingStore {
    async fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>, ProllyError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.inner.get(hash).await
    }

    async fn put(&self, bytes: Vec<u8>) -> Result<Hash, ProllyError> {
        self.inner.put(bytes).await
    }

    async fn delete_batch(&self, hashes: &[Hash]) -> Result<(), ProllyError> {
        self.inner.delete_batch(hashes).await
    }

    async fn all_hashes(&self) -> Result<Vec<Hash>, ProllyError> {
        self.inner.all_hashes().await
    }
}

/// Runs a best-strategy diff to completion and collects the events.
pub async fn collect_diff<S: ChunkStore>(
    last: &SortedMap<S>,
    current: &SortedMap<S>,
) -> Vec<ValueChanged> {
    let (tx, mut rx) = mpsc::channel(64);
    let (stop_tx, stop_rx) = watch::channel(false);
    let last = last.clone();
    let current = current.clone();
    let handle = tokio::spawn(async move { current.diff(&last, tx, stop_rx).await });

    let mut events = Vec::new();
    while let Some(change) = rx.recv().await {
        events.push(change);
    }
    let complete = handle.await.unwrap().unwrap();
    assert!(complete, "diff was unexpectedly stopped");
    drop(stop_tx);
    events
}

/// Map entries `i -> i * 10` for `0..n`, in key order.
pub fn int_entries(n: i64) -> Vec<(Value, Value)> {
    (0..n)
        .map(|i| (Value::Int(i), Value::Int(i * 10)))
        .collect()
}

pub fn int_values(n: i64) -> Vec<Value> {
    (0..n).map(Value::Int).collect()
}
