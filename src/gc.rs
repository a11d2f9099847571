// prolly-seq/src/gc.rs

//! Mark-and-sweep collection of unreferenced chunks. Roots are whatever
//! hashes the application still holds; everything reachable from them
//! (sequence nodes and value data chunks) survives, the rest is deleted.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use log::trace;

use crate::common::Hash;
use crate::error::{ProllyError, Result};
use crate::node::SequenceNode;
use crate::store::ChunkStore;
use crate::value::ValueRepr;

pub struct GarbageCollector<S: ChunkStore> {
    store: Arc<S>,
}

impl<S: ChunkStore> GarbageCollector<S> {
    pub fn new(store: Arc<S>) -> Self {
        GarbageCollector { store }
    }

    /// Deletes every chunk not reachable from `live_root_hashes`. Returns
    /// the number of chunks collected.
    pub async fn collect(&self, live_root_hashes: &[Hash]) -> Result<usize> {
        let all_hashes: HashSet<Hash> = self.store.all_hashes().await?.into_iter().collect();
        if all_hashes.is_empty() {
            return Ok(0);
        }
        trace!("gc: {} chunks in store before collection", all_hashes.len());

        let mut live = HashSet::new();
        let mut queue: VecDeque<Hash> = live_root_hashes
            .iter()
            .filter(|h| all_hashes.contains(*h))
            .cloned()
            .collect();

        while let Some(hash) = queue.pop_front() {
            if !live.insert(hash) {
                continue;
            }
            let bytes = self.store.get(&hash).await?.ok_or_else(|| {
                ProllyError::StorageError(format!(
                    "gc: chunk {} disappeared during mark",
                    crate::common::fmt_hash(&hash)
                ))
            })?;
            // Chunks that fail to decode as nodes are value data chunks;
            // they carry no further references.
            let Ok(node) = SequenceNode::decode(&bytes) else {
                continue;
            };
            let mut enqueue = |h: &Hash| {
                if all_hashes.contains(h) && !live.contains(h) {
                    queue.push_back(*h);
                }
            };
            match &node {
                SequenceNode::ListLeaf { values } => {
                    for repr in values {
                        mark_value_repr(repr, &mut enqueue);
                    }
                }
                SequenceNode::MapLeaf { entries } => {
                    for entry in entries {
                        mark_value_repr(&entry.value, &mut enqueue);
                    }
                }
                SequenceNode::Meta { tuples, .. } => {
                    for tuple in tuples {
                        enqueue(&tuple.child.hash);
                    }
                }
            }
        }
        trace!("gc: {} chunks marked live", live.len());

        let dead: Vec<Hash> = all_hashes
            .into_iter()
            .filter(|h| !live.contains(h))
            .collect();
        if !dead.is_empty() {
            trace!("gc: sweeping {} dead chunks", dead.len());
            self.store.delete_batch(&dead).await?;
        }
        Ok(dead.len())
    }
}

fn mark_value_repr(repr: &ValueRepr, enqueue: &mut impl FnMut(&Hash)) {
    match repr {
        ValueRepr::Inline(_) => {}
        ValueRepr::Chunked(hash) => enqueue(hash),
        ValueRepr::ChunkedSequence { chunk_hashes, .. } => {
            for hash in chunk_hashes {
                enqueue(hash);
            }
        }
    }
}
