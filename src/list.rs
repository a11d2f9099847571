// prolly-seq/src/list.rs

//! Ordered lists over the sequence engine: positional access, efficient
//! concatenation that only touches the seams, batched splice edits, and a
//! read-ahead iteration pool.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use crate::common::{ChunkConfig, Hash};
use crate::diff::diff_lists;
use crate::error::{ProllyError, Result};
use crate::node::{CollectionKind, SequenceItem};
use crate::sequence::{Sequence, SequenceChunker, SequenceCursor};
use crate::splice::{Splice, DEFAULT_MAX_SPLICE_MATRIX_SIZE};
use crate::store::ChunkStore;
use crate::value::{load_value_repr, prepare_value_repr, Value};

/// Number of read-ahead workers for `iter_all`.
const ITER_ALL_CONCURRENCY: usize = 6;
/// Byte budget each read-ahead block aims for.
const ITER_ALL_TARGET_BLOCK_BYTES: u64 = 1 << 23; // 8 MiB
/// Starting guess for values per block, adjusted from measured bytes.
const ITER_ALL_INITIAL_BLOCK_LEN: u64 = 1000;

/// An immutable ordered list of values, chunked into a prolly tree.
#[derive(Debug)]
pub struct List<S: ChunkStore> {
    seq: Sequence<S>,
    config: ChunkConfig,
}

impl<S: ChunkStore> Clone for List<S> {
    fn clone(&self) -> Self {
        List {
            seq: self.seq.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: ChunkStore> List<S> {
    /// Builds a list from values, chunking as needed.
    pub async fn new(store: Arc<S>, values: Vec<Value>) -> Result<Self> {
        Self::with_config(store, ChunkConfig::default(), values).await
    }

    pub async fn with_config(
        store: Arc<S>,
        config: ChunkConfig,
        values: Vec<Value>,
    ) -> Result<Self> {
        config.validate().map_err(ProllyError::ConfigError)?;
        let mut chunker =
            SequenceChunker::new(Arc::clone(&store), CollectionKind::List, config.clone());
        for value in values {
            let repr = prepare_value_repr(&store, &config, value).await?;
            chunker.append(SequenceItem::ListValue(repr)).await?;
        }
        let seq = chunker.done().await?;
        Ok(List { seq, config })
    }

    /// Loads a list from its root hash, validating the root chunk's kind.
    pub async fn load(store: Arc<S>, hash: Hash) -> Result<Self> {
        Self::load_with_config(store, hash, ChunkConfig::default()).await
    }

    pub async fn load_with_config(
        store: Arc<S>,
        hash: Hash,
        config: ChunkConfig,
    ) -> Result<Self> {
        config.validate().map_err(ProllyError::ConfigError)?;
        let seq = Sequence::read_root(store, hash).await?;
        if seq.kind() != CollectionKind::List {
            return Err(ProllyError::TypeMismatch(format!(
                "root {} is a {:?} sequence, not a list",
                crate::common::fmt_hash(&hash),
                seq.kind()
            )));
        }
        Ok(List { seq, config })
    }

    pub(crate) fn from_sequence(seq: Sequence<S>, config: ChunkConfig) -> Self {
        List { seq, config }
    }

    pub fn sequence(&self) -> &Sequence<S> {
        &self.seq
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Root hash. Present for every list built or loaded through this type.
    pub fn hash(&self) -> Option<Hash> {
        self.seq.hash()
    }

    pub fn len(&self) -> u64 {
        self.seq.num_leaves()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at `index`, `O(tree height)` chunk reads.
    pub async fn get(&self, index: u64) -> Result<Option<Value>> {
        if index >= self.len() {
            return Ok(None);
        }
        let cur = SequenceCursor::at_index(self.seq.clone(), index).await?;
        match cur.current()? {
            SequenceItem::ListValue(repr) => {
                Ok(Some(load_value_repr(self.seq.store(), &repr).await?))
            }
            other => Err(ProllyError::InvariantViolation(format!(
                "non-value item {other:?} in a list leaf"
            ))),
        }
    }

    /// Iterates values in order; the callback returns `true` to stop.
    pub async fn iter<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(Value, u64) -> bool,
    {
        let mut cur = SequenceCursor::at_start(self.seq.clone()).await?;
        let mut index = 0u64;
        while cur.valid() {
            let value = match cur.current()? {
                SequenceItem::ListValue(repr) => {
                    load_value_repr(self.seq.store(), &repr).await?
                }
                other => {
                    return Err(ProllyError::InvariantViolation(format!(
                        "non-value item {other:?} in a list leaf"
                    )))
                }
            };
            if f(value, index) {
                break;
            }
            index += 1;
            cur.advance().await?;
        }
        Ok(())
    }

    /// Visits every value in order through a pool of read-ahead workers.
    /// Each worker reads a contiguous block of leaves and the block length
    /// adapts toward a fixed byte budget.
    pub async fn iter_all<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(Value, u64),
    {
        let len = self.len();
        if len == 0 {
            return Ok(());
        }

        let estimated_block_len = Arc::new(AtomicU64::new(ITER_ALL_INITIAL_BLOCK_LEN));
        let (block_tx, mut block_rx) =
            mpsc::channel::<oneshot::Receiver<Result<Vec<Value>>>>(ITER_ALL_CONCURRENCY);

        let seq = self.seq.clone();
        let estimate = Arc::clone(&estimated_block_len);
        let producer = tokio::spawn(async move {
            let mut idx = 0u64;
            while idx < len {
                let num_values = estimate.load(Ordering::Relaxed).max(1);
                let block_len = (len - idx).min(num_values);
                let (tx, rx) = oneshot::channel();
                if block_tx.send(rx).await.is_err() {
                    return; // consumer went away
                }
                let seq = seq.clone();
                let estimate = Arc::clone(&estimate);
                tokio::spawn(async move {
                    let result = read_block(seq, idx, block_len).await.map(|(values, bytes)| {
                        // Re-aim the next block at the byte budget using
                        // what this block actually cost.
                        if num_values == block_len && bytes > 0 {
                            let scale =
                                ITER_ALL_TARGET_BLOCK_BYTES as f64 / bytes as f64;
                            let next = ((num_values as f64) * scale).max(1.0) as u64;
                            estimate.store(next, Ordering::Relaxed);
                        }
                        values
                    });
                    let _ = tx.send(result);
                });
                idx += block_len;
            }
        });

        let mut index = 0u64;
        let mut failure: Option<ProllyError> = None;
        // Keep draining after a failure so in-flight workers can finish.
        while let Some(rx) = block_rx.recv().await {
            match rx.await {
                Ok(Ok(values)) => {
                    if failure.is_none() {
                        for value in values {
                            f(value, index);
                            index += 1;
                        }
                    }
                }
                Ok(Err(e)) => failure = failure.or(Some(e)),
                Err(_) => {
                    failure = failure.or(Some(ProllyError::TaskFailure(
                        "read-ahead worker dropped its result".to_string(),
                    )))
                }
            }
        }
        producer.await?;
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Collects every value. Test and tooling convenience.
    pub async fn values(&self) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        self.iter_all(|v, _| out.push(v)).await?;
        Ok(out)
    }

    /// Returns `self ++ other`, reading only the right edge of `self` and
    /// the left frontier of `other`; everything past the seam is shared by
    /// reference.
    pub async fn concat(&self, other: &List<S>) -> Result<List<S>> {
        if self.is_empty() {
            return Ok(other.clone());
        }
        if other.is_empty() {
            return Ok(self.clone());
        }
        let store = Arc::clone(self.seq.store());
        let end = SequenceCursor::at_index(self.seq.clone(), self.len()).await?;
        let mut chunker = SequenceChunker::resume_at(
            store,
            CollectionKind::List,
            self.config.clone(),
            end,
        )
        .await?;
        let start = SequenceCursor::at_index(other.seq.clone(), 0).await?;
        chunker.replace_source(start);
        let seq = chunker.done().await?;
        Ok(List::from_sequence(seq, self.config.clone()))
    }

    /// Opens an edit batch against this list.
    pub fn edit(&self) -> ListEditor<S> {
        ListEditor {
            list: self.clone(),
            edits: Vec::new(),
        }
    }

    /// Streams splices turning `last` into `self` into `changes`.
    pub async fn diff(
        &self,
        last: &List<S>,
        changes: mpsc::Sender<Splice>,
        stop: watch::Receiver<bool>,
    ) -> Result<bool> {
        self.diff_with_limit(last, changes, stop, DEFAULT_MAX_SPLICE_MATRIX_SIZE)
            .await
    }

    /// Like `diff`, with an explicit ceiling on the edit-distance matrix;
    /// past it a range is reported as one coarse splice.
    pub async fn diff_with_limit(
        &self,
        last: &List<S>,
        changes: mpsc::Sender<Splice>,
        stop: watch::Receiver<bool>,
        max_matrix_size: u64,
    ) -> Result<bool> {
        diff_lists(&last.seq, &self.seq, changes, stop, max_matrix_size).await
    }
}

async fn read_block<S: ChunkStore>(
    seq: Sequence<S>,
    start: u64,
    count: u64,
) -> Result<(Vec<Value>, u64)> {
    let store = Arc::clone(seq.store());
    let mut cur = SequenceCursor::at_index(seq, start).await?;
    let mut values = Vec::with_capacity(count as usize);
    let mut bytes = 0u64;
    let mut counted_first = false;
    while (values.len() as u64) < count && cur.valid() {
        if !counted_first || cur.index_in_chunk() == 0 {
            bytes += cur.sequence().encoded_len();
            counted_first = true;
        }
        match cur.current()? {
            SequenceItem::ListValue(repr) => {
                values.push(load_value_repr(&store, &repr).await?)
            }
            other => {
                return Err(ProllyError::InvariantViolation(format!(
                    "non-value item {other:?} in a list leaf"
                )))
            }
        }
        cur.advance().await?;
    }
    Ok((values, bytes))
}

/// An accumulated batch of list splices, applied in position order on
/// `build`. Edits must not overlap.
pub struct ListEditor<S: ChunkStore> {
    list: List<S>,
    edits: Vec<(u64, u64, Vec<Value>)>,
}

impl<S: ChunkStore> ListEditor<S> {
    pub fn insert(self, at: u64, values: Vec<Value>) -> Self {
        self.splice(at, 0, values)
    }

    pub fn remove(self, at: u64, count: u64) -> Self {
        self.splice(at, count, Vec::new())
    }

    /// Replaces `values.len()` items starting at `at`.
    pub fn update(self, at: u64, values: Vec<Value>) -> Self {
        let count = values.len() as u64;
        self.splice(at, count, values)
    }

    pub fn splice(mut self, at: u64, removed: u64, inserted: Vec<Value>) -> Self {
        self.edits.push((at, removed, inserted));
        self
    }

    pub async fn build(self) -> Result<List<S>> {
        let ListEditor { list, mut edits } = self;
        if edits.is_empty() {
            return Ok(list);
        }
        edits.sort_by_key(|(at, _, _)| *at);

        let mut end_of_previous = 0u64;
        for (at, removed, _) in &edits {
            if *at < end_of_previous {
                return Err(ProllyError::InvalidOperation(format!(
                    "overlapping list edits at index {at}"
                )));
            }
            end_of_previous = at + removed;
        }
        if end_of_previous > list.len() {
            return Err(ProllyError::InvalidOperation(format!(
                "list edit past the end: {} > {}",
                end_of_previous,
                list.len()
            )));
        }

        let store = Arc::clone(list.seq.store());
        let config = list.config.clone();
        let first_at = edits[0].0;
        let mut chunker = if list.is_empty() {
            SequenceChunker::new(Arc::clone(&store), CollectionKind::List, config.clone())
        } else {
            let cur = SequenceCursor::at_index(list.seq.clone(), first_at).await?;
            SequenceChunker::resume_at(
                Arc::clone(&store),
                CollectionKind::List,
                config.clone(),
                cur,
            )
            .await?
        };

        let mut source_pos = first_at;
        for (at, removed, inserted) in edits {
            chunker.copy_source_items(at - source_pos).await?;
            chunker.skip_source(removed).await?;
            source_pos = at + removed;
            for value in inserted {
                let repr = prepare_value_repr(&store, &config, value).await?;
                chunker.append(SequenceItem::ListValue(repr)).await?;
            }
        }

        let seq = chunker.done().await?;
        Ok(List::from_sequence(seq, config))
    }
}
