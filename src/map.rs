// prolly-seq/src/map.rs

//! Ordered maps over the sequence engine. A map is an immutable value;
//! every "mutation" goes through the editor and yields a new root.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::common::{ChunkConfig, Hash};
use crate::diff::{diff_maps, diff_maps_with_policy, CutoverPolicy, ValueChanged};
use crate::error::{ProllyError, Result};
use crate::node::{CollectionKind, MapEntry, SequenceItem};
use crate::sequence::{Sequence, SequenceChunker, SequenceCursor};
use crate::store::ChunkStore;
use crate::value::{load_value_repr, prepare_value_repr, Value};

/// An immutable ordered map of values, chunked into a prolly tree.
#[derive(Debug)]
pub struct SortedMap<S: ChunkStore> {
    seq: Sequence<S>,
    config: ChunkConfig,
}

impl<S: ChunkStore> Clone for SortedMap<S> {
    fn clone(&self) -> Self {
        SortedMap {
            seq: self.seq.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: ChunkStore> SortedMap<S> {
    /// Builds a map from entries, chunking as needed. Duplicate keys keep
    /// the last value.
    pub async fn new(store: Arc<S>, entries: Vec<(Value, Value)>) -> Result<Self> {
        Self::with_config(store, ChunkConfig::default(), entries).await
    }

    pub async fn with_config(
        store: Arc<S>,
        config: ChunkConfig,
        entries: Vec<(Value, Value)>,
    ) -> Result<Self> {
        config.validate().map_err(ProllyError::ConfigError)?;
        let mut sorted: BTreeMap<Value, Value> = BTreeMap::new();
        for (key, value) in entries {
            sorted.insert(key, value);
        }

        let mut chunker =
            SequenceChunker::new(Arc::clone(&store), CollectionKind::Map, config.clone());
        for (key, value) in sorted {
            let repr = prepare_value_repr(&store, &config, value).await?;
            chunker
                .append(SequenceItem::MapEntry(MapEntry { key, value: repr }))
                .await?;
        }
        let seq = chunker.done().await?;
        Ok(SortedMap { seq, config })
    }

    /// Loads a map from its root hash, validating the root chunk's kind.
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
        if seq.kind() != CollectionKind::Map {
            return Err(ProllyError::TypeMismatch(format!(
                "root {} is a {:?} sequence, not a map",
                crate::common::fmt_hash(&hash),
                seq.kind()
            )));
        }
        Ok(SortedMap { seq, config })
    }

    pub(crate) fn from_sequence(seq: Sequence<S>, config: ChunkConfig) -> Self {
        SortedMap { seq, config }
    }

    pub fn sequence(&self) -> &Sequence<S> {
        &self.seq
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Root hash. Present for every map built or loaded through this type.
    pub fn hash(&self) -> Option<Hash> {
        self.seq.hash()
    }

    pub fn len(&self) -> u64 {
        self.seq.num_leaves()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point lookup, `O(tree height)` chunk reads.
    pub async fn get(&self, key: &Value) -> Result<Option<Value>> {
        if self.is_empty() {
            return Ok(None);
        }
        let cur = SequenceCursor::at_key(self.seq.clone(), key).await?;
        if cur.valid() {
            let entry = cur.current_map_entry()?;
            if entry.key == *key {
                return Ok(Some(load_value_repr(self.seq.store(), &entry.value).await?));
            }
        }
        Ok(None)
    }

    pub async fn contains_key(&self, key: &Value) -> Result<bool> {
        if self.is_empty() {
            return Ok(false);
        }
        let cur = SequenceCursor::at_key(self.seq.clone(), key).await?;
        Ok(cur.valid() && cur.current_map_entry()?.key == *key)
    }

    /// Iterates entries in key order; the callback returns `true` to stop.
    pub async fn iter<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(Value, Value) -> bool,
    {
        let mut cur = SequenceCursor::at_start(self.seq.clone()).await?;
        while cur.valid() {
            let entry = cur.current_map_entry()?.clone();
            let value = load_value_repr(self.seq.store(), &entry.value).await?;
            if f(entry.key, value) {
                break;
            }
            cur.advance().await?;
        }
        Ok(())
    }

    /// Iterates every entry in key order.
    pub async fn iter_all<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(Value, Value),
    {
        self.iter(|k, v| {
            f(k, v);
            false
        })
        .await
    }

    /// Collects every entry. Test and tooling convenience.
    pub async fn entries(&self) -> Result<Vec<(Value, Value)>> {
        let mut out = Vec::new();
        self.iter_all(|k, v| out.push((k, v))).await?;
        Ok(out)
    }

    /// Opens an edit batch against this map.
    pub fn edit(&self) -> MapEditor<S> {
        MapEditor {
            map: self.clone(),
            edits: BTreeMap::new(),
        }
    }

    /// Streams the diff from `last` to `self` into `changes` using the
    /// best strategy. Returns `Ok(true)` when the full diff was delivered,
    /// `Ok(false)` when the stop signal cut it short.
    pub async fn diff(
        &self,
        last: &SortedMap<S>,
        changes: mpsc::Sender<ValueChanged>,
        stop: watch::Receiver<bool>,
    ) -> Result<bool> {
        diff_maps(&last.seq, &self.seq, changes, stop).await
    }

    pub async fn diff_with_policy(
        &self,
        last: &SortedMap<S>,
        changes: mpsc::Sender<ValueChanged>,
        stop: watch::Receiver<bool>,
        policy: &dyn CutoverPolicy,
    ) -> Result<bool> {
        diff_maps_with_policy(&last.seq, &self.seq, changes, stop, policy).await
    }
}

/// An accumulated batch of map edits, applied in key order on `build`.
/// Untouched chunk runs are shared with the original by reference.
pub struct MapEditor<S: ChunkStore> {
    map: SortedMap<S>,
    /// `Some(value)` sets the key, `None` deletes it. Later edits to the
    /// same key win.
    edits: BTreeMap<Value, Option<Value>>,
}

impl<S: ChunkStore> MapEditor<S> {
    pub fn insert(mut self, key: impl Into<Value>, value: impl Into<Value>) -> Self {
        self.edits.insert(key.into(), Some(value.into()));
        self
    }

    /// Alias of `insert`; updating an absent key inserts it.
    pub fn update(self, key: impl Into<Value>, value: impl Into<Value>) -> Self {
        self.insert(key, value)
    }

    pub fn remove(mut self, key: impl Into<Value>) -> Self {
        self.edits.insert(key.into(), None);
        self
    }

    pub async fn build(self) -> Result<SortedMap<S>> {
        let MapEditor { map, edits } = self;
        if edits.is_empty() {
            return Ok(map);
        }
        let store = Arc::clone(map.seq.store());
        let config = map.config.clone();

        let first_key = edits
            .keys()
            .next()
            .cloned()
            .ok_or_else(|| ProllyError::InvariantViolation("empty edit batch".to_string()))?;
        let mut chunker = if map.is_empty() {
            SequenceChunker::new(Arc::clone(&store), CollectionKind::Map, config.clone())
        } else {
            let cur = SequenceCursor::at_key(map.seq.clone(), &first_key).await?;
            SequenceChunker::resume_at(
                Arc::clone(&store),
                CollectionKind::Map,
                config.clone(),
                cur,
            )
            .await?
        };

        for (key, op) in edits {
            chunker.copy_source_until_key(&key).await?;
            if chunker.source_key()?.as_ref() == Some(&key) {
                chunker.skip_source(1).await?;
            }
            if let Some(value) = op {
                let repr = prepare_value_repr(&store, &config, value).await?;
                chunker
                    .append(SequenceItem::MapEntry(MapEntry { key, value: repr }))
                    .await?;
            }
        }

        let seq = chunker.done().await?;
        Ok(SortedMap::from_sequence(seq, config))
    }
}
