// prolly-seq/src/sequence/chunker.rs

//! Streaming sequence builder. Items are appended at the leaf level; when
//! the boundary checker fires (or the hard cap is hit) the pending items
//! are sealed into a chunk, written to the store, and the resulting meta
//! tuple is appended one level up, which may cascade.
//!
//! A chunker can also resume at an existing cursor position: it replays the
//! open chunk's prefix at every level, which reproduces the boundary
//! checker's state exactly because the checker reseeds at every boundary.
//! Finalizing from a cursor streams items only until a fresh boundary lines
//! up with an old chunk end, then hands the remaining whole chunks to the
//! parent level. That hand-off is where concat and edits get structural
//! sharing.

use std::sync::Arc;

use async_recursion::async_recursion;
use log::trace;

use super::cursor::SequenceCursor;
use super::Sequence;
use crate::common::ChunkConfig;
use crate::error::{ProllyError, Result};
use crate::node::{
    ChildRef, CollectionKind, MetaTuple, OrderedKey, SequenceItem, SequenceNode,
};
use crate::rolling::RollingHasher;
use crate::store::ChunkStore;
use crate::value::Value;

pub struct SequenceChunker<S: ChunkStore> {
    store: Arc<S>,
    kind: CollectionKind,
    config: ChunkConfig,
    level: u8,
    parent: Option<Box<SequenceChunker<S>>>,
    /// Cursor over the source sequence this chunker resumed from, pointing
    /// at the first item not yet consumed. `None` for from-scratch builds.
    cur: Option<Box<SequenceCursor<S>>>,
    current: Vec<SequenceItem>,
    roller: RollingHasher,
    finished: bool,
}

impl<S: ChunkStore> SequenceChunker<S> {
    /// A chunker building a sequence from scratch.
    pub fn new(store: Arc<S>, kind: CollectionKind, config: ChunkConfig) -> Self {
        Self::new_level(store, kind, config, 0)
    }

    fn new_level(store: Arc<S>, kind: CollectionKind, config: ChunkConfig, level: u8) -> Self {
        let roller = RollingHasher::new(config.boundary_pattern_bits);
        SequenceChunker {
            store,
            kind,
            config,
            level,
            parent: None,
            cur: None,
            current: Vec::new(),
            roller,
            finished: false,
        }
    }

    /// A chunker resumed at a leaf-level cursor into an existing sequence.
    /// The open chunk's prefix at every level is replayed into the pending
    /// buffers; the remainder of the source is consumed lazily by `done`.
    pub async fn resume_at(
        store: Arc<S>,
        kind: CollectionKind,
        config: ChunkConfig,
        cur: SequenceCursor<S>,
    ) -> Result<Self> {
        let mut chunker = Self::new_level(store, kind, config, 0);
        chunker.prime(&cur).await?;
        chunker.cur = Some(Box::new(cur));
        Ok(chunker)
    }

    /// Replays items `[0, idx)` of the cursor's chunk, parents first.
    /// No boundary can fire before the cursor position: the source chunk
    /// did not end there, and the replayed bytes are identical.
    #[async_recursion]
    async fn prime(&mut self, cur: &SequenceCursor<S>) -> Result<()> {
        if let Some(parent_cur) = cur.parent_ref() {
            self.ensure_parent();
            self.parent
                .as_mut()
                .ok_or_else(|| missing_parent())?
                .prime(parent_cur)
                .await?;
        }
        for i in 0..cur.index_in_chunk() {
            let item = cur.item_in_chunk(i)?;
            self.append(item).await?;
        }
        Ok(())
    }

    /// Swaps the source cursor. Concat resumes at the end of the left
    /// sequence (nothing left to consume there) and then streams the right
    /// sequence from its start.
    pub fn replace_source(&mut self, cur: SequenceCursor<S>) {
        self.cur = Some(Box::new(cur));
    }

    fn ensure_parent(&mut self) {
        if self.parent.is_none() {
            self.parent = Some(Box::new(Self::new_level(
                Arc::clone(&self.store),
                self.kind,
                self.config.clone(),
                self.level + 1,
            )));
        }
    }

    /// Appends one item at this chunker's level. Returns whether the item
    /// completed a chunk.
    #[async_recursion]
    pub async fn append(&mut self, item: SequenceItem) -> Result<bool> {
        if self.finished {
            return Err(ProllyError::InvariantViolation(
                "append to a finished chunker".to_string(),
            ));
        }
        let bytes = item.boundary_bytes()?;
        self.roller.write(&bytes);
        self.current.push(item);
        let above_min = self.current.len() >= self.config.min_chunk_items;
        if (above_min && self.roller.crossed_boundary())
            || self.current.len() >= self.config.max_chunk_items
        {
            self.handle_chunk_boundary().await?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn handle_chunk_boundary(&mut self) -> Result<()> {
        self.roller.reset();
        let items = std::mem::take(&mut self.current);
        trace!(
            "sealing level-{} chunk of {} items",
            self.level,
            items.len()
        );
        let tuple = self.write_chunk(items).await?;
        self.ensure_parent();
        self.parent
            .as_mut()
            .ok_or_else(|| missing_parent())?
            .append(SequenceItem::Meta(tuple))
            .await?;
        Ok(())
    }

    /// Seals items into a node, writes it, and returns the meta tuple that
    /// names it one level up.
    async fn write_chunk(&self, items: Vec<SequenceItem>) -> Result<MetaTuple> {
        let node = self.make_node(items)?;
        let key = last_ordered_key(&node).ok_or_else(|| {
            ProllyError::InvariantViolation("sealed an empty chunk".to_string())
        })?;
        let num_leaves = node.num_leaves();
        let encoded = node.encode()?;
        let hash = self.store.put(encoded).await?;
        Ok(MetaTuple {
            child: ChildRef {
                hash,
                kind: self.kind,
                height: self.level + 1,
            },
            key,
            num_leaves,
        })
    }

    fn make_node(&self, items: Vec<SequenceItem>) -> Result<SequenceNode> {
        if self.level == 0 {
            match self.kind {
                CollectionKind::List => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        match item {
                            SequenceItem::ListValue(v) => values.push(v),
                            other => {
                                return Err(ProllyError::InvariantViolation(format!(
                                    "non-value item {other:?} at list leaf level"
                                )))
                            }
                        }
                    }
                    Ok(SequenceNode::ListLeaf { values })
                }
                CollectionKind::Map => {
                    let mut entries = Vec::with_capacity(items.len());
                    for item in items {
                        match item {
                            SequenceItem::MapEntry(e) => entries.push(e),
                            other => {
                                return Err(ProllyError::InvariantViolation(format!(
                                    "non-entry item {other:?} at map leaf level"
                                )))
                            }
                        }
                    }
                    for pair in entries.windows(2) {
                        if pair[0].key >= pair[1].key {
                            return Err(ProllyError::InvariantViolation(format!(
                                "map keys not strictly increasing: {:?} then {:?}",
                                pair[0].key, pair[1].key
                            )));
                        }
                    }
                    Ok(SequenceNode::MapLeaf { entries })
                }
            }
        } else {
            let mut tuples = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    SequenceItem::Meta(t) => {
                        if t.child.height != self.level {
                            return Err(ProllyError::InvariantViolation(format!(
                                "tuple of height {} in a level-{} node",
                                t.child.height, self.level
                            )));
                        }
                        tuples.push(t);
                    }
                    other => {
                        return Err(ProllyError::InvariantViolation(format!(
                            "non-meta item {other:?} at meta level"
                        )))
                    }
                }
            }
            if self.kind == CollectionKind::List {
                // List tuple keys become cumulative leaf counts from the
                // node start, keeping meta keys strictly increasing.
                let mut sum = 0u64;
                for tuple in tuples.iter_mut() {
                    sum += tuple.num_leaves;
                    tuple.key = OrderedKey::ByCount(sum);
                }
            }
            Ok(SequenceNode::Meta {
                kind: self.kind,
                level: self.level,
                tuples,
            })
        }
    }

    fn any_pending(&self) -> bool {
        !self.current.is_empty()
            || self
                .parent
                .as_ref()
                .map_or(false, |parent| parent.any_pending())
    }

    // --- source-consuming helpers used by editors --------------------------

    pub fn source_valid(&self) -> bool {
        self.cur.as_ref().map_or(false, |cur| cur.valid())
    }

    /// Key of the next unconsumed source entry (map sources only).
    pub fn source_key(&self) -> Result<Option<Value>> {
        match self.cur.as_deref() {
            Some(cur) if cur.valid() => Ok(Some(cur.current_key()?)),
            _ => Ok(None),
        }
    }

    /// Drops `count` items from the source without re-appending them.
    pub async fn skip_source(&mut self, count: u64) -> Result<()> {
        for _ in 0..count {
            let Some(cur) = self.cur.as_deref_mut() else {
                return Ok(());
            };
            if !cur.valid() {
                return Ok(());
            }
            cur.advance().await?;
        }
        Ok(())
    }

    /// Copies source entries with keys strictly below `key` into the new
    /// sequence (map sources only).
    pub async fn copy_source_until_key(&mut self, key: &Value) -> Result<()> {
        loop {
            let item = {
                let Some(cur) = self.cur.as_deref() else {
                    return Ok(());
                };
                if !cur.valid() {
                    return Ok(());
                }
                if cur.current_key()? >= *key {
                    return Ok(());
                }
                cur.current()?
            };
            self.append(item).await?;
            if let Some(cur) = self.cur.as_deref_mut() {
                cur.advance().await?;
            }
        }
    }

    /// Copies exactly `count` source items into the new sequence.
    pub async fn copy_source_items(&mut self, count: u64) -> Result<()> {
        for _ in 0..count {
            let item = {
                let Some(cur) = self.cur.as_deref() else {
                    return Ok(());
                };
                if !cur.valid() {
                    return Ok(());
                }
                cur.current()?
            };
            self.append(item).await?;
            if let Some(cur) = self.cur.as_deref_mut() {
                cur.advance().await?;
            }
        }
        Ok(())
    }

    // --- finalization ------------------------------------------------------

    /// Streams the remainder of a source level into this chunker. As soon
    /// as a freshly fired boundary coincides with an old chunk end, the
    /// rest of the source is handed to the parent level as whole meta
    /// tuples, sharing every untouched chunk by reference.
    #[async_recursion]
    async fn finalize_from(&mut self, mut cur: SequenceCursor<S>) -> Result<()> {
        while cur.valid() {
            let item = cur.current()?;
            let at_chunk_end = cur.at_last_item();
            let boundary = self.append(item).await?;
            let has_more = cur.advance().await?;
            if boundary && at_chunk_end && has_more {
                if let Some(parent_cur) = cur.into_parent() {
                    let parent = self.parent.as_mut().ok_or_else(|| missing_parent())?;
                    return parent.finalize_from(parent_cur).await;
                }
                return Ok(());
            }
        }
        Ok(())
    }

    /// Finalizes all open levels bottom-up and returns the root sequence.
    pub async fn done(mut self) -> Result<Sequence<S>> {
        if self.finished {
            return Err(ProllyError::InvariantViolation(
                "done() on a finished chunker".to_string(),
            ));
        }
        if let Some(cur) = self.cur.take() {
            self.finalize_from(*cur).await?;
        }

        let mut chunker = self;
        loop {
            chunker.finished = true;
            let parent_pending = chunker
                .parent
                .as_ref()
                .map_or(false, |parent| parent.any_pending());
            if !parent_pending {
                break;
            }
            // The end of input is an implicit boundary; push the tail up so
            // a parent can assemble the root.
            if !chunker.current.is_empty() {
                chunker.handle_chunk_boundary().await?;
            }
            chunker = *chunker
                .parent
                .take()
                .ok_or_else(|| missing_parent())?;
        }

        // `chunker.current` now holds every item at the topmost level.
        if chunker.level == 0 || chunker.current.len() > 1 {
            return chunker.seal_root().await;
        }

        // A meta level holding exactly one tuple is a pointless spine;
        // promote the child until the root is canonical.
        let item = chunker.current.first().cloned().ok_or_else(|| {
            ProllyError::InvariantViolation("meta chunker finished with no items".to_string())
        })?;
        let SequenceItem::Meta(mut tuple) = item else {
            return Err(ProllyError::InvariantViolation(
                "non-meta item at meta level during promotion".to_string(),
            ));
        };
        loop {
            let child = Sequence::read_child(&chunker.store, &tuple.child).await?;
            if child.is_leaf() || child.seq_len() > 1 {
                return Ok(child);
            }
            tuple = child.tuple_at(0)?.clone();
        }
    }

    async fn seal_root(mut self) -> Result<Sequence<S>> {
        let items = std::mem::take(&mut self.current);
        let node = self.make_node(items)?;
        let encoded = node.encode()?;
        let encoded_len = encoded.len() as u64;
        let hash = self.store.put(encoded).await?;
        Ok(Sequence::from_node(
            Arc::clone(&self.store),
            node,
            Some(hash),
            encoded_len,
        ))
    }
}

fn last_ordered_key(node: &SequenceNode) -> Option<OrderedKey> {
    match node {
        SequenceNode::ListLeaf { values } => {
            Some(OrderedKey::ByCount(values.len() as u64))
        }
        SequenceNode::MapLeaf { entries } => entries
            .last()
            .map(|e| OrderedKey::ByValue(e.key.clone())),
        SequenceNode::Meta { tuples, .. } => tuples.last().map(|t| t.key.clone()),
    }
}

fn missing_parent() -> ProllyError {
    ProllyError::InvariantViolation("parent chunker missing at a chunk boundary".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::value::ValueRepr;

    fn int_item(i: i64) -> SequenceItem {
        SequenceItem::ListValue(ValueRepr::Inline(Value::Int(i)))
    }

    async fn build(store: &Arc<InMemoryStore>, range: std::ops::Range<i64>) -> Sequence<InMemoryStore> {
        let mut ch = SequenceChunker::new(
            Arc::clone(store),
            CollectionKind::List,
            ChunkConfig::default(),
        );
        for i in range {
            ch.append(int_item(i)).await.unwrap();
        }
        ch.done().await.unwrap()
    }

    #[tokio::test]
    async fn construction_is_deterministic() {
        let store = Arc::new(InMemoryStore::new());
        let a = build(&store, 0..5000).await;
        let b = build(&store, 0..5000).await;
        assert_eq!(a.hash(), b.hash());
        assert!(a.hash().is_some());
        assert_eq!(a.num_leaves(), 5000);
    }

    #[tokio::test]
    async fn empty_sequence_has_a_well_defined_hash() {
        let store = Arc::new(InMemoryStore::new());
        let a = build(&store, 0..0).await;
        let b = build(&store, 0..0).await;
        assert!(a.is_leaf());
        assert_eq!(a.num_leaves(), 0);
        assert_eq!(a.hash(), b.hash());
        assert!(a.hash().is_some());
    }

    #[tokio::test]
    async fn large_sequences_grow_levels_with_uniform_height() {
        let store = Arc::new(InMemoryStore::new());
        let seq = build(&store, 0..20_000).await;
        assert!(seq.tree_level() >= 1, "20k items should chunk into levels");

        // Leftmost and rightmost paths must have equal length.
        let mut left = seq.clone();
        let mut left_depth = 0;
        while !left.is_leaf() {
            left = left.child_at(0).await.unwrap();
            left_depth += 1;
        }
        let mut right = seq.clone();
        let mut right_depth = 0;
        while !right.is_leaf() {
            let last = right.seq_len() - 1;
            right = right.child_at(last).await.unwrap();
            right_depth += 1;
        }
        assert_eq!(left_depth, right_depth);
    }

    #[tokio::test]
    async fn hard_cap_bounds_chunk_size() {
        // All-identical items never vary the rolling state enough to
        // guarantee boundaries; the cap must still bound every chunk.
        let store = Arc::new(InMemoryStore::new());
        let cfg = ChunkConfig::default();
        let mut ch = SequenceChunker::new(Arc::clone(&store), CollectionKind::List, cfg.clone());
        for _ in 0..5000 {
            ch.append(int_item(42)).await.unwrap();
        }
        let seq = ch.done().await.unwrap();
        assert_eq!(seq.num_leaves(), 5000);

        let mut stack = vec![seq];
        while let Some(s) = stack.pop() {
            assert!(s.seq_len() <= cfg.max_chunk_items);
            if !s.is_leaf() {
                for i in 0..s.seq_len() {
                    stack.push(s.child_at(i).await.unwrap());
                }
            }
        }
    }

    #[tokio::test]
    async fn resume_and_finalize_reproduce_the_source() {
        // Splitting a build at an arbitrary point and resuming from a
        // cursor must yield the identical root: the confluence property.
        let store = Arc::new(InMemoryStore::new());
        let from_scratch = build(&store, 0..2000).await;

        let first = build(&store, 0..1300).await;
        let resume_point = SequenceCursor::at_index(first.clone(), 1300).await.unwrap();
        let mut ch = SequenceChunker::resume_at(
            Arc::clone(&store),
            CollectionKind::List,
            ChunkConfig::default(),
            resume_point,
        )
        .await
        .unwrap();
        for i in 1300..2000 {
            ch.append(int_item(i)).await.unwrap();
        }
        let resumed = ch.done().await.unwrap();
        assert_eq!(resumed.hash(), from_scratch.hash());
    }
}
