// prolly-seq/src/sequence/cursor.rs

//! A pointer into a sequence at a specific position: a chain of
//! `(sequence, index)` frames from the leaf up to the root. Stepping across
//! a chunk walks up until a parent can move, then back down; `sync` reloads
//! a frame after its parent moved. Cursors are single-task values.

use std::sync::Arc;

use async_recursion::async_recursion;

use super::Sequence;
use crate::error::{ProllyError, Result};
use crate::node::{MapEntry, OrderedKey, SequenceItem, SequenceNode};
use crate::store::ChunkStore;
use crate::value::Value;

#[derive(Debug)]
pub struct SequenceCursor<S: ChunkStore> {
    parent: Option<Box<SequenceCursor<S>>>,
    seq: Sequence<S>,
    /// Position within `seq`; -1 means before the start, `len` past the end.
    idx: isize,
}

impl<S: ChunkStore> Clone for SequenceCursor<S> {
    fn clone(&self) -> Self {
        SequenceCursor {
            parent: self.parent.clone(),
            seq: self.seq.clone(),
            idx: self.idx,
        }
    }
}

impl<S: ChunkStore> SequenceCursor<S> {
    fn new(parent: Option<Box<SequenceCursor<S>>>, seq: Sequence<S>, idx: isize) -> Self {
        SequenceCursor { parent, seq, idx }
    }

    /// Cursor at the first leaf item.
    pub async fn at_start(seq: Sequence<S>) -> Result<Self> {
        Self::at_index(seq, 0).await
    }

    /// Cursor at leaf offset `index`, descending through meta levels with
    /// the cumulative-count search. An offset equal to the total leaf count
    /// yields a past-end cursor whose parents sit on their last tuples.
    pub async fn at_index(seq: Sequence<S>, index: u64) -> Result<Self> {
        let mut parent: Option<Box<SequenceCursor<S>>> = None;
        let mut seq = seq;
        let mut offset = index;
        loop {
            let mut cur = SequenceCursor::new(parent, seq.clone(), 0);
            offset -= cur.advance_to_offset(offset)?;
            match cur.child_of_current().await? {
                Some(child) => {
                    parent = Some(Box::new(cur));
                    seq = child;
                }
                None => return Ok(cur),
            }
        }
    }

    /// Cursor at the first map entry whose key is `>= key`; past the end
    /// when every key is smaller.
    pub async fn at_key(seq: Sequence<S>, key: &Value) -> Result<Self> {
        let mut parent: Option<Box<SequenceCursor<S>>> = None;
        let mut seq = seq;
        loop {
            let mut cur = SequenceCursor::new(parent, seq.clone(), 0);
            cur.seek_to_key(key)?;
            match cur.child_of_current().await? {
                Some(child) => {
                    parent = Some(Box::new(cur));
                    seq = child;
                }
                None => return Ok(cur),
            }
        }
    }

    /// Positions this frame for leaf offset `offset` and returns the number
    /// of leaves before the selected child (0 at leaf level).
    fn advance_to_offset(&mut self, offset: u64) -> Result<u64> {
        match self.seq.node() {
            SequenceNode::Meta { .. } => {
                let (child_idx, leaves_before) = self.seq.find_child_for_index(offset)?;
                self.idx = child_idx as isize;
                Ok(leaves_before)
            }
            _ => {
                self.idx = offset.min(self.seq.seq_len() as u64) as isize;
                Ok(0)
            }
        }
    }

    fn seek_to_key(&mut self, key: &Value) -> Result<()> {
        match self.seq.node() {
            SequenceNode::Meta { tuples, .. } => {
                let target = OrderedKey::ByValue(key.clone());
                let i = self.seq.find_child_for_key(&target)?;
                self.idx = i.min(tuples.len().saturating_sub(1)) as isize;
                Ok(())
            }
            SequenceNode::MapLeaf { .. } => {
                self.idx = self.seq.leaf_entry_index_for_key(key)? as isize;
                Ok(())
            }
            SequenceNode::ListLeaf { .. } => Err(ProllyError::TypeMismatch(
                "key seek over a list sequence".to_string(),
            )),
        }
    }

    /// Child sequence behind the current meta tuple; `None` at leaf level.
    async fn child_of_current(&self) -> Result<Option<Sequence<S>>> {
        match self.seq.node() {
            SequenceNode::Meta { .. } => {
                if !self.valid() {
                    return Err(ProllyError::InvariantViolation(
                        "meta cursor positioned outside its node during descent".to_string(),
                    ));
                }
                Ok(Some(self.seq.child_at(self.idx as usize).await?))
            }
            _ => Ok(None),
        }
    }

    pub fn sequence(&self) -> &Sequence<S> {
        &self.seq
    }

    pub fn length(&self) -> usize {
        self.seq.seq_len()
    }

    pub fn idx(&self) -> isize {
        self.idx
    }

    pub fn valid(&self) -> bool {
        self.idx >= 0 && (self.idx as usize) < self.length()
    }

    pub fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    pub fn parent_ref(&self) -> Option<&SequenceCursor<S>> {
        self.parent.as_deref()
    }

    pub fn parent_mut(&mut self) -> Option<&mut SequenceCursor<S>> {
        self.parent.as_deref_mut()
    }

    /// Consumes this frame, returning its parent. Used when a whole level's
    /// remainder is handed to a parent chunker.
    pub fn into_parent(self) -> Option<SequenceCursor<S>> {
        self.parent.map(|b| *b)
    }

    /// Number of items before the cursor within the current chunk.
    pub fn index_in_chunk(&self) -> usize {
        self.idx.max(0) as usize
    }

    pub fn at_last_item(&self) -> bool {
        self.length() > 0 && self.idx == self.length() as isize - 1
    }

    pub fn current(&self) -> Result<SequenceItem> {
        if !self.valid() {
            return Err(ProllyError::InvariantViolation(
                "current() on an invalid cursor".to_string(),
            ));
        }
        self.seq.item_at(self.idx as usize)
    }

    pub fn current_map_entry(&self) -> Result<&MapEntry> {
        if !self.valid() {
            return Err(ProllyError::InvariantViolation(
                "current_map_entry() on an invalid cursor".to_string(),
            ));
        }
        self.seq.map_entry_at(self.idx as usize)
    }

    pub fn current_key(&self) -> Result<Value> {
        Ok(self.current_map_entry()?.key.clone())
    }

    /// Item `i` of the current chunk, independent of the cursor position.
    pub fn item_in_chunk(&self, i: usize) -> Result<SequenceItem> {
        self.seq.item_at(i)
    }

    /// Steps forward one item, crossing chunks as needed. Returns whether
    /// the cursor is still on an item.
    pub async fn advance(&mut self) -> Result<bool> {
        self.advance_maybe_allow_past_end(true).await
    }

    #[async_recursion]
    pub async fn advance_maybe_allow_past_end(&mut self, allow_past_end: bool) -> Result<bool> {
        let len = self.length() as isize;
        if self.idx < len - 1 {
            self.idx += 1;
            return Ok(true);
        }
        if self.idx == len {
            return Ok(false);
        }
        let parent_advanced = match self.parent.as_deref_mut() {
            Some(parent) => parent.advance_maybe_allow_past_end(false).await?,
            None => false,
        };
        if parent_advanced {
            self.sync().await?;
            self.idx = 0;
            return Ok(true);
        }
        if allow_past_end {
            self.idx += 1;
        }
        Ok(false)
    }

    /// Steps backward one item, crossing chunks as needed.
    pub async fn retreat(&mut self) -> Result<bool> {
        self.retreat_maybe_allow_before_start(true).await
    }

    #[async_recursion]
    pub async fn retreat_maybe_allow_before_start(
        &mut self,
        allow_before_start: bool,
    ) -> Result<bool> {
        if self.idx > 0 {
            self.idx -= 1;
            return Ok(true);
        }
        if self.idx == -1 {
            return Ok(false);
        }
        let parent_retreated = match self.parent.as_deref_mut() {
            Some(parent) => parent.retreat_maybe_allow_before_start(false).await?,
            None => false,
        };
        if parent_retreated {
            self.sync().await?;
            self.idx = self.length() as isize - 1;
            return Ok(true);
        }
        if allow_before_start {
            self.idx -= 1;
        }
        Ok(false)
    }

    /// Reloads this frame's sequence from the parent's current tuple, after
    /// the parent has moved.
    pub async fn sync(&mut self) -> Result<()> {
        let parent = self.parent.as_deref().ok_or_else(|| {
            ProllyError::InvariantViolation("sync() on a cursor without a parent".to_string())
        })?;
        let SequenceItem::Meta(tuple) = parent.current()? else {
            return Err(ProllyError::InvariantViolation(
                "cursor parent frame is not a meta sequence".to_string(),
            ));
        };
        let store = Arc::clone(self.seq.store());
        self.seq = Sequence::read_child(&store, &tuple.child).await?;
        Ok(())
    }

    /// `sync` plus repositioning, for fast-forward: when the parent has
    /// more, land on the new chunk's first item; otherwise land at (or
    /// past, when allowed) the end of the last chunk.
    pub async fn sync_with_idx(&mut self, has_more: bool, allow_past_end: bool) -> Result<()> {
        self.sync().await?;
        if has_more {
            self.idx = 0;
        } else if allow_past_end {
            self.idx = self.length() as isize;
        } else {
            self.idx = self.length() as isize - 1;
        }
        Ok(())
    }
}
