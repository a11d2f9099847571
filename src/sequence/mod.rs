// prolly-seq/src/sequence/mod.rs

//! In-memory sequence values: a decoded node plus the store handle needed to
//! reach its children. Sequences are immutable and cheap to clone; meta
//! nodes never own their children, they reach them by hash on demand.

pub mod chunker;
pub mod cursor;

pub use chunker::SequenceChunker;
pub use cursor::SequenceCursor;

use std::sync::Arc;

use futures::future::try_join_all;

use crate::common::Hash;
use crate::error::{ProllyError, Result};
use crate::node::{
    ChildRef, CollectionKind, MapEntry, MetaTuple, OrderedKey, SequenceItem, SequenceNode,
};
use crate::store::ChunkStore;
use crate::value::Value;

#[derive(Debug)]
struct SequenceInner {
    node: SequenceNode,
    /// Hash of the encoded node; `None` for virtual composite sequences
    /// that were never persisted.
    hash: Option<Hash>,
    /// Size of the encoded node, recorded so readers can budget bytes
    /// without re-serializing.
    encoded_len: u64,
    /// Cumulative leaf counts per tuple; empty for leaves.
    cum_leaves: Vec<u64>,
}

/// A decoded sequence node bound to its chunk store.
#[derive(Debug)]
pub struct Sequence<S: ChunkStore> {
    store: Arc<S>,
    inner: Arc<SequenceInner>,
}

impl<S: ChunkStore> Clone for Sequence<S> {
    fn clone(&self) -> Self {
        Sequence {
            store: Arc::clone(&self.store),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: ChunkStore> Sequence<S> {
    pub(crate) fn from_node(
        store: Arc<S>,
        node: SequenceNode,
        hash: Option<Hash>,
        encoded_len: u64,
    ) -> Self {
        let cum_leaves = match &node {
            SequenceNode::Meta { tuples, .. } => {
                let mut sum = 0u64;
                tuples
                    .iter()
                    .map(|t| {
                        sum += t.num_leaves;
                        sum
                    })
                    .collect()
            }
            _ => Vec::new(),
        };
        Sequence {
            store,
            inner: Arc::new(SequenceInner {
                node,
                hash,
                encoded_len,
                cum_leaves,
            }),
        }
    }

    /// An empty sequence: a single empty leaf of the given kind.
    pub fn empty(store: Arc<S>, kind: CollectionKind) -> Self {
        let node = match kind {
            CollectionKind::List => SequenceNode::ListLeaf { values: Vec::new() },
            CollectionKind::Map => SequenceNode::MapLeaf {
                entries: Vec::new(),
            },
        };
        let encoded_len = node.encode().map(|b| b.len() as u64).unwrap_or(0);
        Sequence::from_node(store, node, None, encoded_len)
    }

    /// Reads and decodes a root chunk.
    pub async fn read_root(store: Arc<S>, hash: Hash) -> Result<Self> {
        let bytes = store
            .get(&hash)
            .await?
            .ok_or(ProllyError::ChunkNotFound(hash))?;
        let node = SequenceNode::decode(&bytes)?;
        let encoded_len = bytes.len() as u64;
        Ok(Sequence::from_node(store, node, Some(hash), encoded_len))
    }

    /// Reads a child chunk and validates it against its reference.
    pub(crate) async fn read_child(store: &Arc<S>, child: &ChildRef) -> Result<Self> {
        let bytes = store
            .get(&child.hash)
            .await?
            .ok_or(ProllyError::ChunkNotFound(child.hash))?;
        let node = SequenceNode::decode(&bytes)?;
        if node.level() + 1 != child.height {
            return Err(ProllyError::InvariantViolation(format!(
                "child {} has level {}, ref says height {}",
                crate::common::fmt_hash(&child.hash),
                node.level(),
                child.height
            )));
        }
        if node.kind() != child.kind {
            return Err(ProllyError::InvariantViolation(format!(
                "child {} has kind {:?}, ref says {:?}",
                crate::common::fmt_hash(&child.hash),
                node.kind(),
                child.kind
            )));
        }
        let encoded_len = bytes.len() as u64;
        Ok(Sequence::from_node(
            Arc::clone(store),
            node,
            Some(child.hash),
            encoded_len,
        ))
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn node(&self) -> &SequenceNode {
        &self.inner.node
    }

    pub fn hash(&self) -> Option<Hash> {
        self.inner.hash
    }

    pub fn encoded_len(&self) -> u64 {
        self.inner.encoded_len
    }

    pub fn kind(&self) -> CollectionKind {
        self.inner.node.kind()
    }

    pub fn tree_level(&self) -> u8 {
        self.inner.node.level()
    }

    pub fn is_leaf(&self) -> bool {
        self.inner.node.is_leaf()
    }

    /// Number of items held directly in this node.
    pub fn seq_len(&self) -> usize {
        self.inner.node.item_count()
    }

    /// Total leaf items beneath this node.
    pub fn num_leaves(&self) -> u64 {
        match &self.inner.node {
            SequenceNode::Meta { .. } => self.inner.cum_leaves.last().copied().unwrap_or(0),
            node => node.num_leaves(),
        }
    }

    pub fn item_at(&self, i: usize) -> Result<SequenceItem> {
        match &self.inner.node {
            SequenceNode::ListLeaf { values } => values
                .get(i)
                .cloned()
                .map(SequenceItem::ListValue),
            SequenceNode::MapLeaf { entries } => {
                entries.get(i).cloned().map(SequenceItem::MapEntry)
            }
            SequenceNode::Meta { tuples, .. } => tuples.get(i).cloned().map(SequenceItem::Meta),
        }
        .ok_or_else(|| {
            ProllyError::InvariantViolation(format!(
                "item index {i} out of range for node of {} items",
                self.seq_len()
            ))
        })
    }

    pub fn map_entry_at(&self, i: usize) -> Result<&MapEntry> {
        match &self.inner.node {
            SequenceNode::MapLeaf { entries } => entries.get(i).ok_or_else(|| {
                ProllyError::InvariantViolation(format!("map entry index {i} out of range"))
            }),
            _ => Err(ProllyError::TypeMismatch(
                "expected a map leaf sequence".to_string(),
            )),
        }
    }

    pub fn tuple_at(&self, i: usize) -> Result<&MetaTuple> {
        match &self.inner.node {
            SequenceNode::Meta { tuples, .. } => tuples.get(i).ok_or_else(|| {
                ProllyError::InvariantViolation(format!("meta tuple index {i} out of range"))
            }),
            _ => Err(ProllyError::TypeMismatch(
                "expected a meta sequence".to_string(),
            )),
        }
    }

    /// Item equality across two sequences at the same tree level. Meta
    /// items compare by child hash; content addressing makes that exact.
    pub fn item_eq(&self, i: usize, other: &Sequence<S>, j: usize) -> bool {
        match (&self.inner.node, &other.inner.node) {
            (SequenceNode::Meta { tuples: a, .. }, SequenceNode::Meta { tuples: b, .. }) => {
                match (a.get(i), b.get(j)) {
                    (Some(x), Some(y)) => x.child.hash == y.child.hash,
                    _ => false,
                }
            }
            (
                SequenceNode::MapLeaf { entries: a },
                SequenceNode::MapLeaf { entries: b },
            ) => match (a.get(i), b.get(j)) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
            (
                SequenceNode::ListLeaf { values: a },
                SequenceNode::ListLeaf { values: b },
            ) => match (a.get(i), b.get(j)) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
            _ => false,
        }
    }

    /// Binary search on cumulative leaf counts. Returns the index of the
    /// child containing `offset` (clamped to the last child for past-end
    /// offsets) and the number of leaves before it.
    pub fn find_child_for_index(&self, offset: u64) -> Result<(usize, u64)> {
        let cum = &self.inner.cum_leaves;
        if cum.is_empty() {
            return Err(ProllyError::TypeMismatch(
                "find_child_for_index on a leaf sequence".to_string(),
            ));
        }
        let i = cum.partition_point(|&c| c <= offset).min(cum.len() - 1);
        let leaves_before = if i == 0 { 0 } else { cum[i - 1] };
        Ok((i, leaves_before))
    }

    /// Leaf items under tuples `[0, idx)` of this meta node.
    pub fn leaves_before_tuple(&self, idx: usize) -> u64 {
        if idx == 0 {
            0
        } else {
            self.inner
                .cum_leaves
                .get(idx - 1)
                .copied()
                .unwrap_or_else(|| self.num_leaves())
        }
    }

    /// Binary search on ordered keys. Returns the index of the first tuple
    /// whose key is `>= key`; `seq_len()` when every key is smaller.
    pub fn find_child_for_key(&self, key: &OrderedKey) -> Result<usize> {
        match &self.inner.node {
            SequenceNode::Meta { tuples, .. } => {
                Ok(tuples.partition_point(|t| t.key < *key))
            }
            _ => Err(ProllyError::TypeMismatch(
                "find_child_for_key on a leaf sequence".to_string(),
            )),
        }
    }

    /// Position of the first entry `>= key` within a map leaf.
    pub fn leaf_entry_index_for_key(&self, key: &Value) -> Result<usize> {
        match &self.inner.node {
            SequenceNode::MapLeaf { entries } => {
                Ok(entries.partition_point(|e| e.key < *key))
            }
            _ => Err(ProllyError::TypeMismatch(
                "leaf_entry_index_for_key on a non-map sequence".to_string(),
            )),
        }
    }

    /// Reads the child sequence behind tuple `i`.
    pub async fn child_at(&self, i: usize) -> Result<Sequence<S>> {
        let tuple = self.tuple_at(i)?.clone();
        Sequence::read_child(&self.store, &tuple.child).await
    }

    /// Reads a contiguous run of children and stitches them into one
    /// virtual sequence one level below this node. The result is never
    /// persisted; diff uses it to equalize heights and descend.
    pub async fn composite_child_sequence(&self, start: u64, count: u64) -> Result<Sequence<S>> {
        let SequenceNode::Meta { kind, level, tuples } = &self.inner.node else {
            return Err(ProllyError::TypeMismatch(
                "composite_child_sequence on a leaf sequence".to_string(),
            ));
        };
        let kind = *kind;
        let child_level = level - 1;
        let start = start as usize;
        let end = start + count as usize;
        if end > tuples.len() {
            return Err(ProllyError::InvariantViolation(format!(
                "composite range {start}..{end} out of bounds for {} tuples",
                tuples.len()
            )));
        }

        if count == 0 {
            return Ok(if child_level == 0 {
                Sequence::empty(Arc::clone(&self.store), kind)
            } else {
                Sequence::from_node(
                    Arc::clone(&self.store),
                    SequenceNode::Meta {
                        kind,
                        level: child_level,
                        tuples: Vec::new(),
                    },
                    None,
                    0,
                )
            });
        }

        let children = try_join_all(
            tuples[start..end]
                .iter()
                .map(|t| Sequence::read_child(&self.store, &t.child)),
        )
        .await?;

        let mut encoded_len = 0u64;
        for child in &children {
            if child.tree_level() != child_level {
                return Err(ProllyError::InvariantViolation(
                    "composite children at unequal levels".to_string(),
                ));
            }
            encoded_len += child.encoded_len();
        }

        let node = if child_level == 0 {
            match kind {
                CollectionKind::List => {
                    let mut values = Vec::new();
                    for child in &children {
                        match child.node() {
                            SequenceNode::ListLeaf { values: v } => {
                                values.extend(v.iter().cloned())
                            }
                            _ => {
                                return Err(ProllyError::InvariantViolation(
                                    "list meta child is not a list leaf".to_string(),
                                ))
                            }
                        }
                    }
                    SequenceNode::ListLeaf { values }
                }
                CollectionKind::Map => {
                    let mut entries = Vec::new();
                    for child in &children {
                        match child.node() {
                            SequenceNode::MapLeaf { entries: e } => {
                                entries.extend(e.iter().cloned())
                            }
                            _ => {
                                return Err(ProllyError::InvariantViolation(
                                    "map meta child is not a map leaf".to_string(),
                                ))
                            }
                        }
                    }
                    SequenceNode::MapLeaf { entries }
                }
            }
        } else {
            let mut merged = Vec::new();
            for child in &children {
                match child.node() {
                    SequenceNode::Meta { tuples: t, .. } => merged.extend(t.iter().cloned()),
                    _ => {
                        return Err(ProllyError::InvariantViolation(
                            "meta child is not a meta node".to_string(),
                        ))
                    }
                }
            }
            if kind == CollectionKind::List {
                // List tuple keys are cumulative from the node start; the
                // merged virtual node gets a fresh running total.
                let mut sum = 0u64;
                for tuple in merged.iter_mut() {
                    sum += tuple.num_leaves;
                    tuple.key = OrderedKey::ByCount(sum);
                }
            }
            SequenceNode::Meta {
                kind,
                level: child_level,
                tuples: merged,
            }
        };

        Ok(Sequence::from_node(
            Arc::clone(&self.store),
            node,
            None,
            encoded_len,
        ))
    }
}
