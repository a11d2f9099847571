// prolly-seq/src/node.rs

//! Persisted sequence node forms and the tuple types that link them.
//! One node == one chunk: a node's identity is the hash of its encoding.

use serde::{Deserialize, Serialize};

use crate::common::Hash;
use crate::error::{ProllyError, Result};
use crate::value::{Value, ValueRepr};

/// Which collection a sequence belongs to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    List,
    Map,
}

/// The key a subtree is ordered by: map subtrees carry their greatest key
/// inline; list subtrees carry a leaf count wrapped for ordering.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum OrderedKey {
    ByValue(Value),
    ByCount(u64),
}

/// Typed pointer to a persisted child chunk. `height` counts from the
/// leaves: a leaf chunk has height 1, its parent height 2.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChildRef {
    pub hash: Hash,
    pub kind: CollectionKind,
    pub height: u8,
}

/// The unit of a meta node: a child reference, the key the child's subtree
/// ends at, and the total count of leaf items beneath it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MetaTuple {
    pub child: ChildRef,
    pub key: OrderedKey,
    pub num_leaves: u64,
}

/// A key/value pair in a map leaf. Keys are always inline values.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MapEntry {
    pub key: Value,
    pub value: ValueRepr,
}

/// A sequence node as persisted in the chunk store.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum SequenceNode {
    /// List leaf: values indexed by position.
    ListLeaf { values: Vec<ValueRepr> },
    /// Map leaf: entries with strictly increasing keys.
    MapLeaf { entries: Vec<MapEntry> },
    /// Internal node: tuples with strictly increasing ordered keys.
    Meta {
        kind: CollectionKind,
        level: u8,
        tuples: Vec<MetaTuple>,
    },
}

impl SequenceNode {
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(ProllyError::from)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| ProllyError::CorruptChunk(e.to_string()))
    }

    pub fn kind(&self) -> CollectionKind {
        match self {
            SequenceNode::ListLeaf { .. } => CollectionKind::List,
            SequenceNode::MapLeaf { .. } => CollectionKind::Map,
            SequenceNode::Meta { kind, .. } => *kind,
        }
    }

    /// Tree level: 0 for leaves, child level + 1 for meta nodes.
    pub fn level(&self) -> u8 {
        match self {
            SequenceNode::ListLeaf { .. } | SequenceNode::MapLeaf { .. } => 0,
            SequenceNode::Meta { level, .. } => *level,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.level() == 0
    }

    /// Number of items held directly in this node.
    pub fn item_count(&self) -> usize {
        match self {
            SequenceNode::ListLeaf { values } => values.len(),
            SequenceNode::MapLeaf { entries } => entries.len(),
            SequenceNode::Meta { tuples, .. } => tuples.len(),
        }
    }

    /// Total count of leaf items beneath this node.
    pub fn num_leaves(&self) -> u64 {
        match self {
            SequenceNode::ListLeaf { values } => values.len() as u64,
            SequenceNode::MapLeaf { entries } => entries.len() as u64,
            SequenceNode::Meta { tuples, .. } => tuples.iter().map(|t| t.num_leaves).sum(),
        }
    }
}

/// One item at some level of a sequence: a leaf value, a leaf entry, or a
/// meta tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceItem {
    ListValue(ValueRepr),
    MapEntry(MapEntry),
    Meta(MetaTuple),
}

impl SequenceItem {
    /// Bytes rolled through the boundary checker for this item. Leaf items
    /// roll their full encoding; meta items roll the child's hash, which
    /// already commits to the subtree's content.
    pub fn boundary_bytes(&self) -> Result<Vec<u8>> {
        match self {
            SequenceItem::ListValue(repr) => {
                bincode::serialize(repr).map_err(ProllyError::from)
            }
            SequenceItem::MapEntry(entry) => {
                bincode::serialize(entry).map_err(ProllyError::from)
            }
            SequenceItem::Meta(tuple) => Ok(tuple.child.hash.to_vec()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::hash_bytes;

    #[test]
    fn node_encoding_round_trips() {
        let leaf = SequenceNode::MapLeaf {
            entries: vec![MapEntry {
                key: Value::from("k"),
                value: ValueRepr::Inline(Value::Int(7)),
            }],
        };
        let bytes = leaf.encode().unwrap();
        assert_eq!(SequenceNode::decode(&bytes).unwrap(), leaf);

        let meta = SequenceNode::Meta {
            kind: CollectionKind::Map,
            level: 1,
            tuples: vec![MetaTuple {
                child: ChildRef {
                    hash: hash_bytes(b"child"),
                    kind: CollectionKind::Map,
                    height: 1,
                },
                key: OrderedKey::ByValue(Value::from("k")),
                num_leaves: 1,
            }],
        };
        let bytes = meta.encode().unwrap();
        assert_eq!(SequenceNode::decode(&bytes).unwrap(), meta);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            SequenceNode::decode(&[0xff; 3]),
            Err(ProllyError::CorruptChunk(_))
        ));
    }

    #[test]
    fn num_leaves_sums_meta_tuples() {
        let tuple = |n| MetaTuple {
            child: ChildRef {
                hash: hash_bytes(&[n as u8]),
                kind: CollectionKind::List,
                height: 1,
            },
            key: OrderedKey::ByCount(n),
            num_leaves: n,
        };
        let meta = SequenceNode::Meta {
            kind: CollectionKind::List,
            level: 1,
            tuples: vec![tuple(3), tuple(5)],
        };
        assert_eq!(meta.num_leaves(), 8);
        assert_eq!(meta.item_count(), 2);
    }
}
