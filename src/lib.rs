// prolly-seq/src/lib.rs

//! Ordered prolly-tree sequence engine over a content-addressed chunk
//! store: immutable chunked lists and maps with structural sharing,
//! efficient concat and splice edits, and a streaming structural diff that
//! costs in proportion to the differing region rather than the tree.
//!
//! Chunk boundaries are content defined (a rolling hash over item bytes),
//! so the same logical collection always chunks into the same tree no
//! matter how it was built. That property lets two historical versions
//! share untouched chunks and lets diff skip them wholesale.

pub mod common;
pub mod diff;
pub mod error;
pub mod gc;
pub mod list;
pub mod map;
pub mod node;
pub mod rolling;
pub mod sequence;
pub mod splice;
pub mod store;
pub mod value;

pub use common::{hash_bytes, ChunkConfig, Hash};
pub use diff::{
    diff_lists, diff_maps, diff_maps_left_right, diff_maps_top_down, diff_maps_with_policy,
    ChangeType, CutoverPolicy, RaceToMajority, ValueChanged,
};
pub use error::{ProllyError, Result};
pub use gc::GarbageCollector;
pub use list::{List, ListEditor};
pub use map::{MapEditor, SortedMap};
pub use node::{
    ChildRef, CollectionKind, MapEntry, MetaTuple, OrderedKey, SequenceItem, SequenceNode,
};
pub use sequence::{Sequence, SequenceChunker, SequenceCursor};
pub use splice::{calc_splices, Splice, DEFAULT_MAX_SPLICE_MATRIX_SIZE};
pub use store::{read_snapshot, write_snapshot, CachingStore, ChunkStore, InMemoryStore};
pub use value::{Value, ValueRepr};
