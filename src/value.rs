// prolly-seq/src/value.rs

//! The value model: typed immutable values with a total order, a canonical
//! byte encoding, and an inline-or-chunked storage representation.

use std::sync::Arc;

use fastcdc::v2020::FastCDC;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::common::{hash_bytes, ChunkConfig, Hash};
use crate::error::{ProllyError, Result};
use crate::store::ChunkStore;

/// A typed immutable value.
///
/// The derived `Ord` gives the total order used for map keys: values sort by
/// kind first, then naturally within the kind. The canonical encoding starts
/// with the serialized variant tag, so the kind is recoverable from the
/// leading bytes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    Boolean(bool),
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// Canonical byte encoding. Equal values always encode to equal bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(ProllyError::from)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| ProllyError::Deserialization(format!("value: {e}")))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Boolean(_) => "boolean",
            Value::Int(_) => "int",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

/// How a value is stored inside a leaf entry.
///
/// Values at or below the configured inline threshold live in the node;
/// larger ones are split by CDC into separately addressed data chunks.
/// Because data chunks are content addressed, equal values always produce
/// bitwise-equal representations, so comparing reprs compares values.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ValueRepr {
    /// Value stored directly within the node.
    Inline(Value),
    /// Value encoded as exactly one data chunk.
    Chunked(Hash),
    /// Value encoded as an ordered run of data chunks.
    ChunkedSequence {
        chunk_hashes: Vec<Hash>,
        /// Total encoded size, for pre-allocation on read.
        total_size: u64,
    },
}

/// Converts a value into its storage representation, writing data chunks for
/// values above the inline threshold.
pub async fn prepare_value_repr<S: ChunkStore>(
    store: &Arc<S>,
    config: &ChunkConfig,
    value: Value,
) -> Result<ValueRepr> {
    let encoded = value.encode()?;
    if encoded.len() <= config.max_inline_value_size {
        return Ok(ValueRepr::Inline(value));
    }

    let chunker = FastCDC::new(
        &encoded,
        config.cdc_min_size as u32,
        config.cdc_avg_size as u32,
        config.cdc_max_size as u32,
    );

    let total_size = encoded.len() as u64;
    let mut chunk_hashes = Vec::new();
    for entry in chunker {
        let chunk_data = &encoded[entry.offset..entry.offset + entry.length];
        store.put(chunk_data.to_vec()).await?;
        chunk_hashes.push(hash_bytes(chunk_data));
    }

    match chunk_hashes.len() {
        0 => {
            warn!(
                "CDC produced 0 chunks for value of size {}; storing inline",
                encoded.len()
            );
            Ok(ValueRepr::Inline(value))
        }
        1 => Ok(ValueRepr::Chunked(chunk_hashes[0])),
        _ => Ok(ValueRepr::ChunkedSequence {
            chunk_hashes,
            total_size,
        }),
    }
}

/// Reassembles a value from its storage representation, reading data chunks
/// as needed.
pub async fn load_value_repr<S: ChunkStore>(store: &Arc<S>, repr: &ValueRepr) -> Result<Value> {
    match repr {
        ValueRepr::Inline(value) => Ok(value.clone()),
        ValueRepr::Chunked(data_hash) => {
            let bytes = store
                .get(data_hash)
                .await?
                .ok_or(ProllyError::ChunkNotFound(*data_hash))?;
            Value::decode(&bytes)
        }
        ValueRepr::ChunkedSequence {
            chunk_hashes,
            total_size,
        } => {
            let mut encoded = Vec::with_capacity(*total_size as usize);
            for chunk_hash in chunk_hashes {
                let bytes = store
                    .get(chunk_hash)
                    .await?
                    .ok_or(ProllyError::ChunkNotFound(*chunk_hash))?;
                encoded.extend_from_slice(&bytes);
            }
            if encoded.len() as u64 != *total_size {
                warn!(
                    "reassembled value size mismatch: expected {}, got {}",
                    total_size,
                    encoded.len()
                );
            }
            Value::decode(&encoded)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_order_by_kind_then_content() {
        assert!(Value::Boolean(true) < Value::Int(0));
        assert!(Value::Int(-5) < Value::Int(3));
        assert!(Value::Int(i64::MAX) < Value::Text(String::new()));
        assert!(Value::from("apple") < Value::from("banana"));
        assert!(Value::Text("z".into()) < Value::Bytes(vec![]));
        assert!(Value::Bytes(vec![1]) < Value::Bytes(vec![1, 0]));
    }

    #[test]
    fn encode_round_trips() {
        for v in [
            Value::Boolean(false),
            Value::Int(-42),
            Value::from("hello"),
            Value::Bytes(vec![0, 1, 2, 255]),
        ] {
            let bytes = v.encode().unwrap();
            assert_eq!(Value::decode(&bytes).unwrap(), v);
        }
    }

    #[test]
    fn encoding_is_deterministic() {
        let a = Value::from("same").encode().unwrap();
        let b = Value::from("same").encode().unwrap();
        assert_eq!(a, b);
    }
}
