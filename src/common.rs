// prolly-seq/src/common.rs

use serde::{Deserialize, Serialize};

/// Width of a chunk digest in bytes.
pub const HASH_SIZE: usize = 20;

/// A 20-byte digest (Blake3, truncated) identifying a persisted chunk.
pub type Hash = [u8; HASH_SIZE];

/// Computes the digest of a slice of bytes.
pub fn hash_bytes(bytes: &[u8]) -> Hash {
    let full = blake3::hash(bytes);
    let mut h: Hash = [0u8; HASH_SIZE];
    h.copy_from_slice(&full.as_bytes()[..HASH_SIZE]);
    h
}

/// Renders a hash as lowercase hex, for logs and error messages.
pub fn fmt_hash(hash: &Hash) -> String {
    hex::encode(hash)
}

/// Tuning knobs for sequence construction.
///
/// The boundary checker fires when the low `boundary_pattern_bits` bits of
/// the rolling state are zero, so target chunk size is about
/// `2^boundary_pattern_bits` items. `max_chunk_items` force-closes a chunk
/// that never hits the pattern, bounding chunk size for pathological input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Number of low bits of the rolling hash that must be zero at a boundary.
    pub boundary_pattern_bits: u32,
    /// Boundaries are ignored until a chunk holds this many items, keeping
    /// degenerate inputs from cascading into one-item chunks per level.
    pub min_chunk_items: usize,
    /// Hard ceiling on items per chunk.
    pub max_chunk_items: usize,
    /// Values at or below this size are stored inline in leaf entries.
    pub max_inline_value_size: usize,
    /// Minimum chunk size for CDC splitting of large values.
    pub cdc_min_size: usize,
    /// Average chunk size target for CDC splitting of large values.
    pub cdc_avg_size: usize,
    /// Maximum chunk size for CDC splitting of large values.
    pub cdc_max_size: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        ChunkConfig {
            // ~64 items per chunk on average, forced closed at 4x that.
            boundary_pattern_bits: 6,
            min_chunk_items: 8,
            max_chunk_items: 256,
            max_inline_value_size: 1024,
            cdc_min_size: 4 * 1024,
            cdc_avg_size: 16 * 1024,
            cdc_max_size: 64 * 1024,
        }
    }
}

impl ChunkConfig {
    /// Returns an error message when the configuration is unusable.
    pub fn validate(&self) -> Result<(), String> {
        if self.boundary_pattern_bits == 0 || self.boundary_pattern_bits > 24 {
            return Err("boundary_pattern_bits must be in 1..=24".to_string());
        }
        if self.min_chunk_items < 2 {
            return Err("min_chunk_items must be at least 2".to_string());
        }
        if self.max_chunk_items <= self.min_chunk_items {
            return Err("max_chunk_items must exceed min_chunk_items".to_string());
        }
        if self.cdc_min_size < 64
            || self.cdc_avg_size < self.cdc_min_size.max(256)
            || self.cdc_max_size < self.cdc_avg_size.max(1024)
        {
            return Err(
                "CDC sizes must satisfy 64 <= min <= avg <= max (avg >= 256, max >= 1024)"
                    .to_string(),
            );
        }
        Ok(())
    }
}
