// prolly-seq/src/rolling.rs

//! The content-defined boundary checker: a gear rolling hash over item
//! bytes. After each item is rolled in, the item completes a chunk when the
//! low `pattern_bits` bits of the state are zero, so chunks average about
//! `2^pattern_bits` items. The state reseeds at every chunk boundary, so a
//! boundary decision depends only on the bytes appended since the current
//! chunk began. That locality is what gives sequences their
//! history-independent shape.

use std::sync::OnceLock;

/// 256-entry gear table, derived from Blake3 of the byte index so every
/// build of the library chunks identically.
fn gear_table() -> &'static [u64; 256] {
    static TABLE: OnceLock<[u64; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [0u64; 256];
        for (i, slot) in table.iter_mut().enumerate() {
            let digest = blake3::hash(&(i as u16).to_le_bytes());
            let mut word = [0u8; 8];
            word.copy_from_slice(&digest.as_bytes()[..8]);
            *slot = u64::from_le_bytes(word);
        }
        table
    })
}

/// Rolling-hash boundary checker.
#[derive(Debug, Clone)]
pub struct RollingHasher {
    state: u64,
    mask: u64,
}

impl RollingHasher {
    pub fn new(pattern_bits: u32) -> Self {
        RollingHasher {
            state: 0,
            mask: (1u64 << pattern_bits) - 1,
        }
    }

    /// Rolls a run of bytes (one item's serialized form) through the hasher.
    pub fn write(&mut self, bytes: &[u8]) {
        let table = gear_table();
        for &b in bytes {
            self.state = (self.state << 1).wrapping_add(table[b as usize]);
        }
    }

    /// Whether the item just rolled in completes a chunk.
    pub fn crossed_boundary(&self) -> bool {
        self.state & self.mask == 0
    }

    /// Reseeds the hasher at a chunk boundary.
    pub fn reset(&mut self) {
        self.state = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Chunks a byte stream item by item, returning per-item decisions.
    fn decisions(items: &[&[u8]], pattern_bits: u32) -> Vec<bool> {
        let mut roller = RollingHasher::new(pattern_bits);
        items
            .iter()
            .map(|item| {
                roller.write(item);
                let boundary = roller.crossed_boundary();
                if boundary {
                    roller.reset();
                }
                boundary
            })
            .collect()
    }

    #[test]
    fn identical_streams_make_identical_decisions() {
        let data: Vec<Vec<u8>> = (0..512u32)
            .map(|i| (0..16).map(|j| ((i * 31 + j) % 251) as u8).collect())
            .collect();
        let items: Vec<&[u8]> = data.iter().map(|v| v.as_slice()).collect();
        let a = decisions(&items, 4);
        let b = decisions(&items, 4);
        assert_eq!(a, b);
        assert!(a.iter().any(|&d| d), "no boundary in 512 varied items");
    }

    #[test]
    fn reset_reseeds_state() {
        let mut h = RollingHasher::new(6);
        h.write(b"some bytes that change the state");
        h.reset();
        let mut fresh = RollingHasher::new(6);
        fresh.write(b"tail");
        h.write(b"tail");
        assert_eq!(h.state, fresh.state);
        assert_eq!(h.crossed_boundary(), fresh.crossed_boundary());
    }

    #[test]
    fn boundaries_depend_only_on_suffix_since_reset() {
        // Two hashers with different histories converge after reset.
        let mut a = RollingHasher::new(4);
        a.write(b"history A");
        a.reset();
        let mut b = RollingHasher::new(4);
        b.write(b"a completely different history");
        b.reset();
        let tail: Vec<u8> = (0..512u32).map(|i| (i % 256) as u8).collect();
        a.write(&tail);
        b.write(&tail);
        assert_eq!(a.state, b.state);
    }
}
