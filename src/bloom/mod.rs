pub mod builder;

use xxhash_rust::xxh3::xxh3_128;

use crate::coding::{decode_fixed32, decode_fixed64, put_fixed32, put_fixed64};
use crate::error::{Error, Result};

/// Probabilistic data structure: "is this key in the set?"
///
/// - If any bit is 0 → key is DEFINITELY NOT in the set
/// - If all bits are 1 → key is PROBABLY in the set (false positive possible)
///
/// Each table stores one filter over the user keys it contains, so a point
/// lookup can skip a table without touching its data blocks.
///
/// Sizing:
///   bits_per_key = -1.44 * log2(false_positive_rate)
///   num_hashes = bits_per_key * ln(2)
///
///   1% FPR  → ~10 bits/key, 7 hashes
///   0.1% FPR → ~14 bits/key, 10 hashes
///
/// Positions come from double hashing: h_i(key) = h1 + i * h2 (mod m), where
/// h1 and h2 are the two halves of one xxh3 128-bit hash.
///
/// Serialized form (little-endian):
/// ```text
/// ┌────────────────┬──────────────┬──────────────────────┐
/// │ num_hashes (4) │ num_bits (4) │ words (8 each)       │
/// └────────────────┴──────────────┴──────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_hashes: u32,
    num_bits: u32,
}

const HEADER_SIZE: usize = 8;

impl BloomFilter {
    /// Create an empty filter sized for `expected_items` at the given FPR.
    ///
    /// # Panics
    /// Panics if FPR is not in (0, 1). Option validation rejects such
    /// values before any filter is built.
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        assert!(
            false_positive_rate > 0.0 && false_positive_rate < 1.0,
            "FPR must be in (0, 1)"
        );

        let bits_per_key = -1.44 * false_positive_rate.log2();
        let num_bits = ((expected_items.max(1) as f64) * bits_per_key).ceil() as u32;
        let num_bits = num_bits.max(64);
        let num_hashes = ((bits_per_key * 2.0f64.ln()).ceil() as u32).clamp(1, 30);

        let num_words = (num_bits as usize).div_ceil(64);
        Self {
            bits: vec![0u64; num_words],
            num_hashes,
            num_bits,
        }
    }

    /// Add a key to the bloom filter.
    pub fn insert(&mut self, key: &[u8]) {
        self.insert_hash(xxh3_128(key));
    }

    /// Add a key by its precomputed 128-bit hash.
    pub fn insert_hash(&mut self, hash: u128) {
        let (h1, h2) = split(hash);
        for i in 0..self.num_hashes {
            let pos = self.position(h1, h2, i);
            self.bits[(pos / 64) as usize] |= 1 << (pos % 64);
        }
    }

    /// Check if a key MIGHT be in the set.
    /// false → definitely not here. true → probably here.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = split(xxh3_128(key));
        (0..self.num_hashes).all(|i| {
            let pos = self.position(h1, h2, i);
            (self.bits[(pos / 64) as usize] >> (pos % 64)) & 1 == 1
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.bits.len() * 8);
        put_fixed32(&mut buf, self.num_hashes);
        put_fixed32(&mut buf, self.num_bits);
        for word in &self.bits {
            put_fixed64(&mut buf, *word);
        }
        buf
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::Corruption("bloom filter too short".into()));
        }
        let num_hashes = decode_fixed32(&data[0..4]);
        let num_bits = decode_fixed32(&data[4..8]);
        let num_words = (num_bits as usize).div_ceil(64);
        if num_hashes == 0 || num_bits == 0 || data.len() != HEADER_SIZE + num_words * 8 {
            return Err(Error::Corruption(format!(
                "bloom filter header mismatch: {} hashes, {} bits, {} bytes",
                num_hashes,
                num_bits,
                data.len()
            )));
        }
        let bits = data[HEADER_SIZE..]
            .chunks_exact(8)
            .map(decode_fixed64)
            .collect();
        Ok(Self {
            bits,
            num_hashes,
            num_bits,
        })
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    fn position(&self, h1: u64, h2: u64, i: u32) -> u32 {
        (h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits as u64) as u32
    }
}

/// Split a 128-bit hash into the two halves used for double hashing.
fn split(hash: u128) -> (u64, u64) {
    (hash as u64, (hash >> 64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_keys_are_found() {
        let mut bf = BloomFilter::new(100, 0.01);
        for i in 0..100u32 {
            bf.insert(&i.to_be_bytes());
        }
        for i in 0..100u32 {
            assert!(bf.may_contain(&i.to_be_bytes()));
        }
    }

    #[test]
    fn deserialize_rejects_short_body() {
        let bf = BloomFilter::new(10, 0.01);
        let mut bytes = bf.serialize();
        bytes.pop();
        assert!(BloomFilter::deserialize(&bytes).is_err());
    }
}
