//! # Bloom Filter
//!
//! Per-block membership filters for the SSTable writer and reader.
//!
//! A bloom filter can tell you with certainty that a key is **not** in a set
//! (no false negatives), but may occasionally report that a key **is** present
//! when it isn't. The false positive rate is governed by the bit count `m` and
//! the number of probes `k`, both derived from a target error rate and an
//! expected key count.
//!
//! ## Layout
//!
//! ```text
//!  BloomFilter (parameters only, Copy)
//!      |
//!      |  calc_bit_positions(key) -> [p1, p2, .. pk]
//!      v
//!  BitsArray (m bits, byte i/8, mask 1 << (i % 8))
//!      ^
//!      |  add(key) / hash() / reset()
//!  BlockFilter (accumulator owned by one SSTable writer)
//! ```
//!
//! Every data block of an SSTable gets its own `m`-bit array; the filter
//! parameters are shared by the whole tree and never stored on disk.
//!
//! ## Example
//!
//! ```rust,no_run
//! use bloom::BlockFilter;
//!
//! let mut acc = BlockFilter::new(20, 400);
//! acc.add(b"hello");
//! let bits = acc.hash();
//! assert!(acc.exist(b"hello", &bits));
//! ```

mod bits;

pub use bits::BitsArray;

use xxhash_rust::xxh3::xxh3_128;

/// Bloom filter parameters: error rate, expected keys, probe count, bit count.
///
/// The struct holds no bits of its own. Callers compute the probe positions
/// for a key once and apply them to any [`BitsArray`] of length `m`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BloomFilter {
    fp_percent: u32,
    expected_keys: u32,
    k: u32,
    m: usize,
}

impl BloomFilter {
    /// Derives `k` and `m` from a false-positive percentage and an expected
    /// number of keys per block.
    ///
    /// `k = ceil(log_0.5(err))` and `m = ceil(n * log2(1/err) * log2(e))`,
    /// rounded up to a multiple of 8.
    ///
    /// # Panics
    ///
    /// Panics if `fp_percent` is not in `1..=99` or `expected_keys` is 0.
    pub fn new(fp_percent: u32, expected_keys: u32) -> Self {
        assert!(
            (1..100).contains(&fp_percent),
            "fp_percent must be in 1..=99"
        );
        assert!(expected_keys > 0, "expected_keys must be > 0");

        let err = f64::from(fp_percent) / 100.0;
        let k = (err.ln() / 0.5f64.ln()).ceil() as u32;
        let m = (f64::from(expected_keys) * (1.0 / err).log2() * std::f64::consts::LOG2_E).ceil()
            as usize;
        let m = m.div_ceil(8) * 8;

        Self {
            fp_percent,
            expected_keys,
            k,
            m,
        }
    }

    #[must_use]
    pub fn fp_percent(&self) -> u32 {
        self.fp_percent
    }

    #[must_use]
    pub fn expected_keys(&self) -> u32 {
        self.expected_keys
    }

    /// Number of probes per key.
    #[must_use]
    pub fn k(&self) -> u32 {
        self.k
    }

    /// Bits per filter array (always a multiple of 8).
    #[must_use]
    pub fn m(&self) -> usize {
        self.m
    }

    /// Computes the `k` probe positions for `key`.
    ///
    /// Uses double hashing over the low 64 bits of xxh3-128: `h1` is the low
    /// 32 bits, `h2` the next 32, and probe `i` (1-based) is
    /// `h1 + i * h2` with wrapping arithmetic, bit-inverted when negative.
    #[must_use]
    pub fn calc_bit_positions(&self, key: &[u8]) -> Vec<usize> {
        let as_long = xxh3_128(key) as u64;
        let h1 = as_long as i32;
        let h2 = (as_long >> 32) as i32;

        (1..=self.k as i32)
            .map(|i| {
                let mut combined = h1.wrapping_add(i.wrapping_mul(h2));
                if combined < 0 {
                    combined = !combined;
                }
                combined as usize % self.m
            })
            .collect()
    }

    /// Sets every bit in `positions`.
    ///
    /// # Panics
    ///
    /// Panics if `bits` is not exactly `m` bits long.
    pub fn hash_to(&self, positions: &[usize], bits: &mut BitsArray) {
        self.check_len(bits);
        for &pos in positions {
            bits.set(pos, true);
        }
    }

    /// Returns `true` when every bit in `positions` is set.
    ///
    /// # Panics
    ///
    /// Panics if `bits` is not exactly `m` bits long.
    #[must_use]
    pub fn is_hit(&self, positions: &[usize], bits: &BitsArray) -> bool {
        self.check_len(bits);
        positions.iter().all(|&pos| bits.get(pos))
    }

    fn check_len(&self, bits: &BitsArray) {
        assert_eq!(
            bits.bit_length(),
            self.m,
            "filter array must hold exactly m bits"
        );
    }
}

/// Per-block filter accumulator used by the SSTable writer.
///
/// Keys are added while a data block is being filled; when the block is
/// flushed the writer snapshots the bits with [`hash`](Self::hash) and calls
/// [`reset`](Self::reset) before the next block starts.
pub struct BlockFilter {
    filter: BloomFilter,
    bits: BitsArray,
    key_len: usize,
}

impl BlockFilter {
    pub fn new(fp_percent: u32, expected_keys: u32) -> Self {
        Self::with_filter(BloomFilter::new(fp_percent, expected_keys))
    }

    pub fn with_filter(filter: BloomFilter) -> Self {
        Self {
            filter,
            bits: BitsArray::new(filter.m()),
            key_len: 0,
        }
    }

    /// Records `key` in the current block's bits.
    pub fn add(&mut self, key: &[u8]) {
        let positions = self.filter.calc_bit_positions(key);
        self.filter.hash_to(&positions, &mut self.bits);
        self.key_len += 1;
    }

    /// Returns a copy of the accumulated bits.
    #[must_use]
    pub fn hash(&self) -> BitsArray {
        self.bits.clone()
    }

    /// Tests `key` against a previously snapshotted block filter.
    #[must_use]
    pub fn exist(&self, key: &[u8], bits: &BitsArray) -> bool {
        self.filter
            .is_hit(&self.filter.calc_bit_positions(key), bits)
    }

    /// Clears the bits and the key count.
    pub fn reset(&mut self) {
        self.bits = BitsArray::new(self.filter.m());
        self.key_len = 0;
    }

    /// Keys added since the last reset.
    #[must_use]
    pub fn key_len(&self) -> usize {
        self.key_len
    }

    #[must_use]
    pub fn filter(&self) -> BloomFilter {
        self.filter
    }
}

impl std::fmt::Debug for BlockFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockFilter")
            .field("k", &self.filter.k())
            .field("m", &self.filter.m())
            .field("key_len", &self.key_len)
            .finish()
    }
}

#[cfg(test)]
mod tests;
