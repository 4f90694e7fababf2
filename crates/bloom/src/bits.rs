use std::fmt;

/// A fixed-length bit vector with byte-granular storage.
///
/// Bit `i` lives in byte `i / 8` under mask `1 << (i % 8)`. The bit length is
/// fixed at construction; every positional operation panics when the position
/// is out of range, and whole-array operations panic when the other array has
/// a different bit length.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BitsArray {
    bytes: Vec<u8>,
    bit_length: usize,
}

impl BitsArray {
    /// Creates a zeroed array holding `bit_length` bits.
    pub fn new(bit_length: usize) -> Self {
        Self {
            bytes: vec![0u8; bit_length.div_ceil(8)],
            bit_length,
        }
    }

    /// Wraps raw bytes; the bit length becomes `bytes.len() * 8`.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let bit_length = bytes.len() * 8;
        Self { bytes, bit_length }
    }

    /// Wraps raw bytes with an explicit bit length.
    ///
    /// # Panics
    ///
    /// Panics if `bit_length` does not fit in the supplied bytes.
    pub fn from_bytes_with_len(bytes: Vec<u8>, bit_length: usize) -> Self {
        assert!(
            bit_length <= bytes.len() * 8,
            "bit_length {} exceeds {} bytes of storage",
            bit_length,
            bytes.len()
        );
        Self { bytes, bit_length }
    }

    #[must_use]
    pub fn bit_length(&self) -> usize {
        self.bit_length
    }

    #[must_use]
    pub fn byte_length(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Returns the value of the bit at `pos`.
    #[must_use]
    pub fn get(&self, pos: usize) -> bool {
        self.check_pos(pos);
        self.bytes[pos / 8] & Self::mask(pos) != 0
    }

    /// Sets the bit at `pos` to `value`.
    pub fn set(&mut self, pos: usize, value: bool) {
        self.check_pos(pos);
        if value {
            self.bytes[pos / 8] |= Self::mask(pos);
        } else {
            self.bytes[pos / 8] &= !Self::mask(pos);
        }
    }

    /// Flips the bit at `pos`.
    pub fn not(&mut self, pos: usize) {
        self.check_pos(pos);
        self.bytes[pos / 8] ^= Self::mask(pos);
    }

    pub fn xor_bit(&mut self, pos: usize, value: bool) {
        let current = self.get(pos);
        self.set(pos, current ^ value);
    }

    pub fn or_bit(&mut self, pos: usize, value: bool) {
        let current = self.get(pos);
        self.set(pos, current | value);
    }

    pub fn and_bit(&mut self, pos: usize, value: bool) {
        let current = self.get(pos);
        self.set(pos, current & value);
    }

    /// In-place bitwise XOR with an array of the same bit length.
    pub fn xor(&mut self, other: &BitsArray) {
        self.combine(other, |a, b| a ^ b);
    }

    /// In-place bitwise OR with an array of the same bit length.
    pub fn or(&mut self, other: &BitsArray) {
        self.combine(other, |a, b| a | b);
    }

    /// In-place bitwise AND with an array of the same bit length.
    pub fn and(&mut self, other: &BitsArray) {
        self.combine(other, |a, b| a & b);
    }

    /// Number of bits currently set.
    #[must_use]
    pub fn count_ones(&self) -> usize {
        (0..self.bit_length).filter(|&pos| self.get(pos)).count()
    }

    fn combine(&mut self, other: &BitsArray, op: impl Fn(u8, u8) -> u8) {
        assert_eq!(
            self.bit_length, other.bit_length,
            "bit length mismatch: {} vs {}",
            self.bit_length, other.bit_length
        );
        for (a, b) in self.bytes.iter_mut().zip(&other.bytes) {
            *a = op(*a, *b);
        }
    }

    fn check_pos(&self, pos: usize) {
        assert!(
            pos < self.bit_length,
            "bit position {} out of range for length {}",
            pos,
            self.bit_length
        );
    }

    fn mask(pos: usize) -> u8 {
        1u8 << (pos % 8)
    }
}

impl fmt::Debug for BitsArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitsArray")
            .field("bit_length", &self.bit_length)
            .field("ones", &self.count_ones())
            .finish()
    }
}
