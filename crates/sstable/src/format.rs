//! SSTable footer and index entry encodings.
//!
//! ## Footer (16 bytes, last in the file)
//!
//! ```text
//! [filter_offset: i32 BE][filter_size: i32 BE][index_offset: i32 BE][index_size: i32 BE]
//! ```
//!
//! `filter_offset` doubles as the size of the data region, which always
//! starts at offset 0.
//!
//! ## Index entry value (8 bytes)
//!
//! ```text
//! [block_offset: i32 BE][block_size: i32 BE]
//! ```

use anyhow::{bail, Result};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use std::io::Write;

pub use config::SST_FOOTER_SIZE as FOOTER_BYTES;

/// Bytes of an encoded index value.
pub const INDEX_VALUE_BYTES: usize = 8;
/// Bytes of a filter record key (the block offset).
pub const FILTER_KEY_BYTES: usize = 4;

/// Locations of the filter and index blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub filter_offset: u32,
    pub filter_size: u32,
    pub index_offset: u32,
    pub index_size: u32,
}

impl Footer {
    /// Writes the 16-byte footer to `w`.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from `w`.
    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_i32::<BigEndian>(self.filter_offset as i32)?;
        w.write_i32::<BigEndian>(self.filter_size as i32)?;
        w.write_i32::<BigEndian>(self.index_offset as i32)?;
        w.write_i32::<BigEndian>(self.index_size as i32)?;
        Ok(())
    }

    /// Parses the footer found at the end of a file of `file_len` bytes and
    /// checks that every region lies before it.
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is not 16 bytes long, a field is
    /// negative, or a region overruns the footer.
    pub fn decode(bytes: &[u8], file_len: u64) -> Result<Self> {
        if bytes.len() != FOOTER_BYTES {
            bail!("footer must be {} bytes, got {}", FOOTER_BYTES, bytes.len());
        }
        let mut fields = [0u32; 4];
        for (i, field) in fields.iter_mut().enumerate() {
            let v = BigEndian::read_i32(&bytes[i * 4..]);
            if v < 0 {
                bail!("corrupt footer: negative field {}", v);
            }
            *field = v as u32;
        }
        let footer = Self {
            filter_offset: fields[0],
            filter_size: fields[1],
            index_offset: fields[2],
            index_size: fields[3],
        };

        let body_end = file_len.saturating_sub(FOOTER_BYTES as u64);
        let filter_end = u64::from(footer.filter_offset) + u64::from(footer.filter_size);
        let index_end = u64::from(footer.index_offset) + u64::from(footer.index_size);
        if filter_end > body_end || index_end > body_end {
            bail!("corrupt footer: regions overrun file of {} bytes", file_len);
        }
        Ok(footer)
    }

    /// Size of the data region.
    #[must_use]
    pub fn data_size(&self) -> u32 {
        self.filter_offset
    }
}

/// One index entry: the last key of a data block and where the block lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub last_key: Vec<u8>,
    pub block_offset: u32,
    pub block_size: u32,
}

impl Index {
    pub fn new(last_key: Vec<u8>, block_offset: u32, block_size: u32) -> Self {
        Self {
            last_key,
            block_offset,
            block_size,
        }
    }

    /// Encodes the `(offset, size)` value stored in the index block.
    #[must_use]
    pub fn encode_value(&self) -> [u8; INDEX_VALUE_BYTES] {
        let mut out = [0u8; INDEX_VALUE_BYTES];
        BigEndian::write_i32(&mut out[0..4], self.block_offset as i32);
        BigEndian::write_i32(&mut out[4..8], self.block_size as i32);
        out
    }

    /// Rebuilds an entry from an index record.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` is not 8 bytes or holds negative fields.
    pub fn decode(key: Vec<u8>, value: &[u8]) -> Result<Self> {
        if value.len() != INDEX_VALUE_BYTES {
            bail!("index value must be {} bytes, got {}", INDEX_VALUE_BYTES, value.len());
        }
        let offset = BigEndian::read_i32(&value[0..4]);
        let size = BigEndian::read_i32(&value[4..8]);
        if offset < 0 || size < 0 {
            bail!("corrupt index entry: offset {} size {}", offset, size);
        }
        Ok(Self::new(key, offset as u32, size as u32))
    }
}

/// Finds the first entry whose `last_key >= key`, i.e. the only block that
/// can contain `key`.
#[must_use]
pub fn search_index<'a>(indices: &'a [Index], key: &[u8]) -> Option<&'a Index> {
    let pos = indices.partition_point(|i| i.last_key.as_slice() < key);
    indices.get(pos)
}

/// Encodes a block offset as a filter record key.
#[must_use]
pub fn filter_key(block_offset: u32) -> [u8; FILTER_KEY_BYTES] {
    (block_offset as i32).to_be_bytes()
}

/// Decodes a filter record key.
///
/// # Errors
///
/// Returns an error if `key` is not 4 bytes or is negative.
pub fn decode_filter_key(key: &[u8]) -> Result<u32> {
    if key.len() != FILTER_KEY_BYTES {
        bail!("filter key must be {} bytes, got {}", FILTER_KEY_BYTES, key.len());
    }
    let v = BigEndian::read_i32(key);
    if v < 0 {
        bail!("corrupt filter key {}", v);
    }
    Ok(v as u32)
}
