//! Prefix-compressed record blocks.
//!
//! Every block is a run of records, each compressed against the previous key
//! of the same block:
//!
//! ```text
//! [shared: i32 BE][suffix_len: i32 BE][value_len: i32 BE][suffix][value]
//! ```
//!
//! `shared` is the length of the common prefix with the previous key (0 for
//! the first record of a block). A data block is bounded by one buffer; the
//! filter and index blocks extend across as many buffers as they need.

use anyhow::{bail, Context, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use memtable::Kv;
use std::io::Write;
use std::sync::Arc;

use crate::pool::{BlockBuffer, BlockBufferPool};

/// Bytes of the three length fields in front of every record.
pub const RECORD_HEADER_BYTES: usize = 12;

/// Length of the longest common prefix of `a` and `b`.
#[must_use]
pub fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Key recorded in the index for a finished data block.
///
/// This is `pre_key`, the last key of the block, whenever one exists. For an
/// empty `pre_key` the result is `key` with its final byte decremented.
#[must_use]
pub fn separator_between(pre_key: &[u8], key: &[u8]) -> Vec<u8> {
    if !pre_key.is_empty() {
        return pre_key.to_vec();
    }
    let mut sep = key.to_vec();
    if let Some(last) = sep.last_mut() {
        *last = last.wrapping_sub(1);
    }
    sep
}

/// Encoded size of `key`/`value` when it follows `pre_key` in a block.
#[must_use]
pub fn encoded_len(pre_key: &[u8], key: &[u8], value: &[u8]) -> usize {
    RECORD_HEADER_BYTES + key.len() - shared_prefix_len(pre_key, key) + value.len()
}

/// Decodes a contiguous run of records, rebuilding full keys from the prefix
/// chain.
///
/// # Errors
///
/// Returns an error if a length is negative, a shared prefix is longer than
/// the previous key, or a record runs past the end of `data`.
pub fn decode_records(data: &[u8]) -> Result<Vec<Kv>> {
    let mut out = Vec::new();
    let mut rdr = data;
    let mut pre_key: Vec<u8> = Vec::new();

    while !rdr.is_empty() {
        let offset = data.len() - rdr.len();
        let shared = rdr.read_i32::<BigEndian>().context("truncated record header")?;
        let suffix_len = rdr.read_i32::<BigEndian>().context("truncated record header")?;
        let value_len = rdr.read_i32::<BigEndian>().context("truncated record header")?;
        if shared < 0 || suffix_len < 0 || value_len < 0 {
            bail!("corrupt record at offset {}: negative length", offset);
        }
        let (shared, suffix_len, value_len) =
            (shared as usize, suffix_len as usize, value_len as usize);
        if shared > pre_key.len() {
            bail!(
                "corrupt record at offset {}: shared prefix {} exceeds previous key length {}",
                offset,
                shared,
                pre_key.len()
            );
        }
        if rdr.len() < suffix_len + value_len {
            bail!("corrupt record at offset {}: truncated body", offset);
        }

        let mut key = Vec::with_capacity(shared + suffix_len);
        key.extend_from_slice(&pre_key[..shared]);
        key.extend_from_slice(&rdr[..suffix_len]);
        let value = rdr[suffix_len..suffix_len + value_len].to_vec();
        rdr = &rdr[suffix_len + value_len..];

        pre_key.clone_from(&key);
        out.push(Kv::new(key, value));
    }

    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Bounded by a single buffer; `append` refuses records that do not fit,
    /// except the first record of an empty block.
    Data,
    /// Grows by borrowing more buffers.
    Extendable,
}

/// An in-progress block backed by pool buffers.
///
/// Buffers are given back to the pool on [`flush_to`](Self::flush_to),
/// [`clear`](Self::clear) and drop.
pub struct Block {
    kind: BlockKind,
    pool: Arc<BlockBufferPool>,
    buffers: Vec<BlockBuffer>,
    pre_key: Vec<u8>,
    entries_cnt: usize,
}

impl Block {
    /// Creates a data block holding one pool buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool is not active.
    pub fn data(pool: Arc<BlockBufferPool>) -> Result<Self> {
        Self::new(BlockKind::Data, pool)
    }

    /// Creates an extendable block.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool is not active.
    pub fn extendable(pool: Arc<BlockBufferPool>) -> Result<Self> {
        Self::new(BlockKind::Extendable, pool)
    }

    fn new(kind: BlockKind, pool: Arc<BlockBufferPool>) -> Result<Self> {
        let first = pool.borrow()?;
        Ok(Self {
            kind,
            pool,
            buffers: vec![first],
            pre_key: Vec::new(),
            entries_cnt: 0,
        })
    }

    /// Appends one record.
    ///
    /// Returns `Ok(false)` when a non-empty data block has no room for it.
    ///
    /// # Errors
    ///
    /// Returns an error if a buffer cannot be borrowed.
    pub fn append(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        let shared = shared_prefix_len(&self.pre_key, key);
        let need = RECORD_HEADER_BYTES + (key.len() - shared) + value.len();

        let fits = self.buffers.last().is_some_and(|b| b.remaining() >= need);
        if !fits {
            match self.kind {
                BlockKind::Data if self.entries_cnt > 0 => return Ok(false),
                BlockKind::Data => {
                    for buf in self.buffers.drain(..) {
                        self.pool.give_back(buf);
                    }
                    self.buffers.push(self.pool.borrow_at_least(need)?);
                }
                BlockKind::Extendable => {
                    self.buffers.push(self.pool.borrow_at_least(need)?);
                }
            }
        }

        let buf = match self.buffers.last_mut() {
            Some(buf) => buf,
            None => bail!("block has no buffer"),
        };
        buf.write_i32::<BigEndian>(shared as i32)?;
        buf.write_i32::<BigEndian>((key.len() - shared) as i32)?;
        buf.write_i32::<BigEndian>(value.len() as i32)?;
        buf.write_all(&key[shared..])?;
        buf.write_all(value)?;

        self.pre_key.clear();
        self.pre_key.extend_from_slice(key);
        self.entries_cnt += 1;
        Ok(true)
    }

    /// Writes every buffered byte to `out` in order, then clears the block.
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns an error on write failure or if a fresh buffer cannot be
    /// borrowed.
    pub fn flush_to<W: Write>(&mut self, out: &mut W) -> Result<usize> {
        let mut written = 0usize;
        for buf in &self.buffers {
            out.write_all(buf.filled())?;
            written += buf.filled().len();
        }
        self.clear()?;
        Ok(written)
    }

    /// Drops all content, keeping at most one standard-size buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if a fresh buffer cannot be borrowed.
    pub fn clear(&mut self) -> Result<()> {
        let standard = self.pool.buffer_size();
        let mut kept: Option<BlockBuffer> = None;
        for mut buf in self.buffers.drain(..) {
            if kept.is_none() && buf.capacity() == standard {
                buf.clear();
                kept = Some(buf);
            } else {
                self.pool.give_back(buf);
            }
        }
        let first = match kept {
            Some(buf) => buf,
            None => self.pool.borrow()?,
        };
        self.buffers.push(first);
        self.pre_key.clear();
        self.entries_cnt = 0;
        Ok(())
    }

    /// Encoded bytes currently held.
    #[must_use]
    pub fn size(&self) -> usize {
        self.buffers.iter().map(|b| b.filled().len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries_cnt == 0
    }

    #[must_use]
    pub fn entries_cnt(&self) -> usize {
        self.entries_cnt
    }

    /// Last key appended since the block was last cleared.
    #[must_use]
    pub fn pre_key(&self) -> &[u8] {
        &self.pre_key
    }

    #[must_use]
    pub fn kind(&self) -> BlockKind {
        self.kind
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        for buf in self.buffers.drain(..) {
            self.pool.give_back(buf);
        }
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("kind", &self.kind)
            .field("buffers", &self.buffers.len())
            .field("size", &self.size())
            .field("entries_cnt", &self.entries_cnt)
            .finish()
    }
}
