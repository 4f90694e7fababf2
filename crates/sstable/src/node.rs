use anyhow::{bail, Result};
use bloom::{BitsArray, BloomFilter};
use memtable::Kv;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

use crate::format::{search_index, Index};
use crate::reader::SstReader;
use crate::writer::FinishResult;

/// A live SSTable in the level catalog.
///
/// Holds the table's filters and block index in memory together with its
/// key range, and serves point lookups with at most one data block read.
///
/// A node marked with [`destroy`](Self::destroy) deletes its file when the
/// last reference to it is dropped, so readers that still hold it keep a
/// valid mapping.
pub struct Node {
    level: usize,
    seq: u32,
    size: u64,
    start_key: Vec<u8>,
    end_key: Vec<u8>,
    block_to_filter: HashMap<u32, BitsArray>,
    indices: Vec<Index>,
    filter: BloomFilter,
    reader: SstReader,
    obsolete: AtomicBool,
}

impl Node {
    /// Builds a node from an opened reader and its decoded metadata.
    ///
    /// The start key is the first key of the first data block; the end key is
    /// the last index entry's key.
    ///
    /// # Errors
    ///
    /// Returns an error if the table has no data blocks or its first block
    /// cannot be read.
    pub fn new(
        level: usize,
        seq: u32,
        reader: SstReader,
        size: u64,
        block_to_filter: HashMap<u32, BitsArray>,
        indices: Vec<Index>,
        filter: BloomFilter,
    ) -> Result<Self> {
        let (first, last) = match (indices.first(), indices.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => bail!("sstable {} has no data blocks", reader.path().display()),
        };
        let start_key = match reader
            .read_data(first.block_offset, first.block_size)?
            .into_iter()
            .next()
        {
            Some(kv) => kv.key,
            None => bail!("sstable {} has an empty first block", reader.path().display()),
        };
        let end_key = last.last_key.clone();

        Ok(Self {
            level,
            seq,
            size,
            start_key,
            end_key,
            block_to_filter,
            indices,
            filter,
            reader,
            obsolete: AtomicBool::new(false),
        })
    }

    /// Opens the table at `path`, reading its filters and index from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or corrupt.
    pub fn open<P: AsRef<Path>>(
        level: usize,
        seq: u32,
        path: P,
        filter: BloomFilter,
    ) -> Result<Self> {
        let reader = SstReader::open(path)?;
        let block_to_filter = reader.read_filter()?;
        let indices = reader.read_index()?;
        let size = reader.size();
        Self::new(level, seq, reader, size, block_to_filter, indices, filter)
    }

    /// Opens a table the writer just finished, reusing its in-memory
    /// filters and index.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be mapped.
    pub fn from_finished(
        level: usize,
        seq: u32,
        finished: FinishResult,
        filter: BloomFilter,
    ) -> Result<Self> {
        let reader = SstReader::open(&finished.path)?;
        Self::new(
            level,
            seq,
            reader,
            finished.size,
            finished.block_to_filter,
            finished.indices,
            filter,
        )
    }

    /// Point lookup.
    ///
    /// Picks the first block whose last key is `>= key`, consults that
    /// block's filter, and only on a hit decodes the block and binary
    /// searches it.
    ///
    /// # Errors
    ///
    /// Returns an error if the block's filter is missing or mis-sized, or the
    /// block cannot be decoded.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let index = match search_index(&self.indices, key) {
            Some(index) => index,
            None => return Ok(None),
        };
        let bits = match self.block_to_filter.get(&index.block_offset) {
            Some(bits) => bits,
            None => bail!(
                "sstable {} has no filter for block at {}",
                self.path().display(),
                index.block_offset
            ),
        };
        if bits.bit_length() != self.filter.m() {
            bail!(
                "sstable {} filter holds {} bits, expected {}",
                self.path().display(),
                bits.bit_length(),
                self.filter.m()
            );
        }
        if !self
            .filter
            .is_hit(&self.filter.calc_bit_positions(key), bits)
        {
            return Ok(None);
        }

        let kvs = self.reader.read_data(index.block_offset, index.block_size)?;
        Ok(kvs
            .binary_search_by(|kv| kv.key.as_slice().cmp(key))
            .ok()
            .map(|i| kvs[i].value.clone()))
    }

    /// Decodes the data block at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range is invalid or the block is corrupt.
    pub fn get_range(&self, offset: u32, size: u32) -> Result<Vec<Kv>> {
        self.reader.read_data(offset, size)
    }

    /// Whether `[start, end]` intersects this node's key range.
    #[must_use]
    pub fn overlaps(&self, start: &[u8], end: &[u8]) -> bool {
        self.start_key.as_slice() <= end && start <= self.end_key.as_slice()
    }

    /// Whether `key` lies within this node's key range.
    #[must_use]
    pub fn covers(&self, key: &[u8]) -> bool {
        self.start_key.as_slice() <= key && key <= self.end_key.as_slice()
    }

    /// Marks the node obsolete; its file is deleted once the node is dropped.
    pub fn destroy(&self) {
        self.obsolete.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.obsolete.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn level(&self) -> usize {
        self.level
    }

    #[must_use]
    pub fn seq(&self) -> u32 {
        self.seq
    }

    /// File size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn start_key(&self) -> &[u8] {
        &self.start_key
    }

    #[must_use]
    pub fn end_key(&self) -> &[u8] {
        &self.end_key
    }

    #[must_use]
    pub fn indices(&self) -> &[Index] {
        &self.indices
    }

    #[must_use]
    pub fn block_to_filter(&self) -> &HashMap<u32, BitsArray> {
        &self.block_to_filter
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.reader.path()
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if !self.obsolete.load(Ordering::Acquire) {
            return;
        }
        match std::fs::remove_file(self.reader.path()) {
            Ok(()) => debug!(path = %self.reader.path().display(), "obsolete sstable removed"),
            Err(e) => warn!(
                path = %self.reader.path().display(),
                error = %e,
                "failed to remove obsolete sstable"
            ),
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("level", &self.level)
            .field("seq", &self.seq)
            .field("size", &self.size)
            .field("blocks", &self.indices.len())
            .field("obsolete", &self.is_destroyed())
            .finish()
    }
}
