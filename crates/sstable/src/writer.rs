use anyhow::{ensure, Result};
use bloom::{BitsArray, BlockFilter, BloomFilter};
use std::collections::HashMap;
use std::fs::{rename, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::block::{separator_between, Block};
use crate::format::{filter_key, Footer, Index};
use crate::pool::BlockBufferPool;

/// Everything a [`Node`](crate::Node) needs that the writer already has in
/// memory, so a freshly written table can be served without re-reading its
/// filter and index blocks.
#[derive(Debug)]
pub struct FinishResult {
    pub path: PathBuf,
    /// Total file size, footer included.
    pub size: u64,
    pub block_to_filter: HashMap<u32, BitsArray>,
    pub indices: Vec<Index>,
}

/// Streams sorted key-value pairs into a new SSTable file.
///
/// Data blocks are written as they fill; filter and index records accumulate
/// in extendable blocks and are written by [`finish`](Self::finish), followed
/// by the footer. The table is written to `<path>.tmp` and renamed into place
/// once synced, so a crash never leaves a partial `.sst` behind.
pub struct SstWriter {
    path: PathBuf,
    tmp_path: PathBuf,
    file: BufWriter<File>,
    data_block: Block,
    filter_block: Block,
    index_block: Block,
    filter: BlockFilter,
    block_to_filter: HashMap<u32, BitsArray>,
    indices: Vec<Index>,
    pre_key: Vec<u8>,
    offset: u32,
    finished: bool,
}

impl SstWriter {
    /// Creates the temporary file and borrows the first block buffers.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or the pool is not
    /// active.
    pub fn create<P: AsRef<Path>>(
        path: P,
        filter: BloomFilter,
        pool: Arc<BlockBufferPool>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let tmp_path = path.with_extension("sst.tmp");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;

        Ok(Self {
            path,
            tmp_path,
            file: BufWriter::new(file),
            data_block: Block::data(Arc::clone(&pool))?,
            filter_block: Block::extendable(Arc::clone(&pool))?,
            index_block: Block::extendable(pool)?,
            filter: BlockFilter::with_filter(filter),
            block_to_filter: HashMap::new(),
            indices: Vec::new(),
            pre_key: Vec::new(),
            offset: 0,
            finished: false,
        })
    }

    /// Appends one record. Keys must arrive in strictly ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error on out-of-order keys or I/O failure.
    pub fn append(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        ensure!(
            self.is_empty() || key > self.pre_key.as_slice(),
            "keys must be appended in strictly ascending order"
        );

        if !self.data_block.append(key, value)? {
            self.refresh_block(key)?;
            self.data_block.append(key, value)?;
        }
        self.filter.add(key);
        self.pre_key.clear();
        self.pre_key.extend_from_slice(key);
        Ok(())
    }

    /// Flushes the current data block and records its filter and index
    /// entries. Does nothing when the block holds no keys.
    fn refresh_block(&mut self, next_key: &[u8]) -> Result<()> {
        if self.filter.key_len() == 0 {
            return Ok(());
        }

        let block_offset = self.offset;
        let block_size = self.data_block.flush_to(&mut self.file)? as u32;

        let bits = self.filter.hash();
        self.filter_block
            .append(&filter_key(block_offset), bits.as_bytes())?;
        self.block_to_filter.insert(block_offset, bits);

        let index = Index::new(
            separator_between(&self.pre_key, next_key),
            block_offset,
            block_size,
        );
        self.index_block
            .append(&index.last_key, &index.encode_value())?;
        self.indices.push(index);

        self.filter.reset();
        self.offset += block_size;
        Ok(())
    }

    /// Bytes of data blocks written to the file so far.
    #[must_use]
    pub fn size(&self) -> u64 {
        u64::from(self.offset)
    }

    /// Number of data blocks written so far.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.indices.len()
    }

    /// Whether any record has been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty() && self.filter.key_len() == 0
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the last data block, the filter block, the index block and the
    /// footer, then syncs and renames the file into place.
    ///
    /// # Errors
    ///
    /// Returns an error on any I/O failure; the temporary file is removed.
    pub fn finish(mut self) -> Result<FinishResult> {
        let last_key = self.pre_key.clone();
        self.refresh_block(&last_key)?;

        let filter_offset = self.offset;
        let filter_size = self.filter_block.flush_to(&mut self.file)? as u32;
        let index_offset = filter_offset + filter_size;
        let index_size = self.index_block.flush_to(&mut self.file)? as u32;

        let footer = Footer {
            filter_offset,
            filter_size,
            index_offset,
            index_size,
        };
        footer.write_to(&mut self.file)?;

        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        rename(&self.tmp_path, &self.path)?;
        self.finished = true;

        // A crash after rename but before the directory sync can lose the
        // entry on ext4/XFS.
        if let Some(parent) = self.path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        let size = u64::from(index_offset) + u64::from(index_size) + crate::FOOTER_BYTES as u64;
        debug!(
            path = %self.path.display(),
            size,
            blocks = self.indices.len(),
            "sstable written"
        );

        Ok(FinishResult {
            path: self.path.clone(),
            size,
            block_to_filter: std::mem::take(&mut self.block_to_filter),
            indices: std::mem::take(&mut self.indices),
        })
    }
}

impl Drop for SstWriter {
    fn drop(&mut self) {
        if !self.finished {
            let _ = std::fs::remove_file(&self.tmp_path);
        }
    }
}

impl std::fmt::Debug for SstWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SstWriter")
            .field("path", &self.path)
            .field("offset", &self.offset)
            .field("blocks", &self.indices.len())
            .field("finished", &self.finished)
            .finish()
    }
}
