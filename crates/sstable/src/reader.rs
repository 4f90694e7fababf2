use anyhow::{bail, Context, Result};
use bloom::BitsArray;
use memmap2::Mmap;
use memtable::Kv;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::block::decode_records;
use crate::format::{decode_filter_key, Footer, Index, FOOTER_BYTES};

/// Read-only view of an SSTable file.
///
/// The whole file is memory-mapped on [`open`](Self::open). The footer is
/// parsed on first use and cached; every other read decodes straight from
/// the mapping, so `&self` methods are safe to call from many threads.
pub struct SstReader {
    path: PathBuf,
    mmap: Mmap,
    footer: OnceLock<Footer>,
}

impl SstReader {
    /// Maps the table at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, smaller than a footer, or
    /// cannot be mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .with_context(|| format!("sstable file {} is missing", path.display()))?;
        let len = file.metadata()?.len();
        if len < FOOTER_BYTES as u64 {
            bail!("sstable {} too small ({} bytes)", path.display(), len);
        }
        // SAFETY: tables are immutable once renamed into place and are only
        // removed after every reader has been dropped.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            path,
            mmap,
            footer: OnceLock::new(),
        })
    }

    /// Returns the parsed footer.
    ///
    /// # Errors
    ///
    /// Returns an error if the footer is corrupt.
    pub fn footer(&self) -> Result<Footer> {
        if let Some(footer) = self.footer.get() {
            return Ok(*footer);
        }
        let len = self.mmap.len();
        let footer = Footer::decode(&self.mmap[len - FOOTER_BYTES..], len as u64)
            .with_context(|| format!("reading footer of {}", self.path.display()))?;
        Ok(*self.footer.get_or_init(|| footer))
    }

    /// Loads the per-block filters, keyed by data block offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the footer or the filter block is corrupt.
    pub fn read_filter(&self) -> Result<HashMap<u32, BitsArray>> {
        let footer = self.footer()?;
        self.read_region(footer.filter_offset, footer.filter_size)?
            .into_iter()
            .map(|kv| Ok((decode_filter_key(&kv.key)?, BitsArray::from_bytes(kv.value))))
            .collect()
    }

    /// Loads the block index in file order.
    ///
    /// # Errors
    ///
    /// Returns an error if the footer or the index block is corrupt.
    pub fn read_index(&self) -> Result<Vec<Index>> {
        let footer = self.footer()?;
        self.read_region(footer.index_offset, footer.index_size)?
            .into_iter()
            .map(|kv| Index::decode(kv.key, &kv.value))
            .collect()
    }

    /// Decodes the records of one data block.
    ///
    /// # Errors
    ///
    /// Returns an error if the range lies outside the file or the records
    /// are corrupt.
    pub fn read_data(&self, offset: u32, size: u32) -> Result<Vec<Kv>> {
        self.read_region(offset, size)
    }

    /// Decodes every record of the data region.
    ///
    /// # Errors
    ///
    /// Returns an error if the footer or any record is corrupt.
    pub fn read_data_all(&self) -> Result<Vec<Kv>> {
        let footer = self.footer()?;
        self.read_region(0, footer.data_size())
    }

    fn read_region(&self, offset: u32, size: u32) -> Result<Vec<Kv>> {
        let start = offset as usize;
        let end = start + size as usize;
        if end > self.mmap.len() {
            bail!(
                "region {}..{} outside {} ({} bytes)",
                start,
                end,
                self.path.display(),
                self.mmap.len()
            );
        }
        decode_records(&self.mmap[start..end])
            .with_context(|| format!("decoding {} at offset {}", self.path.display(), start))
    }

    /// File size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.mmap.len() as u64
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for SstReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SstReader")
            .field("path", &self.path)
            .field("size", &self.size())
            .finish()
    }
}
