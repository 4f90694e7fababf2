//! # Config
//!
//! Tunables for a tree instance and the file naming derived from them.
//!
//! A [`Config`] is built with [`Config::new`] and refined with `with_*`
//! setters, then handed to the engine, which calls [`Config::validate`] before
//! touching the disk.
//!
//! ## Directory layout
//!
//! ```text
//! <dir>/
//!   0_1.sst, 0_2.sst, 1_1.sst, ...    {level}_{seq}.sst
//!   walfile/
//!     0.wal, 1.wal, ...               {index}.wal
//! ```
//!
//! ## Level budgets
//!
//! ```text
//! level 0  -> sst_size
//! level 1  -> sst_size * 10
//! level n  -> sst_size * 100 * n     (n >= 2)
//! ```

use anyhow::{ensure, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Size in bytes of the fixed SSTable footer.
pub const SST_FOOTER_SIZE: usize = 16;

/// Name of the WAL subdirectory under the tree directory.
pub const WAL_DIR_NAME: &str = "walfile";

pub const SST_EXTENSION: &str = "sst";
pub const WAL_EXTENSION: &str = "wal";

/// Which in-memory table implementation backs the active memtable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemTableKind {
    /// Lock-free ordered skip list.
    #[default]
    SkipList,
    /// `BTreeMap` behind a reader-writer lock.
    BTree,
}

/// Tree configuration.
#[derive(Debug, Clone)]
pub struct Config {
    dir: PathBuf,
    max_level: usize,
    sst_size: u64,
    sst_data_block_size: usize,
    filter_fp_percent: u32,
    filter_expected_keys: u32,
    memtable_kind: MemTableKind,
    block_buffer_pool_size: usize,
    pin_buffers: bool,
    flush_batch: usize,
    compact_batch: usize,
    flush_queue_capacity: usize,
    compact_queue_capacity: usize,
    idle_sleep: Duration,
    shutdown_timeout: Duration,
    buffer_release_grace: Duration,
}

impl Config {
    /// Creates a configuration rooted at `dir` with default tunables.
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            max_level: 7,
            sst_size: 2 * 1024 * 1024,
            sst_data_block_size: 32 * 1024,
            filter_fp_percent: 20,
            filter_expected_keys: 400,
            memtable_kind: MemTableKind::SkipList,
            block_buffer_pool_size: 3000,
            pin_buffers: false,
            flush_batch: 60,
            compact_batch: 30,
            flush_queue_capacity: 500,
            compact_queue_capacity: 200,
            idle_sleep: Duration::from_millis(500),
            shutdown_timeout: Duration::from_secs(30),
            buffer_release_grace: Duration::from_secs(5),
        }
    }

    pub fn with_max_level(mut self, max_level: usize) -> Self {
        self.max_level = max_level;
        self
    }

    /// Sets the base SSTable size; the WAL segment size and every level
    /// budget scale from it.
    pub fn with_sst_size(mut self, sst_size: u64) -> Self {
        self.sst_size = sst_size;
        self
    }

    /// Sets the data block size, which is also the pooled buffer size.
    pub fn with_sst_data_block_size(mut self, size: usize) -> Self {
        self.sst_data_block_size = size;
        self
    }

    pub fn with_filter(mut self, fp_percent: u32, expected_keys: u32) -> Self {
        self.filter_fp_percent = fp_percent;
        self.filter_expected_keys = expected_keys;
        self
    }

    pub fn with_memtable_kind(mut self, kind: MemTableKind) -> Self {
        self.memtable_kind = kind;
        self
    }

    pub fn with_block_buffer_pool_size(mut self, size: usize) -> Self {
        self.block_buffer_pool_size = size;
        self
    }

    /// Requests that pooled buffers be locked in RAM where supported.
    pub fn with_pin_buffers(mut self, pin: bool) -> Self {
        self.pin_buffers = pin;
        self
    }

    pub fn with_worker_batches(mut self, flush_batch: usize, compact_batch: usize) -> Self {
        self.flush_batch = flush_batch;
        self.compact_batch = compact_batch;
        self
    }

    pub fn with_queue_capacities(mut self, flush: usize, compact: usize) -> Self {
        self.flush_queue_capacity = flush;
        self.compact_queue_capacity = compact;
        self
    }

    pub fn with_idle_sleep(mut self, idle: Duration) -> Self {
        self.idle_sleep = idle;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_buffer_release_grace(mut self, grace: Duration) -> Self {
        self.buffer_release_grace = grace;
        self
    }

    /// Checks that every tunable is usable.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending option.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.max_level >= 2, "max_level must be >= 2");
        ensure!(self.sst_size > 0, "sst_size must be > 0");
        ensure!(
            self.wal_file_size() > 8 + 4,
            "sst_size too small to hold a WAL record"
        );
        ensure!(
            self.sst_data_block_size > 0,
            "sst_data_block_size must be > 0"
        );
        ensure!(
            (1..100).contains(&self.filter_fp_percent),
            "filter_fp_percent must be in 1..=99"
        );
        ensure!(
            self.filter_expected_keys > 0,
            "filter_expected_keys must be > 0"
        );
        ensure!(self.flush_batch > 0, "flush_batch must be > 0");
        ensure!(self.compact_batch > 0, "compact_batch must be > 0");
        ensure!(
            self.flush_queue_capacity > 0 && self.compact_queue_capacity > 0,
            "queue capacities must be > 0"
        );
        Ok(())
    }

    /// Creates the tree directory and its WAL subdirectory.
    ///
    /// # Errors
    ///
    /// Returns an error if either directory cannot be created.
    pub fn prepare_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::create_dir_all(self.wal_dir())?;
        Ok(())
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn max_level(&self) -> usize {
        self.max_level
    }

    #[must_use]
    pub fn sst_size(&self) -> u64 {
        self.sst_size
    }

    #[must_use]
    pub fn sst_data_block_size(&self) -> usize {
        self.sst_data_block_size
    }

    #[must_use]
    pub fn sst_footer_size(&self) -> usize {
        SST_FOOTER_SIZE
    }

    #[must_use]
    pub fn filter_fp_percent(&self) -> u32 {
        self.filter_fp_percent
    }

    #[must_use]
    pub fn filter_expected_keys(&self) -> u32 {
        self.filter_expected_keys
    }

    #[must_use]
    pub fn memtable_kind(&self) -> MemTableKind {
        self.memtable_kind
    }

    #[must_use]
    pub fn block_buffer_pool_size(&self) -> usize {
        self.block_buffer_pool_size
    }

    #[must_use]
    pub fn pin_buffers(&self) -> bool {
        self.pin_buffers
    }

    #[must_use]
    pub fn flush_batch(&self) -> usize {
        self.flush_batch
    }

    #[must_use]
    pub fn compact_batch(&self) -> usize {
        self.compact_batch
    }

    #[must_use]
    pub fn flush_queue_capacity(&self) -> usize {
        self.flush_queue_capacity
    }

    #[must_use]
    pub fn compact_queue_capacity(&self) -> usize {
        self.compact_queue_capacity
    }

    #[must_use]
    pub fn idle_sleep(&self) -> Duration {
        self.idle_sleep
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    #[must_use]
    pub fn buffer_release_grace(&self) -> Duration {
        self.buffer_release_grace
    }

    /// Byte budget of `level`: the base size at level 0, ten times that at
    /// level 1, and `100 * level` times that beyond.
    #[must_use]
    pub fn level_sst_size(&self, level: usize) -> u64 {
        match level {
            0 => self.sst_size,
            1 => self.sst_size.saturating_mul(10),
            n => self.sst_size.saturating_mul(100).saturating_mul(n as u64),
        }
    }

    /// Fixed size of every WAL segment: four fifths of the base SSTable size.
    #[must_use]
    pub fn wal_file_size(&self) -> usize {
        (self.sst_size.saturating_mul(4) / 5) as usize
    }

    #[must_use]
    pub fn wal_dir(&self) -> PathBuf {
        self.dir.join(WAL_DIR_NAME)
    }

    /// Path of the SSTable file `{level}_{seq}.sst`.
    #[must_use]
    pub fn sst_path(&self, level: usize, seq: u32) -> PathBuf {
        self.dir.join(format!("{}_{}.{}", level, seq, SST_EXTENSION))
    }

    /// Path of the WAL segment `walfile/{index}.wal`.
    #[must_use]
    pub fn wal_path(&self, index: u64) -> PathBuf {
        self.wal_dir().join(format!("{}.{}", index, WAL_EXTENSION))
    }
}

/// Parses an SSTable file name of the form `{level}_{seq}.sst`.
#[must_use]
pub fn parse_sst_name(name: &str) -> Option<(usize, u32)> {
    let stem = name.strip_suffix(".sst")?;
    let (level, seq) = stem.split_once('_')?;
    Some((level.parse().ok()?, seq.parse().ok()?))
}

/// Parses a WAL file name of the form `{index}.wal`.
#[must_use]
pub fn parse_wal_name(name: &str) -> Option<u64> {
    name.strip_suffix(".wal")?.parse().ok()
}
