//! # Engine - leveled LSM tree
//!
//! The central orchestrator that ties together the [`memtable`], [`wal`], and
//! [`sstable`] crates into a multi-level LSM key-value store.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌────────────────────────────────────────────────────┐
//! │                       TREE                         │
//! │                                                    │
//! │ write.rs → WAL append → active memtable insert     │
//! │              |                                     │
//! │              |  (WAL segment full?)                │
//! │              |            yes                      │
//! │              v                                     │
//! │           rotate() → sealed memtable → flush queue │
//! │                                                    │
//! │ worker.rs (background thread)                      │
//! │   flush queue      → compact_memtable() → L0 SST   │
//! │   compaction queue → compact_level(n) → L(n+1)     │
//! │                                                    │
//! │ read.rs → memtable → read-only memtables           │
//! │         → L0 (newest first) → L1..Ln (bsearch)     │
//! │            (first match wins)                      │
//! └────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                                  |
//! |----------------|----------------------------------------------------------|
//! | [`lib.rs`]     | `Tree` struct, `open()`, `close()`, accessors, `Debug`, `Drop` |
//! | [`catalog`]    | Copy-on-write per-level node lists                       |
//! | [`recovery`]   | SSTable loading, WAL replay, tmp file cleanup            |
//! | [`write`]      | `put()`, WAL rotation, memtable flush                    |
//! | [`read`]       | `get()`                                                  |
//! | [`compaction`] | Size triggers, node picking, streaming merge, swap       |
//! | [`worker`]     | Background flush/compaction loop                         |
//!
//! ## Levels
//!
//! ```text
//! ┌────────────────────────────┐  ← freshest, checked first
//! │ ACTIVE MEMTABLE            │
//! ├────────────────────────────┤  ← sealed, waiting for flush
//! │ READ-ONLY MEMTABLES        │
//! ├────────────────────────────┤  ← from flushes (may overlap)
//! │ L0 SSTables                │
//! ├────────────────────────────┤  ← from compaction (no overlap)
//! │ L1 .. L(max_level-1)       │
//! └────────────────────────────┘
//! ```
//!
//! Level `n` is compacted into level `n + 1` once its total size exceeds
//! [`Config::level_sst_size`]`(n + 1)`.
//!
//! ## Crash Safety
//!
//! Every write is appended to the active WAL segment **before** the memtable
//! update. A segment file is deleted only after its memtable has been
//! written to a level-0 SSTable. SSTables are written to a temp file and
//! renamed into place, so a crash leaves either the old or the new catalog
//! on disk, never a partial table.

mod catalog;
mod compaction;
mod read;
mod recovery;
mod worker;
mod write;

use anyhow::{ensure, Result};
use bloom::BloomFilter;
use catalog::Levels;
use config::Config;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use memtable::MemTable;
use parking_lot::{Mutex, RwLock};
use sstable::{default_locker, BlockBufferPool};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};
use wal::WalWriter;

pub use config::MemTableKind;

/// A sealed memtable together with the WAL segment that backs it.
///
/// Lives in the read-only list (so reads still see it) and in the flush
/// queue until the worker has written it to level 0.
pub struct MemTableCompactItem {
    wal_path: PathBuf,
    memtable: Arc<dyn MemTable>,
}

impl MemTableCompactItem {
    pub(crate) fn new(wal_path: PathBuf, memtable: Arc<dyn MemTable>) -> Self {
        Self { wal_path, memtable }
    }

    #[must_use]
    pub fn wal_path(&self) -> &Path {
        &self.wal_path
    }

    #[must_use]
    pub fn memtable(&self) -> &Arc<dyn MemTable> {
        &self.memtable
    }
}

impl std::fmt::Debug for MemTableCompactItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemTableCompactItem")
            .field("wal_path", &self.wal_path)
            .field("entries", &self.memtable.entries_cnt())
            .finish()
    }
}

/// Everything `put` mutates, guarded by one lock.
pub(crate) struct HotState {
    pub(crate) memtable_index: u64,
    pub(crate) wal_writer: WalWriter,
    pub(crate) memtable: Arc<dyn MemTable>,
    /// Sealed memtables, oldest first.
    pub(crate) read_only: Vec<Arc<MemTableCompactItem>>,
}

/// State shared between the foreground handle and the background worker.
pub(crate) struct TreeInner {
    pub(crate) config: Config,
    pub(crate) filter: BloomFilter,
    pub(crate) pool: Arc<BlockBufferPool>,
    pub(crate) hot: RwLock<HotState>,
    pub(crate) levels: Levels,
    /// Rotated memtables not yet accepted by the bounded flush queue.
    pub(crate) pending_flush: Mutex<VecDeque<Arc<MemTableCompactItem>>>,
    pub(crate) flush_tx: Sender<Arc<MemTableCompactItem>>,
    pub(crate) flush_rx: Receiver<Arc<MemTableCompactItem>>,
    pub(crate) compact_tx: Sender<usize>,
    pub(crate) compact_rx: Receiver<usize>,
    pub(crate) stop: AtomicBool,
}

/// A leveled LSM tree rooted at one directory.
///
/// # Write Path
///
/// 1. Append the record to the active WAL segment.
/// 2. If the segment is full, seal it with its memtable, queue the pair for
///    flush, and continue on a fresh segment/memtable pair.
/// 3. Insert the record into the active memtable.
///
/// # Read Path
///
/// 1. Active memtable, then read-only memtables newest first.
/// 2. Level 0 newest first, filtered by each node's key range.
/// 3. Levels 1 and deeper by binary search for the covering node.
/// 4. First match wins.
///
/// # Recovery
///
/// [`Tree::open`] reloads every SSTable's metadata, replays the WAL
/// directory and resumes writing to the last unsealed segment.
///
/// All methods take `&self`; a `Tree` can be shared between threads behind
/// an [`Arc`].
pub struct Tree {
    inner: Arc<TreeInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_done: Receiver<()>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hot = self.inner.hot.read();
        let level_nodes: Vec<usize> = (0..self.inner.levels.count())
            .map(|level| self.inner.levels.node_count(level))
            .collect();
        f.debug_struct("Tree")
            .field("dir", &self.inner.config.dir())
            .field("memtable_index", &hot.memtable_index)
            .field("memtable_size", &hot.memtable.size())
            .field("memtable_entries", &hot.memtable.entries_cnt())
            .field("read_only_memtables", &hot.read_only.len())
            .field("level_nodes", &level_nodes)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl Tree {
    /// Opens (or creates) the tree described by `config`.
    ///
    /// # Recovery Steps
    ///
    /// 1. Validate the configuration and create the directories.
    /// 2. Clean up leftover `.sst.tmp` files from interrupted writes.
    /// 3. Register every `{level}_{seq}.sst` file in `(level, seq)` order.
    /// 4. Replay the WAL segments; all but the last become sealed memtables.
    /// 5. Reopen the last segment for writing, or roll over to a new one if
    ///    it was sealed.
    /// 6. Start the background worker and queue the sealed memtables.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid configuration, a missing or corrupt file,
    /// or any I/O failure during recovery.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        config.prepare_dirs()?;

        recovery::cleanup_tmp_files(config.dir());

        let filter = BloomFilter::new(config.filter_fp_percent(), config.filter_expected_keys());
        let levels = Levels::new(config.max_level());
        recovery::load_nodes(&config, &levels, filter)?;
        let (hot, sealed) = recovery::restore_hot_state(&config)?;

        let pool = Arc::new(BlockBufferPool::new(
            config.block_buffer_pool_size(),
            config.sst_data_block_size(),
            default_locker(config.pin_buffers()),
        ));
        pool.init();

        let (flush_tx, flush_rx) = bounded(config.flush_queue_capacity());
        let (compact_tx, compact_rx) = bounded(config.compact_queue_capacity());

        let recovered_nodes: usize = (0..levels.count()).map(|l| levels.node_count(l)).sum();
        info!(
            dir = %config.dir().display(),
            nodes = recovered_nodes,
            sealed_memtables = sealed.len(),
            memtable_index = hot.memtable_index,
            "tree opened"
        );

        let inner = Arc::new(TreeInner {
            config,
            filter,
            pool,
            hot: RwLock::new(hot),
            levels,
            pending_flush: Mutex::new(sealed.into_iter().collect()),
            flush_tx,
            flush_rx,
            compact_tx,
            compact_rx,
            stop: AtomicBool::new(false),
        });

        let (done_tx, worker_done) = bounded(1);
        let handle = thread::Builder::new().name("lsm-worker".to_string()).spawn({
            let inner = Arc::clone(&inner);
            move || worker::run(&inner, &done_tx)
        });
        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                inner.pool.destroy(inner.config.buffer_release_grace());
                return Err(e.into());
            }
        };

        // Level sizes recovered from disk may already be over budget.
        for level in 0..inner.levels.count() {
            inner.try_compact_sst(level);
        }

        Ok(Self {
            inner,
            worker: Mutex::new(Some(handle)),
            worker_done,
            closed: AtomicBool::new(false),
        })
    }

    /// Stops the background worker and releases every resource.
    ///
    /// Waits up to [`Config::shutdown_timeout`] for the worker to finish its
    /// current batch. Memtables that were not flushed yet stay in their WAL
    /// segments and are recovered by the next [`Tree::open`]. Calling
    /// `close` twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the active WAL segment cannot be synced.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.stop.store(true, Ordering::Release);

        match self.worker_done.recv_timeout(self.inner.config.shutdown_timeout()) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.worker.lock().take() {
                    if handle.join().is_err() {
                        warn!("background worker panicked");
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    timeout = ?self.inner.config.shutdown_timeout(),
                    "background worker missed the shutdown deadline"
                );
            }
        }

        let synced = self.inner.hot.read().wal_writer.sync_to_disk();
        self.inner.levels.clear();
        self.inner
            .pool
            .destroy(self.inner.config.buffer_release_grace());
        info!(dir = %self.inner.config.dir().display(), "tree closed");

        synced?;
        Ok(())
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        ensure!(!self.closed.load(Ordering::Acquire), "tree is closed");
        Ok(())
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of SSTables currently registered at `level`.
    ///
    /// # Panics
    ///
    /// Panics if `level >= max_level`.
    #[must_use]
    pub fn level_node_count(&self, level: usize) -> usize {
        self.inner.levels.node_count(level)
    }

    /// Total bytes of the SSTables registered at `level`.
    ///
    /// # Panics
    ///
    /// Panics if `level >= max_level`.
    #[must_use]
    pub fn level_size(&self, level: usize) -> u64 {
        self.inner.levels.level_size(level)
    }

    /// Number of sealed memtables still waiting for their flush.
    #[must_use]
    pub fn read_only_memtable_count(&self) -> usize {
        self.inner.hot.read().read_only.len()
    }

    /// Index of the active WAL segment / memtable pair.
    #[must_use]
    pub fn memtable_index(&self) -> u64 {
        self.inner.hot.read().memtable_index
    }
}

/// Best-effort shutdown on drop.
///
/// Errors are ignored because Drop cannot propagate them; anything not yet
/// flushed is still in the WAL and is recovered on the next open.
impl Drop for Tree {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests;
