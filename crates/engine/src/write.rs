/// Write path: `put()`, WAL rotation, and the memtable flush run by the
/// background worker.
///
/// Each write is first appended to the active WAL segment for durability,
/// then applied to the active memtable. When the segment is full the pair is
/// sealed and handed to the worker, which writes it out as a level-0
/// SSTable and deletes the segment.
use anyhow::{bail, ensure, Result};
use crossbeam_channel::TrySendError;
use memtable::{new_memtable, MemTable};
use sstable::{Node, SstWriter};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};
use wal::WalWriter;

use crate::{HotState, MemTableCompactItem, Tree, TreeInner};

impl Tree {
    /// Inserts or replaces `key`.
    ///
    /// The record is durable in the WAL when this returns. A full segment is
    /// rotated transparently; if the flush queue is saturated the call waits
    /// for the worker to make room.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is empty, the record cannot fit an empty
    /// WAL segment, the tree is closed, or the WAL cannot be written.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        ensure!(!key.is_empty(), "key must not be empty");
        let segment_size = self.inner.config.wal_file_size();
        ensure!(
            wal::fits_in_segment(key.len(), value.len(), segment_size),
            "record too large: {} bytes does not fit a {}-byte WAL segment",
            wal::record_len(key.len(), value.len()),
            segment_size
        );
        self.ensure_open()?;

        let rotated = {
            let mut hot = self.inner.hot.write();
            let mut rotated = false;
            if !hot.wal_writer.write(key, value)? {
                self.inner.rotate(&mut hot)?;
                rotated = true;
                if !hot.wal_writer.write(key, value)? {
                    bail!("fresh WAL segment refused a record that fits");
                }
            }
            hot.memtable.put(key.to_vec(), value.to_vec());
            rotated
        };

        if rotated {
            self.inner.drain_pending_flushes(true)?;
        }
        Ok(())
    }
}

impl TreeInner {
    /// Seals the active WAL/memtable pair and starts a fresh one.
    ///
    /// The sealed pair joins the read-only list and the pending flush list.
    /// Must be called with the hot write lock held.
    pub(crate) fn rotate(&self, hot: &mut HotState) -> Result<()> {
        let next_index = hot.memtable_index + 1;
        let writer = WalWriter::open(self.config.wal_path(next_index), self.config.wal_file_size())?;

        let sealed_writer = std::mem::replace(&mut hot.wal_writer, writer);
        let sealed_memtable =
            std::mem::replace(&mut hot.memtable, new_memtable(self.config.memtable_kind()));
        let item = Arc::new(MemTableCompactItem::new(
            sealed_writer.path().to_path_buf(),
            sealed_memtable,
        ));
        drop(sealed_writer);

        info!(
            sealed_index = hot.memtable_index,
            memtable_index = next_index,
            entries = item.memtable.entries_cnt(),
            bytes = item.memtable.size(),
            "memtable rotated"
        );

        hot.memtable_index = next_index;
        hot.read_only.push(Arc::clone(&item));
        self.pending_flush.lock().push_back(item);
        Ok(())
    }

    /// Moves pending flush items into the bounded flush queue, oldest first.
    ///
    /// With `block` set the caller spins until every item is accepted or the
    /// tree starts shutting down; otherwise it stops at the first full queue.
    pub(crate) fn drain_pending_flushes(&self, block: bool) -> Result<()> {
        loop {
            let mut pending = self.pending_flush.lock();
            let item = match pending.front() {
                Some(item) => Arc::clone(item),
                None => return Ok(()),
            };
            match self.flush_tx.try_send(item) {
                Ok(()) => {
                    pending.pop_front();
                }
                Err(TrySendError::Full(_)) => {
                    drop(pending);
                    if !block || self.stop.load(Ordering::Acquire) {
                        return Ok(());
                    }
                    thread::yield_now();
                }
                Err(TrySendError::Disconnected(_)) => bail!("flush queue disconnected"),
            }
        }
    }

    /// Writes a sealed memtable to level 0, drops it from the read-only list
    /// and deletes its WAL segment.
    ///
    /// # Errors
    ///
    /// Returns an error if the SSTable cannot be written; the memtable stays
    /// readable and its segment stays on disk.
    pub(crate) fn compact_memtable(&self, item: &Arc<MemTableCompactItem>) -> Result<()> {
        self.flush_memtable(item.memtable.as_ref())?;

        self.hot
            .write()
            .read_only
            .retain(|candidate| !Arc::ptr_eq(candidate, item));

        match std::fs::remove_file(&item.wal_path) {
            Ok(()) => debug!(path = %item.wal_path.display(), "wal segment deleted"),
            Err(e) => warn!(path = %item.wal_path.display(), error = %e, "failed to delete wal segment"),
        }

        self.try_compact_sst(0);
        Ok(())
    }

    /// Writes every entry of `memtable` into a new level-0 SSTable and
    /// registers it. An empty memtable produces no table.
    pub(crate) fn flush_memtable(&self, memtable: &dyn MemTable) -> Result<Option<Arc<Node>>> {
        if memtable.is_empty() {
            return Ok(None);
        }

        let seq = self.levels.next_seq(0);
        let path = self.config.sst_path(0, seq);
        let mut writer = SstWriter::create(&path, self.filter, Arc::clone(&self.pool))?;
        for kv in memtable.all() {
            writer.append(&kv.key, &kv.value)?;
        }
        let node = Arc::new(Node::from_finished(0, seq, writer.finish()?, self.filter)?);
        self.levels.insert(Arc::clone(&node));

        info!(
            seq,
            entries = memtable.entries_cnt(),
            size = node.size(),
            "memtable flushed to level 0"
        );
        Ok(Some(node))
    }
}
