/// The background worker: a single thread that flushes sealed memtables and
/// runs compactions until the tree is closed.
use crossbeam_channel::Sender;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error};

use crate::{MemTableCompactItem, TreeInner};

/// Worker loop. Each round flushes up to `flush_batch` memtables, then runs
/// up to `compact_batch` compaction requests, and sleeps for `idle_sleep`
/// when neither queue had work. Signals `done` on exit.
pub(crate) fn run(inner: &TreeInner, done: &Sender<()>) {
    debug!("background worker started");
    let mut retry: Option<Arc<MemTableCompactItem>> = None;

    while !inner.stop.load(Ordering::Acquire) {
        let flushed = flush_batch(inner, &mut retry);
        let compacted = compact_batch(inner);
        if flushed == 0 && compacted == 0 {
            thread::sleep(inner.config.idle_sleep());
        }
    }

    debug!("background worker stopped");
    let _ = done.send(());
}

/// Flushes queued memtables in rotation order.
///
/// A memtable whose flush fails is kept in `retry` and flushed before any
/// newer one, so level-0 sequence numbers keep following write order.
fn flush_batch(inner: &TreeInner, retry: &mut Option<Arc<MemTableCompactItem>>) -> usize {
    if let Err(e) = inner.drain_pending_flushes(false) {
        error!(error = %e, "failed to queue pending memtables");
    }

    let mut flushed = 0;
    while flushed < inner.config.flush_batch() {
        let item = match retry.take() {
            Some(item) => item,
            None => match inner.flush_rx.try_recv() {
                Ok(item) => item,
                Err(_) => break,
            },
        };
        if let Err(e) = inner.compact_memtable(&item) {
            error!(wal = %item.wal_path().display(), error = %e, "memtable flush failed");
            *retry = Some(item);
            break;
        }
        flushed += 1;
    }
    flushed
}

/// Runs queued compactions, skipping a level requested twice in a row.
fn compact_batch(inner: &TreeInner) -> usize {
    let mut processed = 0;
    let mut last_level = None;
    while processed < inner.config.compact_batch() {
        let level = match inner.compact_rx.try_recv() {
            Ok(level) => level,
            Err(_) => break,
        };
        processed += 1;
        if last_level == Some(level) {
            continue;
        }
        last_level = Some(level);
        if let Err(e) = inner.compact_level(level) {
            error!(level, error = %e, "compaction failed");
        }
    }
    processed
}
