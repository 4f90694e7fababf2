mod catalog_tests;
mod write_tests;

use crate::*;
use anyhow::Result;
use config::Config;
use sstable::{Node, SstWriter};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// A configuration small enough that a few hundred writes rotate the WAL.
///
/// `sst_size = 4096` gives 3276-byte WAL segments and a 40 KiB level-0
/// budget.
pub(crate) fn small_config(dir: &Path) -> Config {
    Config::new(dir)
        .with_sst_size(4096)
        .with_sst_data_block_size(256)
        .with_block_buffer_pool_size(64)
        .with_idle_sleep(Duration::from_millis(5))
        .with_shutdown_timeout(Duration::from_secs(10))
        .with_buffer_release_grace(Duration::from_millis(50))
}

pub(crate) fn key(i: usize) -> Vec<u8> {
    format!("key-{:05}", i).into_bytes()
}

pub(crate) fn value(i: usize, tag: &str) -> Vec<u8> {
    format!("{}-{}", tag, i).into_bytes()
}

pub(crate) fn numbered(range: std::ops::Range<usize>, tag: &str) -> Vec<(Vec<u8>, Vec<u8>)> {
    range.map(|i| (key(i), value(i, tag))).collect()
}

/// Polls `cond` until it holds or `timeout` elapses.
pub(crate) fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Waits until the worker has flushed every sealed memtable.
pub(crate) fn wait_for_flushes(tree: &Tree) -> bool {
    wait_until(Duration::from_secs(20), || tree.read_only_memtable_count() == 0)
}

pub(crate) fn count_files(dir: &Path, ext: &str) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|x| x == ext)
                .unwrap_or(false)
        })
        .count()
}

/// Writes `kvs` (sorted) into a new table and registers it at `level`,
/// bypassing the write path.
pub(crate) fn install_node(
    tree: &Tree,
    level: usize,
    kvs: &[(Vec<u8>, Vec<u8>)],
) -> Result<Arc<Node>> {
    let inner = &tree.inner;
    let seq = inner.levels.next_seq(level);
    let mut writer = SstWriter::create(
        inner.config.sst_path(level, seq),
        inner.filter,
        Arc::clone(&inner.pool),
    )?;
    for (k, v) in kvs {
        writer.append(k, v)?;
    }
    let node = Arc::new(Node::from_finished(level, seq, writer.finish()?, inner.filter)?);
    inner.levels.insert(Arc::clone(&node));
    Ok(node)
}
