/// SSTable loading and WAL replay.
///
/// This module handles the cold-start path: rebuilding the level catalog
/// from the `{level}_{seq}.sst` files in the tree directory, and rebuilding
/// the active and sealed memtables from the `walfile/{index}.wal` segments.
use anyhow::{ensure, Context, Result};
use bloom::BloomFilter;
use config::{parse_sst_name, parse_wal_name, Config};
use memtable::{new_memtable, MemTable};
use sstable::Node;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use wal::{WalError, WalReader, WalWriter};

use crate::catalog::Levels;
use crate::{HotState, MemTableCompactItem};

/// Cleans up leftover `.sst.tmp` files from interrupted flushes and
/// compactions.
pub(crate) fn cleanup_tmp_files(dir: &Path) {
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let p = entry.path();
            if let Some(name) = p.file_name().and_then(|n| n.to_str()) {
                if name.ends_with(".sst.tmp") {
                    debug!(path = %p.display(), "removing leftover tmp file");
                    let _ = std::fs::remove_file(&p);
                }
            }
        }
    }
}

/// Lists the files in `dir` whose names `parse` accepts, sorted by the
/// parsed key.
fn list_files<K, F>(dir: &Path, parse: F) -> Result<Vec<(K, PathBuf)>>
where
    K: Ord,
    F: Fn(&str) -> Option<K>,
{
    let mut files = Vec::new();
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if let Some(key) = path.file_name().and_then(|n| n.to_str()).and_then(&parse) {
            files.push((key, path));
        }
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

/// Registers every SSTable in the tree directory, in `(level, seq)` order.
///
/// Only the footer, filter and index block of each file are read.
///
/// # Errors
///
/// Returns an error if a table belongs to a level beyond `max_level` or
/// cannot be opened.
pub(crate) fn load_nodes(config: &Config, levels: &Levels, filter: BloomFilter) -> Result<()> {
    let tables = list_files(config.dir(), parse_sst_name)?;
    for ((level, seq), path) in tables {
        ensure!(
            level < levels.count(),
            "sstable {} is at level {} but max_level is {}",
            path.display(),
            level,
            levels.count()
        );
        let node = Node::open(level, seq, &path, filter)
            .with_context(|| format!("failed to load sstable {}", path.display()))?;
        debug!(level, seq, size = node.size(), "sstable registered");
        levels.observe_seq(level, seq);
        levels.insert(Arc::new(node));
    }
    for level in 1..levels.count() {
        if levels.is_overlapping(level) {
            warn!(level, "recovered level has overlapping sstables");
        }
    }
    Ok(())
}

fn replay_segment(path: &Path, memtable: &dyn MemTable) -> Result<usize> {
    WalReader::open(path)
        .and_then(|reader| reader.restore_memtable(memtable))
        .with_context(|| format!("failed to replay wal segment {}", path.display()))
}

/// Rebuilds the memtable tier from the WAL directory.
///
/// Every segment but the newest is sealed: it is replayed into a read-only
/// memtable awaiting flush. The newest segment is replayed into the active
/// memtable and reopened for writing; if it was already sealed it joins the
/// read-only list too and a fresh segment is started at the next index.
///
/// Returns the hot state and the sealed items, oldest first.
///
/// # Errors
///
/// Returns an error if a segment cannot be read or the active segment cannot
/// be opened.
pub(crate) fn restore_hot_state(
    config: &Config,
) -> Result<(HotState, Vec<Arc<MemTableCompactItem>>)> {
    let kind = config.memtable_kind();
    let segment_size = config.wal_file_size();
    let mut segments = list_files(&config.wal_dir(), parse_wal_name)?;
    let newest = segments.pop();

    let mut sealed = Vec::with_capacity(segments.len() + 1);
    for (index, path) in segments {
        let memtable = new_memtable(kind);
        let records = replay_segment(&path, memtable.as_ref())?;
        debug!(index, records, "sealed wal segment replayed");
        sealed.push(Arc::new(MemTableCompactItem::new(path, memtable)));
    }

    let (memtable_index, wal_writer, memtable) = match newest {
        None => (
            0,
            WalWriter::open(config.wal_path(0), segment_size)?,
            new_memtable(kind),
        ),
        Some((index, path)) => {
            let memtable = new_memtable(kind);
            let records = replay_segment(&path, memtable.as_ref())?;
            match WalWriter::open(&path, segment_size) {
                Ok(writer) => {
                    debug!(index, records, "active wal segment replayed");
                    (index, writer, memtable)
                }
                Err(WalError::Sealed(_)) => {
                    debug!(index, records, "newest wal segment is sealed, rolling over");
                    sealed.push(Arc::new(MemTableCompactItem::new(path, memtable)));
                    let next = index + 1;
                    (
                        next,
                        WalWriter::open(config.wal_path(next), segment_size)?,
                        new_memtable(kind),
                    )
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("failed to reopen wal segment {}", path.display()))
                }
            }
        }
    };

    if !sealed.is_empty() || !memtable.is_empty() {
        info!(
            sealed = sealed.len(),
            active_entries = memtable.entries_cnt(),
            "wal replayed"
        );
    }

    let hot = HotState {
        memtable_index,
        wal_writer,
        memtable,
        read_only: sealed.clone(),
    };
    Ok((hot, sealed))
}
