
use crate::*;
use anyhow::Result;
use bloom::BloomFilter;
use std::path::Path;
use std::sync::Arc;

/// An initialized pool of `buffer_size` buffers that never pins memory.
pub(super) fn test_pool(buffer_size: usize) -> Arc<BlockBufferPool> {
    let pool = Arc::new(BlockBufferPool::new(16, buffer_size, Arc::new(NoopLocker)));
    pool.init();
    pool
}

pub(super) fn default_filter() -> BloomFilter {
    BloomFilter::new(20, 400)
}

/// Writes `kvs` (already sorted) into a table at `path`.
pub(super) fn write_table(
    path: &Path,
    block_size: usize,
    kvs: &[(Vec<u8>, Vec<u8>)],
) -> Result<FinishResult> {
    let mut writer = SstWriter::create(path, default_filter(), test_pool(block_size))?;
    for (k, v) in kvs {
        writer.append(k, v)?;
    }
    writer.finish()
}

/// Writes `kvs` and opens the result as a node.
pub(super) fn write_node(
    dir: &Path,
    level: usize,
    seq: u32,
    block_size: usize,
    kvs: &[(Vec<u8>, Vec<u8>)],
) -> Result<Arc<Node>> {
    let path = dir.join(format!("{}_{}.sst", level, seq));
    let finished = write_table(&path, block_size, kvs)?;
    Ok(Arc::new(Node::from_finished(level, seq, finished, default_filter())?))
}

/// `count` sorted entries `key-00000 .. ` with values tagged by `tag`.
pub(super) fn numbered(range: std::ops::Range<u32>, tag: &str) -> Vec<(Vec<u8>, Vec<u8>)> {
    range
        .map(|i| {
            (
                format!("key-{:05}", i).into_bytes(),
                format!("{}-{}", tag, i).into_bytes(),
            )
        })
        .collect()
}
