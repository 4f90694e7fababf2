//! Block-wise k-way merge over multiple [`Node`]s.
//!
//! Produces [`Kv`] pairs in ascending key order. Each source contributes one
//! data block at a time: when the last record of a block leaves the heap,
//! the next block of that source is decoded and pushed. Memory therefore
//! stays bounded by one block per source.
//!
//! When the same key appears in several sources, only the record from the
//! freshest source is emitted. Freshness is given by [`Recency`]: a lower
//! level beats a higher one, and within a level the larger sequence number
//! wins.

use anyhow::Result;
use memtable::Kv;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::Node;

/// Freshness rank of a merge source. Smaller sorts first and wins ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recency {
    pub level: usize,
    pub seq: u32,
}

impl Recency {
    pub fn of(node: &Node) -> Self {
        Self {
            level: node.level(),
            seq: node.seq(),
        }
    }
}

impl Ord for Recency {
    fn cmp(&self, other: &Self) -> Ordering {
        self.level
            .cmp(&other.level)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Recency {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A pending record from one source.
struct HeapEntry {
    kv: Kv,
    rank: Recency,
    /// Index into the `sources` array.
    source: usize,
    /// Set on the last record of a block: the block to load once this
    /// record is popped.
    next_block: Option<usize>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want the smallest key first and,
        // for equal keys, the freshest source first.
        other
            .kv
            .key
            .cmp(&self.kv.key)
            .then_with(|| other.rank.cmp(&self.rank))
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Merges several nodes into a single sorted, de-duplicated stream.
pub struct MergeIterator {
    sources: Vec<(Arc<Node>, Recency)>,
    heap: BinaryHeap<HeapEntry>,
}

impl MergeIterator {
    /// Creates a merge over `nodes`, loading the first block of each.
    ///
    /// # Errors
    ///
    /// Returns an error if a first block cannot be read.
    pub fn new(nodes: Vec<Arc<Node>>) -> Result<Self> {
        let sources = nodes
            .into_iter()
            .map(|node| {
                let rank = Recency::of(&node);
                (node, rank)
            })
            .collect();
        let mut merge = Self {
            sources,
            heap: BinaryHeap::new(),
        };
        for source in 0..merge.sources.len() {
            merge.load_block(source, 0)?;
        }
        Ok(merge)
    }

    fn load_block(&mut self, source: usize, block: usize) -> Result<()> {
        let (node, rank) = &self.sources[source];
        let index = match node.indices().get(block) {
            Some(index) => index,
            None => return Ok(()),
        };
        let rank = *rank;
        let kvs = node.get_range(index.block_offset, index.block_size)?;
        let last = kvs.len().saturating_sub(1);
        for (i, kv) in kvs.into_iter().enumerate() {
            self.heap.push(HeapEntry {
                kv,
                rank,
                source,
                next_block: (i == last).then_some(block + 1),
            });
        }
        Ok(())
    }

    fn pop(&mut self) -> Result<Option<Kv>> {
        let top = match self.heap.pop() {
            Some(top) => top,
            None => return Ok(None),
        };
        if let Some(block) = top.next_block {
            self.load_block(top.source, block)?;
        }
        Ok(Some(top.kv))
    }

    /// Returns the next record, or `None` once every source is exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error if a block cannot be read.
    pub fn next_entry(&mut self) -> Result<Option<Kv>> {
        let best = match self.pop()? {
            Some(kv) => kv,
            None => return Ok(None),
        };
        while self
            .heap
            .peek()
            .is_some_and(|peek| peek.kv.key == best.key)
        {
            self.pop()?;
        }
        Ok(Some(best))
    }

    /// Collects all remaining records.
    ///
    /// # Errors
    ///
    /// Same as [`next_entry`](Self::next_entry).
    pub fn collect_all(&mut self) -> Result<Vec<Kv>> {
        let mut out = Vec::new();
        while let Some(kv) = self.next_entry()? {
            out.push(kv);
        }
        Ok(out)
    }
}
