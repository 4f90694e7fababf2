//! The level catalog: one copy-on-write node list per level.
//!
//! Readers take a cheap [`Arc`] snapshot of a level and search it without
//! holding any lock, so a compaction that swaps the list underneath them
//! never invalidates a traversal in progress. Writers clone the list, edit
//! the clone and publish it under the level's write lock.
//!
//! Level 0 is kept in flush order (ascending `seq`) and may overlap. Every
//! deeper level is sorted by start key and normally never overlaps. A crash
//! between writing compaction outputs and retiring their inputs can leave
//! overlapping tables behind; such a level is flagged so reads fall back to
//! a linear scan until a compaction clears it.

use parking_lot::RwLock;
use sstable::Node;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

pub(crate) type LevelSnapshot = Arc<Vec<Arc<Node>>>;

pub(crate) struct Levels {
    levels: Vec<RwLock<LevelSnapshot>>,
    next_seq: Vec<AtomicU32>,
    overlapping: Vec<AtomicBool>,
}

impl Levels {
    pub(crate) fn new(max_level: usize) -> Self {
        Self {
            levels: (0..max_level)
                .map(|_| RwLock::new(Arc::new(Vec::new())))
                .collect(),
            next_seq: (0..max_level).map(|_| AtomicU32::new(0)).collect(),
            overlapping: (0..max_level).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    /// Number of levels.
    pub(crate) fn count(&self) -> usize {
        self.levels.len()
    }

    pub(crate) fn snapshot(&self, level: usize) -> LevelSnapshot {
        Arc::clone(&self.levels[level].read())
    }

    /// Allocates the next file sequence number for `level`.
    pub(crate) fn next_seq(&self, level: usize) -> u32 {
        self.next_seq[level].fetch_add(1, Ordering::AcqRel)
    }

    /// Makes sure sequence numbers handed out later exceed `seq`.
    pub(crate) fn observe_seq(&self, level: usize, seq: u32) {
        self.next_seq[level].fetch_max(seq.saturating_add(1), Ordering::AcqRel);
    }

    /// Registers a freshly written node at its own level.
    pub(crate) fn insert(&self, node: Arc<Node>) {
        let level = node.level();
        let mut guard = self.levels[level].write();
        let mut nodes = Vec::clone(&guard);
        insert_node(&mut nodes, node);
        self.overlapping[level].store(has_overlap(level, &nodes), Ordering::Release);
        *guard = Arc::new(nodes);
    }

    /// Whether a level other than 0 currently holds overlapping nodes.
    pub(crate) fn is_overlapping(&self, level: usize) -> bool {
        self.overlapping[level].load(Ordering::Acquire)
    }

    /// Publishes the result of compacting `level` into `level + 1`.
    ///
    /// Removes every picked node from both levels, adds the outputs to
    /// `level + 1` and marks the picked nodes obsolete. Both write locks are
    /// held for the swap, the deeper level's first.
    pub(crate) fn swap_compacted(
        &self,
        level: usize,
        picked: &[Arc<Node>],
        outputs: Vec<Arc<Node>>,
    ) {
        let mut lower = self.levels[level + 1].write();
        let mut upper = self.levels[level].write();

        let is_picked = |node: &Arc<Node>| picked.iter().any(|p| Arc::ptr_eq(p, node));

        let remaining_upper: Vec<Arc<Node>> =
            upper.iter().filter(|n| !is_picked(*n)).cloned().collect();
        let mut remaining_lower: Vec<Arc<Node>> =
            lower.iter().filter(|n| !is_picked(*n)).cloned().collect();
        for node in outputs {
            insert_node(&mut remaining_lower, node);
        }

        self.overlapping[level].store(has_overlap(level, &remaining_upper), Ordering::Release);
        self.overlapping[level + 1].store(
            has_overlap(level + 1, &remaining_lower),
            Ordering::Release,
        );
        *upper = Arc::new(remaining_upper);
        *lower = Arc::new(remaining_lower);

        for node in picked {
            node.destroy();
        }
    }

    /// Total bytes of every node at `level`.
    pub(crate) fn level_size(&self, level: usize) -> u64 {
        self.snapshot(level).iter().map(|n| n.size()).sum()
    }

    pub(crate) fn node_count(&self, level: usize) -> usize {
        self.snapshot(level).len()
    }

    /// Drops every node from the catalog. Files stay on disk.
    pub(crate) fn clear(&self) {
        for (level, flag) in self.levels.iter().zip(&self.overlapping) {
            *level.write() = Arc::new(Vec::new());
            flag.store(false, Ordering::Release);
        }
    }
}

fn insert_node(nodes: &mut Vec<Arc<Node>>, node: Arc<Node>) {
    if node.level() == 0 {
        nodes.push(node);
    } else {
        let pos = nodes.partition_point(|n| n.start_key() < node.start_key());
        nodes.insert(pos, node);
    }
}

/// Level 0 is expected to overlap and never counts. `nodes` must be sorted
/// by start key.
fn has_overlap(level: usize, nodes: &[Arc<Node>]) -> bool {
    level > 0 && nodes.windows(2).any(|w| w[0].end_key() >= w[1].start_key())
}

/// Binary search of a sorted, non-overlapping level for the node whose
/// range contains `key`. A key that falls between two nodes is absent.
pub(crate) fn find_covering<'a>(nodes: &'a [Arc<Node>], key: &[u8]) -> Option<&'a Arc<Node>> {
    let idx = nodes.partition_point(|n| n.end_key() < key);
    nodes.get(idx).filter(|n| n.start_key() <= key)
}

/// Every node of an overlapping level whose range contains `key`, newest
/// (highest `seq`) first.
pub(crate) fn covering_newest_first<'a>(nodes: &'a [Arc<Node>], key: &[u8]) -> Vec<&'a Arc<Node>> {
    let mut found: Vec<_> = nodes.iter().filter(|n| n.covers(key)).collect();
    found.sort_unstable_by(|a, b| b.seq().cmp(&a.seq()));
    found
}
