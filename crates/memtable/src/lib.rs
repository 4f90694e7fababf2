//! # Memtable
//!
//! In-memory ordered key-value tables that absorb writes before they are
//! flushed to SSTables.
//!
//! Two interchangeable implementations sit behind the [`MemTable`] trait:
//!
//! | Type                 | Backing store                         |
//! |----------------------|---------------------------------------|
//! | [`SkipListMemTable`] | `crossbeam_skiplist::SkipMap`         |
//! | [`BTreeMemTable`]    | `BTreeMap` behind a `parking_lot` lock |
//!
//! Keys are ordered by unsigned lexicographic byte comparison, which is the
//! natural `Ord` of `[u8]`. A put on an existing key replaces its value.
//!
//! Size accounting is approximate: a new key adds `key.len() + value.len()`,
//! an overwrite adds the new value length and subtracts the old one.

mod btree;
mod skiplist;

pub use btree::BTreeMemTable;
pub use config::MemTableKind;
pub use skiplist::SkipListMemTable;

use std::sync::Arc;

/// An owned key-value pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Kv {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Kv {
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self { key, value }
    }
}

/// Concurrent ordered map from byte keys to byte values.
pub trait MemTable: Send + Sync {
    /// Inserts or replaces `key`.
    fn put(&self, key: Vec<u8>, value: Vec<u8>);

    /// Returns a copy of the value stored under `key`.
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Approximate payload bytes held.
    fn size(&self) -> usize;

    /// Number of distinct keys.
    fn entries_cnt(&self) -> usize;

    /// Snapshot of every entry in ascending key order.
    fn all(&self) -> Vec<Kv>;

    fn is_empty(&self) -> bool {
        self.entries_cnt() == 0
    }
}

/// Creates an empty memtable of the requested kind.
pub fn new_memtable(kind: MemTableKind) -> Arc<dyn MemTable> {
    match kind {
        MemTableKind::SkipList => Arc::new(SkipListMemTable::new()),
        MemTableKind::BTree => Arc::new(BTreeMemTable::new()),
    }
}

#[cfg(test)]
mod tests;
