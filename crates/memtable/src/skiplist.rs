use crossbeam_skiplist::SkipMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{Kv, MemTable};

/// Lock-free memtable over a concurrent skip list.
///
/// Readers never block. Size accounting reads the previous value before the
/// insert, so two racing puts on the same key can skew [`MemTable::size`];
/// the owning tree serializes writers, which keeps the figure exact.
pub struct SkipListMemTable {
    map: SkipMap<Vec<u8>, Vec<u8>>,
    size: AtomicUsize,
}

impl SkipListMemTable {
    pub fn new() -> Self {
        Self {
            map: SkipMap::new(),
            size: AtomicUsize::new(0),
        }
    }
}

impl Default for SkipListMemTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MemTable for SkipListMemTable {
    fn put(&self, key: Vec<u8>, value: Vec<u8>) {
        let added = value.len();
        match self.map.get(&key) {
            Some(old) => {
                let removed = old.value().len();
                self.size.fetch_add(added, Ordering::Relaxed);
                self.size.fetch_sub(removed, Ordering::Relaxed);
            }
            None => {
                self.size.fetch_add(key.len() + added, Ordering::Relaxed);
            }
        }
        self.map.insert(key, value);
    }

    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.map.get(key).map(|e| e.value().clone())
    }

    fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    fn entries_cnt(&self) -> usize {
        self.map.len()
    }

    fn all(&self) -> Vec<Kv> {
        self.map
            .iter()
            .map(|e| Kv::new(e.key().clone(), e.value().clone()))
            .collect()
    }
}

impl std::fmt::Debug for SkipListMemTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkipListMemTable")
            .field("entries", &self.entries_cnt())
            .field("size", &self.size())
            .finish()
    }
}
