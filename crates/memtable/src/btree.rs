use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::{Kv, MemTable};

#[derive(Debug, Default)]
struct Inner {
    map: BTreeMap<Vec<u8>, Vec<u8>>,
    approx_size: usize,
}

/// Memtable over a `BTreeMap` guarded by a reader-writer lock.
///
/// Overwrites and size accounting happen under one write lock, so the size
/// figure is exact even with racing writers.
#[derive(Debug, Default)]
pub struct BTreeMemTable {
    inner: RwLock<Inner>,
}

impl BTreeMemTable {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemTable for BTreeMemTable {
    fn put(&self, key: Vec<u8>, value: Vec<u8>) {
        let mut inner = self.inner.write();
        let key_len = key.len();
        let added = value.len();
        match inner.map.insert(key, value) {
            Some(old) => {
                inner.approx_size = inner.approx_size.saturating_sub(old.len()) + added;
            }
            None => inner.approx_size += key_len + added,
        }
    }

    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.read().map.get(key).cloned()
    }

    fn size(&self) -> usize {
        self.inner.read().approx_size
    }

    fn entries_cnt(&self) -> usize {
        self.inner.read().map.len()
    }

    fn all(&self) -> Vec<Kv> {
        self.inner
            .read()
            .map
            .iter()
            .map(|(k, v)| Kv::new(k.clone(), v.clone()))
            .collect()
    }
}
