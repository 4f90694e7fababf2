/// Read path: `get()`.
///
/// Searches from the freshest tier to the oldest and stops at the first
/// match. Level lists are read from snapshots, so a concurrent compaction
/// never invalidates a lookup in progress.
use anyhow::Result;

use crate::catalog::{covering_newest_first, find_covering};
use crate::Tree;

impl Tree {
    /// Returns the latest value written for `key`.
    ///
    /// # Lookup Order
    ///
    /// 1. Active memtable.
    /// 2. Read-only memtables, newest first.
    /// 3. Level 0 nodes whose range contains `key`, newest first.
    /// 4. Each deeper level: the one node whose range contains `key`. A
    ///    level flagged as overlapping is scanned instead, newest node first.
    ///
    /// # Errors
    ///
    /// Returns an error if the tree is closed or an SSTable block cannot be
    /// read.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;

        {
            let hot = self.inner.hot.read();
            if let Some(value) = hot.memtable.get(key) {
                return Ok(Some(value));
            }
            for item in hot.read_only.iter().rev() {
                if let Some(value) = item.memtable().get(key) {
                    return Ok(Some(value));
                }
            }
        }

        let level0 = self.inner.levels.snapshot(0);
        for node in level0.iter().rev().filter(|n| n.covers(key)) {
            if let Some(value) = node.get(key)? {
                return Ok(Some(value));
            }
        }

        for level in 1..self.inner.levels.count() {
            let nodes = self.inner.levels.snapshot(level);
            if self.inner.levels.is_overlapping(level) {
                for node in covering_newest_first(&nodes, key) {
                    if let Some(value) = node.get(key)? {
                        return Ok(Some(value));
                    }
                }
            } else if let Some(node) = find_covering(&nodes, key) {
                if let Some(value) = node.get(key)? {
                    return Ok(Some(value));
                }
            }
        }

        Ok(None)
    }
}
