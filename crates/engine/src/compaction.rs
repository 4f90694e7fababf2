/// Compaction: merges an over-budget level into the next one.
///
/// Level `n` is compacted once its total size exceeds
/// `level_sst_size(n + 1)`. The merge streams block by block through
/// [`MergeIterator`], so memory use is bounded by one block per input node
/// rather than by the data volume. Outputs are published and the inputs
/// retired in a single swap, and the size check then cascades to `n + 1`.
use anyhow::Result;
use crossbeam_channel::TrySendError;
use sstable::{MergeIterator, Node, SstWriter};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::TreeInner;

impl TreeInner {
    /// Requests a compaction of `level` if it is over budget or holds
    /// overlapping nodes.
    ///
    /// The last level is never compacted. A request that finds the queue
    /// full is dropped; the next size check re-issues it.
    pub(crate) fn try_compact_sst(&self, level: usize) {
        if level + 1 >= self.levels.count() {
            return;
        }
        let size = self.levels.level_size(level);
        let budget = self.config.level_sst_size(level + 1);
        if size <= budget && !self.levels.is_overlapping(level) {
            return;
        }
        match self.compact_tx.try_send(level) {
            Ok(()) => debug!(level, size, budget, "compaction requested"),
            Err(TrySendError::Full(_)) => {
                warn!(level, size, budget, "compaction queue full, request dropped");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Chooses the nodes of `level` and `level + 1` that take part in the
    /// next compaction of `level`.
    ///
    /// Level 0 overlaps freely, so its whole key range is compacted at once.
    /// A deeper level flagged as overlapping is treated the same way.
    /// A deeper level compacts the range from its first node to node
    /// `len / (level + 1)`, so deeper levels move a smaller share per round.
    /// Every node of either level that intersects the range is picked.
    pub(crate) fn pick_compact_nodes(&self, level: usize) -> Vec<Arc<Node>> {
        let upper = self.levels.snapshot(level);
        let range = if level == 0 || self.levels.is_overlapping(level) {
            let start = upper.iter().map(|n| n.start_key()).min();
            let end = upper.iter().map(|n| n.end_key()).max();
            start.zip(end)
        } else {
            upper
                .first()
                .zip(upper.get(upper.len() / (level + 1)))
                .map(|(first, last)| (first.start_key(), last.end_key()))
        };
        let (start, end) = match range {
            Some(range) => range,
            None => return Vec::new(),
        };

        let lower = self.levels.snapshot(level + 1);
        lower
            .iter()
            .chain(upper.iter())
            .filter(|node| node.overlaps(start, end))
            .cloned()
            .collect()
    }

    /// Merges the picked nodes of `level` into new tables at `level + 1`.
    ///
    /// # Errors
    ///
    /// Returns an error if a block cannot be read or an output cannot be
    /// written. Nothing is published in that case and any finished outputs
    /// are deleted.
    pub(crate) fn compact_level(&self, level: usize) -> Result<()> {
        if level + 1 >= self.levels.count() {
            return Ok(());
        }
        let picked = self.pick_compact_nodes(level);
        if picked.is_empty() {
            return Ok(());
        }

        let target = level + 1;
        let mut outputs = Vec::new();
        if let Err(e) = self.merge_nodes(target, &picked, &mut outputs) {
            for node in &outputs {
                node.destroy();
            }
            return Err(e);
        }

        let output_count = outputs.len();
        let output_bytes: u64 = outputs.iter().map(|n| n.size()).sum();
        self.levels.swap_compacted(level, &picked, outputs);
        info!(
            level,
            target,
            picked = picked.len(),
            outputs = output_count,
            bytes = output_bytes,
            "compaction finished"
        );

        self.try_compact_sst(target);
        Ok(())
    }

    /// Streams the merge of `picked` into level-`target` tables, rolling
    /// over to a new table once the current one exceeds the level's budget.
    fn merge_nodes(
        &self,
        target: usize,
        picked: &[Arc<Node>],
        outputs: &mut Vec<Arc<Node>>,
    ) -> Result<()> {
        let limit = self.config.level_sst_size(target);
        let mut merge = MergeIterator::new(picked.to_vec())?;
        let mut current: Option<(u32, SstWriter)> = None;

        while let Some(kv) = merge.next_entry()? {
            if current.as_ref().is_some_and(|(_, w)| w.size() > limit) {
                if let Some((seq, writer)) = current.take() {
                    outputs.push(self.finish_output(target, seq, writer)?);
                }
            }
            if current.is_none() {
                let seq = self.levels.next_seq(target);
                let writer = SstWriter::create(
                    self.config.sst_path(target, seq),
                    self.filter,
                    Arc::clone(&self.pool),
                )?;
                current = Some((seq, writer));
            }
            if let Some((_, writer)) = current.as_mut() {
                writer.append(&kv.key, &kv.value)?;
            }
        }

        if let Some((seq, writer)) = current.take() {
            outputs.push(self.finish_output(target, seq, writer)?);
        }
        Ok(())
    }

    fn finish_output(&self, level: usize, seq: u32, writer: SstWriter) -> Result<Arc<Node>> {
        let finished = writer.finish()?;
        let path = finished.path.clone();
        match Node::from_finished(level, seq, finished, self.filter) {
            Ok(node) => {
                debug!(level, seq, size = node.size(), "compaction output written");
                Ok(Arc::new(node))
            }
            Err(e) => {
                let _ = std::fs::remove_file(&path);
                Err(e)
            }
        }
    }
}
