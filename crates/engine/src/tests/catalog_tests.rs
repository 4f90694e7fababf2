use super::*;
use crate::catalog::{covering_newest_first, find_covering};
use tempfile::tempdir;

// -------------------- Level binary search --------------------

#[test]
fn find_covering_boundaries() -> Result<()> {
    let dir = tempdir()?;
    let tree = Tree::open(small_config(dir.path()))?;
    let first = install_node(&tree, 1, &numbered(10..20, "a"))?;
    let second = install_node(&tree, 1, &numbered(30..40, "b"))?;

    let nodes = tree.inner.levels.snapshot(1);
    let found = |i: usize| find_covering(&nodes, &key(i)).map(|n| n.seq());

    assert_eq!(found(0), None);
    assert_eq!(found(9), None);
    assert_eq!(found(10), Some(first.seq()));
    assert_eq!(found(19), Some(first.seq()));
    assert_eq!(found(20), None);
    assert_eq!(found(29), None);
    assert_eq!(found(30), Some(second.seq()));
    assert_eq!(found(39), Some(second.seq()));
    assert_eq!(found(40), None);
    assert!(find_covering(&[], b"x").is_none());

    // The tree agrees: gaps between nodes are absent keys.
    assert_eq!(tree.get(&key(19))?, Some(value(19, "a")));
    assert_eq!(tree.get(&key(25))?, None);
    assert_eq!(tree.get(&key(30))?, Some(value(30, "b")));
    Ok(())
}

#[test]
fn deeper_levels_stay_sorted_by_start_key() -> Result<()> {
    let dir = tempdir()?;
    let tree = Tree::open(small_config(dir.path()))?;
    install_node(&tree, 1, &numbered(50..60, "c"))?;
    install_node(&tree, 1, &numbered(0..10, "a"))?;
    install_node(&tree, 1, &numbered(20..30, "b"))?;

    let nodes = tree.inner.levels.snapshot(1);
    let starts: Vec<&[u8]> = nodes.iter().map(|n| n.start_key()).collect();
    assert_eq!(starts, vec![&key(0)[..], &key(20)[..], &key(50)[..]]);
    Ok(())
}

#[test]
fn level0_keeps_flush_order() -> Result<()> {
    let dir = tempdir()?;
    let tree = Tree::open(small_config(dir.path()))?;
    install_node(&tree, 0, &numbered(50..60, "x"))?;
    install_node(&tree, 0, &numbered(0..10, "y"))?;

    let seqs: Vec<u32> = tree.inner.levels.snapshot(0).iter().map(|n| n.seq()).collect();
    assert_eq!(seqs, vec![0, 1]);
    assert_eq!(tree.level_node_count(0), 2);
    assert!(tree.level_size(0) > 0);
    Ok(())
}

// -------------------- Overlapping deeper levels --------------------

#[test]
fn overlapping_level_is_scanned_newest_first() -> Result<()> {
    let dir = tempdir()?;
    let tree = Tree::open(small_config(dir.path()))?;
    let wide = install_node(&tree, 1, &numbered(0..100, "old"))?;
    assert!(!tree.inner.levels.is_overlapping(1));
    let narrow = install_node(&tree, 1, &numbered(10..20, "new"))?;
    assert!(tree.inner.levels.is_overlapping(1));

    // A binary search stops at the wide node and misses the newer value.
    let nodes = tree.inner.levels.snapshot(1);
    assert_eq!(find_covering(&nodes, &key(15)).map(|n| n.seq()), Some(wide.seq()));
    let seqs: Vec<u32> = covering_newest_first(&nodes, &key(15))
        .iter()
        .map(|n| n.seq())
        .collect();
    assert_eq!(seqs, vec![narrow.seq(), wide.seq()]);
    drop(nodes);

    assert_eq!(tree.get(&key(15))?, Some(value(15, "new")));
    assert_eq!(tree.get(&key(50))?, Some(value(50, "old")));
    assert_eq!(tree.get(&key(5))?, Some(value(5, "old")));
    assert_eq!(tree.get(&key(100))?, None);
    drop((wide, narrow));

    // Compaction takes the whole level and leaves nothing overlapping.
    tree.inner.compact_level(1)?;
    assert_eq!(tree.level_node_count(1), 0);
    assert!(!tree.inner.levels.is_overlapping(1));
    assert!(!tree.inner.levels.is_overlapping(2));
    for i in 0..100 {
        let tag = if (10..20).contains(&i) { "new" } else { "old" };
        assert_eq!(tree.get(&key(i))?, Some(value(i, tag)));
    }
    Ok(())
}

#[test]
fn level0_never_counts_as_overlapping() -> Result<()> {
    let dir = tempdir()?;
    let tree = Tree::open(small_config(dir.path()))?;
    install_node(&tree, 0, &numbered(0..50, "a"))?;
    install_node(&tree, 0, &numbered(10..20, "b"))?;
    assert!(!tree.inner.levels.is_overlapping(0));
    Ok(())
}

// -------------------- Snapshots and swaps --------------------

#[test]
fn snapshot_survives_swap() -> Result<()> {
    let dir = tempdir()?;
    let tree = Tree::open(small_config(dir.path()))?;
    let old = install_node(&tree, 0, &numbered(0..10, "old"))?;
    let path = old.path().to_path_buf();
    let snapshot = tree.inner.levels.snapshot(0);
    drop(old);

    let picked = snapshot.to_vec();
    tree.inner.levels.swap_compacted(0, &picked, Vec::new());
    drop(picked);
    assert_eq!(tree.level_node_count(0), 0);

    // The retired node stays readable through the old snapshot.
    assert!(path.exists());
    assert_eq!(snapshot[0].get(&key(3))?, Some(value(3, "old")));

    drop(snapshot);
    assert!(!path.exists());
    Ok(())
}

#[test]
fn observe_seq_moves_allocation_forward() {
    let levels = crate::catalog::Levels::new(3);
    assert_eq!(levels.next_seq(1), 0);
    levels.observe_seq(1, 41);
    assert_eq!(levels.next_seq(1), 42);
    levels.observe_seq(1, 5);
    assert_eq!(levels.next_seq(1), 43);
    assert_eq!(levels.next_seq(2), 0);
}
