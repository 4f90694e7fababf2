use super::*;
use tempfile::tempdir;

// -------------------- Basic put/get --------------------

#[test]
fn put_then_get() -> Result<()> {
    let dir = tempdir()?;
    let tree = Tree::open(small_config(dir.path()))?;
    tree.put(b"apple", b"red")?;
    tree.put(b"banana", b"yellow")?;
    assert_eq!(tree.get(b"apple")?, Some(b"red".to_vec()));
    assert_eq!(tree.get(b"banana")?, Some(b"yellow".to_vec()));
    assert_eq!(tree.get(b"cherry")?, None);
    tree.close()?;
    Ok(())
}

#[test]
fn overwrite_returns_latest() -> Result<()> {
    let dir = tempdir()?;
    let tree = Tree::open(small_config(dir.path()))?;
    tree.put(b"k", b"v1")?;
    tree.put(b"k", b"v2")?;
    assert_eq!(tree.get(b"k")?, Some(b"v2".to_vec()));
    Ok(())
}

#[test]
fn empty_value_is_allowed() -> Result<()> {
    let dir = tempdir()?;
    let tree = Tree::open(small_config(dir.path()))?;
    tree.put(b"k", b"")?;
    assert_eq!(tree.get(b"k")?, Some(Vec::new()));
    Ok(())
}

#[test]
fn btree_memtable_kind() -> Result<()> {
    let dir = tempdir()?;
    let tree = Tree::open(small_config(dir.path()).with_memtable_kind(MemTableKind::BTree))?;
    for (k, v) in numbered(0..300, "b") {
        tree.put(&k, &v)?;
    }
    assert!(wait_for_flushes(&tree));
    for (k, v) in numbered(0..300, "b") {
        assert_eq!(tree.get(&k)?, Some(v));
    }
    Ok(())
}

// -------------------- Validation --------------------

#[test]
fn empty_key_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let tree = Tree::open(small_config(dir.path()))?;
    assert!(tree.put(b"", b"v").is_err());
    Ok(())
}

#[test]
fn record_larger_than_a_segment_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let tree = Tree::open(small_config(dir.path()))?;
    let segment = tree.config().wal_file_size();

    let err = tree.put(b"k", &vec![0u8; segment]).unwrap_err();
    assert!(err.to_string().contains("record too large"));

    // header + key + value + end marker exactly fills an empty segment
    let largest = vec![7u8; segment - 8 - 1 - 4];
    tree.put(b"k", &largest)?;
    assert_eq!(tree.get(b"k")?, Some(largest));
    Ok(())
}

#[test]
fn invalid_config_fails_open() -> Result<()> {
    let dir = tempdir()?;
    assert!(Tree::open(small_config(dir.path()).with_max_level(1)).is_err());
    assert!(Tree::open(small_config(dir.path()).with_filter(0, 400)).is_err());
    Ok(())
}

// -------------------- WAL rotation --------------------

#[test]
fn full_segment_rotates_wal_and_memtable() -> Result<()> {
    let dir = tempdir()?;
    let config = small_config(dir.path());
    let wal_dir = config.wal_dir();
    let tree = Tree::open(config)?;
    assert_eq!(tree.memtable_index(), 0);

    for (k, v) in numbered(0..300, "v") {
        tree.put(&k, &v)?;
    }
    assert!(tree.memtable_index() >= 2);

    // Every rotated memtable becomes a level-0 table and loses its segment.
    assert!(wait_for_flushes(&tree));
    assert!(tree.level_node_count(0) >= 2);
    assert_eq!(count_files(&wal_dir, "wal"), 1);
    assert!(wal_dir.join(format!("{}.wal", tree.memtable_index())).exists());

    for (k, v) in numbered(0..300, "v") {
        assert_eq!(tree.get(&k)?, Some(v));
    }
    Ok(())
}

#[test]
fn rotation_under_a_tiny_flush_queue() -> Result<()> {
    let dir = tempdir()?;
    let tree = Tree::open(small_config(dir.path()).with_queue_capacities(1, 1))?;
    for (k, v) in numbered(0..1500, "q") {
        tree.put(&k, &v)?;
    }
    assert!(wait_for_flushes(&tree));
    for (k, v) in numbered(0..1500, "q") {
        assert_eq!(tree.get(&k)?, Some(v));
    }
    Ok(())
}

// -------------------- Concurrency --------------------

#[test]
fn concurrent_writers() -> Result<()> {
    let dir = tempdir()?;
    let tree = Arc::new(Tree::open(small_config(dir.path()))?);

    let handles: Vec<_> = (0..4usize)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for i in 0..250 {
                    let n = t * 1000 + i;
                    tree.put(&key(n), &value(n, "c")).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    for t in 0..4usize {
        for i in 0..250 {
            let n = t * 1000 + i;
            assert_eq!(tree.get(&key(n))?, Some(value(n, "c")));
        }
    }
    Ok(())
}

// -------------------- Close --------------------

#[test]
fn close_is_idempotent_and_blocks_further_use() -> Result<()> {
    let dir = tempdir()?;
    let tree = Tree::open(small_config(dir.path()))?;
    tree.put(b"k", b"v")?;
    tree.close()?;
    tree.close()?;
    assert!(tree.is_closed());
    assert!(tree.put(b"k", b"v2").is_err());
    assert!(tree.get(b"k").is_err());
    Ok(())
}

#[test]
fn debug_impl_works() -> Result<()> {
    let dir = tempdir()?;
    let tree = Tree::open(small_config(dir.path()))?;
    tree.put(b"k", b"v")?;
    let debug = format!("{:?}", tree);
    assert!(debug.contains("Tree"));
    assert!(debug.contains("memtable_entries"));
    Ok(())
}
