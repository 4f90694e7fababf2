use super::*;
use std::thread;

fn both() -> Vec<Arc<dyn MemTable>> {
    vec![
        new_memtable(MemTableKind::SkipList),
        new_memtable(MemTableKind::BTree),
    ]
}

// -------------------- Basic put / get --------------------

#[test]
fn put_and_get_single_key() {
    for m in both() {
        m.put(b"k1".to_vec(), b"v1".to_vec());
        assert_eq!(m.entries_cnt(), 1);
        assert_eq!(m.get(b"k1"), Some(b"v1".to_vec()));
        assert_eq!(m.get(b"k2"), None);
    }
}

#[test]
fn put_overwrites_value() {
    for m in both() {
        m.put(b"k".to_vec(), b"first".to_vec());
        m.put(b"k".to_vec(), b"second".to_vec());
        assert_eq!(m.get(b"k"), Some(b"second".to_vec()));
        assert_eq!(m.entries_cnt(), 1);
    }
}

#[test]
fn empty_table() {
    for m in both() {
        assert!(m.is_empty());
        assert_eq!(m.size(), 0);
        assert!(m.all().is_empty());
    }
}

// -------------------- Size accounting --------------------

#[test]
fn size_counts_key_and_value_on_insert() {
    for m in both() {
        m.put(b"abc".to_vec(), b"12345".to_vec());
        assert_eq!(m.size(), 8);
        m.put(b"d".to_vec(), b"".to_vec());
        assert_eq!(m.size(), 9);
    }
}

#[test]
fn size_adjusts_on_overwrite() {
    for m in both() {
        m.put(b"key".to_vec(), b"long-value".to_vec());
        assert_eq!(m.size(), 3 + 10);
        m.put(b"key".to_vec(), b"v".to_vec());
        assert_eq!(m.size(), 3 + 1);
    }
}

// -------------------- Ordering --------------------

#[test]
fn all_is_sorted_unsigned_lexicographic() {
    for m in both() {
        m.put(vec![0xff], b"hi".to_vec());
        m.put(vec![0x01, 0x02], b"b".to_vec());
        m.put(vec![0x01], b"a".to_vec());
        m.put(vec![0x80], b"neg-if-signed".to_vec());
        let keys: Vec<Vec<u8>> = m.all().into_iter().map(|kv| kv.key).collect();
        assert_eq!(keys, vec![vec![0x01], vec![0x01, 0x02], vec![0x80], vec![0xff]]);
    }
}

#[test]
fn kv_orders_by_key_first() {
    let a = Kv::new(b"a".to_vec(), b"z".to_vec());
    let b = Kv::new(b"b".to_vec(), b"a".to_vec());
    assert!(a < b);
}

// -------------------- Concurrency --------------------

#[test]
fn concurrent_writers_and_readers() {
    for m in both() {
        let handles: Vec<_> = (0..4u32)
            .map(|t| {
                let m = Arc::clone(&m);
                thread::spawn(move || {
                    for i in 0..500u32 {
                        let key = format!("t{}-{:04}", t, i).into_bytes();
                        m.put(key.clone(), i.to_be_bytes().to_vec());
                        assert_eq!(m.get(&key), Some(i.to_be_bytes().to_vec()));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(m.entries_cnt(), 2000);
        let all = m.all();
        assert!(all.windows(2).all(|w| w[0].key < w[1].key));
    }
}
