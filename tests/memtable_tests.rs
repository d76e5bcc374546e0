// MemTable: multi-version lookups, tombstones, internal-key iteration and
// concurrent access from readers while the writer inserts.

use std::sync::Arc;
use std::thread;

use lsm_store::comparator::{BytewiseComparator, InternalKeyComparator};
use lsm_store::iterator::StorageIterator;
use lsm_store::memtable::MemTable;
use lsm_store::types::{LookupKey, LookupResult, ParsedInternalKey, ValueType};

fn memtable(limit: usize) -> Arc<MemTable> {
    Arc::new(MemTable::new(
        InternalKeyComparator::new(Arc::new(BytewiseComparator)),
        limit,
    ))
}

fn get(mem: &MemTable, key: &[u8], seq: u64) -> Option<LookupResult> {
    mem.get(&LookupKey::new(key, seq))
}

// =============================================================================
// Test 1: Newest version at or below the read sequence wins
// =============================================================================
#[test]
fn versions_are_read_by_sequence() {
    let mem = memtable(1 << 20);
    mem.add(1, ValueType::Put, b"color", b"red");
    mem.add(4, ValueType::Put, b"color", b"green");
    mem.add(9, ValueType::Put, b"color", b"blue");

    assert_eq!(get(&mem, b"color", 0), None);
    assert_eq!(get(&mem, b"color", 1), Some(LookupResult::Found(b"red".to_vec())));
    assert_eq!(get(&mem, b"color", 5), Some(LookupResult::Found(b"green".to_vec())));
    assert_eq!(get(&mem, b"color", 100), Some(LookupResult::Found(b"blue".to_vec())));
    assert_eq!(mem.len(), 3);
}

// =============================================================================
// Test 2: A tombstone shadows older puts but not newer ones
// =============================================================================
#[test]
fn tombstone_between_puts() {
    let mem = memtable(1 << 20);
    mem.add(1, ValueType::Put, b"k", b"v1");
    mem.add(2, ValueType::Delete, b"k", b"");
    mem.add(3, ValueType::Put, b"k", b"v3");

    assert_eq!(get(&mem, b"k", 1), Some(LookupResult::Found(b"v1".to_vec())));
    assert_eq!(get(&mem, b"k", 2), Some(LookupResult::Deleted));
    assert_eq!(get(&mem, b"k", 3), Some(LookupResult::Found(b"v3".to_vec())));
}

// =============================================================================
// Test 3: Lookups never match a neighbouring user key
// =============================================================================
#[test]
fn neighbour_keys_do_not_match() {
    let mem = memtable(1 << 20);
    mem.add(1, ValueType::Put, b"ab", b"x");
    mem.add(2, ValueType::Put, b"abc", b"y");

    assert_eq!(get(&mem, b"a", 10), None);
    assert_eq!(get(&mem, b"abb", 10), None);
    assert_eq!(get(&mem, b"ab", 10), Some(LookupResult::Found(b"x".to_vec())));
    assert_eq!(get(&mem, b"abd", 10), None);
}

// =============================================================================
// Test 4: Iterator yields user keys ascending, newest version first
// =============================================================================
#[test]
fn iterator_orders_internal_keys() {
    let mem = memtable(1 << 20);
    mem.add(5, ValueType::Put, b"b", b"b5");
    mem.add(1, ValueType::Put, b"a", b"a1");
    mem.add(7, ValueType::Delete, b"b", b"");
    mem.add(3, ValueType::Put, b"a", b"a3");

    let mut iter = mem.iter();
    iter.seek_to_first().unwrap();
    let mut seen = Vec::new();
    while iter.is_valid() {
        let parsed = ParsedInternalKey::parse(iter.key()).unwrap();
        seen.push((parsed.user_key.to_vec(), parsed.sequence, parsed.value_type));
        iter.next().unwrap();
    }

    assert_eq!(
        seen,
        vec![
            (b"a".to_vec(), 3, ValueType::Put),
            (b"a".to_vec(), 1, ValueType::Put),
            (b"b".to_vec(), 7, ValueType::Delete),
            (b"b".to_vec(), 5, ValueType::Put),
        ]
    );
}

// =============================================================================
// Test 5: is_full trips once usage reaches the limit
// =============================================================================
#[test]
fn full_at_size_limit() {
    let mem = memtable(1024);
    assert!(mem.is_empty());
    let mut seq = 0;
    while !mem.is_full() {
        seq += 1;
        mem.add(seq, ValueType::Put, format!("key{:04}", seq).as_bytes(), &[0u8; 64]);
    }
    assert!(mem.approximate_memory_usage() >= 1024);
    assert!(seq > 1);
}

// =============================================================================
// Test 6: Iterator created before inserts sees them after a seek
// =============================================================================
#[test]
fn iterator_observes_later_inserts() {
    let mem = memtable(1 << 20);
    mem.add(1, ValueType::Put, b"a", b"1");
    let mut iter = mem.iter();
    mem.add(2, ValueType::Put, b"b", b"2");

    iter.seek_to_last().unwrap();
    let parsed = ParsedInternalKey::parse(iter.key()).unwrap();
    assert_eq!(parsed.user_key, b"b");
    assert_eq!(iter.value(), b"2");
}

// =============================================================================
// Test 7: Readers on other threads while one thread inserts
// =============================================================================
#[test]
fn concurrent_readers_and_writer() {
    const N: u64 = 5000;
    let mem = memtable(64 << 20);

    let writer = {
        let mem = Arc::clone(&mem);
        thread::spawn(move || {
            for i in 1..=N {
                mem.add(i, ValueType::Put, format!("key{:06}", i).as_bytes(), &i.to_le_bytes());
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let mem = Arc::clone(&mem);
            thread::spawn(move || {
                for i in (1..=N).step_by(7) {
                    // Either not yet inserted or fully visible.
                    match mem.get(&LookupKey::new(format!("key{:06}", i).as_bytes(), N)) {
                        None => {}
                        Some(LookupResult::Found(v)) => assert_eq!(v, i.to_le_bytes()),
                        Some(LookupResult::Deleted) => panic!("no deletes were written"),
                    }
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for r in readers {
        r.join().unwrap();
    }

    assert_eq!(mem.len(), N as usize);
    let mut iter = mem.iter();
    iter.seek_to_first().unwrap();
    let mut count = 0;
    let mut last: Option<Vec<u8>> = None;
    while iter.is_valid() {
        let key = iter.key().to_vec();
        if let Some(prev) = &last {
            assert!(prev[..prev.len() - 8] < key[..key.len() - 8]);
        }
        last = Some(key);
        count += 1;
        iter.next().unwrap();
    }
    assert_eq!(count, N);
}
