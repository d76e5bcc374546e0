// Snapshots and iterators: consistent read views, ordering in both
// directions, seeks, and hiding of deleted and shadowed entries.

use std::path::Path;

use lsm_store::{Database, OpenOptions, ReadOptions, WriteBatch, WriteOptions};

fn open(path: &Path) -> Database {
    let options = OpenOptions {
        create_if_missing: true,
        ..OpenOptions::default()
    };
    Database::open(path, options).unwrap()
}

fn put(db: &Database, key: &str, value: &str) {
    db.put(key.as_bytes(), value.as_bytes(), &WriteOptions::default())
        .unwrap();
}

fn delete(db: &Database, key: &str) {
    db.delete(key.as_bytes(), &WriteOptions::default()).unwrap();
}

fn get_at(db: &Database, key: &str, options: &ReadOptions<'_>) -> Option<String> {
    db.get(key.as_bytes(), options)
        .unwrap()
        .map(|v| String::from_utf8(v).unwrap())
}

fn scan(db: &Database, options: &ReadOptions<'_>) -> Vec<(String, String)> {
    db.iter(options)
        .unwrap()
        .into_iter()
        .map(|entry| {
            let (k, v) = entry.unwrap();
            (String::from_utf8(k).unwrap(), String::from_utf8(v).unwrap())
        })
        .collect()
}

fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// =============================================================================
// Test 1: Put a, Put b, snapshot, Put a, Delete b
// =============================================================================
#[test]
fn snapshot_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    let now = ReadOptions::default();

    put(&db, "a", "1");
    put(&db, "b", "2");
    let snapshot = db.snapshot();
    put(&db, "a", "3");
    delete(&db, "b");

    let then = ReadOptions::at_snapshot(&snapshot);
    assert_eq!(get_at(&db, "a", &now).as_deref(), Some("3"));
    assert_eq!(get_at(&db, "b", &now), None);
    assert_eq!(get_at(&db, "a", &then).as_deref(), Some("1"));
    assert_eq!(get_at(&db, "b", &then).as_deref(), Some("2"));

    assert_eq!(scan(&db, &now), pairs(&[("a", "3")]));
    assert_eq!(scan(&db, &then), pairs(&[("a", "1"), ("b", "2")]));
    db.release_snapshot(snapshot);
}

// =============================================================================
// Test 2: Snapshot views survive flushes and full compaction
// =============================================================================
#[test]
fn snapshot_survives_compaction() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());

    for i in 0..200 {
        put(&db, &format!("key{i:03}"), &format!("old{i}"));
    }
    db.flush().unwrap();
    let snapshot = db.snapshot();

    for i in 0..200 {
        if i % 2 == 0 {
            delete(&db, &format!("key{i:03}"));
        } else {
            put(&db, &format!("key{i:03}"), &format!("new{i}"));
        }
    }
    db.compact_range(None, None).unwrap();
    assert_eq!(db.property("leveldb.num-files-at-level0").as_deref(), Some("0"));

    let then = ReadOptions::at_snapshot(&snapshot);
    let now = ReadOptions::default();
    for i in 0..200 {
        let key = format!("key{i:03}");
        assert_eq!(get_at(&db, &key, &then), Some(format!("old{i}")));
        let expected = (i % 2 == 1).then(|| format!("new{i}"));
        assert_eq!(get_at(&db, &key, &now), expected);
    }
    assert_eq!(scan(&db, &then).len(), 200);
    assert_eq!(scan(&db, &now).len(), 100);

    // With the snapshot gone, a second compaction may drop the old data.
    drop(snapshot);
    db.compact_range(None, None).unwrap();
    assert_eq!(scan(&db, &now).len(), 100);
    assert_eq!(get_at(&db, "key000", &now), None);
}

// =============================================================================
// Test 3: Forward and backward scans agree and are strictly ordered
// =============================================================================
#[test]
fn forward_and_backward() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());

    // Spread the data over a table, the memtable and tombstones.
    for i in (0..100).step_by(2) {
        put(&db, &format!("k{i:03}"), "table");
    }
    db.flush().unwrap();
    for i in (1..100).step_by(2) {
        put(&db, &format!("k{i:03}"), "mem");
    }
    for i in (0..100).step_by(10) {
        delete(&db, &format!("k{i:03}"));
    }

    let mut iter = db.iter(&ReadOptions::default()).unwrap();
    let mut forward = Vec::new();
    iter.seek_to_first().unwrap();
    while iter.valid() {
        forward.push(iter.key().to_vec());
        iter.next().unwrap();
    }

    let mut backward = Vec::new();
    iter.seek_to_last().unwrap();
    while iter.valid() {
        backward.push(iter.key().to_vec());
        iter.prev().unwrap();
    }
    backward.reverse();

    assert_eq!(forward.len(), 90);
    assert_eq!(forward, backward);
    assert!(forward.windows(2).all(|w| w[0] < w[1]));
    assert!(!forward.contains(&b"k050".to_vec()));
}

// =============================================================================
// Test 4: seek lands on the first live key at or after the target
// =============================================================================
#[test]
fn seek_semantics() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    for k in ["apple", "banana", "cherry", "date"] {
        put(&db, k, k);
    }
    delete(&db, "banana");

    let mut iter = db.iter(&ReadOptions::default()).unwrap();
    iter.seek(b"b").unwrap();
    assert_eq!(iter.key(), b"cherry");
    assert_eq!(iter.value(), b"cherry");

    iter.seek(b"apple").unwrap();
    assert_eq!(iter.key(), b"apple");

    iter.seek(b"zzz").unwrap();
    assert!(!iter.valid());
    assert_eq!(iter.key(), b"");

    // Re-seeking restarts an exhausted iterator.
    iter.seek(b"").unwrap();
    assert_eq!(iter.key(), b"apple");
}

// =============================================================================
// Test 5: Switching direction mid-scan
// =============================================================================
#[test]
fn direction_changes() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    for k in ["a", "b", "c", "d", "e"] {
        put(&db, k, k);
    }
    // Shadowed versions of "c" must not show up twice.
    put(&db, "c", "c2");
    put(&db, "c", "c3");

    let mut iter = db.iter(&ReadOptions::default()).unwrap();
    iter.seek(b"c").unwrap();
    assert_eq!(iter.value(), b"c3");
    iter.next().unwrap();
    assert_eq!(iter.key(), b"d");
    iter.prev().unwrap();
    assert_eq!(iter.key(), b"c");
    assert_eq!(iter.value(), b"c3");
    iter.prev().unwrap();
    assert_eq!(iter.key(), b"b");
    iter.next().unwrap();
    assert_eq!(iter.key(), b"c");
    iter.next().unwrap();
    iter.next().unwrap();
    assert_eq!(iter.key(), b"e");
    iter.next().unwrap();
    assert!(!iter.valid());
}

// =============================================================================
// Test 6: An iterator is a point-in-time view
// =============================================================================
#[test]
fn iterator_ignores_later_writes() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    put(&db, "a", "1");
    put(&db, "c", "3");

    let iter = db.iter(&ReadOptions::default()).unwrap();
    put(&db, "b", "2");
    delete(&db, "c");
    db.flush().unwrap();

    let seen: Vec<(Vec<u8>, Vec<u8>)> = iter.into_iter().map(|e| e.unwrap()).collect();
    assert_eq!(
        seen,
        vec![(b"a".to_vec(), b"1".to_vec()), (b"c".to_vec(), b"3".to_vec())]
    );
}

// =============================================================================
// Test 7: Empty database and fully deleted database
// =============================================================================
#[test]
fn empty_views() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());

    let mut iter = db.iter(&ReadOptions::default()).unwrap();
    iter.seek_to_first().unwrap();
    assert!(!iter.valid());
    iter.seek_to_last().unwrap();
    assert!(!iter.valid());

    put(&db, "x", "1");
    put(&db, "y", "2");
    db.flush().unwrap();
    delete(&db, "x");
    delete(&db, "y");
    assert!(scan(&db, &ReadOptions::default()).is_empty());

    let mut iter = db.iter(&ReadOptions::default()).unwrap();
    iter.seek_to_last().unwrap();
    assert!(!iter.valid());
}

// =============================================================================
// Test 8: Snapshots see batches entirely or not at all
// =============================================================================
#[test]
fn batches_are_atomic_for_readers() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());

    let before = db.snapshot();
    let mut batch = WriteBatch::new();
    for i in 0..50 {
        batch.put(format!("batch{i:02}").as_bytes(), b"x");
    }
    db.write(batch, &WriteOptions::default()).unwrap();
    let after = db.snapshot();
    assert!(after.sequence() >= before.sequence() + 50);

    assert!(scan(&db, &ReadOptions::at_snapshot(&before)).is_empty());
    assert_eq!(scan(&db, &ReadOptions::at_snapshot(&after)).len(), 50);
}

// =============================================================================
// Test 9: Reads verifying checksums return the same data
// =============================================================================
#[test]
fn verified_reads() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    for i in 0..300 {
        put(&db, &format!("key{i:03}"), &format!("value{i}"));
    }
    db.flush().unwrap();

    let options = ReadOptions {
        verify_checksums: true,
        fill_cache: false,
        ..ReadOptions::default()
    };
    assert_eq!(get_at(&db, "key123", &options).as_deref(), Some("value123"));
    assert_eq!(scan(&db, &options).len(), 300);
}
