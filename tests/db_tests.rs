// Database facade: open/close lifecycle, point reads and writes, batches,
// recovery from the write-ahead log, properties and destroy.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lsm_store::filename::{parse_file_name, FileType};
use lsm_store::{
    Comparator, Database, OpenOptions, ReadOptions, WriteBatch, WriteOptions,
};

fn create_options() -> OpenOptions {
    OpenOptions {
        create_if_missing: true,
        ..OpenOptions::default()
    }
}

fn open(path: &Path) -> Database {
    Database::open(path, create_options()).unwrap()
}

fn get(db: &Database, key: &[u8]) -> Option<Vec<u8>> {
    db.get(key, &ReadOptions::default()).unwrap()
}

fn put(db: &Database, key: &[u8], value: &[u8]) {
    db.put(key, value, &WriteOptions::default()).unwrap();
}

fn files_of_type(dir: &Path, wanted: FileType) -> Vec<PathBuf> {
    let mut found: Vec<(u64, PathBuf)> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_str()?.to_string();
            match parse_file_name(&name) {
                Some((t, n)) if t == wanted => Some((n, e.path())),
                _ => None,
            }
        })
        .collect();
    found.sort();
    found.into_iter().map(|(_, p)| p).collect()
}

/// Orders keys from largest to smallest.
struct Reverse;

impl Comparator for Reverse {
    fn name(&self) -> &str {
        "test.Reverse"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        b.cmp(a)
    }
}

// =============================================================================
// Test 1: Read your own writes, overwrite and delete
// =============================================================================
#[test]
fn put_get_delete() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());

    assert_eq!(get(&db, b"missing"), None);
    put(&db, b"name", b"alice");
    assert_eq!(get(&db, b"name"), Some(b"alice".to_vec()));

    put(&db, b"name", b"bob");
    assert_eq!(get(&db, b"name"), Some(b"bob".to_vec()));

    db.delete(b"name", &WriteOptions::default()).unwrap();
    assert_eq!(get(&db, b"name"), None);

    // Deleting an absent key is not an error.
    db.delete(b"never-written", &WriteOptions { sync: true }).unwrap();
}

// =============================================================================
// Test 2: Empty values and binary keys are stored as given
// =============================================================================
#[test]
fn empty_value_and_binary_key() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());

    put(&db, b"empty", b"");
    put(&db, &[0u8, 255, 0, 1], &[9u8; 3]);
    assert_eq!(get(&db, b"empty"), Some(Vec::new()));
    assert_eq!(get(&db, &[0u8, 255, 0, 1]), Some(vec![9u8; 3]));
}

// =============================================================================
// Test 3: A batch applies in order and as a unit
// =============================================================================
#[test]
fn batch_applies_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    put(&db, b"doomed", b"x");

    let mut batch = WriteBatch::new();
    batch.put(b"a", b"1");
    batch.put(b"b", b"2");
    batch.delete(b"doomed");
    batch.put(b"a", b"3");
    batch.put(b"gone", b"soon");
    batch.delete(b"gone");
    db.write(batch, &WriteOptions { sync: true }).unwrap();

    assert_eq!(get(&db, b"a"), Some(b"3".to_vec()));
    assert_eq!(get(&db, b"b"), Some(b"2".to_vec()));
    assert_eq!(get(&db, b"doomed"), None);
    assert_eq!(get(&db, b"gone"), None);

    // An empty batch is a no-op.
    db.write(WriteBatch::new(), &WriteOptions::default()).unwrap();
    assert_eq!(get(&db, b"a"), Some(b"3".to_vec()));
}

// =============================================================================
// Test 4: Data survives close and reopen, from the log alone
// =============================================================================
#[test]
fn reopen_recovers_from_log() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = open(dir.path());
        for i in 0..500u32 {
            put(&db, format!("key{i:04}").as_bytes(), &i.to_le_bytes());
        }
        db.delete(b"key0007", &WriteOptions::default()).unwrap();
        db.close().unwrap();
    }

    let db = open(dir.path());
    assert_eq!(get(&db, b"key0007"), None);
    for i in (0..500u32).filter(|&i| i != 7) {
        assert_eq!(
            get(&db, format!("key{i:04}").as_bytes()),
            Some(i.to_le_bytes().to_vec())
        );
    }

    // Recovered data was written to a table; writes keep working.
    assert!(db.property("leveldb.num-files-at-level0").unwrap() != "0");
    put(&db, b"after", b"reopen");
    drop(db);

    let db = open(dir.path());
    assert_eq!(get(&db, b"after"), Some(b"reopen".to_vec()));
    assert_eq!(get(&db, b"key0499"), Some(499u32.to_le_bytes().to_vec()));
}

// =============================================================================
// Test 5: Reopen after flushing to tables keeps every version straight
// =============================================================================
#[test]
fn reopen_after_flush() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = open(dir.path());
        put(&db, b"k", b"old");
        db.flush().unwrap();
        put(&db, b"k", b"new");
        put(&db, b"other", b"v");
        db.flush().unwrap();
        db.delete(b"other", &WriteOptions::default()).unwrap();
    }
    let db = open(dir.path());
    assert_eq!(get(&db, b"k"), Some(b"new".to_vec()));
    assert_eq!(get(&db, b"other"), None);
}

// =============================================================================
// Test 6: Missing database without create_if_missing
// =============================================================================
#[test]
fn missing_database_is_invalid_argument() {
    let dir = tempfile::tempdir().unwrap();

    let err = Database::open(dir.path().join("nope"), OpenOptions::default()).unwrap_err();
    assert!(err.is_invalid_argument(), "{err}");

    // An existing but empty directory is not a database either.
    let err = Database::open(dir.path(), OpenOptions::default()).unwrap_err();
    assert!(err.is_invalid_argument(), "{err}");
}

// =============================================================================
// Test 7: error_if_exists refuses an existing database
// =============================================================================
#[test]
fn error_if_exists() {
    let dir = tempfile::tempdir().unwrap();
    drop(open(dir.path()));

    let options = OpenOptions {
        create_if_missing: true,
        error_if_exists: true,
        ..OpenOptions::default()
    };
    let err = Database::open(dir.path(), options).unwrap_err();
    assert!(err.is_invalid_argument(), "{err}");
}

// =============================================================================
// Test 8: The LOCK file keeps a second handle out until the first closes
// =============================================================================
#[test]
fn directory_lock_is_exclusive() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());

    let err = Database::open(dir.path(), create_options()).unwrap_err();
    assert!(err.is_io(), "{err}");

    db.close().unwrap();
    let db = open(dir.path());
    put(&db, b"k", b"v");
}

// =============================================================================
// Test 9: Reopening with a different comparator is refused
// =============================================================================
#[test]
fn comparator_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    drop(open(dir.path()));

    let options = OpenOptions {
        comparator: Arc::new(Reverse),
        ..OpenOptions::default()
    };
    let err = Database::open(dir.path(), options).unwrap_err();
    assert!(err.is_invalid_argument(), "{err}");
}

// =============================================================================
// Test 10: A custom comparator orders iteration
// =============================================================================
#[test]
fn custom_comparator_order() {
    let dir = tempfile::tempdir().unwrap();
    let options = OpenOptions {
        create_if_missing: true,
        comparator: Arc::new(Reverse),
        ..OpenOptions::default()
    };
    let db = Database::open(dir.path(), options.clone()).unwrap();
    for k in ["b", "a", "c"] {
        put(&db, k.as_bytes(), b"");
    }
    db.flush().unwrap();
    put(&db, b"d", b"");

    let keys: Vec<Vec<u8>> = db
        .iter(&ReadOptions::default())
        .unwrap()
        .into_iter()
        .map(|e| e.unwrap().0)
        .collect();
    assert_eq!(keys, vec![b"d".to_vec(), b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
    drop(db);

    let db = Database::open(dir.path(), options).unwrap();
    assert_eq!(get(&db, b"c"), Some(Vec::new()));
}

// =============================================================================
// Test 11: Invalid option values are rejected before touching the disk
// =============================================================================
#[test]
fn invalid_options() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    let options = OpenOptions {
        write_buffer_size: 0,
        ..create_options()
    };
    assert!(Database::open(&path, options).unwrap_err().is_invalid_argument());

    let options = OpenOptions {
        filter_false_positive_rate: Some(1.5),
        ..create_options()
    };
    assert!(Database::open(&path, options).unwrap_err().is_invalid_argument());
    assert!(!path.exists());
}

// =============================================================================
// Test 12: A torn final log record is dropped; everything before it survives
// =============================================================================
#[test]
fn truncated_log_recovers_prefix() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = open(dir.path());
        for i in 0..50u32 {
            db.put(format!("k{i:02}").as_bytes(), b"value", &WriteOptions { sync: true })
                .unwrap();
        }
    }

    let log = files_of_type(dir.path(), FileType::Log).pop().unwrap();
    let len = fs::metadata(&log).unwrap().len();
    let file = fs::OpenOptions::new().write(true).open(&log).unwrap();
    file.set_len(len - 3).unwrap();
    drop(file);

    let db = open(dir.path());
    for i in 0..49u32 {
        assert_eq!(get(&db, format!("k{i:02}").as_bytes()), Some(b"value".to_vec()));
    }
    assert_eq!(get(&db, b"k49"), None);
}

// =============================================================================
// Test 13: A damaged log record fails open under paranoid checks, and is
// skipped along with the rest of the log otherwise
// =============================================================================
#[test]
fn corrupted_log_record() {
    let dir = tempfile::tempdir().unwrap();
    let mut record_ends = Vec::new();
    {
        let db = open(dir.path());
        for i in 0..10u32 {
            db.put(format!("k{i}").as_bytes(), b"v", &WriteOptions { sync: true })
                .unwrap();
            let log = files_of_type(dir.path(), FileType::Log).pop().unwrap();
            record_ends.push(fs::metadata(&log).unwrap().len());
        }
    }

    let log = files_of_type(dir.path(), FileType::Log).pop().unwrap();
    let mut bytes = fs::read(&log).unwrap();
    // Flip the last byte of the sixth record.
    bytes[record_ends[5] as usize - 1] ^= 0xff;
    fs::write(&log, bytes).unwrap();

    let paranoid = OpenOptions {
        paranoid_checks: true,
        ..create_options()
    };
    let err = Database::open(dir.path(), paranoid).unwrap_err();
    assert!(err.is_corruption(), "{err}");

    let db = open(dir.path());
    for i in 0..5u32 {
        assert_eq!(get(&db, format!("k{i}").as_bytes()), Some(b"v".to_vec()));
    }
    for i in 5..10u32 {
        assert_eq!(get(&db, format!("k{i}").as_bytes()), None);
    }
}

// =============================================================================
// Test 14: Only live files remain after reopen
// =============================================================================
#[test]
fn obsolete_files_are_removed() {
    let dir = tempfile::tempdir().unwrap();
    for round in 0..3u32 {
        let db = open(dir.path());
        put(&db, format!("round{round}").as_bytes(), b"x");
        db.flush().unwrap();
    }

    assert_eq!(files_of_type(dir.path(), FileType::Log).len(), 1);
    assert_eq!(files_of_type(dir.path(), FileType::Manifest).len(), 1);
    assert!(files_of_type(dir.path(), FileType::Temp).is_empty());

    let db = open(dir.path());
    let listed = db.property("leveldb.sstables").unwrap();
    for table in files_of_type(dir.path(), FileType::Table) {
        let name = table.file_name().unwrap().to_str().unwrap().to_string();
        let number = parse_file_name(&name).unwrap().1;
        assert!(listed.contains(&number.to_string()), "{name} not live:\n{listed}");
    }
}

// =============================================================================
// Test 15: Properties report files, stats and memory
// =============================================================================
#[test]
fn properties() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    assert_eq!(db.property("leveldb.num-files-at-level0").as_deref(), Some("0"));

    for i in 0..100u32 {
        put(&db, format!("key{i}").as_bytes(), &[b'v'; 100]);
    }
    let memory: usize = db
        .property("leveldb.approximate-memory-usage")
        .unwrap()
        .parse()
        .unwrap();
    assert!(memory > 100 * 100);

    db.flush().unwrap();
    assert_eq!(db.property("leveldb.num-files-at-level0").as_deref(), Some("1"));
    assert!(db.property("leveldb.stats").unwrap().contains("Compactions"));
    assert!(db.property("leveldb.sstables").unwrap().contains("level 0"));

    assert_eq!(db.property("leveldb.num-files-at-level7"), None);
    assert_eq!(db.property("leveldb.no-such-thing"), None);
    assert_eq!(db.property("num-files-at-level0"), None);
}

// =============================================================================
// Test 16: destroy removes the database and its directory
// =============================================================================
#[test]
fn destroy_removes_everything() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    {
        let db = open(&path);
        put(&db, b"k", b"v");
        db.flush().unwrap();
        assert!(Database::destroy(&path).is_err());
    }
    Database::destroy(&path).unwrap();
    assert!(!path.exists());

    // Destroying a missing directory is fine.
    Database::destroy(&path).unwrap();

    let db = open(&path);
    assert_eq!(get(&db, b"k"), None);
}
