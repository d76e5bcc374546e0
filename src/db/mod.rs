//! The database facade.
//!
//! ```text
//!   put/delete/write ──► writer queue ──► WAL ──► memtable
//!                                                    │ full
//!                                                    ▼
//!   get/iter ◄── memtable, immutable memtable ◄── background worker
//!                 level 0 .. level 6 tables   ◄──   flush + compaction
//! ```
//!
//! `Database` owns the shared `DbInner` and the handle of the background
//! worker. All mutable engine state lives in `DbState` behind one mutex;
//! the memtable, WAL and caches carry their own locks so that the slow
//! parts (WAL appends, table builds) run with the state lock released.

mod background;
mod iter;
mod snapshot;
mod write;

pub use iter::{DbIterator, Entries};
pub use snapshot::Snapshot;

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write as _;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use fs2::FileExt;
use parking_lot::{Condvar, Mutex};

use crate::batch::WriteBatch;
use crate::cache::BlockCache;
use crate::compaction::{CompactionHandle, CompactionMessage, CompactionStats};
use crate::comparator::InternalKeyComparator;
use crate::error::{Error, Result};
use crate::filename::{current_file_path, lock_file_path, log_file_path, parse_file_name, FileType};
use crate::iterator::{MergeIterator, StorageIterator};
use crate::manifest::VersionEdit;
use crate::memtable::MemTable;
use crate::options::{OpenOptions, ReadFlags, ReadOptions, WriteOptions, NUM_LEVELS};
use crate::sstable::{TableCache, TableOptions};
use crate::types::{
    InternalKey, LookupKey, LookupResult, SequenceNumber, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK,
};
use crate::version::VersionSet;
use crate::wal::{LogTail, RecordType, WALManager, WALReader};
use snapshot::SnapshotList;

/// An open database directory.
///
/// `Database` is `Send + Sync`; share it between threads with an `Arc`.
/// Dropping it stops the background worker, syncs the WAL and releases the
/// directory lock, the same as `close`.
pub struct Database {
    inner: Arc<DbInner>,
    compactor: Option<CompactionHandle>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("dir", &self.inner.dir)
            .finish_non_exhaustive()
    }
}

/// State shared between the foreground API and the background worker.
pub(crate) struct DbInner {
    dir: PathBuf,
    options: OpenOptions,
    icmp: InternalKeyComparator,
    table_cache: Arc<TableCache>,
    state: Mutex<DbState>,
    /// Signalled whenever background work finishes a step.
    bg_cv: Condvar,
    /// Signalled when the writer queue moves.
    write_cv: Condvar,
    /// Only touched by the write-group leader, and under the state lock
    /// when the log is switched.
    wal: Mutex<WALManager>,
    snapshots: Arc<SnapshotList>,
    has_imm: AtomicBool,
    bg_scheduled: AtomicBool,
    shutting_down: AtomicBool,
    scheduler: Sender<CompactionMessage>,
    _lock: File,
}

struct PendingWrite {
    /// `None` asks the leader to switch the memtable without writing.
    batch: Option<WriteBatch>,
    sync: bool,
}

/// A manual compaction request being worked through by the worker.
struct ManualCompaction {
    level: usize,
    begin: Option<Vec<u8>>,
    end: Option<Vec<u8>>,
    done: bool,
    error: Option<Error>,
}

pub(crate) struct DbState {
    mem: Arc<MemTable>,
    imm: Option<Arc<MemTable>>,
    versions: VersionSet,
    /// Number of the WAL backing `mem`.
    log_number: u64,

    writers: VecDeque<u64>,
    pending: HashMap<u64, PendingWrite>,
    completed: HashMap<u64, Result<()>>,
    next_writer: u64,

    /// Table numbers being written that no version references yet.
    pending_outputs: HashSet<u64>,
    /// Last memtable flush failure; cleared by the next successful flush.
    bg_error: Option<Error>,
    /// A WAL failure; once set, every write is refused.
    write_error: Option<Error>,
    manual: Option<ManualCompaction>,
    stats: [CompactionStats; NUM_LEVELS],
}

impl Database {
    /// Open the database in `path`, creating it when `create_if_missing`
    /// is set. Recovers the version set from the manifest and replays any
    /// write-ahead logs newer than the last flush.
    pub fn open(path: impl AsRef<Path>, options: OpenOptions) -> Result<Database> {
        options.validate()?;
        let dir = path.as_ref().to_path_buf();

        if options.create_if_missing {
            fs::create_dir_all(&dir)?;
        } else if !dir.is_dir() {
            return Err(Error::InvalidArgument(format!(
                "{}: does not exist (create_if_missing is false)",
                dir.display()
            )));
        }

        let lock = File::options()
            .create(true)
            .truncate(false)
            .write(true)
            .open(lock_file_path(&dir))?;
        lock.try_lock_exclusive().map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("lock {}: {}", lock_file_path(&dir).display(), e),
            ))
        })?;

        let icmp = InternalKeyComparator::new(Arc::clone(&options.comparator));
        if !current_file_path(&dir).exists() {
            if !options.create_if_missing {
                return Err(Error::InvalidArgument(format!(
                    "{}: does not exist (create_if_missing is false)",
                    dir.display()
                )));
            }
            VersionSet::create_new(&dir, &icmp)?;
            tracing::info!(path = %dir.display(), "created new database");
        } else if options.error_if_exists {
            return Err(Error::InvalidArgument(format!(
                "{}: exists (error_if_exists is true)",
                dir.display()
            )));
        }

        let mut versions = VersionSet::new(
            &dir,
            icmp.clone(),
            options.max_manifest_file_size,
            options.max_file_size as u64,
        );
        versions.recover()?;

        let block_cache =
            (options.block_cache_size > 0).then(|| Arc::new(BlockCache::new(options.block_cache_size)));
        let table_cache = Arc::new(TableCache::new(
            &dir,
            TableOptions::from_open_options(&options, &icmp),
            block_cache,
            options.table_cache_capacity(),
        ));

        check_table_files(&dir, &mut versions)?;

        let mut edit = VersionEdit::default();
        let max_sequence = replay_logs(&dir, &options, &icmp, &table_cache, &mut versions, &mut edit)?;

        let log_number = versions.new_file_number();
        let wal = WALManager::create(&dir, log_number)?;
        edit.log_number = Some(log_number);
        edit.prev_log_number = Some(0);
        versions.set_last_sequence(max_sequence);
        versions.log_and_apply(&mut edit)?;

        let (scheduler, receiver) = CompactionHandle::channel();
        let inner = Arc::new(DbInner {
            state: Mutex::new(DbState {
                mem: Arc::new(MemTable::new(icmp.clone(), options.write_buffer_size)),
                imm: None,
                versions,
                log_number,
                writers: VecDeque::new(),
                pending: HashMap::new(),
                completed: HashMap::new(),
                next_writer: 0,
                pending_outputs: HashSet::new(),
                bg_error: None,
                write_error: None,
                manual: None,
                stats: [CompactionStats::default(); NUM_LEVELS],
            }),
            dir: dir.clone(),
            icmp,
            table_cache,
            bg_cv: Condvar::new(),
            write_cv: Condvar::new(),
            wal: Mutex::new(wal),
            snapshots: Arc::new(SnapshotList::default()),
            has_imm: AtomicBool::new(false),
            bg_scheduled: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            scheduler: scheduler.clone(),
            _lock: lock,
            options,
        });

        {
            let mut state = inner.state.lock();
            inner.delete_obsolete_files(&mut state);
            tracing::info!(
                path = %dir.display(),
                last_sequence = state.versions.last_sequence(),
                log = log_number,
                levels = %state.versions.current().level_summary(),
                "opened database"
            );
        }

        let compactor = CompactionHandle::spawn(
            Arc::clone(&inner),
            scheduler,
            receiver,
            inner.options.background_retry_interval,
        )?;
        inner.maybe_schedule();

        Ok(Database {
            inner,
            compactor: Some(compactor),
        })
    }

    /// Value of `key`, or `None` if it is absent or deleted.
    pub fn get(&self, key: &[u8], options: &ReadOptions<'_>) -> Result<Option<Vec<u8>>> {
        let (mem, imm, version, sequence) = {
            let state = self.inner.state.lock();
            let sequence = match options.snapshot {
                Some(snapshot) => snapshot.sequence(),
                None => state.versions.last_sequence(),
            };
            (
                Arc::clone(&state.mem),
                state.imm.clone(),
                state.versions.current(),
                sequence,
            )
        };

        let lookup = LookupKey::new(key, sequence);
        if let Some(result) = mem.get(&lookup) {
            return Ok(result.into_value());
        }
        if let Some(result) = imm.as_ref().and_then(|imm| imm.get(&lookup)) {
            return Ok(result.into_value());
        }
        let found = version.get(&lookup, &self.inner.table_cache, ReadFlags::from(options))?;
        Ok(found.and_then(LookupResult::into_value))
    }

    pub fn put(&self, key: &[u8], value: &[u8], options: &WriteOptions) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(batch, options)
    }

    pub fn delete(&self, key: &[u8], options: &WriteOptions) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(batch, options)
    }

    /// Apply every operation of `batch` atomically.
    ///
    /// Concurrent writers queue up; the writer at the head of the queue
    /// commits its own batch together with the batches queued behind it
    /// in one WAL record.
    pub fn write(&self, batch: WriteBatch, options: &WriteOptions) -> Result<()> {
        self.inner.write_internal(Some(batch), options.sync)
    }

    /// Iterator over the database as of now, or as of `options.snapshot`.
    pub fn iter(&self, options: &ReadOptions<'_>) -> Result<DbIterator> {
        let (mem, imm, version, sequence) = {
            let state = self.inner.state.lock();
            let sequence = match options.snapshot {
                Some(snapshot) => snapshot.sequence(),
                None => state.versions.last_sequence(),
            };
            (
                Arc::clone(&state.mem),
                state.imm.clone(),
                state.versions.current(),
                sequence,
            )
        };

        let mut children: Vec<Box<dyn StorageIterator>> = vec![Box::new(mem.iter())];
        if let Some(imm) = imm {
            children.push(Box::new(imm.iter()));
        }
        version.add_iterators(&self.inner.table_cache, ReadFlags::from(options), &mut children)?;

        let merged = MergeIterator::new(Arc::new(self.inner.icmp.clone()), children);
        Ok(DbIterator::new(
            merged,
            Arc::clone(self.inner.icmp.user_comparator()),
            sequence,
            version,
        ))
    }

    /// Pin the current state for consistent reads.
    pub fn snapshot(&self) -> Snapshot {
        let state = self.inner.state.lock();
        Snapshot::new(
            state.versions.last_sequence(),
            Arc::clone(&self.inner.snapshots),
            state.versions.current(),
        )
    }

    /// Release a snapshot. Equivalent to dropping it.
    pub fn release_snapshot(&self, snapshot: Snapshot) {
        drop(snapshot);
    }

    /// Write the memtable to a level-0 table and wait until it is done.
    pub fn flush(&self) -> Result<()> {
        self.inner.write_internal(None, false)?;
        self.inner.wait_for_flush()
    }

    /// Compact every level overlapping the user-key range [begin, end].
    /// `None` bounds are open, so `compact_range(None, None)` compacts the
    /// whole database.
    pub fn compact_range(&self, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        let max_level = {
            let state = self.inner.state.lock();
            let version = state.versions.current();
            (1..NUM_LEVELS)
                .filter(|&level| !version.overlapping_inputs(level, begin, end).is_empty())
                .max()
                .unwrap_or(1)
        };
        self.flush()?;
        for level in 0..max_level {
            self.inner.manual_compaction(level, begin, end)?;
        }
        Ok(())
    }

    /// Engine introspection. Recognized names:
    /// - `leveldb.num-files-at-level<N>`
    /// - `leveldb.stats`
    /// - `leveldb.sstables`
    /// - `leveldb.approximate-memory-usage`
    pub fn property(&self, name: &str) -> Option<String> {
        let name = name.strip_prefix("leveldb.")?;
        let state = self.inner.state.lock();
        let version = state.versions.current();

        if let Some(level) = name.strip_prefix("num-files-at-level") {
            let level: usize = level.parse().ok()?;
            return (level < NUM_LEVELS).then(|| version.num_files(level).to_string());
        }
        match name {
            "stats" => {
                let mut out = String::from(
                    "                               Compactions\n\
                     Level  Files Size(MB) Time(sec) Read(MB) Write(MB)\n\
                     --------------------------------------------------\n",
                );
                for (level, stats) in state.stats.iter().enumerate() {
                    let files = version.num_files(level);
                    if stats.micros == 0 && files == 0 {
                        continue;
                    }
                    let _ = writeln!(
                        out,
                        "{:3} {:8} {:8.0} {:9.0} {:8.0} {:9.0}",
                        level,
                        files,
                        version.level_bytes(level) as f64 / 1048576.0,
                        stats.micros as f64 / 1e6,
                        stats.bytes_read as f64 / 1048576.0,
                        stats.bytes_written as f64 / 1048576.0,
                    );
                }
                Some(out)
            }
            "sstables" => Some(version.describe()),
            "approximate-memory-usage" => {
                let mut total = state.mem.approximate_memory_usage();
                if let Some(imm) = &state.imm {
                    total += imm.approximate_memory_usage();
                }
                if let Some(cache) = self.inner.table_cache.block_cache() {
                    total += cache.usage();
                }
                Some(total.to_string())
            }
            _ => None,
        }
    }

    /// Approximate on-disk bytes used by user keys in [start, end).
    pub fn approximate_size(&self, start: &[u8], end: &[u8]) -> Result<u64> {
        let version = self.inner.state.lock().versions.current();
        let start = InternalKey::new(start.to_vec(), MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK).encode();
        let limit = InternalKey::new(end.to_vec(), MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK).encode();
        let start = version.approximate_offset_of(&start, &self.inner.table_cache)?;
        let limit = version.approximate_offset_of(&limit, &self.inner.table_cache)?;
        Ok(limit.saturating_sub(start))
    }

    /// Stop background work, sync the WAL and release the directory.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(mut compactor) = self.compactor.take() else {
            return Ok(());
        };
        self.inner.shutting_down.store(true, AtomicOrdering::SeqCst);
        self.inner.bg_cv.notify_all();
        compactor.shutdown();
        let synced = self.inner.wal.lock().sync();
        tracing::info!(path = %self.inner.dir.display(), "closed database");
        synced
    }

    /// Remove every engine file in `path`, then the directory itself if it
    /// ends up empty. Fails if the database is open.
    pub fn destroy(path: impl AsRef<Path>) -> Result<()> {
        let dir = path.as_ref();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let lock_path = lock_file_path(dir);
        let lock = File::options()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        lock.try_lock_exclusive()?;

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some((file_type, _)) = parse_file_name(name) {
                if file_type != FileType::Lock {
                    fs::remove_file(entry.path())?;
                }
            }
        }
        drop(lock);
        let _ = fs::remove_file(&lock_path);
        let _ = fs::remove_dir(dir);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.inner.dir
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!(error = %e, "error while closing database");
        }
    }
}

/// Fail if a table the manifest references is missing from the directory.
fn check_table_files(dir: &Path, versions: &mut VersionSet) -> Result<()> {
    let mut expected = versions.live_files();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some((FileType::Table, number)) = parse_file_name(name) {
                expected.remove(&number);
            }
        }
    }
    match expected.iter().min() {
        None => Ok(()),
        Some(missing) => Err(Error::Corruption(format!(
            "{} missing table files; e.g. {}",
            expected.len(),
            crate::filename::table_file_path(dir, *missing).display()
        ))),
    }
}

/// Replay every log the manifest does not cover yet, in file order.
/// Recovered data is written to level-0 tables recorded in `edit`.
/// Returns the highest sequence number seen.
fn replay_logs(
    dir: &Path,
    options: &OpenOptions,
    icmp: &InternalKeyComparator,
    table_cache: &TableCache,
    versions: &mut VersionSet,
    edit: &mut VersionEdit,
) -> Result<SequenceNumber> {
    let min_log = versions.log_number();
    let prev_log = versions.prev_log_number();
    let mut logs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some((FileType::Log, number)) = parse_file_name(name) {
                if number >= min_log || number == prev_log {
                    logs.push(number);
                }
            }
        }
    }
    logs.sort_unstable();

    let mut max_sequence = versions.last_sequence();
    for number in logs {
        versions.mark_file_number_used(number);
        let path = log_file_path(dir, number);
        let reader = WALReader::new(&path)?;
        let mut records = reader.iter();
        let mut mem = Arc::new(MemTable::new(icmp.clone(), options.write_buffer_size));
        let mut batches = 0usize;

        for record in records.by_ref() {
            let applied = if record.record_type != RecordType::Batch {
                Err(Error::Corruption(format!(
                    "unexpected {:?} record in log",
                    record.record_type
                )))
            } else {
                WriteBatch::from_contents(record.payload).and_then(|batch| {
                    batch.insert_into(&mem)?;
                    Ok(batch)
                })
            };
            let batch = match applied {
                Ok(batch) => batch,
                Err(e) if options.paranoid_checks => return Err(e),
                Err(e) => {
                    tracing::warn!(log = number, error = %e, "skipping bad log record");
                    continue;
                }
            };
            batches += 1;
            if batch.count() > 0 {
                max_sequence = max_sequence.max(batch.sequence() + u64::from(batch.count()) - 1);
            }
            if mem.is_full() {
                flush_recovered(dir, table_cache, versions, edit, &mem)?;
                mem = Arc::new(MemTable::new(icmp.clone(), options.write_buffer_size));
            }
        }

        match records.tail() {
            Some(LogTail::Corrupted { offset, reason }) => {
                if options.paranoid_checks {
                    return Err(Error::Corruption(format!(
                        "{}: bad record at offset {}: {}",
                        path.display(),
                        offset,
                        reason
                    )));
                }
                tracing::warn!(log = number, offset, reason = %reason, "dropping corrupted log tail");
            }
            Some(LogTail::Truncated { offset }) => {
                tracing::warn!(log = number, offset, "dropping truncated log tail");
            }
            _ => {}
        }

        if !mem.is_empty() {
            flush_recovered(dir, table_cache, versions, edit, &mem)?;
        }
        tracing::info!(log = number, batches, "replayed log");
    }
    Ok(max_sequence)
}

fn flush_recovered(
    dir: &Path,
    table_cache: &TableCache,
    versions: &mut VersionSet,
    edit: &mut VersionEdit,
    mem: &Arc<MemTable>,
) -> Result<()> {
    let number = versions.new_file_number();
    match background::build_table(dir, table_cache, number, mem.iter())? {
        Some(file) => {
            tracing::info!(table = number, bytes = file.file_size, "wrote recovered level-0 table");
            edit.add_file(0, file);
        }
        None => versions.reuse_file_number(number),
    }
    Ok(())
}
