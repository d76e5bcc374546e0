use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::filename::log_file_path;
use crate::wal::record::WALRecord;

/// Appends framed records to a log file.
///
/// Two layers of buffering:
///   BufWriter.flush()  → Rust buffer → OS page cache
///   file.sync_data()   → OS page cache → physical disk
///
/// `append` always reaches the page cache, so a process crash loses
/// nothing; `sync` is what survives a machine crash.
pub struct WALWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    offset: u64,
}

impl WALWriter {
    /// Open (or create) a log at `path`, appending after existing contents.
    pub fn new(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let offset = file.metadata()?.len();
        Ok(WALWriter {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            offset,
        })
    }

    /// Append a record and flush it to the OS.
    pub fn append(&mut self, record: &WALRecord) -> Result<()> {
        let encoded = record.encode();
        self.writer.write_all(&encoded)?;
        self.writer.flush()?;
        self.offset += encoded.len() as u64;
        Ok(())
    }

    /// Force fsync to disk. Ensures all appended records are durable.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Current file offset (bytes written so far).
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Owns the active write-ahead log of a database directory.
///
/// When the memtable is frozen:
/// 1. A new log is created for the new active memtable
/// 2. The old log stays on disk until the frozen memtable's table is
///    recorded in the manifest
/// 3. The old log is then deleted by the obsolete-file sweep
///
/// The old log is only deleted AFTER its contents are durable in a table.
/// Violating this loses data.
pub struct WALManager {
    dir: PathBuf,
    active: WALWriter,
    number: u64,
}

impl WALManager {
    /// Create log `number` in `dir` and make it active.
    pub fn create(dir: &Path, number: u64) -> Result<Self> {
        let active = WALWriter::new(&log_file_path(dir, number))?;
        Ok(WALManager {
            dir: dir.to_path_buf(),
            active,
            number,
        })
    }

    /// Sync the current log, then switch to a new log `number`.
    /// Returns the number of the log that was active.
    pub fn rotate(&mut self, number: u64) -> Result<u64> {
        let next = WALWriter::new(&log_file_path(&self.dir, number))?;
        self.active.sync()?;
        let old = std::mem::replace(&mut self.number, number);
        self.active = next;
        Ok(old)
    }

    pub fn append(&mut self, record: &WALRecord) -> Result<()> {
        self.active.append(record)
    }

    pub fn sync(&mut self) -> Result<()> {
        self.active.sync()
    }

    pub fn active_number(&self) -> u64 {
        self.number
    }

    pub fn active_offset(&self) -> u64 {
        self.active.offset()
    }

    /// Delete a log file that is no longer needed for recovery.
    pub fn delete_wal(dir: &Path, number: u64) -> Result<()> {
        fs::remove_file(log_file_path(dir, number))?;
        Ok(())
    }
}
