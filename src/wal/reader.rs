use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::wal::record::{FrameCheck, WALRecord};

/// Reads log records from a file for crash recovery.
///
/// Loads the entire file into memory, then iterates record by record.
/// On startup:
/// 1. Find the log files newer than the manifest's log number
/// 2. Replay each record into a fresh memtable
/// 3. Stop at the first record that is cut short or fails its checksum.
///    All preceding records are valid.
pub struct WALReader {
    data: Vec<u8>,
}

impl WALReader {
    /// Open a log file for reading.
    pub fn new(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        Ok(WALReader { data })
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        WALReader { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Create an iterator over all valid records in the log.
    pub fn iter(&self) -> WALIterator<'_> {
        WALIterator {
            data: &self.data,
            offset: 0,
            tail: None,
        }
    }
}

/// Why iteration over a log ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTail {
    /// Every byte of the file was consumed.
    Clean,
    /// The file ends inside a record starting at `offset`.
    Truncated { offset: usize },
    /// The record at `offset` is complete but fails its checksum or type check.
    Corrupted { offset: usize, reason: String },
}

/// Iterator over log records. Yields records until EOF or the first bad
/// record, then reports what it found through `tail()`.
///
/// A bad record ends iteration: log writes are sequential and append-only,
/// so nothing after a torn or damaged record can be trusted.
pub struct WALIterator<'a> {
    data: &'a [u8],
    offset: usize,
    tail: Option<LogTail>,
}

impl WALIterator<'_> {
    /// How iteration ended; `None` while records remain.
    pub fn tail(&self) -> Option<&LogTail> {
        self.tail.as_ref()
    }

    /// Bytes of valid records consumed so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Fail on a checksum mismatch and treat a torn tail as the end.
    /// Used for the manifest, where damage must abort recovery.
    pub fn strict(mut self) -> impl Iterator<Item = Result<WALRecord>> {
        let mut finished = false;
        std::iter::from_fn(move || {
            if finished {
                return None;
            }
            if let Some(record) = self.next() {
                return Some(Ok(record));
            }
            finished = true;
            match self.tail() {
                Some(LogTail::Corrupted { offset, reason }) => Some(Err(Error::Corruption(
                    format!("bad record at offset {}: {}", offset, reason),
                ))),
                _ => None,
            }
        })
    }
}

impl Iterator for WALIterator<'_> {
    type Item = WALRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.tail.is_some() {
            return None;
        }
        if self.offset >= self.data.len() {
            self.tail = Some(LogTail::Clean);
            return None;
        }

        let remaining = &self.data[self.offset..];
        let total = match WALRecord::check_frame(remaining) {
            FrameCheck::Complete(total) => total,
            FrameCheck::Truncated => {
                self.tail = Some(LogTail::Truncated {
                    offset: self.offset,
                });
                return None;
            }
        };

        match WALRecord::decode(&remaining[..total]) {
            Ok(record) => {
                self.offset += total;
                Some(record)
            }
            Err(e) => {
                self.tail = Some(LogTail::Corrupted {
                    offset: self.offset,
                    reason: e.to_string(),
                });
                None
            }
        }
    }
}
