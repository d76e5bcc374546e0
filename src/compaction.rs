//! Compaction descriptors and the background worker thread.
//!
//! A `Compaction` names the input tables of one merge step: files of
//! `level` plus the overlapping files of `level + 1`. The merge itself
//! runs on the worker, which owns no state of its own and calls back into
//! the database through the `BackgroundWork` trait.

use std::cmp::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::comparator::{Comparator, InternalKeyComparator};
use crate::error::Result;
use crate::manifest::VersionEdit;
use crate::options::NUM_LEVELS;
use crate::types::extract_user_key;
use crate::version::{FileMetaData, Version};

/// Overlap with level+2 beyond which a compaction output is cut, so that a
/// later compaction of that output does not drag in too much data.
fn max_grandparent_overlap_bytes(max_file_size: u64) -> u64 {
    10 * max_file_size
}

pub struct Compaction {
    pub level: usize,
    /// `inputs[0]` from `level`, `inputs[1]` from `level + 1`.
    pub inputs: [Vec<Arc<FileMetaData>>; 2],
    pub input_version: Arc<Version>,
    /// Deletions and additions accumulated for the manifest.
    pub edit: VersionEdit,
    max_output_file_size: u64,
    icmp: InternalKeyComparator,

    grandparents: Vec<Arc<FileMetaData>>,
    grandparent_index: usize,
    seen_key: bool,
    overlapped_bytes: u64,

    /// Per level, the file index `is_base_level_for_key` has advanced to.
    /// Keys arrive in increasing order, so the cursors only move forward.
    level_ptrs: [usize; NUM_LEVELS],
}

impl Compaction {
    pub fn new(
        level: usize,
        inputs: [Vec<Arc<FileMetaData>>; 2],
        input_version: Arc<Version>,
        grandparents: Vec<Arc<FileMetaData>>,
        icmp: InternalKeyComparator,
        max_output_file_size: u64,
    ) -> Self {
        Compaction {
            level,
            inputs,
            input_version,
            edit: VersionEdit::default(),
            max_output_file_size,
            icmp,
            grandparents,
            grandparent_index: 0,
            seen_key: false,
            overlapped_bytes: 0,
            level_ptrs: [0; NUM_LEVELS],
        }
    }

    pub fn num_input_files(&self, which: usize) -> usize {
        self.inputs[which].len()
    }

    pub fn max_output_file_size(&self) -> u64 {
        self.max_output_file_size
    }

    /// A single input file with nothing to merge against can move down a
    /// level by editing the manifest alone.
    pub fn is_trivial_move(&self) -> bool {
        let grandparent_bytes: u64 = self.grandparents.iter().map(|f| f.file_size).sum();
        self.inputs[0].len() == 1
            && self.inputs[1].is_empty()
            && grandparent_bytes <= max_grandparent_overlap_bytes(self.max_output_file_size)
    }

    /// Record the removal of every input file in the edit.
    pub fn add_input_deletions(&mut self) {
        for which in 0..2 {
            let level = self.level + which;
            for file in &self.inputs[which] {
                self.edit.remove_file(level, file.number);
            }
        }
    }

    /// True when no level below the output level can hold `user_key`, so a
    /// tombstone for it has nothing left to shadow.
    pub fn is_base_level_for_key(&mut self, user_key: &[u8]) -> bool {
        let ucmp = self.icmp.user_comparator();
        for level in (self.level + 2)..NUM_LEVELS {
            let files = self.input_version.files(level);
            while let Some(file) = files.get(self.level_ptrs[level]) {
                if ucmp.compare(user_key, extract_user_key(&file.largest)) != Ordering::Greater {
                    if ucmp.compare(user_key, extract_user_key(&file.smallest)) != Ordering::Less {
                        return false;
                    }
                    break;
                }
                self.level_ptrs[level] += 1;
            }
        }
        true
    }

    /// Whether the current output should be closed before `internal_key`
    /// because it already overlaps too much of level+2.
    pub fn should_stop_before(&mut self, internal_key: &[u8]) -> bool {
        while let Some(file) = self.grandparents.get(self.grandparent_index) {
            if self.icmp.compare(internal_key, &file.largest) != Ordering::Greater {
                break;
            }
            if self.seen_key {
                self.overlapped_bytes += file.file_size;
            }
            self.grandparent_index += 1;
        }
        self.seen_key = true;

        if self.overlapped_bytes > max_grandparent_overlap_bytes(self.max_output_file_size) {
            self.overlapped_bytes = 0;
            true
        } else {
            false
        }
    }

    /// Total bytes of the inputs at `which`.
    pub fn input_bytes(&self, which: usize) -> u64 {
        self.inputs[which].iter().map(|f| f.file_size).sum()
    }
}

/// Counters for one level, reported by the `leveldb.stats` property.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    pub micros: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub count: u64,
}

impl CompactionStats {
    pub fn add(&mut self, other: &CompactionStats) {
        self.micros += other.micros;
        self.bytes_read += other.bytes_read;
        self.bytes_written += other.bytes_written;
        self.count += other.count;
    }
}

#[derive(Debug, Clone, Copy)]
pub enum CompactionMessage {
    /// Something may need flushing or compacting.
    Schedule,
    /// Finish the current step and exit.
    Shutdown,
}

/// What the worker thread runs each time it wakes up.
pub trait BackgroundWork: Send + Sync + 'static {
    /// Perform pending flushes and compactions until none remain or the
    /// database is shutting down.
    fn run(&self);
}

/// Handle to the single background thread performing flushes and
/// compactions.
///
/// The thread wakes on every `Schedule` message and also on its own every
/// `retry_interval`, so a step that failed transiently is retried without
/// new writes arriving.
#[derive(Debug)]
pub struct CompactionHandle {
    sender: Sender<CompactionMessage>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl CompactionHandle {
    /// Channel through which the worker is woken. Created before the
    /// worker so the database can hold the sender from the start.
    pub fn channel() -> (Sender<CompactionMessage>, Receiver<CompactionMessage>) {
        unbounded()
    }

    pub fn spawn<W: BackgroundWork>(
        work: Arc<W>,
        sender: Sender<CompactionMessage>,
        receiver: Receiver<CompactionMessage>,
        retry_interval: Duration,
    ) -> Result<Self> {
        let thread_handle = thread::Builder::new()
            .name("lsm-compaction".into())
            .spawn(move || background_loop(work, receiver, retry_interval))?;
        Ok(CompactionHandle {
            sender,
            thread_handle: Some(thread_handle),
        })
    }

    pub fn schedule(&self) {
        let _ = self.sender.send(CompactionMessage::Schedule);
    }

    /// Stop the worker and wait for it to exit.
    pub fn shutdown(&mut self) {
        let _ = self.sender.send(CompactionMessage::Shutdown);
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::error!("compaction thread panicked");
            }
        }
    }
}

impl Drop for CompactionHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn background_loop<W: BackgroundWork>(
    work: Arc<W>,
    receiver: Receiver<CompactionMessage>,
    retry_interval: Duration,
) {
    loop {
        match receiver.recv_timeout(retry_interval) {
            Ok(CompactionMessage::Schedule) | Err(RecvTimeoutError::Timeout) => work.run(),
            Ok(CompactionMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                tracing::debug!("compaction thread shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;
    use crate::types::{InternalKey, ValueType};

    fn icmp() -> InternalKeyComparator {
        InternalKeyComparator::new(Arc::new(BytewiseComparator))
    }

    fn file(number: u64, smallest: &[u8], largest: &[u8], size: u64) -> Arc<FileMetaData> {
        Arc::new(FileMetaData {
            number,
            file_size: size,
            smallest: InternalKey::new(smallest.to_vec(), 1, ValueType::Put).encode(),
            largest: InternalKey::new(largest.to_vec(), 1, ValueType::Put).encode(),
        })
    }

    fn version_with(level: usize, files: Vec<Arc<FileMetaData>>) -> Arc<Version> {
        let mut levels = vec![Vec::new(); NUM_LEVELS];
        levels[level] = files;
        Arc::new(Version::from_files(icmp(), levels))
    }

    #[test]
    fn single_input_is_trivial_move() {
        let version = version_with(0, vec![]);
        let compaction = Compaction::new(
            1,
            [vec![file(5, b"a", b"c", 100)], vec![]],
            version,
            vec![],
            icmp(),
            1000,
        );
        assert!(compaction.is_trivial_move());
    }

    #[test]
    fn base_level_tracks_deeper_files() {
        let version = version_with(3, vec![file(7, b"d", b"f", 100), file(8, b"m", b"p", 100)]);
        let mut compaction =
            Compaction::new(1, [vec![], vec![]], version, vec![], icmp(), 1000);
        assert!(compaction.is_base_level_for_key(b"a"));
        assert!(!compaction.is_base_level_for_key(b"e"));
        assert!(compaction.is_base_level_for_key(b"g"));
        assert!(!compaction.is_base_level_for_key(b"n"));
        assert!(compaction.is_base_level_for_key(b"z"));
    }

    #[test]
    fn heavy_grandparent_overlap_cuts_output() {
        let version = version_with(0, vec![]);
        let grandparents = vec![
            file(10, b"a", b"b", 600),
            file(11, b"c", b"d", 600),
            file(12, b"e", b"f", 600),
        ];
        let mut compaction =
            Compaction::new(0, [vec![], vec![]], version, grandparents, icmp(), 100);
        let key = |k: &[u8]| InternalKey::new(k.to_vec(), 1, ValueType::Put).encode();
        assert!(!compaction.should_stop_before(&key(b"a")));
        assert!(!compaction.should_stop_before(&key(b"c")));
        assert!(compaction.should_stop_before(&key(b"z")));
    }
}
