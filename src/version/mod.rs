//! Immutable snapshots of the table layout.
//!
//! A `Version` lists the tables of every level. It never changes once
//! built; compactions and flushes produce a new version through a
//! `VersionEdit`. Readers, iterators and snapshots hold an `Arc<Version>`,
//! which keeps its tables on disk until the last holder is gone.

pub mod set;

pub use set::VersionSet;

use std::cmp::Ordering;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::comparator::{Comparator, InternalKeyComparator};
use crate::error::Result;
use crate::iterator::{LevelIterator, StorageIterator};
use crate::options::{ReadFlags, NUM_LEVELS};
use crate::sstable::TableCache;
use crate::types::{
    extract_user_key, LookupKey, LookupResult, ParsedInternalKey, SequenceNumber, ValueType,
};

/// A table as recorded in the manifest. Keys are internal keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetaData {
    pub number: u64,
    pub file_size: u64,
    pub smallest: Vec<u8>,
    pub largest: Vec<u8>,
}

/// Per-level file lists.
///
/// Level 0 is ordered by file number (flush order) and its files may
/// overlap. Every deeper level is ordered by smallest key and its files
/// cover disjoint key ranges.
pub struct Version {
    files: Vec<Vec<Arc<FileMetaData>>>,
    icmp: InternalKeyComparator,
    /// Level most in need of compaction and its score; >= 1 means needed.
    pub(crate) compaction_level: usize,
    pub(crate) compaction_score: f64,
}

impl Version {
    pub fn new(icmp: InternalKeyComparator) -> Self {
        Version {
            files: vec![Vec::new(); NUM_LEVELS],
            icmp,
            compaction_level: 0,
            compaction_score: -1.0,
        }
    }

    pub(crate) fn from_files(icmp: InternalKeyComparator, files: Vec<Vec<Arc<FileMetaData>>>) -> Self {
        Version {
            files,
            icmp,
            compaction_level: 0,
            compaction_score: -1.0,
        }
    }

    pub fn files(&self, level: usize) -> &[Arc<FileMetaData>] {
        &self.files[level]
    }

    pub fn num_files(&self, level: usize) -> usize {
        self.files[level].len()
    }

    pub fn level_bytes(&self, level: usize) -> u64 {
        self.files[level].iter().map(|f| f.file_size).sum()
    }

    /// Every (level, file) pair in the version.
    pub fn all_files(&self) -> impl Iterator<Item = (usize, &Arc<FileMetaData>)> {
        self.files
            .iter()
            .enumerate()
            .flat_map(|(level, files)| files.iter().map(move |f| (level, f)))
    }

    pub fn comparator(&self) -> &InternalKeyComparator {
        &self.icmp
    }

    /// Look up a key in the tables of this version.
    ///
    /// Level 0 files may overlap, so every level-0 file whose range covers
    /// the key is probed and the entry with the highest sequence number
    /// wins. Deeper levels hold at most one candidate file each, and the
    /// first level that knows the key answers.
    pub fn get(
        &self,
        lookup: &LookupKey,
        cache: &TableCache,
        flags: ReadFlags,
    ) -> Result<Option<LookupResult>> {
        let user_key = lookup.user_key();

        let mut best: Option<(SequenceNumber, LookupResult)> = None;
        for file in &self.files[0] {
            if !self.covers_user_key(file, user_key) {
                continue;
            }
            if let Some((sequence, result)) = self.probe(cache, file, lookup, flags)? {
                if best.as_ref().is_none_or(|(s, _)| sequence > *s) {
                    best = Some((sequence, result));
                }
            }
        }
        if let Some((_, result)) = best {
            return Ok(Some(result));
        }

        for level in 1..NUM_LEVELS {
            let files = &self.files[level];
            let idx = find_file(&self.icmp, files, lookup.internal_key());
            let Some(file) = files.get(idx) else {
                continue;
            };
            if self
                .icmp
                .compare_user(user_key, extract_user_key(&file.smallest))
                == Ordering::Less
            {
                continue;
            }
            if let Some((_, result)) = self.probe(cache, file, lookup, flags)? {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    fn covers_user_key(&self, file: &FileMetaData, user_key: &[u8]) -> bool {
        self.icmp.compare_user(user_key, extract_user_key(&file.smallest)) != Ordering::Less
            && self.icmp.compare_user(user_key, extract_user_key(&file.largest))
                != Ordering::Greater
    }

    fn probe(
        &self,
        cache: &TableCache,
        file: &FileMetaData,
        lookup: &LookupKey,
        flags: ReadFlags,
    ) -> Result<Option<(SequenceNumber, LookupResult)>> {
        let Some((found_key, value)) = cache.get(file.number, lookup.internal_key(), flags)? else {
            return Ok(None);
        };
        let parsed = ParsedInternalKey::parse(&found_key)?;
        if self.icmp.compare_user(parsed.user_key, lookup.user_key()) != Ordering::Equal {
            return Ok(None);
        }
        let result = match parsed.value_type {
            ValueType::Put => LookupResult::Found(value),
            ValueType::Delete => LookupResult::Deleted,
        };
        Ok(Some((parsed.sequence, result)))
    }

    /// Files of `level` whose user-key range intersects [begin, end].
    /// `None` bounds are open.
    ///
    /// For level 0 the range grows to cover every file it touches, since
    /// overlapping level-0 files must be compacted together.
    pub fn overlapping_inputs(
        &self,
        level: usize,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Vec<Arc<FileMetaData>> {
        let ucmp = self.icmp.user_comparator();
        let mut begin = begin.map(|b| b.to_vec());
        let mut end = end.map(|e| e.to_vec());
        let mut inputs = Vec::new();

        let files = &self.files[level];
        let mut i = 0;
        while i < files.len() {
            let file = &files[i];
            i += 1;
            let file_start = extract_user_key(&file.smallest);
            let file_limit = extract_user_key(&file.largest);

            if begin
                .as_deref()
                .is_some_and(|b| ucmp.compare(file_limit, b) == Ordering::Less)
            {
                continue;
            }
            if end
                .as_deref()
                .is_some_and(|e| ucmp.compare(file_start, e) == Ordering::Greater)
            {
                continue;
            }
            inputs.push(Arc::clone(file));

            if level == 0 {
                if begin
                    .as_deref()
                    .is_some_and(|b| ucmp.compare(file_start, b) == Ordering::Less)
                {
                    begin = Some(file_start.to_vec());
                    inputs.clear();
                    i = 0;
                } else if end
                    .as_deref()
                    .is_some_and(|e| ucmp.compare(file_limit, e) == Ordering::Greater)
                {
                    end = Some(file_limit.to_vec());
                    inputs.clear();
                    i = 0;
                }
            }
        }
        inputs
    }

    /// Append one iterator per level-0 table and one concatenating
    /// iterator per non-empty deeper level.
    pub fn add_iterators(
        &self,
        cache: &Arc<TableCache>,
        flags: ReadFlags,
        out: &mut Vec<Box<dyn StorageIterator>>,
    ) -> Result<()> {
        for file in &self.files[0] {
            out.push(Box::new(cache.iter(file.number, flags)?));
        }
        for level in 1..NUM_LEVELS {
            if !self.files[level].is_empty() {
                out.push(Box::new(LevelIterator::new(
                    Arc::new(self.icmp.clone()),
                    self.files[level].clone(),
                    Arc::clone(cache),
                    flags,
                )));
            }
        }
        Ok(())
    }

    /// Approximate byte offset of `internal_key` across the whole version.
    pub fn approximate_offset_of(&self, internal_key: &[u8], cache: &TableCache) -> Result<u64> {
        let mut result = 0;
        for (level, files) in self.files.iter().enumerate() {
            for file in files {
                if self.icmp.compare(&file.largest, internal_key) != Ordering::Greater {
                    result += file.file_size;
                } else if self.icmp.compare(&file.smallest, internal_key) == Ordering::Greater {
                    // Deeper levels are sorted, so later files start after the key too.
                    if level > 0 {
                        break;
                    }
                } else {
                    result += cache.get_table(file.number)?.approximate_offset_of(internal_key);
                }
            }
        }
        Ok(result)
    }

    /// One line per non-empty level: `level N: #number[smallest .. largest] size`.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for (level, files) in self.files.iter().enumerate() {
            let _ = writeln!(out, "--- level {} ---", level);
            for file in files {
                let _ = writeln!(
                    out,
                    " {}:{}[{} .. {}]",
                    file.number,
                    file.file_size,
                    String::from_utf8_lossy(extract_user_key(&file.smallest)),
                    String::from_utf8_lossy(extract_user_key(&file.largest)),
                );
            }
        }
        out
    }

    /// Compact summary of file counts, e.g. `files[ 2 1 0 0 0 0 0 ]`.
    pub fn level_summary(&self) -> String {
        let counts: Vec<String> = self.files.iter().map(|f| f.len().to_string()).collect();
        format!("files[ {} ]", counts.join(" "))
    }
}

/// Index of the first file whose largest key is >= `internal_key`, in a
/// level sorted by key with disjoint ranges.
pub fn find_file(icmp: &InternalKeyComparator, files: &[Arc<FileMetaData>], internal_key: &[u8]) -> usize {
    files.partition_point(|f| icmp.compare(&f.largest, internal_key) == Ordering::Less)
}
