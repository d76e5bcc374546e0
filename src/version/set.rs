use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use crate::compaction::Compaction;
use crate::comparator::{Comparator, InternalKeyComparator};
use crate::error::{Error, Result};
use crate::filename::{manifest_file_path, parse_file_name, read_current_file, set_current_file, FileType};
use crate::manifest::{read_manifest, ManifestWriter, VersionEdit};
use crate::options::{L0_COMPACTION_TRIGGER, L1_MAX_BYTES, LEVEL_SIZE_MULTIPLIER, NUM_LEVELS};
use crate::types::{extract_user_key, SequenceNumber};
use crate::version::{FileMetaData, Version};

/// Byte budget of a level: 10MB for level 1, growing 10x per level.
/// Level 0 is governed by file count instead.
pub fn max_bytes_for_level(level: usize) -> f64 {
    let mut result = L1_MAX_BYTES as f64;
    for _ in 1..level {
        result *= LEVEL_SIZE_MULTIPLIER as f64;
    }
    result
}

/// Owner of the current version and the manifest.
///
/// Every structural change (flush, compaction, log switch) goes through
/// `log_and_apply`, which persists the edit before the new version becomes
/// visible. All methods run under the database state lock.
pub struct VersionSet {
    dir: PathBuf,
    icmp: InternalKeyComparator,
    max_manifest_file_size: u64,
    max_file_size: u64,

    next_file_number: u64,
    manifest_file_number: u64,
    last_sequence: SequenceNumber,
    log_number: u64,
    prev_log_number: u64,

    current: Arc<Version>,
    /// Older versions still referenced by iterators or snapshots.
    live: Vec<Weak<Version>>,
    /// Per level, the largest key of the last compaction; the next one
    /// starts after it.
    compact_pointers: Vec<Vec<u8>>,
    manifest: Option<ManifestWriter>,
}

impl VersionSet {
    pub fn new(
        dir: &Path,
        icmp: InternalKeyComparator,
        max_manifest_file_size: u64,
        max_file_size: u64,
    ) -> Self {
        VersionSet {
            dir: dir.to_path_buf(),
            current: Arc::new(Version::new(icmp.clone())),
            icmp,
            max_manifest_file_size,
            max_file_size,
            next_file_number: 2,
            manifest_file_number: 0,
            last_sequence: 0,
            log_number: 0,
            prev_log_number: 0,
            live: Vec::new(),
            compact_pointers: vec![Vec::new(); NUM_LEVELS],
            manifest: None,
        }
    }

    /// Write the manifest of an empty database and point CURRENT at it.
    pub fn create_new(dir: &Path, icmp: &InternalKeyComparator) -> Result<()> {
        let edit = VersionEdit {
            comparator: Some(icmp.user_comparator().name().to_string()),
            log_number: Some(0),
            next_file_number: Some(2),
            last_sequence: Some(0),
            ..Default::default()
        };
        let mut manifest = ManifestWriter::create(dir, 1)?;
        if let Err(e) = manifest.append(&edit) {
            let _ = fs::remove_file(manifest.path());
            return Err(e);
        }
        drop(manifest);
        if let Err(e) = set_current_file(dir, 1) {
            let _ = fs::remove_file(manifest_file_path(dir, 1));
            return Err(e);
        }
        Ok(())
    }

    /// Rebuild the current version from the manifest named by CURRENT.
    pub fn recover(&mut self) -> Result<()> {
        let current = read_current_file(&self.dir)?;
        let name = current.trim_end_matches('\n');
        if !matches!(parse_file_name(name), Some((FileType::Manifest, _))) {
            return Err(Error::Corruption(format!(
                "CURRENT names an invalid manifest: {:?}",
                name
            )));
        }
        let edits = read_manifest(&self.dir.join(name))?;

        let mut builder = VersionBuilder::new(Arc::clone(&self.current));
        let mut log_number = None;
        let mut prev_log_number = None;
        let mut next_file_number = None;
        let mut last_sequence = None;

        for edit in &edits {
            if let Some(comparator) = &edit.comparator {
                let ours = self.icmp.user_comparator().name();
                if comparator != ours {
                    return Err(Error::InvalidArgument(format!(
                        "comparator {} does not match existing comparator {}",
                        ours, comparator
                    )));
                }
            }
            for (level, key) in &edit.compact_pointers {
                self.compact_pointers[*level] = key.clone();
            }
            builder.apply(edit);
            log_number = edit.log_number.or(log_number);
            prev_log_number = edit.prev_log_number.or(prev_log_number);
            next_file_number = edit.next_file_number.or(next_file_number);
            last_sequence = edit.last_sequence.or(last_sequence);
        }

        let next_file_number = next_file_number
            .ok_or_else(|| Error::Corruption("manifest has no next-file entry".into()))?;
        let log_number =
            log_number.ok_or_else(|| Error::Corruption("manifest has no log-number entry".into()))?;
        let last_sequence = last_sequence
            .ok_or_else(|| Error::Corruption("manifest has no last-sequence entry".into()))?;

        let mut version = builder.build(&self.icmp);
        finalize(&mut version);
        self.install(version);

        self.manifest_file_number = next_file_number;
        self.next_file_number = next_file_number + 1;
        self.last_sequence = last_sequence;
        self.log_number = log_number;
        self.prev_log_number = prev_log_number.unwrap_or(0);
        self.mark_file_number_used(self.log_number);
        self.mark_file_number_used(self.prev_log_number);

        tracing::info!(
            manifest = %name,
            edits = edits.len(),
            next_file = self.next_file_number,
            last_sequence = self.last_sequence,
            log_number = self.log_number,
            levels = %self.current.level_summary(),
            "recovered version set"
        );
        Ok(())
    }

    /// Persist `edit` to the manifest and install the resulting version.
    ///
    /// The first call after recovery, and any call once the manifest has
    /// outgrown `max_manifest_file_size`, starts a new manifest seeded
    /// with a snapshot of the current version and then repoints CURRENT.
    pub fn log_and_apply(&mut self, edit: &mut VersionEdit) -> Result<()> {
        match edit.log_number {
            Some(n) => {
                if n < self.log_number || n >= self.next_file_number {
                    return Err(Error::Corruption(format!(
                        "log number {} out of range [{}, {})",
                        n, self.log_number, self.next_file_number
                    )));
                }
            }
            None => edit.log_number = Some(self.log_number),
        }
        if edit.prev_log_number.is_none() {
            edit.prev_log_number = Some(self.prev_log_number);
        }

        let rotate = match &self.manifest {
            None => true,
            Some(m) => m.size() >= self.max_manifest_file_size,
        };
        let new_manifest_number = if !rotate {
            None
        } else if self.manifest.is_none() {
            Some(self.manifest_file_number)
        } else {
            Some(self.new_file_number())
        };

        edit.next_file_number = Some(self.next_file_number);
        edit.last_sequence = Some(self.last_sequence);

        let mut builder = VersionBuilder::new(Arc::clone(&self.current));
        builder.apply(edit);
        let mut version = builder.build(&self.icmp);
        finalize(&mut version);

        match new_manifest_number {
            Some(number) => {
                let mut writer = ManifestWriter::create(&self.dir, number)?;
                let result = writer
                    .append(&self.snapshot_edit())
                    .and_then(|_| writer.append(edit))
                    .and_then(|_| set_current_file(&self.dir, number));
                if let Err(e) = result {
                    let _ = fs::remove_file(writer.path());
                    return Err(e);
                }
                tracing::debug!(manifest = number, "started new manifest");
                self.manifest = Some(writer);
                self.manifest_file_number = number;
            }
            None => {
                if let Some(writer) = self.manifest.as_mut() {
                    writer.append(edit)?;
                }
            }
        }

        for (level, key) in &edit.compact_pointers {
            self.compact_pointers[*level] = key.clone();
        }
        self.install(version);
        if let Some(n) = edit.log_number {
            self.log_number = n;
        }
        if let Some(n) = edit.prev_log_number {
            self.prev_log_number = n;
        }
        Ok(())
    }

    /// Edit describing the whole current version, written first into a
    /// fresh manifest.
    fn snapshot_edit(&self) -> VersionEdit {
        let mut edit = VersionEdit {
            comparator: Some(self.icmp.user_comparator().name().to_string()),
            ..Default::default()
        };
        for (level, key) in self.compact_pointers.iter().enumerate() {
            if !key.is_empty() {
                edit.set_compact_pointer(level, key.clone());
            }
        }
        for (level, file) in self.current.all_files() {
            edit.add_file(level, FileMetaData::clone(file));
        }
        edit
    }

    fn install(&mut self, version: Version) {
        let old = std::mem::replace(&mut self.current, Arc::new(version));
        if Arc::strong_count(&old) > 1 {
            self.live.push(Arc::downgrade(&old));
        }
        self.live.retain(|v| v.strong_count() > 0);
    }

    pub fn current(&self) -> Arc<Version> {
        Arc::clone(&self.current)
    }

    pub fn new_file_number(&mut self) -> u64 {
        let n = self.next_file_number;
        self.next_file_number += 1;
        n
    }

    /// Make sure `number` is never handed out again.
    pub fn mark_file_number_used(&mut self, number: u64) {
        if self.next_file_number <= number {
            self.next_file_number = number + 1;
        }
    }

    /// Give back a number from `new_file_number` that ended up unused.
    pub fn reuse_file_number(&mut self, number: u64) {
        if self.next_file_number == number + 1 {
            self.next_file_number = number;
        }
    }

    pub fn next_file_number(&self) -> u64 {
        self.next_file_number
    }

    pub fn manifest_file_number(&self) -> u64 {
        self.manifest_file_number
    }

    pub fn last_sequence(&self) -> SequenceNumber {
        self.last_sequence
    }

    pub fn set_last_sequence(&mut self, sequence: SequenceNumber) {
        debug_assert!(sequence >= self.last_sequence);
        self.last_sequence = sequence;
    }

    pub fn log_number(&self) -> u64 {
        self.log_number
    }

    pub fn prev_log_number(&self) -> u64 {
        self.prev_log_number
    }

    /// Numbers of every table referenced by the current version or by an
    /// older version somebody still holds.
    pub fn live_files(&mut self) -> HashSet<u64> {
        self.live.retain(|v| v.strong_count() > 0);
        let mut live: HashSet<u64> = self.current.all_files().map(|(_, f)| f.number).collect();
        for version in self.live.iter().filter_map(Weak::upgrade) {
            live.extend(version.all_files().map(|(_, f)| f.number));
        }
        live
    }

    pub fn num_level_files(&self, level: usize) -> usize {
        self.current.num_files(level)
    }

    pub fn needs_compaction(&self) -> bool {
        self.current.compaction_score >= 1.0
    }

    /// Choose the next size-triggered compaction, if any level is over
    /// its budget.
    ///
    /// Within a level, compactions rotate through the key space: the
    /// first file past the level's compact pointer is picked, wrapping
    /// around at the end.
    pub fn pick_compaction(&mut self) -> Option<Compaction> {
        let current = Arc::clone(&self.current);
        if current.compaction_score < 1.0 {
            return None;
        }
        let level = current.compaction_level;
        let files = current.files(level);
        let pointer = &self.compact_pointers[level];
        let first = files
            .iter()
            .find(|f| pointer.is_empty() || self.icmp.compare(&f.largest, pointer) == Ordering::Greater)
            .or_else(|| files.first())?;

        let mut inputs = vec![Arc::clone(first)];
        if level == 0 {
            // Level-0 files overlap; take every file the range touches.
            let (smallest, largest) = key_range(&self.icmp, &inputs);
            inputs = current.overlapping_inputs(
                0,
                Some(extract_user_key(&smallest)),
                Some(extract_user_key(&largest)),
            );
        }
        Some(self.setup_other_inputs(current, level, inputs))
    }

    /// Compaction of the files of `level` overlapping the user-key range
    /// [begin, end]; `None` when nothing overlaps.
    pub fn compact_range(
        &mut self,
        level: usize,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Option<Compaction> {
        let current = Arc::clone(&self.current);
        let mut inputs = current.overlapping_inputs(level, begin, end);
        if inputs.is_empty() {
            return None;
        }
        // Keep one manual step bounded; the caller loops over the rest.
        if level > 0 {
            let mut total = 0;
            for (i, file) in inputs.iter().enumerate() {
                total += file.file_size;
                if total >= self.max_file_size {
                    inputs.truncate(i + 1);
                    break;
                }
            }
        }
        Some(self.setup_other_inputs(current, level, inputs))
    }

    fn setup_other_inputs(
        &mut self,
        version: Arc<Version>,
        level: usize,
        inputs: Vec<Arc<FileMetaData>>,
    ) -> Compaction {
        let (smallest, largest) = key_range(&self.icmp, &inputs);
        let parents = version.overlapping_inputs(
            level + 1,
            Some(extract_user_key(&smallest)),
            Some(extract_user_key(&largest)),
        );

        let mut all = inputs.clone();
        all.extend(parents.iter().cloned());
        let (all_start, all_limit) = key_range(&self.icmp, &all);
        let grandparents = if level + 2 < NUM_LEVELS {
            version.overlapping_inputs(
                level + 2,
                Some(extract_user_key(&all_start)),
                Some(extract_user_key(&all_limit)),
            )
        } else {
            Vec::new()
        };

        let mut compaction = Compaction::new(
            level,
            [inputs, parents],
            version,
            grandparents,
            self.icmp.clone(),
            self.max_file_size,
        );

        self.compact_pointers[level] = largest.clone();
        compaction.edit.set_compact_pointer(level, largest);
        compaction
    }

    pub fn comparator(&self) -> &InternalKeyComparator {
        &self.icmp
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Smallest and largest internal keys over `files`.
fn key_range(icmp: &InternalKeyComparator, files: &[Arc<FileMetaData>]) -> (Vec<u8>, Vec<u8>) {
    let mut smallest: &[u8] = &[];
    let mut largest: &[u8] = &[];
    for (i, file) in files.iter().enumerate() {
        if i == 0 || icmp.compare(&file.smallest, smallest) == Ordering::Less {
            smallest = &file.smallest;
        }
        if i == 0 || icmp.compare(&file.largest, largest) == Ordering::Greater {
            largest = &file.largest;
        }
    }
    (smallest.to_vec(), largest.to_vec())
}

/// Record the level most in need of compaction.
fn finalize(version: &mut Version) {
    let mut best_level = 0;
    let mut best_score = -1.0;
    for level in 0..NUM_LEVELS - 1 {
        let score = if level == 0 {
            version.num_files(0) as f64 / L0_COMPACTION_TRIGGER as f64
        } else {
            version.level_bytes(level) as f64 / max_bytes_for_level(level)
        };
        if score > best_score {
            best_level = level;
            best_score = score;
        }
    }
    version.compaction_level = best_level;
    version.compaction_score = best_score;
}

/// Accumulates edits on top of a base version.
struct VersionBuilder {
    base: Arc<Version>,
    deleted: Vec<BTreeSet<u64>>,
    added: Vec<Vec<Arc<FileMetaData>>>,
}

impl VersionBuilder {
    fn new(base: Arc<Version>) -> Self {
        VersionBuilder {
            base,
            deleted: vec![BTreeSet::new(); NUM_LEVELS],
            added: vec![Vec::new(); NUM_LEVELS],
        }
    }

    fn apply(&mut self, edit: &VersionEdit) {
        for &(level, number) in &edit.deleted_files {
            self.deleted[level].insert(number);
            self.added[level].retain(|f| f.number != number);
        }
        for (level, file) in &edit.new_files {
            self.deleted[*level].remove(&file.number);
            self.added[*level].push(Arc::new(file.clone()));
        }
    }

    fn build(self, icmp: &InternalKeyComparator) -> Version {
        let mut files = Vec::with_capacity(NUM_LEVELS);
        for level in 0..NUM_LEVELS {
            let mut level_files: Vec<Arc<FileMetaData>> = self
                .base
                .files(level)
                .iter()
                .chain(self.added[level].iter())
                .filter(|f| !self.deleted[level].contains(&f.number))
                .cloned()
                .collect();
            if level == 0 {
                level_files.sort_by_key(|f| f.number);
            } else {
                level_files.sort_by(|a, b| {
                    icmp.compare(&a.smallest, &b.smallest)
                        .then(a.number.cmp(&b.number))
                });
                debug_assert!(
                    level_files
                        .windows(2)
                        .all(|w| icmp.compare(&w[0].largest, &w[1].smallest) == Ordering::Less),
                    "overlapping files in level {}",
                    level
                );
            }
            files.push(level_files);
        }
        Version::from_files(icmp.clone(), files)
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

    fn file(number: u64, smallest: &[u8], largest: &[u8]) -> FileMetaData {
        FileMetaData {
            number,
            file_size: 1000,
            smallest: InternalKey::new(smallest.to_vec(), 100, ValueType::Put).encode(),
            largest: InternalKey::new(largest.to_vec(), 100, ValueType::Put).encode(),
        }
    }

    #[test]
    fn edits_survive_recovery() {
        let dir = tempfile::tempdir().unwrap();
        VersionSet::create_new(dir.path(), &icmp()).unwrap();

        let mut vs = VersionSet::new(dir.path(), icmp(), 1 << 20, 2 << 20);
        vs.recover().unwrap();
        let number = vs.new_file_number();
        let mut edit = VersionEdit::default();
        edit.add_file(0, file(number, b"a", b"m"));
        vs.set_last_sequence(42);
        vs.log_and_apply(&mut edit).unwrap();
        drop(vs);

        let mut vs = VersionSet::new(dir.path(), icmp(), 1 << 20, 2 << 20);
        vs.recover().unwrap();
        assert_eq!(vs.last_sequence(), 42);
        assert_eq!(vs.current().num_files(0), 1);
        assert_eq!(vs.current().files(0)[0].number, number);
        assert!(vs.next_file_number() > number);
    }

    #[test]
    fn comparator_mismatch_is_rejected() {
        struct Reverse;
        impl Comparator for Reverse {
            fn name(&self) -> &str {
                "test.Reverse"
            }
            fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
                b.cmp(a)
            }
        }

        let dir = tempfile::tempdir().unwrap();
        VersionSet::create_new(dir.path(), &icmp()).unwrap();
        let other = InternalKeyComparator::new(Arc::new(Reverse));
        let mut vs = VersionSet::new(dir.path(), other, 1 << 20, 2 << 20);
        assert!(vs.recover().unwrap_err().is_invalid_argument());
    }

    #[test]
    fn level0_file_count_drives_score() {
        let dir = tempfile::tempdir().unwrap();
        VersionSet::create_new(dir.path(), &icmp()).unwrap();
        let mut vs = VersionSet::new(dir.path(), icmp(), 1 << 20, 2 << 20);
        vs.recover().unwrap();

        for i in 0..L0_COMPACTION_TRIGGER {
            let number = vs.new_file_number();
            let mut edit = VersionEdit::default();
            let key = [b'a' + i as u8];
            edit.add_file(0, file(number, &key, &key));
            vs.log_and_apply(&mut edit).unwrap();
        }
        assert!(vs.needs_compaction());
        let compaction = vs.pick_compaction().unwrap();
        assert_eq!(compaction.level, 0);
        assert_eq!(compaction.inputs[0].len(), 1);
    }

    #[test]
    fn small_manifest_rotates() {
        let dir = tempfile::tempdir().unwrap();
        VersionSet::create_new(dir.path(), &icmp()).unwrap();
        let mut vs = VersionSet::new(dir.path(), icmp(), 1, 2 << 20);
        vs.recover().unwrap();

        let first = vs.manifest_file_number();
        let mut edit = VersionEdit::default();
        vs.log_and_apply(&mut edit).unwrap();
        let mut edit = VersionEdit::default();
        vs.log_and_apply(&mut edit).unwrap();
        assert_ne!(vs.manifest_file_number(), first);

        let current = read_current_file(dir.path()).unwrap();
        assert!(current.starts_with(&crate::filename::manifest_file_name(vs.manifest_file_number())));
    }
}
