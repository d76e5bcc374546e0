use std::cmp::Ordering;
use std::fs;
use std::path::Path;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::MutexGuard;

use super::{DbInner, DbState, ManualCompaction};
use crate::compaction::{BackgroundWork, Compaction, CompactionMessage, CompactionStats};
use crate::comparator::Comparator;
use crate::error::{Error, Result};
use crate::filename::{parse_file_name, table_file_path, FileType};
use crate::iterator::{LevelIterator, MergeIterator, StorageIterator};
use crate::manifest::VersionEdit;
use crate::memtable::MemTable;
use crate::options::ReadFlags;
use crate::sstable::{SSTableBuilder, TableCache};
use crate::types::{extract_user_key, ParsedInternalKey, SequenceNumber, ValueType, MAX_SEQUENCE_NUMBER};
use crate::version::FileMetaData;

impl BackgroundWork for DbInner {
    fn run(&self) {
        self.background_call();
    }
}

/// Write every entry of `iter` into table `number`.
///
/// Returns `None` without leaving a file behind when the iterator is
/// empty. The finished table is opened through the cache once to make
/// sure it is readable before anyone references it.
pub(crate) fn build_table(
    dir: &Path,
    table_cache: &TableCache,
    number: u64,
    mut iter: impl StorageIterator,
) -> Result<Option<FileMetaData>> {
    iter.seek_to_first()?;
    if !iter.is_valid() {
        return Ok(None);
    }

    let path = table_file_path(dir, number);
    let mut builder = SSTableBuilder::new(&path, number, table_cache.options())?;
    let smallest = iter.key().to_vec();
    let mut largest = Vec::new();
    let added = (|| -> Result<()> {
        while iter.is_valid() {
            builder.add(iter.key(), iter.value())?;
            largest.clear();
            largest.extend_from_slice(iter.key());
            iter.next()?;
        }
        Ok(())
    })();
    if let Err(e) = added {
        let _ = builder.abandon();
        return Err(e);
    }

    let built = builder
        .finish()
        .and_then(|meta| table_cache.get_table(number).map(|_| meta));
    match built {
        Ok(meta) => Ok(Some(FileMetaData {
            number,
            file_size: meta.file_size,
            smallest,
            largest,
        })),
        Err(e) => {
            table_cache.evict(number);
            let _ = fs::remove_file(&path);
            Err(e)
        }
    }
}

/// One compaction output being written.
struct Output {
    builder: SSTableBuilder,
    number: u64,
    smallest: Vec<u8>,
    largest: Vec<u8>,
}

impl DbInner {
    /// Wake the worker unless a wake-up is already pending.
    pub(super) fn maybe_schedule(&self) {
        if self.shutting_down.load(AtomicOrdering::SeqCst) {
            return;
        }
        if !self.bg_scheduled.swap(true, AtomicOrdering::SeqCst) {
            let _ = self.scheduler.send(CompactionMessage::Schedule);
        }
    }

    fn background_call(&self) {
        self.bg_scheduled.store(false, AtomicOrdering::SeqCst);
        let mut state = self.state.lock();
        loop {
            if self.shutting_down.load(AtomicOrdering::SeqCst) {
                break;
            }
            let progressed = match self.background_step(&mut state) {
                Ok(progressed) => progressed,
                Err(e) => {
                    tracing::error!(error = %e, "background work failed; will retry");
                    false
                }
            };
            self.bg_cv.notify_all();
            if !progressed {
                break;
            }
        }
        self.bg_cv.notify_all();
    }

    /// Run one unit of background work: a memtable flush, one step of a
    /// manual compaction, or one size-triggered compaction, in that order
    /// of priority. Returns whether anything was done.
    fn background_step(&self, state: &mut MutexGuard<'_, DbState>) -> Result<bool> {
        if state.imm.is_some() {
            self.compact_memtable(state)?;
            return Ok(true);
        }

        if let Some(manual) = state.manual.as_ref().filter(|m| !m.done) {
            let level = manual.level;
            let begin = manual.begin.clone();
            let end = manual.end.clone();
            let compaction = state
                .versions
                .compact_range(level, begin.as_deref(), end.as_deref());
            let result = match compaction {
                None => {
                    if let Some(manual) = state.manual.as_mut() {
                        manual.done = true;
                    }
                    Ok(())
                }
                Some(compaction) => {
                    // Continue after the last key this step covered.
                    let resume = compaction.inputs[0]
                        .last()
                        .map(|f| extract_user_key(&f.largest).to_vec());
                    let result = self.run_compaction(state, compaction);
                    if let Some(manual) = state.manual.as_mut() {
                        match (&resume, &manual.end) {
                            (Some(resume), Some(end))
                                if self.icmp.compare_user(resume, end) != Ordering::Less =>
                            {
                                manual.done = true;
                            }
                            (Some(resume), _) => manual.begin = Some(resume.clone()),
                            (None, _) => manual.done = true,
                        }
                    }
                    result
                }
            };
            if let Err(e) = result {
                if let Some(manual) = state.manual.as_mut() {
                    manual.done = true;
                    manual.error = Some(e.duplicate());
                }
                return Err(e);
            }
            return Ok(true);
        }

        if let Some(compaction) = state.versions.pick_compaction() {
            self.run_compaction(state, compaction)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Write the immutable memtable to a level-0 table and drop the logs it
    /// made obsolete.
    fn compact_memtable(&self, state: &mut MutexGuard<'_, DbState>) -> Result<()> {
        let Some(imm) = state.imm.clone() else {
            return Ok(());
        };
        let start = Instant::now();
        let mut edit = VersionEdit::default();
        let result = self
            .write_level0_table(state, &imm, &mut edit)
            .and_then(|written| {
                edit.log_number = Some(state.log_number);
                edit.prev_log_number = Some(0);
                state.versions.log_and_apply(&mut edit)?;
                Ok(written)
            });

        match result {
            Ok(written) => {
                state.imm = None;
                self.has_imm.store(false, AtomicOrdering::SeqCst);
                state.bg_error = None;
                state.stats[0].add(&CompactionStats {
                    micros: start.elapsed().as_micros() as u64,
                    bytes_read: 0,
                    bytes_written: written,
                    count: 1,
                });
                self.delete_obsolete_files(state);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "memtable flush failed");
                state.bg_error = Some(e.duplicate());
                Err(e)
            }
        }
    }

    /// Build a level-0 table from `mem` with the state lock released and
    /// record it in `edit`. Returns the bytes written.
    fn write_level0_table(
        &self,
        state: &mut MutexGuard<'_, DbState>,
        mem: &Arc<MemTable>,
        edit: &mut VersionEdit,
    ) -> Result<u64> {
        let number = state.versions.new_file_number();
        state.pending_outputs.insert(number);
        let entries = mem.len();
        let built = MutexGuard::unlocked(state, || {
            build_table(&self.dir, &self.table_cache, number, mem.iter())
        });
        state.pending_outputs.remove(&number);

        let written = match built? {
            Some(file) => {
                let bytes = file.file_size;
                tracing::info!(table = number, entries, bytes, "flushed memtable to level 0");
                edit.add_file(0, file);
                bytes
            }
            None => 0,
        };
        Ok(written)
    }

    /// Carry out `compaction` and install its result.
    fn run_compaction(
        &self,
        state: &mut MutexGuard<'_, DbState>,
        mut compaction: Compaction,
    ) -> Result<()> {
        let level = compaction.level;
        if compaction.is_trivial_move() {
            let file = Arc::clone(&compaction.inputs[0][0]);
            compaction.edit.remove_file(level, file.number);
            compaction.edit.add_file(level + 1, FileMetaData::clone(&file));
            state.versions.log_and_apply(&mut compaction.edit)?;
            tracing::info!(
                table = file.number,
                from = level,
                to = level + 1,
                bytes = file.file_size,
                levels = %state.versions.current().level_summary(),
                "moved table"
            );
            return Ok(());
        }

        let start = Instant::now();
        let smallest_snapshot = self
            .snapshots
            .oldest()
            .unwrap_or_else(|| state.versions.last_sequence());
        tracing::info!(
            level,
            inputs = compaction.num_input_files(0),
            parents = compaction.num_input_files(1),
            "compacting"
        );

        let outputs = self.do_compaction_work(state, &mut compaction, smallest_snapshot)?;

        compaction.add_input_deletions();
        let mut bytes_written = 0;
        for file in &outputs {
            bytes_written += file.file_size;
            compaction.edit.add_file(level + 1, file.clone());
        }
        let installed = state.versions.log_and_apply(&mut compaction.edit);
        for file in &outputs {
            state.pending_outputs.remove(&file.number);
        }
        if let Err(e) = installed {
            for file in &outputs {
                let _ = fs::remove_file(table_file_path(&self.dir, file.number));
            }
            return Err(e);
        }

        let stats = CompactionStats {
            micros: start.elapsed().as_micros() as u64,
            bytes_read: compaction.input_bytes(0) + compaction.input_bytes(1),
            bytes_written,
            count: 1,
        };
        state.stats[level + 1].add(&stats);
        tracing::info!(
            level,
            outputs = outputs.len(),
            bytes_read = stats.bytes_read,
            bytes_written,
            levels = %state.versions.current().level_summary(),
            "compaction finished"
        );
        self.delete_obsolete_files(state);
        Ok(())
    }

    /// Merge the inputs of `compaction` into new tables for the next level.
    ///
    /// Runs with the state lock released. For each user key, entries are
    /// visited newest first; an entry is dropped when a newer entry of the
    /// same key is already visible to every snapshot, and a tombstone is
    /// dropped when every snapshot sees it and no deeper level can hold the
    /// key. On failure every output written so far is removed.
    fn do_compaction_work(
        &self,
        state: &mut MutexGuard<'_, DbState>,
        compaction: &mut Compaction,
        smallest_snapshot: SequenceNumber,
    ) -> Result<Vec<FileMetaData>> {
        let mut children: Vec<Box<dyn StorageIterator>> = Vec::new();
        // Compaction reads every block once; keep them out of the cache.
        let flags = ReadFlags {
            verify_checksums: self.options.paranoid_checks,
            fill_cache: false,
        };
        for which in 0..2 {
            let level = compaction.level + which;
            if level == 0 {
                for file in &compaction.inputs[which] {
                    children.push(Box::new(self.table_cache.iter(file.number, flags)?));
                }
            } else if !compaction.inputs[which].is_empty() {
                children.push(Box::new(LevelIterator::new(
                    Arc::new(self.icmp.clone()),
                    compaction.inputs[which].clone(),
                    Arc::clone(&self.table_cache),
                    flags,
                )));
            }
        }
        let mut input = MergeIterator::new(Arc::new(self.icmp.clone()), children);

        let mut outputs: Vec<FileMetaData> = Vec::new();
        let mut current: Option<Output> = None;
        let merged = MutexGuard::unlocked(state, || {
            self.merge_inputs(compaction, &mut input, smallest_snapshot, &mut current, &mut outputs)
        });

        if let Err(e) = merged {
            if let Some(output) = current.take() {
                let _ = output.builder.abandon();
                state.pending_outputs.remove(&output.number);
            }
            for file in &outputs {
                state.pending_outputs.remove(&file.number);
                self.table_cache.evict(file.number);
                let _ = fs::remove_file(table_file_path(&self.dir, file.number));
            }
            return Err(e);
        }
        Ok(outputs)
    }

    fn merge_inputs(
        &self,
        compaction: &mut Compaction,
        input: &mut MergeIterator,
        smallest_snapshot: SequenceNumber,
        current: &mut Option<Output>,
        outputs: &mut Vec<FileMetaData>,
    ) -> Result<()> {
        let ucmp = Arc::clone(self.icmp.user_comparator());
        let mut current_user_key: Option<Vec<u8>> = None;
        let mut last_sequence_for_key = MAX_SEQUENCE_NUMBER;

        input.seek_to_first()?;
        while input.is_valid() {
            if self.shutting_down.load(AtomicOrdering::SeqCst) {
                return Err(Error::Background("database closed during compaction".into()));
            }
            // A waiting memtable blocks writers; flush it first.
            if self.has_imm.load(AtomicOrdering::SeqCst) {
                let mut state = self.state.lock();
                if let Err(e) = self.compact_memtable(&mut state) {
                    tracing::warn!(error = %e, "memtable flush during compaction failed");
                }
                self.bg_cv.notify_all();
            }

            let key = input.key();
            let stop_before = compaction.should_stop_before(key);
            if let Some(output) = current.as_ref() {
                let full = output.builder.file_size() >= compaction.max_output_file_size();
                let new_user_key = ucmp.compare(
                    extract_user_key(key),
                    extract_user_key(&output.largest),
                ) != Ordering::Equal;
                if (full || stop_before) && new_user_key {
                    self.finish_output(current, outputs)?;
                }
            }

            let mut drop_entry = false;
            match ParsedInternalKey::parse(key) {
                Err(_) => {
                    // Keep unparsable keys so the damage stays visible.
                    current_user_key = None;
                    last_sequence_for_key = MAX_SEQUENCE_NUMBER;
                }
                Ok(entry) => {
                    let first_occurrence = current_user_key
                        .as_deref()
                        .is_none_or(|k| ucmp.compare(entry.user_key, k) != Ordering::Equal);
                    if first_occurrence {
                        current_user_key = Some(entry.user_key.to_vec());
                        last_sequence_for_key = MAX_SEQUENCE_NUMBER;
                    }

                    if last_sequence_for_key <= smallest_snapshot {
                        // Shadowed by a newer entry every snapshot can see.
                        drop_entry = true;
                    } else if entry.value_type == ValueType::Delete
                        && entry.sequence <= smallest_snapshot
                        && compaction.is_base_level_for_key(entry.user_key)
                    {
                        drop_entry = true;
                    }
                    last_sequence_for_key = entry.sequence;
                }
            }

            if !drop_entry {
                if current.is_none() {
                    *current = Some(self.open_output(key)?);
                }
                if let Some(output) = current.as_mut() {
                    output.builder.add(key, input.value())?;
                    output.largest.clear();
                    output.largest.extend_from_slice(key);
                }
            }
            input.next()?;
        }

        if current.is_some() {
            self.finish_output(current, outputs)?;
        }
        Ok(())
    }

    fn open_output(&self, first_key: &[u8]) -> Result<Output> {
        let number = {
            let mut state = self.state.lock();
            let number = state.versions.new_file_number();
            state.pending_outputs.insert(number);
            number
        };
        let path = table_file_path(&self.dir, number);
        let builder = match SSTableBuilder::new(&path, number, self.table_cache.options()) {
            Ok(builder) => builder,
            Err(e) => {
                self.state.lock().pending_outputs.remove(&number);
                return Err(e);
            }
        };
        Ok(Output {
            builder,
            number,
            smallest: first_key.to_vec(),
            largest: first_key.to_vec(),
        })
    }

    fn finish_output(&self, current: &mut Option<Output>, outputs: &mut Vec<FileMetaData>) -> Result<()> {
        let Some(output) = current.take() else {
            return Ok(());
        };
        let Output {
            builder,
            number,
            smallest,
            largest,
        } = output;
        let entries = builder.entry_count();
        let finished = builder
            .finish()
            .and_then(|meta| self.table_cache.get_table(number).map(|_| meta));
        match finished {
            Ok(meta) => {
                tracing::debug!(table = number, entries, bytes = meta.file_size, "compaction output");
                outputs.push(FileMetaData {
                    number,
                    file_size: meta.file_size,
                    smallest,
                    largest,
                });
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(table_file_path(&self.dir, number));
                self.state.lock().pending_outputs.remove(&number);
                Err(e)
            }
        }
    }

    /// Queue a manual compaction of `level` over [begin, end] and wait for
    /// the worker to finish it.
    pub(super) fn manual_compaction(
        &self,
        level: usize,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        while state.manual.is_some() {
            if self.shutting_down.load(AtomicOrdering::SeqCst) {
                return Err(Error::Background("database is closing".into()));
            }
            self.bg_cv
                .wait_for(&mut state, self.options.background_retry_interval);
        }
        state.manual = Some(ManualCompaction {
            level,
            begin: begin.map(|b| b.to_vec()),
            end: end.map(|e| e.to_vec()),
            done: false,
            error: None,
        });
        self.maybe_schedule();

        loop {
            if state.manual.as_ref().is_some_and(|m| m.done) {
                let finished = state.manual.take();
                self.bg_cv.notify_all();
                return match finished.and_then(|m| m.error) {
                    Some(e) => Err(e),
                    None => Ok(()),
                };
            }
            if self.shutting_down.load(AtomicOrdering::SeqCst) {
                state.manual = None;
                return Err(Error::Background("database is closing".into()));
            }
            self.bg_cv
                .wait_for(&mut state, self.options.background_retry_interval);
        }
    }

    /// Remove files no live version, pending output or recovery needs.
    pub(super) fn delete_obsolete_files(&self, state: &mut MutexGuard<'_, DbState>) {
        let mut live = state.versions.live_files();
        live.extend(state.pending_outputs.iter().copied());
        let log_number = state.versions.log_number();
        let prev_log_number = state.versions.prev_log_number();
        let manifest_number = state.versions.manifest_file_number();

        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "could not list database directory");
                return;
            }
        };
        let mut obsolete = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some((file_type, number)) = parse_file_name(name) else {
                continue;
            };
            let keep = match file_type {
                FileType::Log => number >= log_number || number == prev_log_number,
                FileType::Manifest => number >= manifest_number,
                FileType::Table | FileType::Temp => live.contains(&number),
                FileType::Current | FileType::Lock => true,
            };
            if !keep {
                if file_type == FileType::Table {
                    self.table_cache.evict(number);
                }
                obsolete.push(entry.path());
            }
        }

        MutexGuard::unlocked(state, || {
            for path in obsolete {
                match fs::remove_file(&path) {
                    Ok(()) => tracing::debug!(file = %path.display(), "deleted obsolete file"),
                    Err(e) => tracing::warn!(file = %path.display(), error = %e, "could not delete obsolete file"),
                }
            }
        });
    }
}
