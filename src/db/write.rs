use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::MutexGuard;

use super::{DbInner, DbState, PendingWrite};
use crate::batch::WriteBatch;
use crate::error::{Error, Result};
use crate::memtable::MemTable;
use crate::options::{L0_SLOWDOWN_WRITES_TRIGGER, L0_STOP_WRITES_TRIGGER};
use crate::wal::WALRecord;

/// Largest group a leader will commit in one WAL record.
const MAX_GROUP_BYTES: usize = 1 << 20;

/// Groups led by a small batch only grow by this much, so a small write is
/// not held back behind a large one.
const SMALL_BATCH_BYTES: usize = 128 << 10;

impl DbInner {
    /// Queue a write and wait until it is committed.
    ///
    /// The writer at the head of the queue becomes the leader: it makes
    /// room in the memtable, gathers the batches queued behind it, appends
    /// the group to the WAL with the state lock released, applies it to the
    /// memtable and finally publishes the new last sequence. Followers are
    /// handed the group's result.
    ///
    /// `None` forces a memtable switch without writing anything.
    pub(super) fn write_internal(&self, batch: Option<WriteBatch>, sync: bool) -> Result<()> {
        let mut state = self.state.lock();
        let id = state.next_writer;
        state.next_writer += 1;
        let force = batch.is_none();
        state.pending.insert(id, PendingWrite { batch, sync });
        state.writers.push_back(id);

        loop {
            if let Some(result) = state.completed.remove(&id) {
                return result;
            }
            if state.writers.front() == Some(&id) {
                break;
            }
            self.write_cv.wait(&mut state);
        }

        let mut result = self.make_room_for_write(&mut state, force);
        let mut last_writer = id;
        if result.is_ok() && !force {
            let (mut group, last) = build_batch_group(&mut state, id);
            last_writer = last;

            let last_sequence = state.versions.last_sequence();
            group.set_sequence(last_sequence + 1);
            let new_last = last_sequence + u64::from(group.count());
            let mem = Arc::clone(&state.mem);

            let written = MutexGuard::unlocked(&mut state, || -> Result<()> {
                let mut wal = self.wal.lock();
                wal.append(&WALRecord::batch(group.contents().to_vec()))?;
                if sync {
                    wal.sync()?;
                }
                drop(wal);
                group.insert_into(&mem)
            });

            match &written {
                Ok(()) => state.versions.set_last_sequence(new_last),
                Err(e) => {
                    tracing::error!(error = %e, "write-ahead log failure; refusing further writes");
                    state.write_error = Some(e.duplicate());
                }
            }
            result = written;
        }
        state.pending.remove(&id);

        while let Some(front) = state.writers.pop_front() {
            if front != id {
                let shared = match &result {
                    Ok(()) => Ok(()),
                    Err(e) => Err(e.duplicate()),
                };
                state.completed.insert(front, shared);
            }
            if front == last_writer {
                break;
            }
        }
        self.write_cv.notify_all();
        result
    }

    /// Ensure the memtable can take the next write.
    ///
    /// Slows writers down by 1ms once level 0 holds
    /// `L0_SLOWDOWN_WRITES_TRIGGER` files, waits while the previous memtable
    /// is still being flushed or level 0 is at `L0_STOP_WRITES_TRIGGER`,
    /// and otherwise switches to a fresh memtable and WAL once the current
    /// one is full.
    fn make_room_for_write(&self, state: &mut MutexGuard<'_, DbState>, force: bool) -> Result<()> {
        let mut allow_delay = !force;
        let mut force = force;
        loop {
            if let Some(e) = &state.write_error {
                return Err(Error::Background(format!("writes disabled after WAL failure: {}", e)));
            }
            if self.shutting_down.load(AtomicOrdering::SeqCst) {
                return Err(Error::Background("database is closing".into()));
            }

            let level0 = state.versions.num_level_files(0);
            if allow_delay && level0 >= L0_SLOWDOWN_WRITES_TRIGGER {
                // Yield 1ms per write to the compaction thread.
                MutexGuard::unlocked(state, || thread::sleep(Duration::from_millis(1)));
                allow_delay = false;
                continue;
            }
            if !force && !state.mem.is_full() {
                return Ok(());
            }
            if force && state.mem.is_empty() {
                return Ok(());
            }
            if state.imm.is_some() || level0 >= L0_STOP_WRITES_TRIGGER {
                if let Some(e) = &state.bg_error {
                    return Err(Error::Background(format!("memtable flush failed: {}", e)));
                }
                if state.imm.is_none() {
                    tracing::info!(level0_files = level0, "too many level-0 files; waiting");
                }
                self.maybe_schedule();
                self.bg_cv
                    .wait_for(state, self.options.background_retry_interval);
                continue;
            }

            let number = state.versions.new_file_number();
            let rotated = self.wal.lock().rotate(number);
            if let Err(e) = rotated {
                state.versions.reuse_file_number(number);
                tracing::error!(error = %e, log = number, "could not create new log");
                state.write_error = Some(e.duplicate());
                return Err(e);
            }
            state.log_number = number;
            let fresh = Arc::new(MemTable::new(self.icmp.clone(), self.options.write_buffer_size));
            let full = std::mem::replace(&mut state.mem, fresh);
            state.imm = Some(full);
            self.has_imm.store(true, AtomicOrdering::SeqCst);
            force = false;
            self.maybe_schedule();
        }
    }

    /// Block until no immutable memtable is waiting to be flushed.
    pub(super) fn wait_for_flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        while state.imm.is_some() {
            if let Some(e) = &state.bg_error {
                return Err(Error::Background(format!("memtable flush failed: {}", e)));
            }
            if self.shutting_down.load(AtomicOrdering::SeqCst) {
                return Err(Error::Background("database is closing".into()));
            }
            self.bg_cv
                .wait_for(&mut state, self.options.background_retry_interval);
        }
        Ok(())
    }
}

/// Take the leader's batch and append the batches of compatible writers
/// queued behind it. Returns the group and the id of the last writer in it.
fn build_batch_group(state: &mut DbState, leader: u64) -> (WriteBatch, u64) {
    let (mut group, leader_sync) = match state.pending.get_mut(&leader) {
        Some(write) => (write.batch.take().unwrap_or_default(), write.sync),
        None => (WriteBatch::new(), false),
    };

    let mut size = group.approximate_size();
    let max_size = if size <= SMALL_BATCH_BYTES {
        size + SMALL_BATCH_BYTES
    } else {
        MAX_GROUP_BYTES
    };

    let mut last = leader;
    let mut members = Vec::new();
    for &id in state.writers.iter().skip(1) {
        let Some(write) = state.pending.get(&id) else {
            break;
        };
        // A sync write cannot ride along with a leader that will not sync.
        if write.sync && !leader_sync {
            break;
        }
        let Some(batch) = write.batch.as_ref() else {
            break;
        };
        size += batch.approximate_size();
        if size > max_size {
            break;
        }
        group.append(batch);
        members.push(id);
        last = id;
    }
    for id in members {
        state.pending.remove(&id);
    }
    (group, last)
}
