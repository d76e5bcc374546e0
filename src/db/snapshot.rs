use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::SequenceNumber;
use crate::version::Version;

/// Sequence numbers pinned by live snapshots, with reference counts.
///
/// Compaction asks for the oldest one: versions newer than it may be
/// merged away, anything a snapshot can still see must survive.
#[derive(Debug, Default)]
pub(crate) struct SnapshotList {
    pinned: Mutex<BTreeMap<SequenceNumber, usize>>,
}

impl SnapshotList {
    pub(crate) fn acquire(&self, sequence: SequenceNumber) {
        *self.pinned.lock().entry(sequence).or_insert(0) += 1;
    }

    pub(crate) fn release(&self, sequence: SequenceNumber) {
        let mut pinned = self.pinned.lock();
        if let Some(count) = pinned.get_mut(&sequence) {
            *count -= 1;
            if *count == 0 {
                pinned.remove(&sequence);
            }
        }
    }

    pub(crate) fn oldest(&self) -> Option<SequenceNumber> {
        self.pinned.lock().keys().next().copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.pinned.lock().values().sum()
    }
}

/// A consistent read view of the database.
///
/// Reads through `ReadOptions::at_snapshot` see exactly the writes that
/// were acknowledged before the snapshot was taken. The snapshot also
/// keeps the tables of its version on disk. Dropping it releases both.
pub struct Snapshot {
    sequence: SequenceNumber,
    list: Arc<SnapshotList>,
    _version: Arc<Version>,
}

impl Snapshot {
    pub(crate) fn new(sequence: SequenceNumber, list: Arc<SnapshotList>, version: Arc<Version>) -> Self {
        list.acquire(sequence);
        Snapshot {
            sequence,
            list,
            _version: version,
        }
    }

    /// Sequence number of the last write visible through this snapshot.
    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.list.release(self.sequence);
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("sequence", &self.sequence)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_follows_releases() {
        let list = SnapshotList::default();
        list.acquire(10);
        list.acquire(5);
        list.acquire(5);
        assert_eq!(list.oldest(), Some(5));
        assert_eq!(list.len(), 3);

        list.release(5);
        assert_eq!(list.oldest(), Some(5));
        list.release(5);
        assert_eq!(list.oldest(), Some(10));
        list.release(10);
        assert_eq!(list.oldest(), None);
    }
}
