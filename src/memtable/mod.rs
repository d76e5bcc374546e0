pub mod skiplist;

use std::cmp::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::comparator::{Comparator, InternalKeyComparator};
use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::types::{
    append_internal_key, LookupKey, LookupResult, ParsedInternalKey, SequenceNumber, ValueType,
};
use skiplist::SkipList;

/// In-memory sorted buffer for writes. Wraps a SkipList keyed by internal
/// keys, so several versions of one user key coexist, newest first.
///
/// Every write goes here first. When size exceeds the threshold, the
/// memtable is frozen (becomes immutable) and flushed to a level-0 table.
///
/// Deletes are tombstone entries (`ValueType::Delete`). The key can't just
/// be removed because older versions may exist in SSTables on disk.
///
/// The skip list sits behind a `RwLock`: the write-group leader inserts
/// while readers and iterators on other threads take short read locks.
pub struct MemTable {
    list: RwLock<SkipList>,
    cmp: InternalKeyComparator,
    size_limit: usize,
}

impl MemTable {
    /// Create a new empty memtable with given size limit.
    pub fn new(cmp: InternalKeyComparator, size_limit: usize) -> Self {
        let ordering: Arc<dyn Comparator> = Arc::new(cmp.clone());
        MemTable {
            list: RwLock::new(SkipList::new(ordering)),
            cmp,
            size_limit,
        }
    }

    /// Record one mutation at `sequence`.
    pub fn add(
        &self,
        sequence: SequenceNumber,
        value_type: ValueType,
        user_key: &[u8],
        value: &[u8],
    ) {
        let mut key = Vec::with_capacity(user_key.len() + 8);
        append_internal_key(&mut key, user_key, sequence, value_type);
        self.list.write().insert(key, value.to_vec());
    }

    /// Newest entry for the lookup's user key at or below its sequence.
    ///
    /// `None` means this memtable knows nothing about the key and older
    /// sources must be consulted.
    pub fn get(&self, lookup: &LookupKey) -> Option<LookupResult> {
        let list = self.list.read();
        let idx = list.seek(lookup.internal_key())?;
        let (key, value) = list.entry(idx);
        let parsed = ParsedInternalKey::parse(key).ok()?;
        if self.cmp.compare_user(parsed.user_key, lookup.user_key()) != Ordering::Equal {
            return None;
        }
        Some(match parsed.value_type {
            ValueType::Put => LookupResult::Found(value.to_vec()),
            ValueType::Delete => LookupResult::Deleted,
        })
    }

    /// Sorted iterator over all entries (including tombstones).
    pub fn iter(self: &Arc<Self>) -> MemTableIterator {
        MemTableIterator {
            table: Arc::clone(self),
            current: None,
            key: Vec::new(),
            value: Vec::new(),
        }
    }

    /// Current memory usage in bytes.
    pub fn approximate_memory_usage(&self) -> usize {
        self.list.read().size_bytes()
    }

    /// Check if memtable has reached the flush threshold.
    pub fn is_full(&self) -> bool {
        self.approximate_memory_usage() >= self.size_limit
    }

    pub fn len(&self) -> usize {
        self.list.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.read().is_empty()
    }
}

/// Iterator over a shared memtable.
///
/// Holds the memtable alive through its `Arc` and takes a read lock for
/// each movement. Arena indices stay valid under concurrent inserts, and
/// the current entry is copied out so `key()`/`value()` need no lock.
pub struct MemTableIterator {
    table: Arc<MemTable>,
    current: Option<usize>,
    key: Vec<u8>,
    value: Vec<u8>,
}

impl MemTableIterator {
    fn settle(&mut self, list: &SkipList, idx: Option<usize>) {
        self.current = idx;
        self.key.clear();
        self.value.clear();
        if let Some(i) = idx {
            let (k, v) = list.entry(i);
            self.key.extend_from_slice(k);
            self.value.extend_from_slice(v);
        }
    }
}

impl StorageIterator for MemTableIterator {
    fn key(&self) -> &[u8] {
        &self.key
    }

    fn value(&self) -> &[u8] {
        &self.value
    }

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) -> Result<()> {
        let table = Arc::clone(&self.table);
        let list = table.list.read();
        let next = self.current.and_then(|i| list.next_of(i));
        self.settle(&list, next);
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        let table = Arc::clone(&self.table);
        let list = table.list.read();
        let prev = match self.current {
            Some(_) => list.find_less_than(&self.key),
            None => None,
        };
        self.settle(&list, prev);
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        let table = Arc::clone(&self.table);
        let list = table.list.read();
        let found = list.seek(key);
        self.settle(&list, found);
        Ok(())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        let table = Arc::clone(&self.table);
        let list = table.list.read();
        let first = list.first();
        self.settle(&list, first);
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        let table = Arc::clone(&self.table);
        let list = table.list.read();
        let last = list.find_last();
        self.settle(&list, last);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;

    fn memtable() -> MemTable {
        MemTable::new(InternalKeyComparator::new(Arc::new(BytewiseComparator)), 1 << 20)
    }

    #[test]
    fn lookup_respects_sequence() {
        let mem = memtable();
        mem.add(1, ValueType::Put, b"k", b"v1");
        mem.add(5, ValueType::Put, b"k", b"v5");

        assert_eq!(
            mem.get(&LookupKey::new(b"k", 3)),
            Some(LookupResult::Found(b"v1".to_vec()))
        );
        assert_eq!(
            mem.get(&LookupKey::new(b"k", 9)),
            Some(LookupResult::Found(b"v5".to_vec()))
        );
        assert_eq!(mem.get(&LookupKey::new(b"k", 0)), None);
    }

    #[test]
    fn tombstone_is_reported() {
        let mem = memtable();
        mem.add(1, ValueType::Put, b"k", b"v");
        mem.add(2, ValueType::Delete, b"k", b"");
        assert_eq!(mem.get(&LookupKey::new(b"k", 2)), Some(LookupResult::Deleted));
        assert_eq!(mem.get(&LookupKey::new(b"other", 2)), None);
    }
}
