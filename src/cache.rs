//! Bounded least-recently-used caches.
//!
//! `LruCache` is a charge-based LRU: each entry carries a weight and the
//! cache evicts the least recently used entries until the total weight fits
//! the capacity. The block cache charges bytes; the table cache charges 1
//! per open table.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::sstable::block::Block;

struct Entry<V> {
    value: V,
    charge: usize,
    tick: u64,
}

/// Recency is a monotonically increasing tick; `order` maps tick → key so
/// the oldest entry is the first in the map.
pub struct LruCache<K, V> {
    capacity: usize,
    usage: usize,
    tick: u64,
    entries: HashMap<K, Entry<V>>,
    order: BTreeMap<u64, K>,
}

impl<K: Hash + Eq + Clone, V: Clone> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        LruCache {
            capacity,
            usage: 0,
            tick: 0,
            entries: HashMap::new(),
            order: BTreeMap::new(),
        }
    }

    /// Look up `key` and mark it most recently used.
    pub fn get(&mut self, key: &K) -> Option<V> {
        self.tick += 1;
        let tick = self.tick;
        let entry = self.entries.get_mut(key)?;
        self.order.remove(&entry.tick);
        entry.tick = tick;
        self.order.insert(tick, key.clone());
        Some(entry.value.clone())
    }

    /// Insert or replace `key`, then evict until usage fits the capacity.
    /// An entry heavier than the whole cache is not stored.
    pub fn insert(&mut self, key: K, value: V, charge: usize) {
        self.remove(&key);
        if charge > self.capacity {
            return;
        }
        self.tick += 1;
        self.order.insert(self.tick, key.clone());
        self.entries.insert(
            key,
            Entry {
                value,
                charge,
                tick: self.tick,
            },
        );
        self.usage += charge;

        while self.usage > self.capacity {
            let Some((_, oldest)) = self.order.pop_first() else {
                break;
            };
            if let Some(evicted) = self.entries.remove(&oldest) {
                self.usage -= evicted.charge;
            }
        }
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.tick);
        self.usage -= entry.charge;
        Some(entry.value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total charge of the cached entries.
    pub fn usage(&self) -> usize {
        self.usage
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Shared cache of decoded data blocks keyed by (file number, block offset).
pub struct BlockCache {
    inner: Mutex<LruCache<(u64, u64), Arc<Block>>>,
}

impl BlockCache {
    pub fn new(capacity_bytes: usize) -> Self {
        BlockCache {
            inner: Mutex::new(LruCache::new(capacity_bytes)),
        }
    }

    pub fn get(&self, file_number: u64, offset: u64) -> Option<Arc<Block>> {
        self.inner.lock().get(&(file_number, offset))
    }

    pub fn insert(&self, file_number: u64, offset: u64, block: Arc<Block>) {
        let charge = block.size();
        self.inner.lock().insert((file_number, offset), block, charge);
    }

    pub fn usage(&self) -> usize {
        self.inner.lock().usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = LruCache::new(3);
        cache.insert("a", 1, 1);
        cache.insert("b", 2, 1);
        cache.insert("c", 3, 1);
        assert_eq!(cache.get(&"a"), Some(1));

        cache.insert("d", 4, 1);
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"c"), Some(3));
        assert_eq!(cache.get(&"d"), Some(4));
        assert_eq!(cache.usage(), 3);
    }

    #[test]
    fn charge_based_eviction() {
        let mut cache = LruCache::new(10);
        cache.insert(1, "x", 6);
        cache.insert(2, "y", 6);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&2), Some("y"));

        cache.insert(3, "huge", 11);
        assert_eq!(cache.get(&3), None);
        assert_eq!(cache.usage(), 6);
    }

    #[test]
    fn replace_updates_charge() {
        let mut cache = LruCache::new(10);
        cache.insert(1, "x", 4);
        cache.insert(1, "y", 7);
        assert_eq!(cache.usage(), 7);
        assert_eq!(cache.remove(&1), Some("y"));
        assert!(cache.is_empty());
    }
}
