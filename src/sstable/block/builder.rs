use crate::coding::{put_fixed32, put_varint32};

/// Accumulates sorted key-value pairs and serializes them into a block.
///
/// A block is typically 4KB (matching OS page size / SSD block size).
/// Keys are prefix-compressed against the previous key. Every
/// `restart_interval` entries the full key is stored again and the entry's
/// offset is recorded as a restart point, so a reader can binary search
/// the restart points and then scan at most `restart_interval` entries.
///
/// On-disk layout of a block:
/// ```text
/// ┌──────────────────────────────────────────────────────────────────┐
/// │ Entry 0: [shared(v)][non_shared(v)][val_len(v)][key delta][value] │
/// │ Entry 1: ...                                                      │
/// │ Entry N: ...                                                      │
/// ├──────────────────────────────────────────────────────────────────┤
/// │ Restart array: [off_0(4B)][off_1(4B)]...[off_R(4B)]               │
/// │ Num restarts (4B)                                                 │
/// └──────────────────────────────────────────────────────────────────┘
/// ```
/// `(v)` marks varint32 fields. `shared` is 0 at every restart point.
pub struct BlockBuilder {
    data: Vec<u8>,
    restarts: Vec<u32>,
    counter: usize,
    num_entries: usize,
    last_key: Vec<u8>,
    block_size: usize,
    restart_interval: usize,
}

impl BlockBuilder {
    /// Create a new block builder with target block size and the default
    /// restart interval of 16.
    pub fn new(block_size: usize) -> Self {
        Self::with_restart_interval(block_size, 16)
    }

    pub fn with_restart_interval(block_size: usize, restart_interval: usize) -> Self {
        BlockBuilder {
            data: Vec::new(),
            restarts: vec![0],
            counter: 0,
            num_entries: 0,
            last_key: Vec::new(),
            block_size,
            restart_interval: restart_interval.max(1),
        }
    }

    /// Add a key-value pair to the block.
    /// Returns false if the block is full (entry doesn't fit).
    /// First entry is always accepted even if it exceeds block_size.
    /// Entries MUST be added in sorted key order.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> bool {
        let restart = self.counter >= self.restart_interval;
        let shared = if restart {
            0
        } else {
            self.last_key
                .iter()
                .zip(key)
                .take_while(|(a, b)| a == b)
                .count()
        };
        let non_shared = key.len() - shared;

        // Upper bound: three 5-byte varints plus a possible new restart slot.
        let entry_size = 15 + non_shared + value.len() + if restart { 4 } else { 0 };
        if self.num_entries > 0 && self.estimated_size() + entry_size > self.block_size {
            return false;
        }

        if restart {
            self.restarts.push(self.data.len() as u32);
            self.counter = 0;
        }

        put_varint32(&mut self.data, shared as u32);
        put_varint32(&mut self.data, non_shared as u32);
        put_varint32(&mut self.data, value.len() as u32);
        self.data.extend_from_slice(&key[shared..]);
        self.data.extend_from_slice(value);

        self.last_key.truncate(shared);
        self.last_key.extend_from_slice(&key[shared..]);
        self.counter += 1;
        self.num_entries += 1;
        true
    }

    /// Finalize the block: append restart array and restart count.
    pub fn build(self) -> Vec<u8> {
        let mut block = self.data;
        for offset in &self.restarts {
            put_fixed32(&mut block, *offset);
        }
        put_fixed32(&mut block, self.restarts.len() as u32);
        block
    }

    /// Current estimated size of the block (data + restarts + count).
    pub fn estimated_size(&self) -> usize {
        self.data.len() + self.restarts.len() * 4 + 4
    }

    /// Whether the block is empty (no entries added).
    pub fn is_empty(&self) -> bool {
        self.num_entries == 0
    }

    pub fn len(&self) -> usize {
        self.num_entries
    }

    /// The most recently added key.
    pub fn last_key(&self) -> &[u8] {
        &self.last_key
    }
}
