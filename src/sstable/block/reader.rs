use std::cmp::Ordering;
use std::sync::Arc;

use crate::coding::{decode_fixed32, get_varint32};
use crate::comparator::Comparator;
use crate::error::{Error, Result};
use crate::iterator::StorageIterator;

/// A decoded data or index block.
///
/// Holds the raw bytes and the location of the restart array; entries are
/// parsed lazily by `BlockIterator`.
#[derive(Debug)]
pub struct Block {
    data: Vec<u8>,
    restarts_offset: usize,
    num_restarts: usize,
}

impl Block {
    /// Validate the trailer of a block built by `BlockBuilder`.
    pub fn decode(data: Vec<u8>) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::Corruption("block too short".into()));
        }
        let num_restarts = decode_fixed32(&data[data.len() - 4..]) as usize;
        let max_restarts = (data.len() - 4) / 4;
        if num_restarts == 0 || num_restarts > max_restarts {
            return Err(Error::Corruption(format!(
                "bad restart count {} for block of {} bytes",
                num_restarts,
                data.len()
            )));
        }
        let restarts_offset = data.len() - 4 - num_restarts * 4;
        Ok(Block {
            data,
            restarts_offset,
            num_restarts,
        })
    }

    /// Bytes held by this block; its charge in the block cache.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn iter(self: &Arc<Self>, cmp: Arc<dyn Comparator>) -> BlockIterator {
        BlockIterator {
            block: Arc::clone(self),
            cmp,
            current: self.restarts_offset,
            restart_index: self.num_restarts,
            key: Vec::new(),
            value_start: 0,
            value_len: 0,
        }
    }

    fn restart_point(&self, index: usize) -> usize {
        decode_fixed32(&self.data[self.restarts_offset + index * 4..]) as usize
    }
}

/// Decoded entry header: (shared, non_shared, value_len, header_len).
fn decode_entry(data: &[u8]) -> Result<(usize, usize, usize, usize)> {
    let (shared, a) = get_varint32(data)?;
    let (non_shared, b) = get_varint32(&data[a..])?;
    let (value_len, c) = get_varint32(&data[a + b..])?;
    let header = a + b + c;
    if data.len() < header + non_shared as usize + value_len as usize {
        return Err(Error::Corruption("block entry overruns block".into()));
    }
    Ok((shared as usize, non_shared as usize, value_len as usize, header))
}

/// Cursor over the entries of one block.
///
/// `current` is the offset of the current entry; it equals the restart
/// array offset when the iterator is exhausted. The current key is
/// materialized in `key` because prefix compression means it is not stored
/// contiguously.
pub struct BlockIterator {
    block: Arc<Block>,
    cmp: Arc<dyn Comparator>,
    current: usize,
    restart_index: usize,
    key: Vec<u8>,
    value_start: usize,
    value_len: usize,
}

impl BlockIterator {
    fn next_entry_offset(&self) -> usize {
        self.value_start + self.value_len
    }

    fn invalidate(&mut self) {
        self.current = self.block.restarts_offset;
        self.restart_index = self.block.num_restarts;
        self.key.clear();
        self.value_start = 0;
        self.value_len = 0;
    }

    fn seek_to_restart_point(&mut self, index: usize) {
        self.key.clear();
        self.restart_index = index;
        self.value_start = self.block.restart_point(index);
        self.value_len = 0;
    }

    /// Parse the entry following the current one. Returns false at the end.
    fn parse_next_key(&mut self) -> Result<bool> {
        self.current = self.next_entry_offset();
        let limit = self.block.restarts_offset;
        if self.current >= limit {
            self.invalidate();
            return Ok(false);
        }

        let entry = &self.block.data[self.current..limit];
        let (shared, non_shared, value_len, header) = match decode_entry(entry) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.invalidate();
                return Err(e);
            }
        };
        if self.key.len() < shared {
            self.invalidate();
            return Err(Error::Corruption("block entry shares more than previous key".into()));
        }

        self.key.truncate(shared);
        self.key
            .extend_from_slice(&entry[header..header + non_shared]);
        self.value_start = self.current + header + non_shared;
        self.value_len = value_len;

        while self.restart_index + 1 < self.block.num_restarts
            && self.block.restart_point(self.restart_index + 1) < self.current
        {
            self.restart_index += 1;
        }
        Ok(true)
    }

    /// Full key stored at restart point `index` (shared is always 0 there).
    fn restart_key(&self, index: usize) -> Result<&[u8]> {
        let offset = self.block.restart_point(index);
        let limit = self.block.restarts_offset;
        if offset >= limit {
            return Err(Error::Corruption("restart point past entries".into()));
        }
        let entry = &self.block.data[offset..limit];
        let (shared, non_shared, _, header) = decode_entry(entry)?;
        if shared != 0 {
            return Err(Error::Corruption("restart entry is prefix compressed".into()));
        }
        Ok(&entry[header..header + non_shared])
    }
}

impl StorageIterator for BlockIterator {
    fn key(&self) -> &[u8] {
        &self.key
    }

    fn value(&self) -> &[u8] {
        &self.block.data[self.value_start..self.value_start + self.value_len]
    }

    fn is_valid(&self) -> bool {
        self.current < self.block.restarts_offset
    }

    fn next(&mut self) -> Result<()> {
        if !self.is_valid() {
            return Ok(());
        }
        self.parse_next_key().map(|_| ())
    }

    /// Back up to the restart point before the current entry, then scan
    /// forward until just before it.
    fn prev(&mut self) -> Result<()> {
        if !self.is_valid() {
            return Ok(());
        }
        let original = self.current;
        while self.block.restart_point(self.restart_index) >= original {
            if self.restart_index == 0 {
                self.invalidate();
                return Ok(());
            }
            self.restart_index -= 1;
        }
        self.seek_to_restart_point(self.restart_index);
        loop {
            if !self.parse_next_key()? {
                return Ok(());
            }
            if self.next_entry_offset() >= original {
                return Ok(());
            }
        }
    }

    /// Binary search the restart points for the last one whose key is
    /// below `target`, then scan linearly.
    fn seek(&mut self, target: &[u8]) -> Result<()> {
        let mut left = 0;
        let mut right = self.block.num_restarts - 1;
        while left < right {
            let mid = (left + right).div_ceil(2);
            let compared = self
                .restart_key(mid)
                .map(|key| self.cmp.compare(key, target));
            let ordering = match compared {
                Ok(ordering) => ordering,
                Err(e) => {
                    self.invalidate();
                    return Err(e);
                }
            };
            if ordering == Ordering::Less {
                left = mid;
            } else {
                right = mid - 1;
            }
        }

        self.seek_to_restart_point(left);
        loop {
            if !self.parse_next_key()? {
                return Ok(());
            }
            if self.cmp.compare(&self.key, target) != Ordering::Less {
                return Ok(());
            }
        }
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.seek_to_restart_point(0);
        self.parse_next_key().map(|_| ())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.seek_to_restart_point(self.block.num_restarts - 1);
        while self.parse_next_key()? {
            if self.next_entry_offset() >= self.block.restarts_offset {
                break;
            }
        }
        Ok(())
    }
}
