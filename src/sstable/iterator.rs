use std::sync::Arc;

use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::options::ReadFlags;
use crate::sstable::block::reader::BlockIterator;
use crate::sstable::reader::SSTable;

/// Two-level iterator over a table: the in-memory index picks a data
/// block, a `BlockIterator` walks inside it.
///
/// Blocks are loaded lazily as iteration crosses block boundaries, and
/// empty blocks are skipped in either direction.
pub struct SSTableIterator {
    table: Arc<SSTable>,
    flags: ReadFlags,
    block_idx: usize,
    block_iter: Option<BlockIterator>,
}

impl SSTableIterator {
    pub fn new(table: Arc<SSTable>, flags: ReadFlags) -> Self {
        SSTableIterator {
            table,
            flags,
            block_idx: 0,
            block_iter: None,
        }
    }

    /// Load the block at `block_idx`, or clear the block iterator if the
    /// index is out of range.
    fn init_block(&mut self) -> Result<()> {
        self.block_iter = match self.table.index().get(self.block_idx) {
            Some(entry) => {
                let handle = entry.handle;
                let block = self.table.read_block(&handle, self.flags)?;
                Some(block.iter(Arc::clone(self.table.comparator())))
            }
            None => None,
        };
        Ok(())
    }

    fn block_valid(&self) -> bool {
        self.block_iter.as_ref().is_some_and(|b| b.is_valid())
    }

    fn skip_empty_blocks_forward(&mut self) -> Result<()> {
        while !self.block_valid() {
            if self.block_idx + 1 >= self.table.index().len() {
                self.block_iter = None;
                self.block_idx = self.table.index().len();
                return Ok(());
            }
            self.block_idx += 1;
            self.init_block()?;
            if let Some(block) = self.block_iter.as_mut() {
                block.seek_to_first()?;
            }
        }
        Ok(())
    }

    fn skip_empty_blocks_backward(&mut self) -> Result<()> {
        while !self.block_valid() {
            if self.block_idx == 0 || self.block_idx > self.table.index().len() {
                self.block_iter = None;
                return Ok(());
            }
            self.block_idx -= 1;
            self.init_block()?;
            if let Some(block) = self.block_iter.as_mut() {
                block.seek_to_last()?;
            }
        }
        Ok(())
    }

    /// Reset to an invalid position before propagating an error.
    fn fail<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.block_iter = None;
        }
        result
    }
}

impl StorageIterator for SSTableIterator {
    fn key(&self) -> &[u8] {
        match &self.block_iter {
            Some(block) => block.key(),
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match &self.block_iter {
            Some(block) => block.value(),
            None => &[],
        }
    }

    fn is_valid(&self) -> bool {
        self.block_valid()
    }

    fn next(&mut self) -> Result<()> {
        let result = match self.block_iter.as_mut() {
            Some(block) => block.next(),
            None => return Ok(()),
        };
        let result = result.and_then(|_| self.skip_empty_blocks_forward());
        self.fail(result)
    }

    fn prev(&mut self) -> Result<()> {
        let result = match self.block_iter.as_mut() {
            Some(block) => block.prev(),
            None => return Ok(()),
        };
        let result = result.and_then(|_| self.skip_empty_blocks_backward());
        self.fail(result)
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        self.block_idx = self.table.find_block(key);
        let result = self.init_block().and_then(|_| {
            if let Some(block) = self.block_iter.as_mut() {
                block.seek(key)?;
            }
            self.skip_empty_blocks_forward()
        });
        self.fail(result)
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.block_idx = 0;
        let result = self.init_block().and_then(|_| {
            if let Some(block) = self.block_iter.as_mut() {
                block.seek_to_first()?;
            }
            self.skip_empty_blocks_forward()
        });
        self.fail(result)
    }

    fn seek_to_last(&mut self) -> Result<()> {
        let len = self.table.index().len();
        if len == 0 {
            self.block_iter = None;
            return Ok(());
        }
        self.block_idx = len - 1;
        let result = self.init_block().and_then(|_| {
            if let Some(block) = self.block_iter.as_mut() {
                block.seek_to_last()?;
            }
            self.skip_empty_blocks_backward()
        });
        self.fail(result)
    }
}
