use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::{Comparator, InternalKeyComparator};
use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::options::ReadFlags;
use crate::sstable::{SSTableIterator, TableCache};
use crate::version::FileMetaData;

/// Concatenating iterator over the files of one sorted level (>= 1).
///
/// The files cover disjoint, increasing key ranges, so only one table is
/// open at a time. Tables are fetched through the table cache as the
/// cursor crosses file boundaries.
pub struct LevelIterator {
    icmp: Arc<InternalKeyComparator>,
    files: Vec<Arc<FileMetaData>>,
    cache: Arc<TableCache>,
    flags: ReadFlags,
    file_idx: usize,
    table_iter: Option<SSTableIterator>,
}

impl LevelIterator {
    pub fn new(
        icmp: Arc<InternalKeyComparator>,
        files: Vec<Arc<FileMetaData>>,
        cache: Arc<TableCache>,
        flags: ReadFlags,
    ) -> Self {
        LevelIterator {
            icmp,
            files,
            cache,
            flags,
            file_idx: 0,
            table_iter: None,
        }
    }

    fn open_file(&mut self) -> Result<()> {
        self.table_iter = match self.files.get(self.file_idx) {
            Some(file) => Some(self.cache.iter(file.number, self.flags)?),
            None => None,
        };
        Ok(())
    }

    fn table_valid(&self) -> bool {
        self.table_iter.as_ref().is_some_and(|t| t.is_valid())
    }

    fn skip_empty_files_forward(&mut self) -> Result<()> {
        while !self.table_valid() {
            if self.file_idx + 1 >= self.files.len() {
                self.table_iter = None;
                self.file_idx = self.files.len();
                return Ok(());
            }
            self.file_idx += 1;
            self.open_file()?;
            if let Some(table) = self.table_iter.as_mut() {
                table.seek_to_first()?;
            }
        }
        Ok(())
    }

    fn skip_empty_files_backward(&mut self) -> Result<()> {
        while !self.table_valid() {
            if self.file_idx == 0 || self.file_idx > self.files.len() {
                self.table_iter = None;
                return Ok(());
            }
            self.file_idx -= 1;
            self.open_file()?;
            if let Some(table) = self.table_iter.as_mut() {
                table.seek_to_last()?;
            }
        }
        Ok(())
    }

    fn fail<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.table_iter = None;
        }
        result
    }
}

impl StorageIterator for LevelIterator {
    fn key(&self) -> &[u8] {
        match &self.table_iter {
            Some(table) => table.key(),
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match &self.table_iter {
            Some(table) => table.value(),
            None => &[],
        }
    }

    fn is_valid(&self) -> bool {
        self.table_valid()
    }

    fn next(&mut self) -> Result<()> {
        let result = match self.table_iter.as_mut() {
            Some(table) => table.next(),
            None => return Ok(()),
        };
        let result = result.and_then(|_| self.skip_empty_files_forward());
        self.fail(result)
    }

    fn prev(&mut self) -> Result<()> {
        let result = match self.table_iter.as_mut() {
            Some(table) => table.prev(),
            None => return Ok(()),
        };
        let result = result.and_then(|_| self.skip_empty_files_backward());
        self.fail(result)
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        self.file_idx = self
            .files
            .partition_point(|f| self.icmp.compare(&f.largest, key) == Ordering::Less);
        let result = self.open_file().and_then(|_| {
            if let Some(table) = self.table_iter.as_mut() {
                table.seek(key)?;
            }
            self.skip_empty_files_forward()
        });
        self.fail(result)
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.file_idx = 0;
        let result = self.open_file().and_then(|_| {
            if let Some(table) = self.table_iter.as_mut() {
                table.seek_to_first()?;
            }
            self.skip_empty_files_forward()
        });
        self.fail(result)
    }

    fn seek_to_last(&mut self) -> Result<()> {
        if self.files.is_empty() {
            self.table_iter = None;
            return Ok(());
        }
        self.file_idx = self.files.len() - 1;
        let result = self.open_file().and_then(|_| {
            if let Some(table) = self.table_iter.as_mut() {
                table.seek_to_last()?;
            }
            self.skip_empty_files_backward()
        });
        self.fail(result)
    }
}
