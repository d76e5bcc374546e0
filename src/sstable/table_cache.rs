use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::{BlockCache, LruCache};
use crate::error::Result;
use crate::filename::table_file_path;
use crate::options::ReadFlags;
use crate::sstable::iterator::SSTableIterator;
use crate::sstable::reader::SSTable;
use crate::sstable::TableOptions;

/// Keeps recently used tables open, bounded by `max_open_files`.
///
/// Opening a table reads its footer, index and filter; caching the handle
/// makes repeated lookups cost one block read at most.
pub struct TableCache {
    dir: PathBuf,
    options: TableOptions,
    block_cache: Option<Arc<BlockCache>>,
    tables: Mutex<LruCache<u64, Arc<SSTable>>>,
}

impl TableCache {
    pub fn new(
        dir: &Path,
        options: TableOptions,
        block_cache: Option<Arc<BlockCache>>,
        capacity: usize,
    ) -> Self {
        TableCache {
            dir: dir.to_path_buf(),
            options,
            block_cache,
            tables: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Return the open table for `file_number`, opening it on a miss.
    ///
    /// The file is opened outside the cache lock; two racing misses both
    /// open the table and the later insert wins.
    pub fn get_table(&self, file_number: u64) -> Result<Arc<SSTable>> {
        if let Some(table) = self.tables.lock().get(&file_number) {
            return Ok(table);
        }
        let path = table_file_path(&self.dir, file_number);
        let table = Arc::new(SSTable::open(
            &path,
            file_number,
            &self.options,
            self.block_cache.clone(),
        )?);
        self.tables
            .lock()
            .insert(file_number, Arc::clone(&table), 1);
        Ok(table)
    }

    /// Point lookup in one table. See `SSTable::get`.
    pub fn get(
        &self,
        file_number: u64,
        internal_key: &[u8],
        flags: ReadFlags,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.get_table(file_number)?.get(internal_key, flags)
    }

    pub fn iter(&self, file_number: u64, flags: ReadFlags) -> Result<SSTableIterator> {
        Ok(self.get_table(file_number)?.iter(flags))
    }

    /// Drop the cached handle of a table that is being deleted.
    pub fn evict(&self, file_number: u64) {
        self.tables.lock().remove(&file_number);
    }

    pub fn block_cache(&self) -> Option<&Arc<BlockCache>> {
        self.block_cache.as_ref()
    }

    pub fn options(&self) -> &TableOptions {
        &self.options
    }

    pub fn len(&self) -> usize {
        self.tables.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
