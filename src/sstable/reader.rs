use std::cmp::Ordering;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bloom::BloomFilter;
use crate::cache::BlockCache;
use crate::coding::decode_fixed32;
use crate::error::{Error, Result};
use crate::iterator::StorageIterator;
use crate::options::{CompressionType, ReadFlags};
use crate::sstable::block::reader::Block;
use crate::sstable::footer::{BlockHandle, Footer, IndexEntry, BLOCK_TRAILER_SIZE};
use crate::sstable::iterator::SSTableIterator;
use crate::sstable::TableOptions;
use crate::types::extract_user_key;

/// An opened SSTable file. Supports point lookups and ordered iteration.
///
/// On open:
/// 1. Read footer (last 40 bytes) → find index and filter block positions
/// 2. Read and parse index block → Vec<IndexEntry>
/// 3. Read and deserialize bloom filter
/// 4. Ready for queries (data blocks read on demand, through the block cache)
///
/// The file handle sits behind a mutex so one `Arc<SSTable>` can serve
/// readers on many threads.
pub struct SSTable {
    path: PathBuf,
    file: Mutex<File>,
    file_number: u64,
    file_size: u64,
    index: Vec<IndexEntry>,
    filter: Option<BloomFilter>,
    footer: Footer,
    options: TableOptions,
    block_cache: Option<Arc<BlockCache>>,
}

impl std::fmt::Debug for SSTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTable")
            .field("path", &self.path)
            .field("file_number", &self.file_number)
            .field("file_size", &self.file_size)
            .finish_non_exhaustive()
    }
}

impl SSTable {
    /// Open an SSTable file.
    ///
    /// Index and filter blocks are always checksum-verified: a damaged
    /// table must not be trusted at all.
    pub fn open(
        path: &Path,
        file_number: u64,
        options: &TableOptions,
        block_cache: Option<Arc<BlockCache>>,
    ) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < Footer::SIZE as u64 {
            return Err(Error::Corruption(format!(
                "{}: file too short to contain footer",
                path.display()
            )));
        }

        file.seek(SeekFrom::Start(file_size - Footer::SIZE as u64))?;
        let mut footer_buf = vec![0u8; Footer::SIZE];
        file.read_exact(&mut footer_buf)?;
        let footer = Footer::decode(&footer_buf)?;

        let index_data = read_block_contents(&mut file, &footer.index_handle, true)?;
        let index_block = Arc::new(Block::decode(index_data)?);
        let mut index = Vec::new();
        let mut iter = index_block.iter(Arc::clone(&options.comparator));
        iter.seek_to_first()?;
        while iter.is_valid() {
            index.push(IndexEntry::from_block_entry(iter.key(), iter.value())?);
            iter.next()?;
        }

        let filter = if footer.has_filter() {
            let data = read_block_contents(&mut file, &footer.filter_handle, true)?;
            Some(BloomFilter::deserialize(&data)?)
        } else {
            None
        };

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            file_number,
            file_size,
            index,
            filter,
            footer,
            options: options.clone(),
            block_cache,
        })
    }

    /// Point lookup for an internal seek key.
    ///
    /// Returns the first entry at or after `internal_key`, provided it lies
    /// in the block the index points to. The caller decides whether the
    /// entry's user key matches.
    ///
    /// Algorithm:
    /// 1. Ask the bloom filter about the user key → definitely absent?
    /// 2. Binary search index → find the first block whose last key >= target
    /// 3. Read that block (cache or disk)
    /// 4. Seek within the block
    pub fn get(&self, internal_key: &[u8], flags: ReadFlags) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if let Some(filter) = &self.filter {
            if !filter.may_contain(extract_user_key(internal_key)) {
                return Ok(None);
            }
        }

        let block_idx = self.find_block(internal_key);
        let Some(entry) = self.index.get(block_idx) else {
            return Ok(None);
        };

        let block = self.read_block(&entry.handle, flags)?;
        let mut iter = block.iter(Arc::clone(&self.options.comparator));
        iter.seek(internal_key)?;
        if iter.is_valid() {
            Ok(Some((iter.key().to_vec(), iter.value().to_vec())))
        } else {
            Ok(None)
        }
    }

    /// Index of the first block whose last key is >= `key`
    /// (`index.len()` if every block ends before it).
    pub fn find_block(&self, key: &[u8]) -> usize {
        self.index.partition_point(|entry| {
            self.options.comparator.compare(&entry.last_key, key) == Ordering::Less
        })
    }

    /// Fetch and decode a data block, consulting the block cache first.
    pub fn read_block(&self, handle: &BlockHandle, flags: ReadFlags) -> Result<Arc<Block>> {
        if let Some(cache) = &self.block_cache {
            if let Some(block) = cache.get(self.file_number, handle.offset) {
                return Ok(block);
            }
        }

        let verify = flags.verify_checksums || self.options.paranoid_checks;
        let data = {
            let mut file = self.file.lock();
            read_block_contents(&mut file, handle, verify)
        }
        .map_err(|e| match e {
            Error::Corruption(msg) => Error::Corruption(format!(
                "{} block at {}: {}",
                self.path.display(),
                handle.offset,
                msg
            )),
            other => other,
        })?;
        let block = Arc::new(Block::decode(data)?);

        if flags.fill_cache {
            if let Some(cache) = &self.block_cache {
                cache.insert(self.file_number, handle.offset, Arc::clone(&block));
            }
        }
        Ok(block)
    }

    /// Create an iterator over all entries in the SSTable.
    pub fn iter(self: &Arc<Self>, flags: ReadFlags) -> SSTableIterator {
        SSTableIterator::new(Arc::clone(self), flags)
    }

    /// Approximate file offset where entries for `key` begin.
    pub fn approximate_offset_of(&self, key: &[u8]) -> u64 {
        match self.index.get(self.find_block(key)) {
            Some(entry) => entry.handle.offset,
            // Past the last key: everything before the metadata blocks.
            None => {
                if self.footer.has_filter() {
                    self.footer.filter_handle.offset
                } else {
                    self.footer.index_handle.offset
                }
            }
        }
    }

    pub fn index(&self) -> &[IndexEntry] {
        &self.index
    }

    pub fn comparator(&self) -> &Arc<dyn crate::comparator::Comparator> {
        &self.options.comparator
    }

    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    /// Filter check on a user key; true when the table has no filter.
    pub fn may_contain(&self, user_key: &[u8]) -> bool {
        self.filter
            .as_ref()
            .is_none_or(|filter| filter.may_contain(user_key))
    }

    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read a block and its trailer, check the CRC when asked, and undo
/// compression.
fn read_block_contents(file: &mut File, handle: &BlockHandle, verify: bool) -> Result<Vec<u8>> {
    let len = handle.size as usize;
    let mut buf = vec![0u8; len + BLOCK_TRAILER_SIZE];
    file.seek(SeekFrom::Start(handle.offset))?;
    file.read_exact(&mut buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::Corruption("truncated block read".into())
        } else {
            Error::Io(e)
        }
    })?;

    if verify {
        let stored = decode_fixed32(&buf[len + 1..]);
        let computed = crc32fast::hash(&buf[..len + 1]);
        if stored != computed {
            return Err(Error::Corruption("block checksum mismatch".into()));
        }
    }

    match CompressionType::from_u8(buf[len])? {
        CompressionType::None => {
            buf.truncate(len);
            Ok(buf)
        }
        CompressionType::Snappy => snap::raw::Decoder::new()
            .decompress_vec(&buf[..len])
            .map_err(|e| Error::Corruption(format!("snappy decompression failed: {}", e))),
    }
}
