use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::bloom::builder::BloomFilterBuilder;
use crate::error::Result;
use crate::options::CompressionType;
use crate::sstable::block::builder::BlockBuilder;
use crate::sstable::footer::{BlockHandle, Footer, SSTableMeta, BLOCK_TRAILER_SIZE};
use crate::sstable::TableOptions;
use crate::types::extract_user_key;

/// Builds an SSTable file from a sorted stream of internal key/value pairs.
///
/// Used during:
/// - Memtable flush (sorted memtable → level-0 table)
/// - Compaction (merged iterators → new tables)
///
/// Build process:
/// 1. Add entries one by one (must be in sorted order)
/// 2. Entries fill up blocks; when a block is full it's written to disk
/// 3. finish() flushes the last block, writes filter, index, footer, fsync
pub struct SSTableBuilder {
    options: TableOptions,
    path: PathBuf,
    writer: BufWriter<File>,
    sst_id: u64,
    /// Current block being filled with entries.
    data_block: BlockBuilder,
    /// One entry per flushed data block: last key → handle.
    index_block: BlockBuilder,
    filter: Option<BloomFilterBuilder>,
    /// Tracks current write position in the file.
    offset: u64,
    min_key: Option<Vec<u8>>,
    last_key: Vec<u8>,
    entry_count: u64,
}

impl SSTableBuilder {
    /// Create a new SSTable builder that writes to the given path.
    pub fn new(path: &Path, sst_id: u64, options: &TableOptions) -> Result<Self> {
        let file = File::create(path)?;
        Ok(SSTableBuilder {
            options: options.clone(),
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            sst_id,
            data_block: new_data_block(options),
            index_block: BlockBuilder::with_restart_interval(usize::MAX, 1),
            filter: options
                .filter_false_positive_rate
                .map(BloomFilterBuilder::new),
            offset: 0,
            min_key: None,
            last_key: Vec::new(),
            entry_count: 0,
        })
    }

    /// Add an internal key/value pair. MUST be called in sorted key order.
    ///
    /// Internally:
    /// 1. Try adding to the current block
    /// 2. If block is full: flush block to file, record index entry, start new block
    /// 3. Add the entry to the new block
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        debug_assert!(
            self.entry_count == 0
                || self.options.comparator.compare(&self.last_key, key).is_lt(),
            "keys added out of order"
        );

        if self.min_key.is_none() {
            self.min_key = Some(key.to_vec());
        }
        if let Some(filter) = self.filter.as_mut() {
            filter.add_key(extract_user_key(key));
        }

        if !self.data_block.add(key, value) {
            // Block is full: flush it, then add to a fresh block
            self.flush_block()?;
            let accepted = self.data_block.add(key, value);
            debug_assert!(accepted, "first entry of a block is always accepted");
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.entry_count += 1;
        Ok(())
    }

    /// Write the current data block and record its index entry.
    fn flush_block(&mut self) -> Result<()> {
        if self.data_block.is_empty() {
            return Ok(());
        }
        let block = std::mem::replace(&mut self.data_block, new_data_block(&self.options));
        let handle = self.write_block(&block.build(), self.options.compression)?;
        let accepted = self.index_block.add(&self.last_key, &handle.encode());
        debug_assert!(accepted, "index block has no size limit");
        Ok(())
    }

    /// Write block contents plus trailer; returns where they landed.
    ///
    /// Snappy output is kept only when it saves at least 12.5%.
    fn write_block(&mut self, raw: &[u8], compression: CompressionType) -> Result<BlockHandle> {
        let compressed = match compression {
            CompressionType::Snappy => snap::raw::Encoder::new()
                .compress_vec(raw)
                .ok()
                .filter(|c| c.len() < raw.len() - raw.len() / 8),
            CompressionType::None => None,
        };
        let (contents, block_type) = match &compressed {
            Some(c) => (c.as_slice(), CompressionType::Snappy),
            None => (raw, CompressionType::None),
        };

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(contents);
        hasher.update(&[block_type as u8]);
        let crc = hasher.finalize();

        self.writer.write_all(contents)?;
        self.writer.write_all(&[block_type as u8])?;
        self.writer.write_all(&crc.to_le_bytes())?;

        let handle = BlockHandle::new(self.offset, contents.len() as u64);
        self.offset += (contents.len() + BLOCK_TRAILER_SIZE) as u64;
        Ok(handle)
    }

    /// Finalize the SSTable: flush last block, write filter, index, footer, fsync.
    pub fn finish(mut self) -> Result<SSTableMeta> {
        self.flush_block()?;

        let filter_handle = match self.filter.take() {
            Some(filter) => self.write_block(&filter.build().serialize(), CompressionType::None)?,
            None => BlockHandle::default(),
        };

        let index = std::mem::replace(&mut self.index_block, BlockBuilder::new(0)).build();
        let index_handle = self.write_block(&index, CompressionType::None)?;

        let footer = Footer {
            index_handle,
            filter_handle,
        };
        self.writer.write_all(&footer.encode())?;
        self.offset += Footer::SIZE as u64;

        // Flush buffer + fsync to guarantee durability
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        Ok(SSTableMeta {
            id: self.sst_id,
            min_key: self.min_key.unwrap_or_default(),
            max_key: self.last_key,
            file_size: self.offset,
            entry_count: self.entry_count,
        })
    }

    /// Stop building and remove the partial file.
    pub fn abandon(self) -> Result<()> {
        let SSTableBuilder { writer, path, .. } = self;
        drop(writer);
        fs::remove_file(path)?;
        Ok(())
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Bytes written so far plus the block being filled.
    pub fn file_size(&self) -> u64 {
        self.offset + self.data_block.estimated_size() as u64
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn new_data_block(options: &TableOptions) -> BlockBuilder {
    BlockBuilder::with_restart_interval(options.block_size, options.block_restart_interval)
}
