use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::comparator::{BytewiseComparator, Comparator};
use crate::db::Snapshot;
use crate::error::{Error, Result};

/// Number of levels in the tree.
pub const NUM_LEVELS: usize = 7;

/// Level-0 file count that triggers a compaction.
pub const L0_COMPACTION_TRIGGER: usize = 4;

/// Level-0 file count at which each write is delayed by 1ms.
pub const L0_SLOWDOWN_WRITES_TRIGGER: usize = 8;

/// Level-0 file count at which writes stop until compaction catches up.
pub const L0_STOP_WRITES_TRIGGER: usize = 12;

/// Target byte size of level 1. Each deeper level is 10x larger.
pub const L1_MAX_BYTES: u64 = 10 * 1024 * 1024;

/// Size ratio between adjacent levels.
pub const LEVEL_SIZE_MULTIPLIER: u64 = 10;

/// Per-block compression applied by table builders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionType {
    #[default]
    None = 0x00,
    Snappy = 0x01,
}

impl CompressionType {
    pub fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0x00 => Ok(CompressionType::None),
            0x01 => Ok(CompressionType::Snappy),
            _ => Err(Error::Corruption(format!("unknown compression type: {}", byte))),
        }
    }
}

/// Options controlling how a database is opened and how it behaves.
#[derive(Clone)]
pub struct OpenOptions {
    /// Create the database if it is missing.
    pub create_if_missing: bool,
    /// Fail if the database already exists.
    pub error_if_exists: bool,
    /// Treat any detected corruption as fatal: WAL checksum errors abort
    /// recovery and every block read verifies its checksum.
    pub paranoid_checks: bool,
    /// User-key order. Must match the comparator the database was created with.
    pub comparator: Arc<dyn Comparator>,
    /// Bytes buffered in the memtable before it is flushed to level 0.
    pub write_buffer_size: usize,
    /// Upper bound on table files held open by the table cache.
    pub max_open_files: usize,
    /// Capacity of the uncompressed data block cache, in bytes. 0 disables it.
    pub block_cache_size: usize,
    /// Approximate uncompressed size of a data block.
    pub block_size: usize,
    /// Number of keys between restart points in a data block.
    pub block_restart_interval: usize,
    pub compression: CompressionType,
    /// Target size of a compaction output file.
    pub max_file_size: usize,
    /// Bloom filter false positive rate per table; `None` writes no filter.
    pub filter_false_positive_rate: Option<f64>,
    /// Manifest size after which a fresh manifest is started.
    pub max_manifest_file_size: u64,
    /// How often the compaction worker wakes up on its own to retry work.
    pub background_retry_interval: Duration,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            create_if_missing: false,
            error_if_exists: false,
            paranoid_checks: false,
            comparator: Arc::new(BytewiseComparator),
            write_buffer_size: 4 * 1024 * 1024,
            max_open_files: 1000,
            block_cache_size: 8 * 1024 * 1024,
            block_size: 4 * 1024,
            block_restart_interval: 16,
            compression: CompressionType::None,
            max_file_size: 2 * 1024 * 1024,
            filter_false_positive_rate: Some(0.01),
            max_manifest_file_size: 4 * 1024 * 1024,
            background_retry_interval: Duration::from_secs(1),
        }
    }
}

impl OpenOptions {
    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.write_buffer_size == 0 {
            return Err(Error::InvalidArgument("write_buffer_size must be positive".into()));
        }
        if self.block_size == 0 {
            return Err(Error::InvalidArgument("block_size must be positive".into()));
        }
        if self.block_restart_interval == 0 {
            return Err(Error::InvalidArgument(
                "block_restart_interval must be positive".into(),
            ));
        }
        if self.max_file_size == 0 {
            return Err(Error::InvalidArgument("max_file_size must be positive".into()));
        }
        if let Some(fpr) = self.filter_false_positive_rate {
            if !(fpr > 0.0 && fpr < 1.0) {
                return Err(Error::InvalidArgument(format!(
                    "filter_false_positive_rate must be in (0, 1), got {}",
                    fpr
                )));
            }
        }
        Ok(())
    }

    /// Table handles the table cache may keep open. A few descriptors are
    /// reserved for the WAL, manifest and LOCK file.
    pub fn table_cache_capacity(&self) -> usize {
        self.max_open_files.saturating_sub(10).max(1)
    }
}

impl fmt::Debug for OpenOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenOptions")
            .field("create_if_missing", &self.create_if_missing)
            .field("error_if_exists", &self.error_if_exists)
            .field("paranoid_checks", &self.paranoid_checks)
            .field("comparator", &self.comparator.name())
            .field("write_buffer_size", &self.write_buffer_size)
            .field("max_open_files", &self.max_open_files)
            .field("block_cache_size", &self.block_cache_size)
            .field("block_size", &self.block_size)
            .field("block_restart_interval", &self.block_restart_interval)
            .field("compression", &self.compression)
            .field("max_file_size", &self.max_file_size)
            .field("filter_false_positive_rate", &self.filter_false_positive_rate)
            .field("max_manifest_file_size", &self.max_manifest_file_size)
            .field("background_retry_interval", &self.background_retry_interval)
            .finish()
    }
}

/// Options for reads and iterators.
#[derive(Clone, Copy)]
pub struct ReadOptions<'a> {
    /// Verify block checksums on every block read from disk.
    pub verify_checksums: bool,
    /// Insert blocks read by this operation into the block cache.
    pub fill_cache: bool,
    /// Read as of this snapshot instead of the latest state.
    pub snapshot: Option<&'a Snapshot>,
}

impl Default for ReadOptions<'_> {
    fn default() -> Self {
        ReadOptions {
            verify_checksums: false,
            fill_cache: true,
            snapshot: None,
        }
    }
}

impl<'a> ReadOptions<'a> {
    pub fn at_snapshot(snapshot: &'a Snapshot) -> Self {
        ReadOptions {
            snapshot: Some(snapshot),
            ..Default::default()
        }
    }
}

impl fmt::Debug for ReadOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadOptions")
            .field("verify_checksums", &self.verify_checksums)
            .field("fill_cache", &self.fill_cache)
            .field("snapshot", &self.snapshot.map(|s| s.sequence()))
            .finish()
    }
}

/// Block-level read flags, detached from the snapshot lifetime so that
/// long-lived table iterators can carry them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadFlags {
    pub verify_checksums: bool,
    pub fill_cache: bool,
}

impl Default for ReadFlags {
    fn default() -> Self {
        ReadFlags {
            verify_checksums: false,
            fill_cache: true,
        }
    }
}

impl From<&ReadOptions<'_>> for ReadFlags {
    fn from(options: &ReadOptions<'_>) -> Self {
        ReadFlags {
            verify_checksums: options.verify_checksums,
            fill_cache: options.fill_cache,
        }
    }
}

/// Options for writes.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// fsync the WAL before acknowledging the write.
    pub sync: bool,
}
