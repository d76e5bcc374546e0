//! Sorted string tables: immutable on-disk maps from internal key to value.
//!
//! File layout:
//! ```text
//! ┌───────────────────────────┐
//! │ data block 0 + trailer    │
//! │ data block 1 + trailer    │
//! │ ...                       │
//! ├───────────────────────────┤
//! │ filter block + trailer    │  bloom filter over user keys (optional)
//! ├───────────────────────────┤
//! │ index block + trailer     │  last key of each data block → handle
//! ├───────────────────────────┤
//! │ footer (40B)              │
//! └───────────────────────────┘
//! ```

pub mod block;
pub mod builder;
pub mod footer;
pub mod iterator;
pub mod reader;
pub mod table_cache;

pub use builder::SSTableBuilder;
pub use iterator::SSTableIterator;
pub use reader::SSTable;
pub use table_cache::TableCache;

use std::sync::Arc;

use crate::comparator::{BytewiseComparator, Comparator, InternalKeyComparator};
use crate::options::{CompressionType, OpenOptions};

/// Settings shared by table builders and readers.
#[derive(Clone)]
pub struct TableOptions {
    /// Key order inside the table (the internal key order for database tables).
    pub comparator: Arc<dyn Comparator>,
    pub block_size: usize,
    pub block_restart_interval: usize,
    pub compression: CompressionType,
    /// `None` writes tables without a filter block.
    pub filter_false_positive_rate: Option<f64>,
    /// Verify every block checksum regardless of read options.
    pub paranoid_checks: bool,
}

impl TableOptions {
    pub fn from_open_options(options: &OpenOptions, icmp: &InternalKeyComparator) -> Self {
        TableOptions {
            comparator: Arc::new(icmp.clone()),
            block_size: options.block_size,
            block_restart_interval: options.block_restart_interval,
            compression: options.compression,
            filter_false_positive_rate: options.filter_false_positive_rate,
            paranoid_checks: options.paranoid_checks,
        }
    }
}

impl Default for TableOptions {
    /// Internal key order over bytewise user keys, default block settings.
    fn default() -> Self {
        let icmp = InternalKeyComparator::new(Arc::new(BytewiseComparator));
        Self::from_open_options(&OpenOptions::default(), &icmp)
    }
}
