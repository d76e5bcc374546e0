pub mod level;
pub mod merge;

pub use level::LevelIterator;
pub use merge::MergeIterator;

use crate::error::Result;

/// The central iteration abstraction for the storage engine.
///
/// Every sorted data source (skip list, block, SSTable, level, merged view)
/// implements this trait. This enables composability: MergeIterator
/// takes `Vec<Box<dyn StorageIterator>>` and merges them.
///
/// Below the database facade, keys are encoded internal keys and the
/// order is the internal key order. Movement errors (IO, corruption) are
/// returned from the call that hit them and leave the iterator invalid.
pub trait StorageIterator: Send {
    /// Returns the current key. Only valid when is_valid() is true.
    fn key(&self) -> &[u8];

    /// Returns the current value. Only valid when is_valid() is true.
    fn value(&self) -> &[u8];

    /// Returns true if the iterator is positioned at a valid entry.
    fn is_valid(&self) -> bool;

    /// Advances to the next entry.
    fn next(&mut self) -> Result<()>;

    /// Steps back to the previous entry.
    fn prev(&mut self) -> Result<()>;

    /// Positions the iterator at the first entry with key >= target.
    fn seek(&mut self, key: &[u8]) -> Result<()>;

    /// Positions the iterator at the first entry.
    fn seek_to_first(&mut self) -> Result<()>;

    /// Positions the iterator at the last entry.
    fn seek_to_last(&mut self) -> Result<()>;
}
