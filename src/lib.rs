//! # LSM-Tree Key-Value Store
//!
//! An embedded, ordered key-value store using the Log-Structured Merge-Tree
//! design, in the LevelDB family. A single process owns a database
//! directory; the store is crash consistent through a write-ahead log and
//! a manifest of versioned file sets.
//!
//! ## Core idea
//! Instead of updating data in place (B-Tree), buffer writes in memory,
//! flush them as sorted files, and merge those files in the background.
//! This turns random writes into sequential writes.
//!
//! ```text
//!   put/delete ──► WAL (fsync on sync writes) ──► MemTable
//!                                                  │ full
//!                                                  ▼
//!                                          immutable MemTable
//!                                                  │ background flush
//!                                                  ▼
//!   level 0:  [sst] [sst] [sst]     (may overlap)
//!   level 1:  [sst][sst][sst]       (disjoint key ranges)
//!   level 2:  [sst][sst][sst][sst]...
//! ```
//!
//! Reads consult the memtables, then every overlapping level-0 table, then
//! at most one table per deeper level. Snapshots pin a sequence number;
//! iterators merge every source and hide shadowed versions and tombstones.

pub mod batch;
pub mod bloom;
pub mod cache;
pub mod coding;
pub mod comparator;
pub mod compaction;
pub mod db;
pub mod error;
pub mod filename;
pub mod iterator;
pub mod manifest;
pub mod memtable;
pub mod options;
pub mod sstable;
pub mod types;
pub mod version;
pub mod wal;

// Public re-exports for the top-level API
pub use batch::WriteBatch;
pub use comparator::{BytewiseComparator, Comparator};
pub use db::{Database, DbIterator, Entries, Snapshot};
pub use error::{Error, Result};
pub use options::{CompressionType, OpenOptions, ReadOptions, WriteOptions};
