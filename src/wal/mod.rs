//! Framed, checksummed append-only logs.
//!
//! The write-ahead log stores one encoded `WriteBatch` per record; the
//! manifest stores one encoded `VersionEdit` per record. Both share the
//! framing, writer and reader defined here.

pub mod reader;
pub mod record;
pub mod writer;

pub use reader::{LogTail, WALIterator, WALReader};
pub use record::{RecordType, WALRecord};
pub use writer::{WALManager, WALWriter};
