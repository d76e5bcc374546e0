use crate::coding::{decode_fixed64, get_varint64, put_fixed64, put_varint64};
use crate::error::{Error, Result};

/// Magic number to identify SSTable files.
pub const SSTABLE_MAGIC: u64 = 0x4C534D5F53535400; // "LSM_SST\0"

/// Every block on disk is followed by `[compression type (1B)][crc32 (4B)]`.
/// The CRC covers the block contents and the type byte.
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Summary of a finished table, returned by `SSTableBuilder::finish`.
#[derive(Debug, Clone)]
pub struct SSTableMeta {
    /// File number of the table.
    pub id: u64,
    /// Smallest internal key in the table.
    pub min_key: Vec<u8>,
    /// Largest internal key in the table.
    pub max_key: Vec<u8>,
    /// File size in bytes.
    pub file_size: u64,
    /// Number of entries (including tombstones).
    pub entry_count: u64,
}

/// Location of a block inside a table file. `size` excludes the trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    pub fn new(offset: u64, size: u64) -> Self {
        BlockHandle { offset, size }
    }

    /// Format: [offset varint64][size varint64]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(20);
        put_varint64(&mut buf, self.offset);
        put_varint64(&mut buf, self.size);
        buf
    }

    /// Decode a handle, returning (handle, bytes_consumed).
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        let (offset, a) = get_varint64(data)?;
        let (size, b) = get_varint64(&data[a..])?;
        Ok((BlockHandle { offset, size }, a + b))
    }
}

/// An entry in the SSTable's index block.
/// Maps a data block's last key to its location in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Last (largest) internal key in the block.
    pub last_key: Vec<u8>,
    pub handle: BlockHandle,
}

impl IndexEntry {
    /// Build an entry from an index block's key and encoded-handle value.
    pub fn from_block_entry(key: &[u8], value: &[u8]) -> Result<Self> {
        let (handle, consumed) = BlockHandle::decode(value)?;
        if consumed != value.len() {
            return Err(Error::Corruption("trailing bytes after block handle".into()));
        }
        Ok(IndexEntry {
            last_key: key.to_vec(),
            handle,
        })
    }
}

/// The footer sits at the end of the SSTable file.
/// It tells the reader where to find the index block and the filter block.
///
/// ```text
/// ┌──────────────────────────────────────┐
/// │ Index block offset (8B)              │
/// │ Index block size (8B)                │
/// │ Filter block offset (8B)             │
/// │ Filter block size (8B)  0 = none     │
/// │ Magic number (8B)                    │
/// └──────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footer {
    pub index_handle: BlockHandle,
    pub filter_handle: BlockHandle,
}

impl Footer {
    /// Size of the footer in bytes (fixed).
    pub const SIZE: usize = 8 * 5; // 40 bytes

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        put_fixed64(&mut buf, self.index_handle.offset);
        put_fixed64(&mut buf, self.index_handle.size);
        put_fixed64(&mut buf, self.filter_handle.offset);
        put_fixed64(&mut buf, self.filter_handle.size);
        put_fixed64(&mut buf, SSTABLE_MAGIC);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::Corruption("footer too short".into()));
        }
        let magic = decode_fixed64(&data[32..40]);
        if magic != SSTABLE_MAGIC {
            return Err(Error::Corruption(format!(
                "bad magic: expected {:#x}, got {:#x}",
                SSTABLE_MAGIC, magic
            )));
        }
        Ok(Footer {
            index_handle: BlockHandle::new(decode_fixed64(&data[0..8]), decode_fixed64(&data[8..16])),
            filter_handle: BlockHandle::new(
                decode_fixed64(&data[16..24]),
                decode_fixed64(&data[24..32]),
            ),
        })
    }

    pub fn has_filter(&self) -> bool {
        self.filter_handle.size > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footer_roundtrip() {
        let footer = Footer {
            index_handle: BlockHandle::new(4096, 512),
            filter_handle: BlockHandle::new(0, 0),
        };
        let encoded = footer.encode();
        assert_eq!(encoded.len(), Footer::SIZE);
        let decoded = Footer::decode(&encoded).unwrap();
        assert_eq!(decoded, footer);
        assert!(!decoded.has_filter());
    }

    #[test]
    fn footer_bad_magic() {
        let mut encoded = Footer {
            index_handle: BlockHandle::default(),
            filter_handle: BlockHandle::default(),
        }
        .encode();
        // Corrupt the magic
        encoded[32] = 0xFF;
        assert!(Footer::decode(&encoded).unwrap_err().is_corruption());
    }

    #[test]
    fn footer_too_short() {
        assert!(Footer::decode(&[0u8; 10]).is_err());
    }

    #[test]
    fn index_entry_from_block_entry() {
        let handle = BlockHandle::new(300, 4096);
        let entry = IndexEntry::from_block_entry(b"cherry", &handle.encode()).unwrap();
        assert_eq!(entry.last_key, b"cherry");
        assert_eq!(entry.handle, handle);

        let mut padded = handle.encode();
        padded.push(0);
        assert!(IndexEntry::from_block_entry(b"cherry", &padded).is_err());
    }
}
