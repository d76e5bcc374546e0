use crate::coding::decode_fixed32;
use crate::error::{Error, Result};

/// Payload kind of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    /// An encoded `WriteBatch` (write-ahead log).
    Batch = 0x01,
    /// An encoded `VersionEdit` (manifest).
    Edit = 0x02,
}

impl RecordType {
    fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(RecordType::Batch),
            0x02 => Ok(RecordType::Edit),
            _ => Err(Error::Corruption(format!("invalid record type: {}", byte))),
        }
    }
}

/// A single framed record in a log file. Both the write-ahead log and the
/// manifest are sequences of these.
///
/// On-disk format:
/// ```text
/// ┌──────────┬──────────┬──────────┬─────────────────┐
/// │ CRC (4B) │ Len (4B) │ Type(1B) │ Payload (Len B) │
/// └──────────┴──────────┴──────────┴─────────────────┘
/// ```
///
/// CRC covers everything after the CRC field itself.
/// If the CRC doesn't match on read, the record was a partial write (crash
/// mid-write) or the file was damaged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WALRecord {
    pub record_type: RecordType,
    pub payload: Vec<u8>,
}

const CRC_SIZE: usize = 4;
const LEN_SIZE: usize = 4;
const TYPE_SIZE: usize = 1;
pub const HEADER_SIZE: usize = CRC_SIZE + LEN_SIZE + TYPE_SIZE;

/// How a frame at some offset looks before it is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCheck {
    /// A complete frame of this many bytes is present.
    Complete(usize),
    /// The file ends inside the frame.
    Truncated,
}

impl WALRecord {
    pub fn batch(payload: Vec<u8>) -> Self {
        WALRecord {
            record_type: RecordType::Batch,
            payload,
        }
    }

    pub fn edit(payload: Vec<u8>) -> Self {
        WALRecord {
            record_type: RecordType::Edit,
            payload,
        }
    }

    /// Serialize this record to bytes (including CRC header).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_size());

        // CRC placeholder, filled once the rest is written
        buf.extend_from_slice(&[0u8; CRC_SIZE]);
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.push(self.record_type as u8);
        buf.extend_from_slice(&self.payload);

        let crc = crc32fast::hash(&buf[CRC_SIZE..]);
        buf[0..CRC_SIZE].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Check whether `data` starts with a complete frame.
    pub fn check_frame(data: &[u8]) -> FrameCheck {
        if data.len() < HEADER_SIZE {
            return FrameCheck::Truncated;
        }
        let payload_len = decode_fixed32(&data[CRC_SIZE..]) as usize;
        let total = HEADER_SIZE + payload_len;
        if data.len() < total {
            FrameCheck::Truncated
        } else {
            FrameCheck::Complete(total)
        }
    }

    /// Deserialize a record from bytes. Returns error if CRC doesn't match.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let total = match Self::check_frame(data) {
            FrameCheck::Complete(total) => total,
            FrameCheck::Truncated => return Err(Error::Corruption("record truncated".into())),
        };

        let stored_crc = decode_fixed32(data);
        let computed_crc = crc32fast::hash(&data[CRC_SIZE..total]);
        if stored_crc != computed_crc {
            return Err(Error::Corruption(format!(
                "record checksum mismatch: stored {:#010x}, computed {:#010x}",
                stored_crc, computed_crc
            )));
        }

        let record_type = RecordType::from_u8(data[CRC_SIZE + LEN_SIZE])?;
        Ok(WALRecord {
            record_type,
            payload: data[HEADER_SIZE..total].to_vec(),
        })
    }

    /// Size of this record when serialized on disk.
    pub fn encoded_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}
