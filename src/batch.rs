use crate::coding::{
    decode_fixed32, decode_fixed64, get_length_prefixed_slice, put_length_prefixed_slice,
};
use crate::error::{Error, Result};
use crate::memtable::MemTable;
use crate::types::{SequenceNumber, ValueType};

/// Bytes of the sequence + count header.
const HEADER_SIZE: usize = 12;

/// An ordered group of puts and deletes applied atomically.
///
/// The encoded form is also the write-ahead log payload:
/// ```text
/// ┌──────────────┬─────────────┬──────────────────────────────────────┐
/// │ sequence (8B)│ count (4B)  │ records...                           │
/// └──────────────┴─────────────┴──────────────────────────────────────┘
/// record := Put    [0x01][varint key_len][key][varint val_len][value]
///         | Delete [0x02][varint key_len][key]
/// ```
/// The i-th record is applied with sequence `sequence + i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteBatch {
    rep: Vec<u8>,
}

/// One decoded operation of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOp<'a> {
    Put { key: &'a [u8], value: &'a [u8] },
    Delete { key: &'a [u8] },
}

impl Default for WriteBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteBatch {
    pub fn new() -> Self {
        WriteBatch {
            rep: vec![0; HEADER_SIZE],
        }
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.set_count(self.count() + 1);
        self.rep.push(ValueType::Put as u8);
        put_length_prefixed_slice(&mut self.rep, key);
        put_length_prefixed_slice(&mut self.rep, value);
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.set_count(self.count() + 1);
        self.rep.push(ValueType::Delete as u8);
        put_length_prefixed_slice(&mut self.rep, key);
    }

    /// Remove every operation.
    pub fn clear(&mut self) {
        self.rep.clear();
        self.rep.resize(HEADER_SIZE, 0);
    }

    /// Number of operations in the batch.
    pub fn count(&self) -> u32 {
        decode_fixed32(&self.rep[8..])
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Encoded size; what the batch costs in the log.
    pub fn approximate_size(&self) -> usize {
        self.rep.len()
    }

    /// Append all operations of `other`, keeping their order.
    pub fn append(&mut self, other: &WriteBatch) {
        self.set_count(self.count() + other.count());
        self.rep.extend_from_slice(&other.rep[HEADER_SIZE..]);
    }

    /// Iterate over the decoded operations.
    pub fn iter(&self) -> BatchIter<'_> {
        BatchIter {
            data: &self.rep[HEADER_SIZE..],
        }
    }

    pub(crate) fn sequence(&self) -> SequenceNumber {
        decode_fixed64(&self.rep)
    }

    pub(crate) fn set_sequence(&mut self, sequence: SequenceNumber) {
        self.rep[..8].copy_from_slice(&sequence.to_le_bytes());
    }

    fn set_count(&mut self, count: u32) {
        self.rep[8..HEADER_SIZE].copy_from_slice(&count.to_le_bytes());
    }

    /// Encoded form written to the log.
    pub fn contents(&self) -> &[u8] {
        &self.rep
    }

    /// Rebuild a batch from a log payload.
    pub fn from_contents(contents: Vec<u8>) -> Result<Self> {
        if contents.len() < HEADER_SIZE {
            return Err(Error::Corruption("write batch too small".into()));
        }
        Ok(WriteBatch { rep: contents })
    }

    /// Apply every operation to `mem`, numbering them from the batch
    /// sequence. Fails if the records do not match the header count.
    pub fn insert_into(&self, mem: &MemTable) -> Result<()> {
        let mut sequence = self.sequence();
        let mut found = 0u32;
        for op in self.iter() {
            match op? {
                BatchOp::Put { key, value } => mem.add(sequence, ValueType::Put, key, value),
                BatchOp::Delete { key } => mem.add(sequence, ValueType::Delete, key, &[]),
            }
            sequence += 1;
            found += 1;
        }
        if found != self.count() {
            return Err(Error::Corruption(format!(
                "write batch has wrong count: header {}, found {}",
                self.count(),
                found
            )));
        }
        Ok(())
    }
}

/// Decoding cursor over the records of a batch.
pub struct BatchIter<'a> {
    data: &'a [u8],
}

impl<'a> Iterator for BatchIter<'a> {
    type Item = Result<BatchOp<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let (&tag, rest) = self.data.split_first()?;
        let decoded = (|| -> Result<(BatchOp<'a>, usize)> {
            let (key, n) = get_length_prefixed_slice(rest)?;
            match ValueType::from_u8(tag)? {
                ValueType::Put => {
                    let (value, m) = get_length_prefixed_slice(&rest[n..])?;
                    Ok((BatchOp::Put { key, value }, 1 + n + m))
                }
                ValueType::Delete => Ok((BatchOp::Delete { key }, 1 + n)),
            }
        })();
        match decoded {
            Ok((op, consumed)) => {
                self.data = &self.data[consumed..];
                Some(Ok(op))
            }
            Err(e) => {
                self.data = &[];
                Some(Err(Error::Corruption(format!("bad write batch record: {}", e))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_keep_order() {
        let mut batch = WriteBatch::new();
        batch.put(b"a", b"1");
        batch.delete(b"b");
        batch.put(b"c", b"");
        assert_eq!(batch.count(), 3);

        let ops: Vec<_> = batch.iter().map(|op| op.unwrap()).collect();
        assert_eq!(
            ops,
            vec![
                BatchOp::Put { key: b"a", value: b"1" },
                BatchOp::Delete { key: b"b" },
                BatchOp::Put { key: b"c", value: b"" },
            ]
        );
    }

    #[test]
    fn append_and_sequence() {
        let mut first = WriteBatch::new();
        first.put(b"x", b"1");
        let mut second = WriteBatch::new();
        second.delete(b"y");

        first.append(&second);
        first.set_sequence(100);
        assert_eq!(first.count(), 2);
        assert_eq!(first.sequence(), 100);

        let decoded = WriteBatch::from_contents(first.contents().to_vec()).unwrap();
        assert_eq!(decoded, first);
    }

    #[test]
    fn truncated_record_is_corruption() {
        let mut batch = WriteBatch::new();
        batch.put(b"key", b"value");
        let mut bytes = batch.contents().to_vec();
        bytes.truncate(bytes.len() - 2);
        let damaged = WriteBatch::from_contents(bytes).unwrap();
        assert!(damaged.iter().any(|op| op.is_err()));
    }

    #[test]
    fn clear_resets() {
        let mut batch = WriteBatch::new();
        batch.put(b"k", b"v");
        batch.clear();
        assert!(batch.is_empty());
        assert_eq!(batch.approximate_size(), HEADER_SIZE);
    }
}
