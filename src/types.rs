use crate::coding::{decode_fixed64, put_fixed64};
use crate::error::{Error, Result};

/// Raw key bytes.
pub type Key = Vec<u8>;

/// Raw value bytes.
pub type Value = Vec<u8>;

/// Monotonic write counter. Only the low 56 bits are usable: the packed
/// tag shares a u64 with the value type.
pub type SequenceNumber = u64;

pub const MAX_SEQUENCE_NUMBER: SequenceNumber = (1 << 56) - 1;

/// Bytes appended to every user key to form an internal key.
pub const INTERNAL_KEY_TRAILER: usize = 8;

/// Distinguishes puts from deletes in the storage engine.
/// A Delete writes a tombstone: the key isn't removed, it's marked as deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// A normal put operation.
    Put = 0x01,
    /// A delete (tombstone marker).
    Delete = 0x02,
}

impl ValueType {
    pub fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(ValueType::Put),
            0x02 => Ok(ValueType::Delete),
            _ => Err(Error::Corruption(format!("invalid value type: {}", byte))),
        }
    }
}

/// Value type used when building seek targets.
///
/// Tags sort descending, so the highest type makes a seek key land on the
/// first entry whose sequence is at or below the requested one.
pub const VALUE_TYPE_FOR_SEEK: ValueType = ValueType::Delete;

/// Pack a sequence number and value type into the 8-byte trailer.
pub fn pack_tag(sequence: SequenceNumber, value_type: ValueType) -> u64 {
    debug_assert!(sequence <= MAX_SEQUENCE_NUMBER);
    (sequence << 8) | value_type as u64
}

/// Append `user_key ++ fixed64(sequence << 8 | type)` to `dst`.
pub fn append_internal_key(
    dst: &mut Vec<u8>,
    user_key: &[u8],
    sequence: SequenceNumber,
    value_type: ValueType,
) {
    dst.extend_from_slice(user_key);
    put_fixed64(dst, pack_tag(sequence, value_type));
}

/// The user-key prefix of an encoded internal key.
pub fn extract_user_key(internal_key: &[u8]) -> &[u8] {
    let len = internal_key.len().saturating_sub(INTERNAL_KEY_TRAILER);
    &internal_key[..len]
}

/// The packed tag of an encoded internal key (0 if the key is too short).
pub fn extract_tag(internal_key: &[u8]) -> u64 {
    if internal_key.len() < INTERNAL_KEY_TRAILER {
        return 0;
    }
    decode_fixed64(&internal_key[internal_key.len() - INTERNAL_KEY_TRAILER..])
}

/// Internal key format: user key + sequence number + value type.
///
/// ```text
/// ┌────────────────┬─────────────────────────────────┐
/// │ user key (var) │ fixed64 LE: seq << 8 | type     │
/// └────────────────┴─────────────────────────────────┘
/// ```
///
/// Ordering: (user_key ASC, sequence DESC). The ordering depends on the
/// user comparator and lives in `InternalKeyComparator`, not on this type.
/// This ensures the newest version of a key always comes first during merging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalKey {
    pub user_key: Key,
    pub sequence: SequenceNumber,
    pub value_type: ValueType,
}

impl InternalKey {
    pub fn new(user_key: impl Into<Key>, sequence: SequenceNumber, value_type: ValueType) -> Self {
        InternalKey {
            user_key: user_key.into(),
            sequence,
            value_type,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.user_key.len() + INTERNAL_KEY_TRAILER);
        append_internal_key(&mut buf, &self.user_key, self.sequence, self.value_type);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let parsed = ParsedInternalKey::parse(data)?;
        Ok(InternalKey {
            user_key: parsed.user_key.to_vec(),
            sequence: parsed.sequence,
            value_type: parsed.value_type,
        })
    }
}

/// Borrowed view of an encoded internal key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    pub user_key: &'a [u8],
    pub sequence: SequenceNumber,
    pub value_type: ValueType,
}

impl<'a> ParsedInternalKey<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() < INTERNAL_KEY_TRAILER {
            return Err(Error::Corruption(format!(
                "internal key too short: {} bytes",
                data.len()
            )));
        }
        let tag = extract_tag(data);
        Ok(ParsedInternalKey {
            user_key: extract_user_key(data),
            sequence: tag >> 8,
            value_type: ValueType::from_u8((tag & 0xff) as u8)?,
        })
    }
}

/// Seek target for a point lookup of `user_key` as of `sequence`.
#[derive(Debug, Clone)]
pub struct LookupKey {
    internal: Vec<u8>,
}

impl LookupKey {
    pub fn new(user_key: &[u8], sequence: SequenceNumber) -> Self {
        let mut internal = Vec::with_capacity(user_key.len() + INTERNAL_KEY_TRAILER);
        append_internal_key(&mut internal, user_key, sequence, VALUE_TYPE_FOR_SEEK);
        LookupKey { internal }
    }

    pub fn internal_key(&self) -> &[u8] {
        &self.internal
    }

    pub fn user_key(&self) -> &[u8] {
        extract_user_key(&self.internal)
    }
}

/// Outcome of a point lookup in one source (memtable or table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    /// Newest visible entry is a put.
    Found(Value),
    /// Newest visible entry is a tombstone; stop searching older sources.
    Deleted,
}

impl LookupResult {
    pub fn into_value(self) -> Option<Value> {
        match self {
            LookupResult::Found(v) => Some(v),
            LookupResult::Deleted => None,
        }
    }
}
