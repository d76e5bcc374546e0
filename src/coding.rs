//! Byte-level encodings shared by blocks, batches and manifest edits.
//!
//! Fixed-width integers are little-endian. Variable-width integers are
//! LEB128 varints (7 bits per byte, high bit = continuation).

use integer_encoding::VarInt;

use crate::error::{Error, Result};

pub fn put_fixed32(dst: &mut Vec<u8>, value: u32) {
    dst.extend_from_slice(&value.to_le_bytes());
}

pub fn put_fixed64(dst: &mut Vec<u8>, value: u64) {
    dst.extend_from_slice(&value.to_le_bytes());
}

/// Decode a little-endian u32 from the first four bytes of `src`.
///
/// Callers guarantee `src.len() >= 4`.
pub fn decode_fixed32(src: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&src[..4]);
    u32::from_le_bytes(buf)
}

/// Decode a little-endian u64 from the first eight bytes of `src`.
///
/// Callers guarantee `src.len() >= 8`.
pub fn decode_fixed64(src: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&src[..8]);
    u64::from_le_bytes(buf)
}

pub fn put_varint32(dst: &mut Vec<u8>, value: u32) {
    dst.extend_from_slice(&value.encode_var_vec());
}

pub fn put_varint64(dst: &mut Vec<u8>, value: u64) {
    dst.extend_from_slice(&value.encode_var_vec());
}

/// Decode a varint32, returning the value and the number of bytes read.
pub fn get_varint32(src: &[u8]) -> Result<(u32, usize)> {
    u32::decode_var(src).ok_or_else(|| Error::Corruption("bad varint32".into()))
}

/// Decode a varint64, returning the value and the number of bytes read.
pub fn get_varint64(src: &[u8]) -> Result<(u64, usize)> {
    u64::decode_var(src).ok_or_else(|| Error::Corruption("bad varint64".into()))
}

pub fn varint_length(value: u64) -> usize {
    value.required_space()
}

/// Append `varint32(len) ++ bytes`.
pub fn put_length_prefixed_slice(dst: &mut Vec<u8>, value: &[u8]) {
    put_varint32(dst, value.len() as u32);
    dst.extend_from_slice(value);
}

/// Decode a length-prefixed slice, returning it and the bytes consumed.
pub fn get_length_prefixed_slice(src: &[u8]) -> Result<(&[u8], usize)> {
    let (len, n) = get_varint32(src)?;
    let end = n + len as usize;
    if end > src.len() {
        return Err(Error::Corruption("length-prefixed slice overruns input".into()));
    }
    Ok((&src[n..end], end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_boundaries() {
        for v in [0u64, 127, 128, 16_383, 16_384, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            put_varint64(&mut buf, v);
            assert_eq!(buf.len(), varint_length(v));
            assert_eq!(get_varint64(&buf).unwrap(), (v, buf.len()));
        }
    }

    #[test]
    fn truncated_varint_is_corruption() {
        let mut buf = Vec::new();
        put_varint32(&mut buf, 300);
        buf.pop();
        assert!(get_varint32(&buf).unwrap_err().is_corruption());
    }

    #[test]
    fn length_prefixed_overrun() {
        let mut buf = Vec::new();
        put_length_prefixed_slice(&mut buf, b"hello");
        let (s, n) = get_length_prefixed_slice(&buf).unwrap();
        assert_eq!(s, b"hello");
        assert_eq!(n, buf.len());

        buf.truncate(3);
        assert!(get_length_prefixed_slice(&buf).is_err());
    }
}
