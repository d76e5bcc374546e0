//! Manifest: the log of version edits that describes which tables make up
//! the database.
//!
//! Each record is one `VersionEdit` framed like a WAL record. Replaying
//! every edit from an empty version reproduces the current version.
//!
//! Edit encoding is a sequence of tagged fields:
//! ```text
//! tag 1  comparator        length-prefixed name
//! tag 2  log number        varint64
//! tag 3  next file number  varint64
//! tag 4  last sequence     varint64
//! tag 5  compact pointer   varint32 level, length-prefixed internal key
//! tag 6  deleted file      varint32 level, varint64 number
//! tag 7  new file          varint32 level, varint64 number, varint64 size,
//!                          length-prefixed smallest, length-prefixed largest
//! tag 9  prev log number   varint64
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::coding::{
    get_length_prefixed_slice, get_varint32, get_varint64, put_length_prefixed_slice,
    put_varint32, put_varint64,
};
use crate::error::{Error, Result};
use crate::filename::manifest_file_path;
use crate::options::NUM_LEVELS;
use crate::types::SequenceNumber;
use crate::version::FileMetaData;
use crate::wal::{RecordType, WALReader, WALRecord, WALWriter};

const TAG_COMPARATOR: u32 = 1;
const TAG_LOG_NUMBER: u32 = 2;
const TAG_NEXT_FILE_NUMBER: u32 = 3;
const TAG_LAST_SEQUENCE: u32 = 4;
const TAG_COMPACT_POINTER: u32 = 5;
const TAG_DELETED_FILE: u32 = 6;
const TAG_NEW_FILE: u32 = 7;
const TAG_PREV_LOG_NUMBER: u32 = 9;

/// A delta between two versions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionEdit {
    pub comparator: Option<String>,
    pub log_number: Option<u64>,
    pub prev_log_number: Option<u64>,
    pub next_file_number: Option<u64>,
    pub last_sequence: Option<SequenceNumber>,
    pub compact_pointers: Vec<(usize, Vec<u8>)>,
    pub deleted_files: BTreeSet<(usize, u64)>,
    pub new_files: Vec<(usize, FileMetaData)>,
}

impl VersionEdit {
    pub fn add_file(&mut self, level: usize, file: FileMetaData) {
        self.new_files.push((level, file));
    }

    pub fn remove_file(&mut self, level: usize, number: u64) {
        self.deleted_files.insert((level, number));
    }

    pub fn set_compact_pointer(&mut self, level: usize, key: Vec<u8>) {
        self.compact_pointers.push((level, key));
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        if let Some(name) = &self.comparator {
            put_varint32(&mut buf, TAG_COMPARATOR);
            put_length_prefixed_slice(&mut buf, name.as_bytes());
        }
        if let Some(n) = self.log_number {
            put_varint32(&mut buf, TAG_LOG_NUMBER);
            put_varint64(&mut buf, n);
        }
        if let Some(n) = self.prev_log_number {
            put_varint32(&mut buf, TAG_PREV_LOG_NUMBER);
            put_varint64(&mut buf, n);
        }
        if let Some(n) = self.next_file_number {
            put_varint32(&mut buf, TAG_NEXT_FILE_NUMBER);
            put_varint64(&mut buf, n);
        }
        if let Some(n) = self.last_sequence {
            put_varint32(&mut buf, TAG_LAST_SEQUENCE);
            put_varint64(&mut buf, n);
        }
        for (level, key) in &self.compact_pointers {
            put_varint32(&mut buf, TAG_COMPACT_POINTER);
            put_varint32(&mut buf, *level as u32);
            put_length_prefixed_slice(&mut buf, key);
        }
        for (level, number) in &self.deleted_files {
            put_varint32(&mut buf, TAG_DELETED_FILE);
            put_varint32(&mut buf, *level as u32);
            put_varint64(&mut buf, *number);
        }
        for (level, file) in &self.new_files {
            put_varint32(&mut buf, TAG_NEW_FILE);
            put_varint32(&mut buf, *level as u32);
            put_varint64(&mut buf, file.number);
            put_varint64(&mut buf, file.file_size);
            put_length_prefixed_slice(&mut buf, &file.smallest);
            put_length_prefixed_slice(&mut buf, &file.largest);
        }
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut edit = VersionEdit::default();
        let mut input = Decoder { data, pos: 0 };
        while !input.is_empty() {
            match input.varint32()? {
                TAG_COMPARATOR => {
                    let name = input.slice()?;
                    let name = String::from_utf8(name.to_vec())
                        .map_err(|_| Error::Corruption("comparator name is not utf-8".into()))?;
                    edit.comparator = Some(name);
                }
                TAG_LOG_NUMBER => edit.log_number = Some(input.varint64()?),
                TAG_PREV_LOG_NUMBER => edit.prev_log_number = Some(input.varint64()?),
                TAG_NEXT_FILE_NUMBER => edit.next_file_number = Some(input.varint64()?),
                TAG_LAST_SEQUENCE => edit.last_sequence = Some(input.varint64()?),
                TAG_COMPACT_POINTER => {
                    let level = input.level()?;
                    edit.compact_pointers.push((level, input.slice()?.to_vec()));
                }
                TAG_DELETED_FILE => {
                    let level = input.level()?;
                    edit.deleted_files.insert((level, input.varint64()?));
                }
                TAG_NEW_FILE => {
                    let level = input.level()?;
                    let number = input.varint64()?;
                    let file_size = input.varint64()?;
                    let smallest = input.slice()?.to_vec();
                    let largest = input.slice()?.to_vec();
                    edit.new_files.push((
                        level,
                        FileMetaData {
                            number,
                            file_size,
                            smallest,
                            largest,
                        },
                    ));
                }
                tag => {
                    return Err(Error::Corruption(format!(
                        "unknown version edit tag {}",
                        tag
                    )));
                }
            }
        }
        Ok(edit)
    }
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn varint32(&mut self) -> Result<u32> {
        let (v, n) = get_varint32(&self.data[self.pos..])?;
        self.pos += n;
        Ok(v)
    }

    fn varint64(&mut self) -> Result<u64> {
        let (v, n) = get_varint64(&self.data[self.pos..])?;
        self.pos += n;
        Ok(v)
    }

    fn slice(&mut self) -> Result<&'a [u8]> {
        let (s, n) = get_length_prefixed_slice(&self.data[self.pos..])?;
        self.pos += n;
        Ok(s)
    }

    fn level(&mut self) -> Result<usize> {
        let level = self.varint32()? as usize;
        if level >= NUM_LEVELS {
            return Err(Error::Corruption(format!("level {} out of range", level)));
        }
        Ok(level)
    }
}

/// Appends edits to one manifest file, fsyncing each.
pub struct ManifestWriter {
    writer: WALWriter,
    number: u64,
}

impl ManifestWriter {
    /// Create manifest `number` in `dir`. The file must not exist yet.
    pub fn create(dir: &Path, number: u64) -> Result<Self> {
        let path = manifest_file_path(dir, number);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(ManifestWriter {
            writer: WALWriter::new(&path)?,
            number,
        })
    }

    /// Append one edit and make it durable.
    pub fn append(&mut self, edit: &VersionEdit) -> Result<()> {
        self.writer.append(&WALRecord::edit(edit.encode()))?;
        self.writer.sync()
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn size(&self) -> u64 {
        self.writer.offset()
    }

    pub fn path(&self) -> PathBuf {
        self.writer.path().to_path_buf()
    }
}

/// Read every edit of a manifest.
///
/// A record with a bad checksum is corruption; a record cut off at the end
/// of the file (crash during append) ends the log.
pub fn read_manifest(path: &Path) -> Result<Vec<VersionEdit>> {
    let reader = WALReader::new(path)?;
    let mut edits = Vec::new();
    for record in reader.iter().strict() {
        let record = record?;
        if record.record_type != RecordType::Edit {
            return Err(Error::Corruption(format!(
                "{}: unexpected {:?} record in manifest",
                path.display(),
                record.record_type
            )));
        }
        edits.push(VersionEdit::decode(&record.payload)?);
    }
    Ok(edits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_edit_encodes_to_nothing() {
        let edit = VersionEdit::default();
        assert!(edit.encode().is_empty());
        assert_eq!(VersionEdit::decode(&[]).unwrap(), edit);
    }

    #[test]
    fn unknown_tag_is_corruption() {
        let mut buf = Vec::new();
        put_varint32(&mut buf, 42);
        assert!(VersionEdit::decode(&buf).unwrap_err().is_corruption());
    }

    #[test]
    fn level_out_of_range_is_corruption() {
        let mut buf = Vec::new();
        put_varint32(&mut buf, TAG_DELETED_FILE);
        put_varint32(&mut buf, NUM_LEVELS as u32);
        put_varint64(&mut buf, 3);
        assert!(VersionEdit::decode(&buf).is_err());
    }
}
