//! Names of the files inside a database directory.
//!
//! ```text
//! 000005.log        write-ahead log
//! 000007.sst        sorted table
//! MANIFEST-000004   version edit log
//! CURRENT           name of the active manifest
//! LOCK              advisory process lock
//! 000004.dbtmp      CURRENT being replaced
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Log,
    Table,
    Manifest,
    Current,
    Lock,
    Temp,
}

pub fn log_file_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{:06}.log", number))
}

pub fn table_file_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{:06}.sst", number))
}

pub fn manifest_file_name(number: u64) -> String {
    format!("MANIFEST-{:06}", number)
}

pub fn manifest_file_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(manifest_file_name(number))
}

pub fn current_file_path(dir: &Path) -> PathBuf {
    dir.join("CURRENT")
}

pub fn lock_file_path(dir: &Path) -> PathBuf {
    dir.join("LOCK")
}

pub fn temp_file_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{:06}.dbtmp", number))
}

/// Classify a directory entry, returning its type and number.
/// `CURRENT` and `LOCK` carry number 0.
pub fn parse_file_name(name: &str) -> Option<(FileType, u64)> {
    match name {
        "CURRENT" => return Some((FileType::Current, 0)),
        "LOCK" => return Some((FileType::Lock, 0)),
        _ => {}
    }
    if let Some(rest) = name.strip_prefix("MANIFEST-") {
        return parse_number(rest).map(|n| (FileType::Manifest, n));
    }
    let (stem, ext) = name.split_once('.')?;
    let number = parse_number(stem)?;
    let file_type = match ext {
        "log" => FileType::Log,
        "sst" => FileType::Table,
        "dbtmp" => FileType::Temp,
        _ => return None,
    };
    Some((file_type, number))
}

fn parse_number(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Point `CURRENT` at manifest `number`.
///
/// The new contents go to a temp file which is fsynced and renamed over
/// `CURRENT`, so a crash leaves either the old or the new pointer.
pub fn set_current_file(dir: &Path, number: u64) -> Result<()> {
    let tmp = temp_file_path(dir, number);
    let contents = format!("{}\n", manifest_file_name(number));
    let result = (|| -> Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, current_file_path(dir))?;
        sync_dir(dir)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Read the manifest name stored in `CURRENT`.
pub fn read_current_file(dir: &Path) -> Result<String> {
    let contents = fs::read_to_string(current_file_path(dir))?;
    let name = contents
        .strip_suffix('\n')
        .ok_or_else(|| Error::Corruption("CURRENT file does not end with newline".into()))?;
    if name.is_empty() {
        return Err(Error::Corruption("CURRENT file is empty".into()));
    }
    Ok(name.to_string())
}

/// fsync the directory so renames and creations survive a crash.
pub fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        fs::File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_names() {
        assert_eq!(parse_file_name("000012.log"), Some((FileType::Log, 12)));
        assert_eq!(parse_file_name("000300.sst"), Some((FileType::Table, 300)));
        assert_eq!(
            parse_file_name("MANIFEST-000002"),
            Some((FileType::Manifest, 2))
        );
        assert_eq!(parse_file_name("CURRENT"), Some((FileType::Current, 0)));
        assert_eq!(parse_file_name("LOCK"), Some((FileType::Lock, 0)));
        assert_eq!(parse_file_name("000009.dbtmp"), Some((FileType::Temp, 9)));
    }

    #[test]
    fn reject_foreign_names() {
        for name in ["", "foo", "12.txt", "MANIFEST-", "MANIFEST-x1", "-1.log", "abc.sst"] {
            assert_eq!(parse_file_name(name), None, "{name}");
        }
    }

    #[test]
    fn current_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        set_current_file(dir.path(), 7).unwrap();
        assert_eq!(read_current_file(dir.path()).unwrap(), "MANIFEST-000007");
        assert!(!temp_file_path(dir.path(), 7).exists());
    }
}
