use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::error::{Error, Result};
use crate::iterator::{MergeIterator, StorageIterator};
use crate::types::{
    append_internal_key, extract_user_key, ParsedInternalKey, SequenceNumber, ValueType,
    VALUE_TYPE_FOR_SEEK,
};
use crate::version::Version;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// The merged cursor sits on the entry being returned.
    Forward,
    /// The merged cursor sits before every entry of the current user key,
    /// which is held in `saved_key`/`saved_value`.
    Reverse,
}

/// User-facing iterator over the database at one sequence number.
///
/// Walks the merged stream of memtables and tables and, for each user key,
/// shows only the newest entry at or below the read sequence. Keys whose
/// newest entry is a deletion are hidden.
///
/// The iterator pins the version it was created from, so its tables stay
/// readable while the database keeps writing and compacting.
pub struct DbIterator {
    inner: MergeIterator,
    ucmp: Arc<dyn Comparator>,
    sequence: SequenceNumber,
    direction: Direction,
    valid: bool,
    positioned: bool,
    saved_key: Vec<u8>,
    saved_value: Vec<u8>,
    _version: Arc<Version>,
}

impl DbIterator {
    pub(crate) fn new(
        inner: MergeIterator,
        ucmp: Arc<dyn Comparator>,
        sequence: SequenceNumber,
        version: Arc<Version>,
    ) -> Self {
        DbIterator {
            inner,
            ucmp,
            sequence,
            direction: Direction::Forward,
            valid: false,
            positioned: false,
            saved_key: Vec::new(),
            saved_value: Vec::new(),
            _version: version,
        }
    }

    pub fn valid(&self) -> bool {
        self.valid
    }

    /// Current user key. Empty when not valid.
    pub fn key(&self) -> &[u8] {
        if !self.valid {
            return &[];
        }
        match self.direction {
            Direction::Forward => extract_user_key(self.inner.key()),
            Direction::Reverse => &self.saved_key,
        }
    }

    /// Current value. Empty when not valid.
    pub fn value(&self) -> &[u8] {
        if !self.valid {
            return &[];
        }
        match self.direction {
            Direction::Forward => self.inner.value(),
            Direction::Reverse => &self.saved_value,
        }
    }

    pub fn seek_to_first(&mut self) -> Result<()> {
        self.positioned = true;
        self.direction = Direction::Forward;
        self.saved_value.clear();
        let result = self.inner.seek_to_first().and_then(|_| {
            if self.inner.is_valid() {
                self.find_next_user_entry(false)
            } else {
                self.valid = false;
                Ok(())
            }
        });
        self.fail(result)
    }

    pub fn seek_to_last(&mut self) -> Result<()> {
        self.positioned = true;
        self.direction = Direction::Reverse;
        self.saved_value.clear();
        let result = self
            .inner
            .seek_to_last()
            .and_then(|_| self.find_prev_user_entry());
        self.fail(result)
    }

    /// Position at the first key >= `target`.
    pub fn seek(&mut self, target: &[u8]) -> Result<()> {
        self.positioned = true;
        self.direction = Direction::Forward;
        self.saved_key.clear();
        self.saved_value.clear();
        append_internal_key(&mut self.saved_key, target, self.sequence, VALUE_TYPE_FOR_SEEK);
        let result = self.inner.seek(&self.saved_key).and_then(|_| {
            if self.inner.is_valid() {
                self.find_next_user_entry(false)
            } else {
                self.valid = false;
                Ok(())
            }
        });
        self.fail(result)
    }

    pub fn next(&mut self) -> Result<()> {
        if !self.valid {
            return Ok(());
        }
        let result = self.step_forward();
        self.fail(result)
    }

    pub fn prev(&mut self) -> Result<()> {
        if !self.valid {
            return Ok(());
        }
        let result = self.step_backward();
        self.fail(result)
    }

    fn step_forward(&mut self) -> Result<()> {
        if self.direction == Direction::Reverse {
            self.direction = Direction::Forward;
            // The cursor is before the entries of saved_key, which still
            // names the key to skip.
            if self.inner.is_valid() {
                self.inner.next()?;
            } else {
                self.inner.seek_to_first()?;
            }
        } else {
            self.saved_key.clear();
            self.saved_key
                .extend_from_slice(extract_user_key(self.inner.key()));
            self.inner.next()?;
        }
        if !self.inner.is_valid() {
            self.valid = false;
            self.saved_key.clear();
            return Ok(());
        }
        self.find_next_user_entry(true)
    }

    fn step_backward(&mut self) -> Result<()> {
        if self.direction == Direction::Forward {
            // Back up to the last entry of the previous user key.
            self.saved_key.clear();
            self.saved_key
                .extend_from_slice(extract_user_key(self.inner.key()));
            loop {
                self.inner.prev()?;
                if !self.inner.is_valid() {
                    self.valid = false;
                    self.saved_key.clear();
                    self.saved_value.clear();
                    return Ok(());
                }
                if self
                    .ucmp
                    .compare(extract_user_key(self.inner.key()), &self.saved_key)
                    == Ordering::Less
                {
                    break;
                }
            }
            self.direction = Direction::Reverse;
        }
        self.find_prev_user_entry()
    }

    /// Advance until the cursor rests on a visible, live entry. With
    /// `skipping`, entries for user keys <= `saved_key` are hidden.
    fn find_next_user_entry(&mut self, mut skipping: bool) -> Result<()> {
        loop {
            let entry = ParsedInternalKey::parse(self.inner.key())?;
            if entry.sequence <= self.sequence {
                match entry.value_type {
                    ValueType::Delete => {
                        self.saved_key.clear();
                        self.saved_key.extend_from_slice(entry.user_key);
                        skipping = true;
                    }
                    ValueType::Put => {
                        let hidden = skipping
                            && self.ucmp.compare(entry.user_key, &self.saved_key)
                                != Ordering::Greater;
                        if !hidden {
                            self.valid = true;
                            self.saved_key.clear();
                            return Ok(());
                        }
                    }
                }
            }
            self.inner.next()?;
            if !self.inner.is_valid() {
                break;
            }
        }
        self.saved_key.clear();
        self.valid = false;
        Ok(())
    }

    /// Walk backwards collecting the newest visible entry of the previous
    /// user key into `saved_key`/`saved_value`.
    fn find_prev_user_entry(&mut self) -> Result<()> {
        let mut value_type = ValueType::Delete;
        while self.inner.is_valid() {
            let entry = ParsedInternalKey::parse(self.inner.key())?;
            if entry.sequence <= self.sequence {
                if value_type != ValueType::Delete
                    && self.ucmp.compare(entry.user_key, &self.saved_key) == Ordering::Less
                {
                    // Stepped past the newest entry of a live key.
                    break;
                }
                value_type = entry.value_type;
                self.saved_key.clear();
                self.saved_value.clear();
                if value_type == ValueType::Put {
                    self.saved_key.extend_from_slice(entry.user_key);
                    self.saved_value.extend_from_slice(self.inner.value());
                }
            }
            self.inner.prev()?;
        }

        if value_type == ValueType::Delete {
            self.valid = false;
            self.saved_key.clear();
            self.saved_value.clear();
            self.direction = Direction::Forward;
        } else {
            self.valid = true;
        }
        Ok(())
    }

    fn fail<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.valid = false;
            self.saved_key.clear();
            self.saved_value.clear();
        }
        result
    }
}

impl IntoIterator for DbIterator {
    type Item = Result<(Vec<u8>, Vec<u8>)>;
    type IntoIter = Entries;

    /// Owned entries from the current position onwards, or from the first
    /// key if the iterator was never positioned.
    fn into_iter(self) -> Entries {
        Entries {
            iter: self,
            pending: None,
            done: false,
        }
    }
}

/// Forward iterator over `(key, value)` pairs. Stops after the first error.
pub struct Entries {
    iter: DbIterator,
    /// Error from advancing past the last yielded entry.
    pending: Option<Error>,
    done: bool,
}

impl Iterator for Entries {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(e) = self.pending.take() {
            self.done = true;
            return Some(Err(e));
        }
        if !self.iter.positioned {
            if let Err(e) = self.iter.seek_to_first() {
                self.done = true;
                return Some(Err(e));
            }
        }
        if !self.iter.valid() {
            self.done = true;
            return None;
        }
        let entry = (self.iter.key().to_vec(), self.iter.value().to_vec());
        if let Err(e) = self.iter.next() {
            self.pending = Some(e);
        }
        Some(Ok(entry))
    }
}
