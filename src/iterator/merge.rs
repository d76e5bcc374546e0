use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::error::Result;
use crate::iterator::StorageIterator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// Merges multiple sorted iterators into a single sorted stream.
///
/// Used for:
/// - Range scans across memtables + all table levels
/// - Compaction (merging tables of two levels)
///
/// No deduplication happens here: every entry of every child is yielded
/// in comparator order. With internal keys that order is
/// (user_key ASC, sequence DESC), so the newest version of a user key
/// always comes first and callers decide what to hide.
///
/// Children are few (memtables, level-0 tables, one per deeper level), so
/// the smallest is found with a linear scan. Equal keys cannot occur
/// across children since sequence numbers are unique.
pub struct MergeIterator {
    children: Vec<Box<dyn StorageIterator>>,
    cmp: Arc<dyn Comparator>,
    current: Option<usize>,
    direction: Direction,
}

impl MergeIterator {
    pub fn new(cmp: Arc<dyn Comparator>, children: Vec<Box<dyn StorageIterator>>) -> Self {
        MergeIterator {
            children,
            cmp,
            current: None,
            direction: Direction::Forward,
        }
    }

    pub fn num_children(&self) -> usize {
        self.children.len()
    }

    fn find_smallest(&mut self) {
        let mut smallest: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate() {
            if !child.is_valid() {
                continue;
            }
            let better = match smallest {
                None => true,
                Some(s) => self.cmp.compare(child.key(), self.children[s].key()) == Ordering::Less,
            };
            if better {
                smallest = Some(i);
            }
        }
        self.current = smallest;
    }

    fn find_largest(&mut self) {
        let mut largest: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate().rev() {
            if !child.is_valid() {
                continue;
            }
            let better = match largest {
                None => true,
                Some(l) => {
                    self.cmp.compare(child.key(), self.children[l].key()) == Ordering::Greater
                }
            };
            if better {
                largest = Some(i);
            }
        }
        self.current = largest;
    }

    fn fail<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.current = None;
        }
        result
    }
}

impl StorageIterator for MergeIterator {
    fn key(&self) -> &[u8] {
        match self.current {
            Some(i) => self.children[i].key(),
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match self.current {
            Some(i) => self.children[i].value(),
            None => &[],
        }
    }

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) -> Result<()> {
        let Some(current) = self.current else {
            return Ok(());
        };

        // After moving backwards the other children sit before key();
        // move them to the first entry after it.
        if self.direction != Direction::Forward {
            let key = self.key().to_vec();
            for i in 0..self.children.len() {
                if i == current {
                    continue;
                }
                let child = &mut self.children[i];
                let result = child.seek(&key).and_then(|_| {
                    if child.is_valid() && self.cmp.compare(&key, child.key()) == Ordering::Equal {
                        child.next()
                    } else {
                        Ok(())
                    }
                });
                self.fail(result)?;
            }
            self.direction = Direction::Forward;
        }

        let result = self.children[current].next();
        self.fail(result)?;
        self.find_smallest();
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        let Some(current) = self.current else {
            return Ok(());
        };

        // After moving forwards the other children sit after key();
        // move them to the last entry before it.
        if self.direction != Direction::Reverse {
            let key = self.key().to_vec();
            for i in 0..self.children.len() {
                if i == current {
                    continue;
                }
                let child = &mut self.children[i];
                let result = child.seek(&key).and_then(|_| {
                    if child.is_valid() {
                        child.prev()
                    } else {
                        child.seek_to_last()
                    }
                });
                self.fail(result)?;
            }
            self.direction = Direction::Reverse;
        }

        let result = self.children[current].prev();
        self.fail(result)?;
        self.find_largest();
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        for i in 0..self.children.len() {
            let result = self.children[i].seek(key);
            self.fail(result)?;
        }
        self.find_smallest();
        self.direction = Direction::Forward;
        Ok(())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        for i in 0..self.children.len() {
            let result = self.children[i].seek_to_first();
            self.fail(result)?;
        }
        self.find_smallest();
        self.direction = Direction::Forward;
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        for i in 0..self.children.len() {
            let result = self.children[i].seek_to_last();
            self.fail(result)?;
        }
        self.find_largest();
        self.direction = Direction::Reverse;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;

    /// Sorted in-memory source for exercising the merge.
    struct VecIter {
        entries: Vec<(Vec<u8>, Vec<u8>)>,
        pos: Option<usize>,
    }

    impl VecIter {
        fn boxed(keys: &[&str]) -> Box<dyn StorageIterator> {
            Box::new(VecIter {
                entries: keys
                    .iter()
                    .map(|k| (k.as_bytes().to_vec(), k.to_uppercase().into_bytes()))
                    .collect(),
                pos: None,
            })
        }
    }

    impl StorageIterator for VecIter {
        fn key(&self) -> &[u8] {
            self.pos.map_or(&[][..], |p| self.entries[p].0.as_slice())
        }
        fn value(&self) -> &[u8] {
            self.pos.map_or(&[][..], |p| self.entries[p].1.as_slice())
        }
        fn is_valid(&self) -> bool {
            self.pos.is_some()
        }
        fn next(&mut self) -> Result<()> {
            self.pos = self.pos.map(|p| p + 1).filter(|&p| p < self.entries.len());
            Ok(())
        }
        fn prev(&mut self) -> Result<()> {
            self.pos = self.pos.and_then(|p| p.checked_sub(1));
            Ok(())
        }
        fn seek(&mut self, key: &[u8]) -> Result<()> {
            let p = self.entries.partition_point(|(k, _)| k.as_slice() < key);
            self.pos = (p < self.entries.len()).then_some(p);
            Ok(())
        }
        fn seek_to_first(&mut self) -> Result<()> {
            self.pos = (!self.entries.is_empty()).then_some(0);
            Ok(())
        }
        fn seek_to_last(&mut self) -> Result<()> {
            self.pos = self.entries.len().checked_sub(1);
            Ok(())
        }
    }

    fn merged() -> MergeIterator {
        MergeIterator::new(
            Arc::new(BytewiseComparator),
            vec![
                VecIter::boxed(&["b", "e", "h"]),
                VecIter::boxed(&[]),
                VecIter::boxed(&["a", "f"]),
                VecIter::boxed(&["c", "d", "g"]),
            ],
        )
    }

    fn collect_forward(iter: &mut MergeIterator) -> Vec<String> {
        let mut out = Vec::new();
        while iter.is_valid() {
            out.push(String::from_utf8(iter.key().to_vec()).unwrap());
            iter.next().unwrap();
        }
        out
    }

    #[test]
    fn forward_merge_is_sorted() {
        let mut iter = merged();
        iter.seek_to_first().unwrap();
        assert_eq!(collect_forward(&mut iter), ["a", "b", "c", "d", "e", "f", "g", "h"]);
    }

    #[test]
    fn reverse_merge_is_sorted() {
        let mut iter = merged();
        iter.seek_to_last().unwrap();
        let mut out = Vec::new();
        while iter.is_valid() {
            out.push(String::from_utf8(iter.key().to_vec()).unwrap());
            iter.prev().unwrap();
        }
        assert_eq!(out, ["h", "g", "f", "e", "d", "c", "b", "a"]);
    }

    #[test]
    fn direction_switch_keeps_position() {
        let mut iter = merged();
        iter.seek(b"d").unwrap();
        assert_eq!(iter.key(), b"d");
        iter.next().unwrap();
        assert_eq!(iter.key(), b"e");
        iter.prev().unwrap();
        assert_eq!(iter.key(), b"d");
        iter.prev().unwrap();
        assert_eq!(iter.key(), b"c");
        iter.next().unwrap();
        assert_eq!(iter.key(), b"d");
        assert_eq!(iter.value(), b"D");
    }

    #[test]
    fn empty_children_yield_nothing() {
        let mut iter = MergeIterator::new(Arc::new(BytewiseComparator), vec![VecIter::boxed(&[])]);
        iter.seek_to_first().unwrap();
        assert!(!iter.is_valid());
    }
}
