use std::cmp::Ordering;
use std::sync::Arc;

use rand::Rng;

use crate::comparator::Comparator;
use crate::error::Result;
use crate::iterator::StorageIterator;

/// Maximum height of the skip list. LevelDB uses 12.
pub const MAX_HEIGHT: usize = 12;

/// Each level is populated with probability 1/BRANCHING of the level below.
const BRANCHING: u32 = 4;

/// Approximate per-node bookkeeping overhead counted toward `size_bytes`.
const NODE_OVERHEAD: usize = 32;

/// Index of the head sentinel in the arena.
const HEAD: usize = 0;

/// A single node in the skip list.
///
/// Each node has `height` forward links. Level 0 contains all nodes
/// (a regular linked list). Higher levels skip over nodes, enabling
/// O(log n) average-case search.
///
/// ```text
/// Level 3:  HEAD ──────────────────────────────► 50 ──────────► NIL
/// Level 2:  HEAD ──────────► 20 ────────────────► 50 ──────────► NIL
/// Level 1:  HEAD ──► 10 ──► 20 ────► 35 ────────► 50 ──► 60 ──► NIL
/// Level 0:  HEAD ──► 10 ──► 20 ──► 25 ──► 35 ──► 50 ──► 60 ──► 70 ► NIL
/// ```
///
/// Links are indices into the arena `SkipList::nodes`. Nodes are never
/// removed, so an index handed out once stays valid for the life of the list.
struct SkipNode {
    key: Vec<u8>,
    value: Vec<u8>,
    forward: Vec<Option<usize>>,
}

/// A probabilistic sorted map ordered by a pluggable comparator.
///
/// Average case: O(log n) insert, O(log n) lookup, O(n) iteration.
/// Worst case: O(n), but astronomically unlikely with random level assignment.
pub struct SkipList {
    nodes: Vec<SkipNode>,
    height: usize,
    len: usize,
    size_bytes: usize,
    cmp: Arc<dyn Comparator>,
}

impl SkipList {
    /// Create a new empty skip list ordered by `cmp`.
    pub fn new(cmp: Arc<dyn Comparator>) -> Self {
        let head = SkipNode {
            key: Vec::new(),
            value: Vec::new(),
            forward: vec![None; MAX_HEIGHT],
        };
        SkipList {
            nodes: vec![head],
            height: 1,
            len: 0,
            size_bytes: 0,
            cmp,
        }
    }

    /// Insert a key-value pair. Overwrites the value if the key already exists.
    ///
    /// Algorithm:
    ///   1. Find the insertion point at each level (track predecessors)
    ///   2. Generate a random height for the new node (1/4 chance per level)
    ///   3. Append the node to the arena
    ///   4. Splice it into the list at each level up to its height
    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) {
        let mut prev = [HEAD; MAX_HEIGHT];
        let found = self.find_greater_or_equal(&key, Some(&mut prev));

        if let Some(idx) = found {
            if self.cmp.compare(&self.nodes[idx].key, &key) == Ordering::Equal {
                let node = &mut self.nodes[idx];
                self.size_bytes = self.size_bytes - node.value.len() + value.len();
                node.value = value;
                return;
            }
        }

        let height = random_height();
        if height > self.height {
            for slot in prev.iter_mut().take(height).skip(self.height) {
                *slot = HEAD;
            }
            self.height = height;
        }

        let idx = self.nodes.len();
        let mut forward = vec![None; height];
        for (level, link) in forward.iter_mut().enumerate() {
            *link = self.nodes[prev[level]].forward[level];
        }
        self.size_bytes += key.len() + value.len() + NODE_OVERHEAD;
        self.nodes.push(SkipNode {
            key,
            value,
            forward,
        });
        for (level, &p) in prev.iter().enumerate().take(height) {
            self.nodes[p].forward[level] = Some(idx);
        }
        self.len += 1;
    }

    /// Look up an exact key. Returns the value if found.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        let idx = self.seek(key)?;
        let node = &self.nodes[idx];
        (self.cmp.compare(&node.key, key) == Ordering::Equal).then_some(node.value.as_slice())
    }

    /// Index of the first node with key >= target.
    pub fn seek(&self, target: &[u8]) -> Option<usize> {
        self.find_greater_or_equal(target, None)
    }

    /// Index of the last node with key < target.
    pub fn find_less_than(&self, target: &[u8]) -> Option<usize> {
        let mut x = HEAD;
        for level in (0..self.height).rev() {
            while let Some(next) = self.nodes[x].forward[level] {
                if self.cmp.compare(&self.nodes[next].key, target) == Ordering::Less {
                    x = next;
                } else {
                    break;
                }
            }
        }
        (x != HEAD).then_some(x)
    }

    /// Index of the last node.
    pub fn find_last(&self) -> Option<usize> {
        let mut x = HEAD;
        for level in (0..self.height).rev() {
            while let Some(next) = self.nodes[x].forward[level] {
                x = next;
            }
        }
        (x != HEAD).then_some(x)
    }

    /// Index of the first node.
    pub fn first(&self) -> Option<usize> {
        self.nodes[HEAD].forward[0]
    }

    /// Index of the node after `idx` on level 0.
    pub fn next_of(&self, idx: usize) -> Option<usize> {
        self.nodes[idx].forward[0]
    }

    /// Key and value stored at `idx`.
    pub fn entry(&self, idx: usize) -> (&[u8], &[u8]) {
        let node = &self.nodes[idx];
        (&node.key, &node.value)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes of keys, values and per-node overhead held by the list.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Borrowing iterator over the list in key order.
    pub fn iter(&self) -> SkipListIterator<'_> {
        SkipListIterator {
            list: self,
            current: self.first(),
        }
    }

    /// Walk down from the top level, recording the last node before
    /// `target` on each level in `prev` when given.
    fn find_greater_or_equal(
        &self,
        target: &[u8],
        mut prev: Option<&mut [usize; MAX_HEIGHT]>,
    ) -> Option<usize> {
        let mut x = HEAD;
        let mut level = self.height - 1;
        loop {
            let next = self.nodes[x].forward[level];
            if let Some(n) = next {
                if self.cmp.compare(&self.nodes[n].key, target) == Ordering::Less {
                    x = n;
                    continue;
                }
            }
            if let Some(p) = prev.as_deref_mut() {
                p[level] = x;
            }
            if level == 0 {
                return next;
            }
            level -= 1;
        }
    }
}

fn random_height() -> usize {
    let mut rng = rand::thread_rng();
    let mut height = 1;
    while height < MAX_HEIGHT && rng.gen_ratio(1, BRANCHING) {
        height += 1;
    }
    height
}

/// Sorted cursor over a borrowed skip list.
pub struct SkipListIterator<'a> {
    list: &'a SkipList,
    current: Option<usize>,
}

impl StorageIterator for SkipListIterator<'_> {
    fn key(&self) -> &[u8] {
        match self.current {
            Some(idx) => self.list.entry(idx).0,
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match self.current {
            Some(idx) => self.list.entry(idx).1,
            None => &[],
        }
    }

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) -> Result<()> {
        self.current = self.current.and_then(|idx| self.list.next_of(idx));
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        self.current = match self.current {
            Some(idx) => self.list.find_less_than(self.list.entry(idx).0),
            None => None,
        };
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        self.current = self.list.seek(key);
        Ok(())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.current = self.list.first();
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.current = self.list.find_last();
        Ok(())
    }
}
