use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::types::{extract_tag, extract_user_key};

/// Total order over user keys.
///
/// The name is persisted in the manifest; reopening a database with a
/// comparator of a different name is refused, because on-disk files were
/// sorted with the old order.
pub trait Comparator: Send + Sync {
    fn name(&self) -> &str;
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Lexicographic byte order. The default comparator.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn name(&self) -> &str {
        "leveldb.BytewiseComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Orders encoded internal keys: user key ascending by the user
/// comparator, then packed (sequence, type) tag descending so the newest
/// entry for a user key sorts first.
#[derive(Clone)]
pub struct InternalKeyComparator {
    user: Arc<dyn Comparator>,
}

impl InternalKeyComparator {
    pub fn new(user: Arc<dyn Comparator>) -> Self {
        InternalKeyComparator { user }
    }

    pub fn user_comparator(&self) -> &Arc<dyn Comparator> {
        &self.user
    }

    pub fn compare_user(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.user.compare(a, b)
    }
}

impl Comparator for InternalKeyComparator {
    fn name(&self) -> &str {
        "leveldb.InternalKeyComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.user
            .compare(extract_user_key(a), extract_user_key(b))
            .then_with(|| extract_tag(b).cmp(&extract_tag(a)))
    }
}

impl fmt::Debug for InternalKeyComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalKeyComparator")
            .field("user", &self.user.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InternalKey, ValueType};

    fn icmp() -> InternalKeyComparator {
        InternalKeyComparator::new(Arc::new(BytewiseComparator))
    }

    #[test]
    fn newer_sequence_sorts_first() {
        let old = InternalKey::new(b"k".to_vec(), 1, ValueType::Put).encode();
        let new = InternalKey::new(b"k".to_vec(), 9, ValueType::Put).encode();
        assert_eq!(icmp().compare(&new, &old), Ordering::Less);
    }

    #[test]
    fn user_key_dominates() {
        let a = InternalKey::new(b"a".to_vec(), 1, ValueType::Put).encode();
        let b = InternalKey::new(b"b".to_vec(), 100, ValueType::Delete).encode();
        assert_eq!(icmp().compare(&a, &b), Ordering::Less);
    }

    #[test]
    fn prefix_user_key_sorts_before_extension() {
        let short = InternalKey::new(b"ab".to_vec(), 1, ValueType::Put).encode();
        let long = InternalKey::new(b"abc".to_vec(), 1, ValueType::Put).encode();
        assert_eq!(icmp().compare(&short, &long), Ordering::Less);
    }
}
