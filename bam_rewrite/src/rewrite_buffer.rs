use crate::record::SortKey;
use rayon::prelude::ParallelSliceMut;
use std::mem::size_of;
use std::ops::Range;

/// Where one record lives in the payload and what it sorts by.
#[derive(Debug, Clone, PartialEq, Eq)]
struct IndexEntry {
    range: Range<usize>,
    sort_key: SortKey,
}

/// Bytes every record costs on top of its payload.
pub const ENTRY_OVERHEAD: usize = size_of::<IndexEntry>();

/// Bounded sink for processed records.
///
/// Record bytes are appended to one fixed size payload; the index holds the
/// byte span of every record. Sorting only permutes the index, the payload is
/// never moved.
#[derive(Debug)]
pub struct RewriteBuffer {
    id: u32,
    capacity: usize,
    records_bytes: Vec<u8>,
    index: Vec<IndexEntry>,
    is_final: bool,
}

impl RewriteBuffer {
    /// `capacity` bounds payload plus index overhead.
    pub fn new(id: u32, capacity: usize) -> Self {
        RewriteBuffer {
            id,
            capacity,
            records_bytes: Vec::with_capacity(capacity),
            index: Vec::new(),
            is_final: false,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Payload plus index overhead in use. Only grows until `reset`.
    pub fn used_bytes(&self) -> usize {
        self.records_bytes.len() + self.index.len() * ENTRY_OVERHEAD
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.used_bytes()
    }

    /// True if a record of `len` bytes would fit.
    pub fn fits(&self, len: usize) -> bool {
        len + ENTRY_OVERHEAD <= self.remaining()
    }

    /// Appends a copy of `bytes`, or writes nothing and returns false when
    /// the record with its index entry does not fit.
    pub fn put(&mut self, bytes: &[u8], sort_key: SortKey) -> bool {
        if !self.fits(bytes.len()) {
            return false;
        }
        let start = self.records_bytes.len();
        self.records_bytes.extend_from_slice(bytes);
        self.index.push(IndexEntry {
            range: start..start + bytes.len(),
            sort_key,
        });
        true
    }

    /// Stable sort of the index by sort key. Equal keys keep insertion order,
    /// so a second call leaves the index as it is.
    pub fn reorder(&mut self) {
        self.index.par_sort_by_key(|entry| entry.sort_key);
    }

    pub fn reset(&mut self) {
        self.records_bytes.clear();
        self.index.clear();
        self.is_final = false;
    }

    /// Marks the last flush of a pipeline run; such a buffer may be partially
    /// filled.
    pub fn mark_final(&mut self) {
        self.is_final = true;
    }

    pub fn is_final(&self) -> bool {
        self.is_final
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Records in index order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &[u8]> + '_ {
        self.index
            .iter()
            .map(move |e| &self.records_bytes[e.range.clone()])
    }

    /// Sort keys in index order.
    pub fn sort_keys(&self) -> impl ExactSizeIterator<Item = SortKey> + '_ {
        self.index.iter().map(|e| e.sort_key)
    }

    /// Payload offsets in index order. Identifies the current permutation.
    pub fn offsets(&self) -> Vec<usize> {
        self.index.iter().map(|e| e.range.start).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_accounts_for_index_overhead() {
        let mut buf = RewriteBuffer::new(0, 2 * (10 + ENTRY_OVERHEAD) + 5);
        assert!(buf.put(&[1; 10], SortKey(1)));
        assert!(buf.put(&[2; 10], SortKey(2)));
        assert_eq!(buf.used_bytes(), 2 * (10 + ENTRY_OVERHEAD));
        // Payload alone would fit, the index entry would not.
        assert!(!buf.put(&[3; 5], SortKey(3)));
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.remaining(), 5);
        assert!(buf.used_bytes() <= buf.capacity());
    }

    #[test]
    fn test_failed_put_writes_nothing() {
        let mut buf = RewriteBuffer::new(0, 64);
        let before = buf.used_bytes();
        assert!(!buf.put(&[0; 64], SortKey(0)));
        assert_eq!(buf.used_bytes(), before);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_reorder_is_stable_and_idempotent() {
        let mut buf = RewriteBuffer::new(0, 4096);
        let input = [(5, b'a'), (1, b'b'), (5, b'c'), (u64::MAX, b'd'), (1, b'e'), (3, b'f')];
        for (key, tag) in input {
            assert!(buf.put(&[tag], SortKey(key)));
        }
        buf.reorder();
        let order: Vec<u8> = buf.iter().map(|r| r[0]).collect();
        assert_eq!(order, b"befacd".to_vec());
        let keys: Vec<SortKey> = buf.sort_keys().collect();
        assert!(keys.windows(2).all(|w| w[0] <= w[1]));

        let first = buf.offsets();
        buf.reorder();
        assert_eq!(buf.offsets(), first);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut buf = RewriteBuffer::new(3, 1024);
        buf.put(b"abc", SortKey::ABSENT);
        buf.mark_final();
        buf.reset();
        assert!(buf.is_empty());
        assert!(!buf.is_final());
        assert_eq!(buf.used_bytes(), 0);
        assert_eq!(buf.remaining(), 1024);
    }
}
