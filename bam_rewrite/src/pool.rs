//! Free-list of reusable record slots shared by every lane.

use crate::record::{Owner, Record, SlotId};
use crossbeam::queue::SegQueue;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Hands out records and takes them back. A record is a moved value, so once
/// it has been released the caller has no way to keep using it.
///
/// Lock-free: the free list is a `SegQueue`, counters are atomics.
#[derive(Debug, Default)]
pub struct RecordPool {
    free: SegQueue<Record>,
    next_slot: AtomicU64,
    outstanding: AtomicUsize,
}

impl RecordPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool with `count` slots allocated up front.
    pub fn with_slots(count: usize) -> Self {
        let pool = Self::new();
        for _ in 0..count {
            let slot = SlotId(pool.next_slot.fetch_add(1, Ordering::Relaxed));
            pool.free.push(Record::with_slot(slot));
        }
        pool
    }

    /// Takes a free record, creating a new slot if none is free. The record is
    /// empty until a codec loads it.
    pub fn acquire(&self) -> Record {
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        let mut rec = match self.free.pop() {
            Some(rec) => rec,
            None => Record::with_slot(SlotId(self.next_slot.fetch_add(1, Ordering::Relaxed))),
        };
        rec.set_owner(Owner::Dispatcher);
        rec
    }

    pub fn release(&self, mut rec: Record) {
        rec.clear();
        rec.set_owner(Owner::Pool);
        self.free.push(rec);
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
    }

    /// Records currently held outside the pool.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    /// Free records ready for reuse.
    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    /// Number of distinct slots ever created.
    pub fn slots(&self) -> u64 {
        self.next_slot.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_slots_are_reused() {
        let pool = RecordPool::with_slots(2);
        let a = pool.acquire();
        let b = pool.acquire();
        assert_ne!(a.slot(), b.slot());
        assert_eq!(pool.outstanding(), 2);
        let a_slot = a.slot();
        pool.release(a);
        assert_eq!(pool.free_len(), 1);
        let c = pool.acquire();
        assert_eq!(c.slot(), a_slot);
        assert_eq!(c.owner(), Owner::Dispatcher);
        assert_eq!(pool.slots(), 2);
        pool.release(b);
        pool.release(c);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_grows_when_exhausted() {
        let pool = RecordPool::new();
        let recs: Vec<Record> = (0..5).map(|_| pool.acquire()).collect();
        let slots: HashSet<SlotId> = recs.iter().map(|r| r.slot()).collect();
        assert_eq!(slots.len(), 5);
        recs.into_iter().for_each(|r| pool.release(r));
        assert!(pool.free_len() == 5);
    }

    #[test]
    fn test_concurrent_acquire_release() {
        let pool = Arc::new(RecordPool::with_slots(8));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let rec = pool.acquire();
                        pool.release(rec);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.free_len() as u64, pool.slots());
    }
}
