//! Sequence Barrier Implementation
//!
//! Every participant in a pipeline exposes its progress as a sequence barrier:
//! producers publish their cursor, consumers publish the sequence they have
//! finished with. Producers gate on consumers so they never overwrite unread
//! slots, and consumers gate on producers or on upstream consumers so they never
//! read ahead of the data. Both directions keep their dependencies in a
//! [`BarrierSet`], a copy-on-write array that readers scan without locking.

use crate::disruptor::Sequence;
use arc_swap::ArcSwap;
use std::fmt;
use std::sync::Arc;

/// A source of progress that other participants can depend on
pub trait SequenceBarrier: Send + Sync + fmt::Debug {
    /// The highest sequence this barrier has published to its dependents
    fn sequence(&self) -> i64;

    /// Force the published progress to `sequence`
    ///
    /// Used to initialise a barrier when it is attached to a producer, so that a
    /// newly gating barrier starts level with the producer's cursor.
    fn claim(&self, sequence: i64);

    /// True if this barrier is a producer whose publication may be non-contiguous
    /// below its cursor, which obliges dependents to gap-scan
    fn is_producer(&self) -> bool {
        false
    }
}

/// A bare sequence counter can stand in as a barrier
impl SequenceBarrier for Sequence {
    fn sequence(&self) -> i64 {
        self.get_acquire()
    }

    fn claim(&self, sequence: i64) {
        self.set_release(sequence);
    }
}

/// Identity of a barrier, independent of the vtable it is viewed through
fn barrier_addr(barrier: &dyn SequenceBarrier) -> *const () {
    barrier as *const dyn SequenceBarrier as *const ()
}

/// Immutable snapshot of a barrier set
#[derive(Debug, Default)]
struct BarrierList {
    barriers: Vec<Arc<dyn SequenceBarrier>>,
    includes_producer: bool,
}

impl BarrierList {
    fn new(barriers: Vec<Arc<dyn SequenceBarrier>>) -> Self {
        let includes_producer = barriers.iter().any(|b| b.is_producer());
        Self {
            barriers,
            includes_producer,
        }
    }
}

/// Copy-on-write set of barriers
///
/// Readers load the current snapshot without locking; writers build a new array
/// and swap it in with a compare-and-swap, retrying if another writer won.
#[derive(Debug)]
pub(crate) struct BarrierSet {
    list: ArcSwap<BarrierList>,
}

impl BarrierSet {
    pub(crate) fn new(barriers: Vec<Arc<dyn SequenceBarrier>>) -> Self {
        Self {
            list: ArcSwap::from_pointee(BarrierList::new(barriers)),
        }
    }

    /// Minimum published sequence across the set, or `default` if it is empty
    pub(crate) fn minimum_sequence(&self, default: i64) -> i64 {
        self.list
            .load()
            .barriers
            .iter()
            .map(|barrier| barrier.sequence())
            .min()
            .unwrap_or(default)
    }

    pub(crate) fn includes_producer(&self) -> bool {
        self.list.load().includes_producer
    }

    pub(crate) fn len(&self) -> usize {
        self.list.load().barriers.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn SequenceBarrier>> {
        self.list.load().barriers.clone()
    }

    /// Append `added` to the set
    ///
    /// With `cursor` given, every added barrier is claimed to the cursor before
    /// the swap and claimed again afterwards: a publish that lands between the
    /// first claim and the swap would otherwise leave the new barrier behind.
    pub(crate) fn add(&self, added: &[Arc<dyn SequenceBarrier>], cursor: Option<&dyn Fn() -> i64>) {
        loop {
            let current = self.list.load();
            if let Some(cursor) = cursor {
                let position = cursor();
                for barrier in added {
                    barrier.claim(position);
                }
            }

            let mut updated = Vec::with_capacity(current.barriers.len() + added.len());
            updated.extend(current.barriers.iter().cloned());
            updated.extend(added.iter().cloned());

            let previous = self
                .list
                .compare_and_swap(&current, Arc::new(BarrierList::new(updated)));
            if Arc::ptr_eq(&*previous, &*current) {
                break;
            }
        }

        if let Some(cursor) = cursor {
            let position = cursor();
            for barrier in added {
                barrier.claim(position);
            }
        }
    }

    /// Remove every occurrence of `removed`
    ///
    /// # Returns
    /// True if at least one entry was removed
    pub(crate) fn remove(&self, removed: &dyn SequenceBarrier) -> bool {
        let target = barrier_addr(removed);
        loop {
            let current = self.list.load();
            let updated: Vec<_> = current
                .barriers
                .iter()
                .filter(|barrier| Arc::as_ptr(*barrier) as *const () != target)
                .cloned()
                .collect();
            if updated.len() == current.barriers.len() {
                return false;
            }

            let previous = self
                .list
                .compare_and_swap(&current, Arc::new(BarrierList::new(updated)));
            if Arc::ptr_eq(&*previous, &*current) {
                return true;
            }
        }
    }

    /// Drop every barrier
    pub(crate) fn clear(&self) {
        self.list.store(Arc::new(BarrierList::default()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn barrier(value: i64) -> Arc<dyn SequenceBarrier> {
        Arc::new(Sequence::new(value))
    }

    #[test]
    fn test_sequence_as_barrier() {
        let seq = Sequence::new(3);
        assert_eq!(seq.sequence(), 3);
        seq.claim(9);
        assert_eq!(seq.sequence(), 9);
        assert!(!seq.is_producer());
    }

    #[test]
    fn test_minimum_sequence() {
        let set = BarrierSet::new(Vec::new());
        assert!(set.is_empty());
        assert_eq!(set.minimum_sequence(42), 42);

        set.add(&[barrier(10), barrier(5), barrier(20)], None);
        assert_eq!(set.len(), 3);
        assert_eq!(set.minimum_sequence(42), 5);
    }

    #[test]
    fn test_add_claims_to_cursor() {
        let set = BarrierSet::new(Vec::new());
        let added = barrier(-1);
        let cursor = || -> i64 { 17 };

        set.add(&[Arc::clone(&added)], Some(&cursor as &dyn Fn() -> i64));

        assert_eq!(added.sequence(), 17);
        assert_eq!(set.minimum_sequence(-1), 17);
    }

    #[test]
    fn test_remove_by_identity() {
        let first = barrier(1);
        let second = barrier(1);
        let set = BarrierSet::new(vec![Arc::clone(&first), Arc::clone(&second)]);

        assert!(set.remove(first.as_ref()));
        assert_eq!(set.len(), 1);
        assert!(!set.remove(first.as_ref()));
        assert!(Arc::ptr_eq(&set.snapshot()[0], &second));

        set.clear();
        assert!(set.is_empty());
    }

    #[test]
    fn test_concurrent_adds_are_not_lost() {
        let set = Arc::new(BarrierSet::new(Vec::new()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let set = Arc::clone(&set);
                thread::spawn(move || {
                    for i in 0..50 {
                        set.add(&[barrier(i)], None);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(set.len(), 400);
        assert_eq!(set.minimum_sequence(-1), 0);
    }

    #[test]
    fn test_concurrent_add_and_remove() {
        let keep = barrier(100);
        let set = Arc::new(BarrierSet::new(vec![Arc::clone(&keep)]));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let set = Arc::clone(&set);
                thread::spawn(move || {
                    for i in 0..100 {
                        let transient = barrier(i);
                        set.add(&[Arc::clone(&transient)], None);
                        assert!(set.remove(transient.as_ref()));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(set.len(), 1);
        assert_eq!(set.minimum_sequence(-1), 100);
    }
}
