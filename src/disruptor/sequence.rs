//! Sequence implementation for the Disruptor
//!
//! The Sequence is used to track progress through the ring buffer and coordinate
//! between producers and consumers. Reads and writes come in several strengths so
//! that each call site can use the weakest ordering that is still sufficient:
//!
//! | operation                 | ordering  |
//! |---------------------------|-----------|
//! | `get` / `set`             | `Relaxed` |
//! | `get_acquire`             | `Acquire` |
//! | `set_release`             | `Release` |
//! | `set_volatile`            | `SeqCst`  |
//! | `compare_and_set`         | `AcqRel`  |
//!
//! The counter is wrapped in `CachePadded` so that two sequences never share a
//! cache line.

use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicI64, Ordering};

/// A cache-line padded 64-bit sequence counter
pub struct Sequence {
    value: CachePadded<AtomicI64>,
}

impl Sequence {
    /// Create a new sequence with the given initial value
    pub fn new(initial_value: i64) -> Self {
        Self {
            value: CachePadded::new(AtomicI64::new(initial_value)),
        }
    }

    /// Plain read, no ordering with respect to other memory
    #[inline]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Plain write, only meaningful to the owning thread
    #[inline]
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    /// Read that pairs with a `set_release` on another thread
    #[inline]
    pub fn get_acquire(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Write that publishes every preceding write of this thread
    #[inline]
    pub fn set_release(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    /// Fully ordered write, also ordered against later loads of this thread
    #[inline]
    pub fn set_volatile(&self, value: i64) {
        self.value.store(value, Ordering::SeqCst);
    }

    /// Atomically replace `expected` with `new`
    ///
    /// # Returns
    /// True if the swap happened
    #[inline]
    pub fn compare_and_set(&self, expected: i64, new: i64) -> bool {
        self.value
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Add a value and get the new result
    #[inline]
    pub fn add_and_get(&self, increment: i64) -> i64 {
        self.value.fetch_add(increment, Ordering::AcqRel) + increment
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new(crate::disruptor::INITIAL_SEQUENCE)
    }
}

impl std::fmt::Debug for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequence")
            .field("value", &self.get_acquire())
            .finish()
    }
}

impl std::fmt::Display for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.get_acquire())
    }
}
