//! Sequencer Implementation
//!
//! This module provides sequencer implementations for coordinating access to the ring buffer.
//! Sequencers manage the allocation of sequence numbers and ensure that producers don't
//! overwrite slots that haven't been consumed yet.
//!
//! A sequencer owns the producer cursor and the set of gating barriers it must
//! never overrun. [`SingleProducerSequencer`] assumes one claiming thread and
//! keeps its bookkeeping in plain fields; [`MultiProducerSequencer`] claims with
//! a compare-and-swap loop and records publication per slot, so its consumers
//! have to scan for gaps.

use crate::disruptor::sequence_barrier::BarrierSet;
use crate::disruptor::{
    is_power_of_two, Blocker, DisruptorError, Interrupt, Result, Sequence, SequenceBarrier,
};
use crossbeam_utils::{Backoff, CachePadded};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Producer side of the sequencing protocol
///
/// Every sequencer is also a [`SequenceBarrier`]: its published progress is the
/// cursor, which is what consumers gate on.
pub trait Sequencer: SequenceBarrier {
    /// Number of sequences that can be outstanding at once
    ///
    /// Unbounded sequencers report `i64::MAX`.
    fn buffer_size(&self) -> i64;

    /// Highest sequence claimed so far
    fn cursor(&self) -> i64;

    /// Claim the next sequence, waiting while the buffer is full
    fn next(&self) -> Result<i64> {
        self.next_n(1)
    }

    /// Claim the next `n` sequences, waiting while the buffer is full
    ///
    /// # Returns
    /// The highest claimed sequence; the claim covers `[hi - n + 1, hi]`
    ///
    /// # Errors
    /// Returns `DisruptorError::InvalidClaimCount` if `n` is not in `1..=buffer_size`
    fn next_n(&self, n: i64) -> Result<i64>;

    /// Like [`Sequencer::next_n`] but gives up when `interrupt` is raised
    ///
    /// # Errors
    /// Returns `DisruptorError::Interrupted` if the request was observed while
    /// waiting for capacity
    fn next_interruptibly(&self, n: i64, interrupt: &Interrupt) -> Result<i64>;

    /// Claim the next sequence if there is room for it
    fn try_next(&self) -> Result<Option<i64>> {
        self.try_next_n(1)
    }

    /// Claim the next `n` sequences if there is room for all of them
    ///
    /// # Returns
    /// `Ok(None)` when the buffer does not have the capacity
    fn try_next_n(&self, n: i64) -> Result<Option<i64>>;

    /// Retry [`Sequencer::try_next_n`] until it succeeds or `timeout` elapses
    ///
    /// # Returns
    /// `Ok(None)` if the deadline passed without capacity becoming available
    fn try_next_timeout(&self, n: i64, timeout: Duration) -> Result<Option<i64>> {
        let deadline = Instant::now() + timeout;
        let backoff = Backoff::new();
        loop {
            if let Some(sequence) = self.try_next_n(n)? {
                return Ok(Some(sequence));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            backoff.snooze();
        }
    }

    /// Make `sequence` visible to consumers
    fn publish(&self, sequence: i64);

    /// Make every sequence in `[lo, hi]` visible to consumers
    fn publish_range(&self, lo: i64, hi: i64);

    /// True if `required` more sequences could be claimed without waiting
    ///
    /// # Errors
    /// Returns `DisruptorError::InvalidCapacity` if `required` is negative
    fn has_available_capacity(&self, required: i64) -> Result<bool>;

    /// Number of sequences that could be claimed right now
    fn remaining_capacity(&self) -> i64;

    /// True if `sequence` has been published and its slot not yet reused
    fn is_published(&self, sequence: i64) -> bool;

    /// Highest sequence in `[lower_bound, available]` below which nothing is
    /// unpublished
    ///
    /// Returns `lower_bound - 1` when `lower_bound` itself is unpublished.
    fn get_highest_published_sequence(&self, lower_bound: i64, available: i64) -> i64;

    /// Gate this producer on `barriers`
    ///
    /// Each barrier is claimed to the cursor first, so it does not stall the
    /// producer on arrival.
    fn add_dependent_barriers(&self, barriers: &[Arc<dyn SequenceBarrier>]);

    /// Stop gating on `barrier`
    ///
    /// # Returns
    /// True if the barrier was gating this producer
    fn remove_dependent_barrier(&self, barrier: &dyn SequenceBarrier) -> bool;

    /// Wake primitive signalled on every publish, if one was configured
    fn blocker(&self) -> Option<&Blocker>;

    /// View this sequencer as a plain barrier
    fn as_barrier(self: Arc<Self>) -> Arc<dyn SequenceBarrier>;
}

/// How a producer waits for capacity while the buffer is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClaimWait {
    /// Spin, then yield, with exponential backoff
    #[default]
    Backoff,
    /// Park the thread for a fixed interval between checks
    Park(Duration),
}

impl ClaimWait {
    fn pause(&self, backoff: &Backoff) {
        match self {
            ClaimWait::Backoff => backoff.snooze(),
            ClaimWait::Park(interval) => thread::park_timeout(*interval),
        }
    }
}

pub(crate) fn validate_buffer_size(buffer_size: usize) -> Result<i64> {
    if !is_power_of_two(buffer_size) || buffer_size > i64::MAX as usize {
        return Err(DisruptorError::InvalidBufferSize(buffer_size));
    }
    Ok(buffer_size as i64)
}

/// State shared by both sequencer variants
#[derive(Debug)]
struct SequencerCore {
    buffer_size: i64,
    cursor: Sequence,
    gating: BarrierSet,
    blocker: Option<Arc<Blocker>>,
    claim_wait: ClaimWait,
}

impl SequencerCore {
    fn new(buffer_size: usize) -> Result<Self> {
        Ok(Self {
            buffer_size: validate_buffer_size(buffer_size)?,
            cursor: Sequence::default(),
            gating: BarrierSet::new(Vec::new()),
            blocker: None,
            claim_wait: ClaimWait::default(),
        })
    }

    fn validate_claim(&self, n: i64) -> Result<()> {
        if n < 1 || n > self.buffer_size {
            return Err(DisruptorError::InvalidClaimCount(n));
        }
        Ok(())
    }

    fn signal(&self) {
        if let Some(blocker) = &self.blocker {
            blocker.signal_all();
        }
    }

    fn add_gating(&self, barriers: &[Arc<dyn SequenceBarrier>]) {
        let cursor = || self.cursor.get_acquire();
        self.gating.add(barriers, Some(&cursor as &dyn Fn() -> i64));
        debug!(
            added = barriers.len(),
            total = self.gating.len(),
            "Added gating barriers"
        );
    }

    fn remove_gating(&self, barrier: &dyn SequenceBarrier) -> bool {
        let removed = self.gating.remove(barrier);
        if removed {
            debug!(total = self.gating.len(), "Removed gating barrier");
        }
        removed
    }

    /// One wait step of a blocked claim
    fn wait_step(
        &self,
        backoff: &Backoff,
        interrupt: Option<&Interrupt>,
        stalled: &mut bool,
        wrap_point: i64,
        gating_sequence: i64,
    ) -> Result<()> {
        if let Some(interrupt) = interrupt {
            interrupt.check()?;
        }
        if !*stalled {
            *stalled = true;
            trace!(wrap_point, gating_sequence, "Producer stalled on wrap point");
        }
        self.claim_wait.pause(backoff);
        Ok(())
    }
}

/// Single producer sequencer
///
/// This sequencer is optimized for scenarios where only one thread will be
/// claiming sequences. Its claim bookkeeping lives in fields only that thread
/// writes, so claiming never contends.
#[derive(Debug)]
pub struct SingleProducerSequencer {
    core: SequencerCore,
    /// Highest claimed sequence, ahead of the cursor until published
    next_value: CachePadded<AtomicI64>,
    /// Last observed gating minimum
    cached_gating: CachePadded<AtomicI64>,
}

impl SingleProducerSequencer {
    /// Create a new single producer sequencer
    ///
    /// # Arguments
    /// * `buffer_size` - The size of the buffer being sequenced
    ///
    /// # Errors
    /// Returns `DisruptorError::InvalidBufferSize` if buffer_size is not a power of 2
    pub fn new(buffer_size: usize) -> Result<Self> {
        Ok(Self {
            core: SequencerCore::new(buffer_size)?,
            next_value: CachePadded::new(AtomicI64::new(crate::disruptor::INITIAL_SEQUENCE)),
            cached_gating: CachePadded::new(AtomicI64::new(crate::disruptor::INITIAL_SEQUENCE)),
        })
    }

    /// Signal `blocker` on every publish
    pub fn with_blocker(mut self, blocker: Arc<Blocker>) -> Self {
        self.core.blocker = Some(blocker);
        self
    }

    /// Set how a claim waits while the buffer is full
    pub fn with_claim_wait(mut self, claim_wait: ClaimWait) -> Self {
        self.core.claim_wait = claim_wait;
        self
    }

    fn has_capacity(&self, required: i64, flush_cursor: bool) -> bool {
        let next_value = self.next_value.load(Ordering::Relaxed);
        let wrap_point = next_value + required - self.core.buffer_size;
        let cached = self.cached_gating.load(Ordering::Relaxed);

        if wrap_point > cached || cached > next_value {
            if flush_cursor {
                self.core.cursor.set_volatile(next_value);
            }
            let minimum = self.core.gating.minimum_sequence(next_value);
            self.cached_gating.store(minimum, Ordering::Relaxed);
            if wrap_point > minimum {
                return false;
            }
        }
        true
    }

    fn claim_blocking(&self, n: i64, interrupt: Option<&Interrupt>) -> Result<i64> {
        self.core.validate_claim(n)?;

        let next_value = self.next_value.load(Ordering::Relaxed);
        let next_sequence = next_value + n;
        let wrap_point = next_sequence - self.core.buffer_size;
        let cached = self.cached_gating.load(Ordering::Relaxed);

        if wrap_point > cached || cached > next_value {
            // Consumers must see everything published so far before we wait on them
            self.core.cursor.set_volatile(next_value);

            let backoff = Backoff::new();
            let mut stalled = false;
            let mut minimum = self.core.gating.minimum_sequence(next_value);
            while wrap_point > minimum {
                self.core
                    .wait_step(&backoff, interrupt, &mut stalled, wrap_point, minimum)?;
                minimum = self.core.gating.minimum_sequence(next_value);
            }
            self.cached_gating.store(minimum, Ordering::Relaxed);
        }

        self.next_value.store(next_sequence, Ordering::Relaxed);
        Ok(next_sequence)
    }
}

impl SequenceBarrier for SingleProducerSequencer {
    fn sequence(&self) -> i64 {
        self.core.cursor.get_acquire()
    }

    fn claim(&self, sequence: i64) {
        self.next_value.store(sequence, Ordering::Relaxed);
        self.core.cursor.set_release(sequence);
    }

    fn is_producer(&self) -> bool {
        true
    }
}

impl Sequencer for SingleProducerSequencer {
    fn buffer_size(&self) -> i64 {
        self.core.buffer_size
    }

    fn cursor(&self) -> i64 {
        self.core.cursor.get_acquire()
    }

    fn next_n(&self, n: i64) -> Result<i64> {
        self.claim_blocking(n, None)
    }

    fn next_interruptibly(&self, n: i64, interrupt: &Interrupt) -> Result<i64> {
        self.claim_blocking(n, Some(interrupt))
    }

    fn try_next_n(&self, n: i64) -> Result<Option<i64>> {
        self.core.validate_claim(n)?;
        if !self.has_capacity(n, true) {
            return Ok(None);
        }
        let next_sequence = self.next_value.load(Ordering::Relaxed) + n;
        self.next_value.store(next_sequence, Ordering::Relaxed);
        Ok(Some(next_sequence))
    }

    fn publish(&self, sequence: i64) {
        self.core.cursor.set_release(sequence);
        self.core.signal();
    }

    fn publish_range(&self, _lo: i64, hi: i64) {
        self.publish(hi);
    }

    fn has_available_capacity(&self, required: i64) -> Result<bool> {
        if required < 0 {
            return Err(DisruptorError::InvalidCapacity(required));
        }
        Ok(self.has_capacity(required, false))
    }

    fn remaining_capacity(&self) -> i64 {
        let produced = self.next_value.load(Ordering::Relaxed);
        let consumed = self.core.gating.minimum_sequence(produced);
        self.core.buffer_size - (produced - consumed)
    }

    fn is_published(&self, sequence: i64) -> bool {
        let cursor = self.core.cursor.get_acquire();
        sequence <= cursor && sequence > cursor - self.core.buffer_size
    }

    fn get_highest_published_sequence(&self, _lower_bound: i64, available: i64) -> i64 {
        available
    }

    fn add_dependent_barriers(&self, barriers: &[Arc<dyn SequenceBarrier>]) {
        self.core.add_gating(barriers);
    }

    fn remove_dependent_barrier(&self, barrier: &dyn SequenceBarrier) -> bool {
        self.core.remove_gating(barrier)
    }

    fn blocker(&self) -> Option<&Blocker> {
        self.core.blocker.as_deref()
    }

    fn as_barrier(self: Arc<Self>) -> Arc<dyn SequenceBarrier> {
        self
    }
}

/// Multi producer sequencer
///
/// This sequencer supports multiple threads claiming sequences concurrently.
/// Claims race on the cursor with compare-and-swap; publication is recorded per
/// slot by storing the published sequence itself, so a marker left over from a
/// previous lap never matches the current one.
#[derive(Debug)]
pub struct MultiProducerSequencer {
    core: SequencerCore,
    /// Cached minimum gating sequence to reduce reads of the gating set
    gating_cache: Sequence,
    /// Sequence most recently published into each slot
    published: Box<[AtomicI64]>,
    /// Index mask for fast modulo operations (buffer_size - 1)
    index_mask: i64,
}

impl MultiProducerSequencer {
    /// Create a new multi producer sequencer
    ///
    /// # Arguments
    /// * `buffer_size` - The size of the buffer being sequenced
    ///
    /// # Errors
    /// Returns `DisruptorError::InvalidBufferSize` if buffer_size is not a power of 2
    pub fn new(buffer_size: usize) -> Result<Self> {
        let core = SequencerCore::new(buffer_size)?;
        let published = (0..buffer_size)
            .map(|_| AtomicI64::new(crate::disruptor::INITIAL_SEQUENCE))
            .collect();

        Ok(Self {
            index_mask: core.buffer_size - 1,
            core,
            gating_cache: Sequence::default(),
            published,
        })
    }

    /// Signal `blocker` on every publish
    pub fn with_blocker(mut self, blocker: Arc<Blocker>) -> Self {
        self.core.blocker = Some(blocker);
        self
    }

    /// Set how a claim waits while the buffer is full
    pub fn with_claim_wait(mut self, claim_wait: ClaimWait) -> Self {
        self.core.claim_wait = claim_wait;
        self
    }

    #[inline]
    fn marker(&self, sequence: i64) -> &AtomicI64 {
        // SAFETY: the mask keeps the index below published.len()
        unsafe { self.published.get_unchecked((sequence & self.index_mask) as usize) }
    }

    fn has_capacity(&self, required: i64, cursor_value: i64) -> bool {
        let wrap_point = cursor_value + required - self.core.buffer_size;
        let cached = self.gating_cache.get();

        if wrap_point > cached || cached > cursor_value {
            let minimum = self.core.gating.minimum_sequence(cursor_value);
            self.gating_cache.set(minimum);
            if wrap_point > minimum {
                return false;
            }
        }
        true
    }

    fn claim_blocking(&self, n: i64, interrupt: Option<&Interrupt>) -> Result<i64> {
        self.core.validate_claim(n)?;

        let backoff = Backoff::new();
        let mut stalled = false;
        loop {
            let current = self.core.cursor.get_acquire();
            let next = current + n;
            let wrap_point = next - self.core.buffer_size;
            let cached = self.gating_cache.get();

            if wrap_point > cached || cached > current {
                let minimum = self.core.gating.minimum_sequence(current);
                if wrap_point > minimum {
                    self.core
                        .wait_step(&backoff, interrupt, &mut stalled, wrap_point, minimum)?;
                    continue;
                }
                self.gating_cache.set(minimum);
            } else if self.core.cursor.compare_and_set(current, next) {
                return Ok(next);
            }
        }
    }
}

impl SequenceBarrier for MultiProducerSequencer {
    fn sequence(&self) -> i64 {
        self.core.cursor.get_acquire()
    }

    fn claim(&self, sequence: i64) {
        self.core.cursor.set_release(sequence);
    }

    fn is_producer(&self) -> bool {
        true
    }
}

impl Sequencer for MultiProducerSequencer {
    fn buffer_size(&self) -> i64 {
        self.core.buffer_size
    }

    fn cursor(&self) -> i64 {
        self.core.cursor.get_acquire()
    }

    fn next_n(&self, n: i64) -> Result<i64> {
        self.claim_blocking(n, None)
    }

    fn next_interruptibly(&self, n: i64, interrupt: &Interrupt) -> Result<i64> {
        self.claim_blocking(n, Some(interrupt))
    }

    fn try_next_n(&self, n: i64) -> Result<Option<i64>> {
        self.core.validate_claim(n)?;
        loop {
            let current = self.core.cursor.get_acquire();
            if !self.has_capacity(n, current) {
                return Ok(None);
            }
            if self.core.cursor.compare_and_set(current, current + n) {
                return Ok(Some(current + n));
            }
        }
    }

    fn publish(&self, sequence: i64) {
        self.marker(sequence).store(sequence, Ordering::Release);
        self.core.signal();
    }

    fn publish_range(&self, lo: i64, hi: i64) {
        for sequence in lo..=hi {
            self.marker(sequence).store(sequence, Ordering::Release);
        }
        self.core.signal();
    }

    fn has_available_capacity(&self, required: i64) -> Result<bool> {
        if required < 0 {
            return Err(DisruptorError::InvalidCapacity(required));
        }
        Ok(self.has_capacity(required, self.core.cursor.get_acquire()))
    }

    fn remaining_capacity(&self) -> i64 {
        let produced = self.core.cursor.get_acquire();
        let consumed = self.core.gating.minimum_sequence(produced);
        self.core.buffer_size - (produced - consumed)
    }

    fn is_published(&self, sequence: i64) -> bool {
        self.marker(sequence).load(Ordering::Acquire) == sequence
    }

    fn get_highest_published_sequence(&self, lower_bound: i64, available: i64) -> i64 {
        for sequence in lower_bound..=available {
            if !self.is_published(sequence) {
                return sequence - 1;
            }
        }
        available
    }

    fn add_dependent_barriers(&self, barriers: &[Arc<dyn SequenceBarrier>]) {
        self.core.add_gating(barriers);
    }

    fn remove_dependent_barrier(&self, barrier: &dyn SequenceBarrier) -> bool {
        self.core.remove_gating(barrier)
    }

    fn blocker(&self) -> Option<&Blocker> {
        self.core.blocker.as_deref()
    }

    fn as_barrier(self: Arc<Self>) -> Arc<dyn SequenceBarrier> {
        self
    }
}
