//! Unbounded Chunked Buffer
//!
//! This module runs the sequencing protocol over a logically infinite sequence
//! space. Storage is a chain of fixed-size chunks; chunk `i` holds sequences
//! `i * chunk_size .. (i + 1) * chunk_size`. Producers never wait for capacity:
//! a claim that runs past the last chunk extends the chain.
//!
//! Once every gating consumer has moved past a chunk, the next extension
//! detaches it from the head of the chain and either pools it or releases it.
//! Pooled chunks are re-indexed and appended at the tail instead of allocating,
//! so the same chunk objects keep cycling through the chain. Publication is
//! recorded per slot by storing the chunk's index, so markers from a previous
//! life of a recycled chunk never read as published.
//!
//! The pool bound is applied when chunks are detached; a burst of claims can
//! still allocate past it before trailing chunks become reclaimable.

use crate::disruptor::event_factory::populate_slots;
use crate::disruptor::event_processor::DataProvider;
use crate::disruptor::sequence_barrier::BarrierSet;
use crate::disruptor::{
    is_power_of_two, Blocker, DisruptorError, EventFactory, Interrupt, Result, Sequence,
    SequenceBarrier, Sequencer, INITIAL_SEQUENCE,
};
use arc_swap::{ArcSwap, ArcSwapOption};
use parking_lot::Mutex;
use serde::Serialize;
use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Fixed-size segment of the unbounded sequence space
pub struct Chunk<T> {
    index: AtomicI64,
    slots: Box<[UnsafeCell<T>]>,
    /// Per slot: index of the chunk life in which the slot was last published
    published: Box<[AtomicI64]>,
}

impl<T> Chunk<T> {
    fn new(index: i64, factory: &dyn EventFactory<T>, chunk_size: usize) -> Self {
        Self {
            index: AtomicI64::new(index),
            slots: populate_slots(factory, chunk_size),
            published: (0..chunk_size).map(|_| AtomicI64::new(INITIAL_SEQUENCE)).collect(),
        }
    }

    /// Position of this chunk in the sequence space, in units of chunk size
    pub fn index(&self) -> i64 {
        self.index.load(Ordering::Acquire)
    }

    /// Number of slots in the chunk
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// First sequence stored in this chunk
    pub fn first_sequence(&self) -> i64 {
        self.index() * self.slots.len() as i64
    }

    fn reindex(&self, index: i64) {
        self.index.store(index, Ordering::Release);
    }
}

impl<T> fmt::Debug for Chunk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("index", &self.index())
            .field("capacity", &self.capacity())
            .finish()
    }
}

// SAFETY: slots are handed to one writer at a time by the sequencing protocol
unsafe impl<T: Send> Send for Chunk<T> {}
unsafe impl<T: Send + Sync> Sync for Chunk<T> {}

/// Entries in a fresh chunk directory
const INITIAL_DIRECTORY_CAPACITY: usize = 16;

/// Ring of chunk handles covering the chain `[first, next)`
///
/// Chunk `i` lives in entry `i & mask`. Appending at the tail and detaching at
/// the head each touch one entry; only a full directory is replaced, by one of
/// twice the capacity. Mutation happens under the growth lock, lookups do not
/// lock.
struct ChunkDirectory<T> {
    mask: i64,
    first: AtomicI64,
    next: AtomicI64,
    entries: Box<[ArcSwapOption<Chunk<T>>]>,
}

impl<T> ChunkDirectory<T> {
    fn with_capacity(capacity: usize, first: i64) -> Self {
        Self {
            mask: capacity as i64 - 1,
            first: AtomicI64::new(first),
            next: AtomicI64::new(first),
            entries: (0..capacity).map(|_| ArcSwapOption::empty()).collect(),
        }
    }

    /// Directory whose chain is the single chunk `chunk` at `index`
    fn starting_with(index: i64, chunk: Arc<Chunk<T>>) -> Self {
        let directory = Self::with_capacity(INITIAL_DIRECTORY_CAPACITY, index);
        directory.entry(index).store(Some(chunk));
        directory.next.store(index + 1, Ordering::Release);
        directory
    }

    fn entry(&self, chunk_index: i64) -> &ArcSwapOption<Chunk<T>> {
        &self.entries[(chunk_index & self.mask) as usize]
    }

    fn first_index(&self) -> i64 {
        self.first.load(Ordering::Acquire)
    }

    fn next_index(&self) -> i64 {
        self.next.load(Ordering::Acquire)
    }

    fn len(&self) -> usize {
        (self.next_index() - self.first_index()) as usize
    }

    /// Run `f` on chunk `chunk_index` if it is in the chain
    fn with_chunk<R>(&self, chunk_index: i64, f: impl FnOnce(&Arc<Chunk<T>>) -> R) -> Option<R> {
        if chunk_index < self.first_index() || chunk_index >= self.next_index() {
            return None;
        }
        let entry = self.entry(chunk_index).load();
        match &*entry {
            // A recycled chunk answers to its new index only
            Some(chunk) if chunk.index() == chunk_index => Some(f(chunk)),
            _ => None,
        }
    }

    fn lookup(&self, chunk_index: i64) -> Option<Arc<Chunk<T>>> {
        self.with_chunk(chunk_index, Arc::clone)
    }

    /// Detach the head chunk. Growth lock only.
    fn pop_head(&self) -> Option<(i64, Arc<Chunk<T>>)> {
        let first = self.first_index();
        if first == self.next_index() {
            return None;
        }
        self.first.store(first + 1, Ordering::Release);
        self.entry(first).swap(None).map(|chunk| (first, chunk))
    }

    /// Append `chunk` at the tail, handing it back if the directory is full.
    /// Growth lock only.
    fn push(&self, chunk: Arc<Chunk<T>>) -> std::result::Result<(), Arc<Chunk<T>>> {
        let next = self.next_index();
        if next - self.first_index() == self.entries.len() as i64 {
            return Err(chunk);
        }
        self.entry(next).store(Some(chunk));
        self.next.store(next + 1, Ordering::Release);
        Ok(())
    }

    /// Copy of this directory with twice the capacity and `tail` appended
    fn grown_with(&self, tail: Arc<Chunk<T>>) -> Self {
        let first = self.first_index();
        let next = self.next_index();
        let grown = Self::with_capacity(self.entries.len() * 2, first);
        for index in first..next {
            grown.entry(index).store(self.entry(index).load_full());
        }
        grown.entry(next).store(Some(tail));
        grown.next.store(next + 1, Ordering::Release);
        grown
    }
}

/// Chunk pool and lifetime counters, guarded by the growth lock
struct Growth<T> {
    pool: Vec<Arc<Chunk<T>>>,
    allocated: u64,
    recycled: u64,
    released: u64,
}

/// Chunk lifecycle counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChunkStats {
    /// Chunks created by the factory
    pub allocated: u64,
    /// Pooled chunks put back into the chain under a new index
    pub recycled: u64,
    /// Reclaimed chunks dropped because the pool was full
    pub released: u64,
    /// Chunks waiting in the pool
    pub pooled: usize,
    /// Chunks currently in the chain
    pub live: usize,
}

/// Shared read access to a slot of an [`UnboundedBuffer`]
pub struct SlotRef<T> {
    chunk: Arc<Chunk<T>>,
    offset: usize,
}

impl<T> Deref for SlotRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: created only through the unsafe accessors, whose contract
        // excludes a concurrent writer
        unsafe { &*self.chunk.slots[self.offset].get() }
    }
}

/// Exclusive write access to a claimed slot of an [`UnboundedBuffer`]
pub struct SlotMut<T> {
    chunk: Arc<Chunk<T>>,
    offset: usize,
}

impl<T> Deref for SlotMut<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: see `SlotMut::deref_mut`
        unsafe { &*self.chunk.slots[self.offset].get() }
    }
}

impl<T> DerefMut for SlotMut<T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: created only through `producer_get`, whose contract makes
        // the caller the slot's only accessor
        unsafe { &mut *self.chunk.slots[self.offset].get() }
    }
}

/// Unbounded buffer that is its own sequencer
///
/// Claims never block and never fail for lack of space. Gating barriers added
/// through [`Sequencer::add_dependent_barriers`] decide when trailing chunks
/// can be reclaimed; without any, every chunk is retained.
pub struct UnboundedBuffer<T> {
    chunk_size: i64,
    chunk_shift: u32,
    index_mask: i64,
    max_pooled_chunks: usize,
    factory: Box<dyn EventFactory<T>>,
    cursor: Sequence,
    gating: BarrierSet,
    blocker: Option<Arc<Blocker>>,
    directory: ArcSwap<ChunkDirectory<T>>,
    growth: Mutex<Growth<T>>,
}

impl<T> UnboundedBuffer<T> {
    /// Create a new unbounded buffer holding one empty chunk
    ///
    /// # Arguments
    /// * `chunk_size` - Slots per chunk, a power of 2
    /// * `max_pooled_chunks` - Reclaimed chunks kept for reuse
    /// * `factory` - Initialises the slots of every allocated chunk
    ///
    /// # Errors
    /// Returns `DisruptorError::InvalidBufferSize` if chunk_size is not a power of 2
    pub fn new<F>(chunk_size: usize, max_pooled_chunks: usize, factory: F) -> Result<Self>
    where
        F: EventFactory<T> + 'static,
    {
        Self::with_factory(chunk_size, max_pooled_chunks, Box::new(factory))
    }

    /// Like [`UnboundedBuffer::new`] with an already boxed factory
    pub fn with_factory(
        chunk_size: usize,
        max_pooled_chunks: usize,
        factory: Box<dyn EventFactory<T>>,
    ) -> Result<Self> {
        if !is_power_of_two(chunk_size) || chunk_size > i64::MAX as usize {
            return Err(DisruptorError::InvalidBufferSize(chunk_size));
        }

        let first = Arc::new(Chunk::new(0, factory.as_ref(), chunk_size));
        Ok(Self {
            chunk_size: chunk_size as i64,
            chunk_shift: chunk_size.trailing_zeros(),
            index_mask: chunk_size as i64 - 1,
            max_pooled_chunks,
            factory,
            cursor: Sequence::default(),
            gating: BarrierSet::new(Vec::new()),
            blocker: None,
            directory: ArcSwap::from_pointee(ChunkDirectory::starting_with(0, first)),
            growth: Mutex::new(Growth {
                pool: Vec::new(),
                allocated: 1,
                recycled: 0,
                released: 0,
            }),
        })
    }

    /// Signal `blocker` on every publish
    pub fn with_blocker(mut self, blocker: Arc<Blocker>) -> Self {
        self.blocker = Some(blocker);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size as usize
    }

    pub fn max_pooled_chunks(&self) -> usize {
        self.max_pooled_chunks
    }

    #[inline]
    fn chunk_index(&self, sequence: i64) -> i64 {
        sequence >> self.chunk_shift
    }

    #[inline]
    fn offset(&self, sequence: i64) -> usize {
        (sequence & self.index_mask) as usize
    }

    /// The chunk currently holding `sequence`, if it is resident
    pub fn chunk_for(&self, sequence: i64) -> Option<Arc<Chunk<T>>> {
        self.directory.load().lookup(self.chunk_index(sequence))
    }

    #[cfg(test)]
    fn directory_capacity(&self) -> usize {
        self.directory.load().entries.len()
    }

    /// Chunk lifecycle counters
    pub fn stats(&self) -> ChunkStats {
        let growth = self.growth.lock();
        ChunkStats {
            allocated: growth.allocated,
            recycled: growth.recycled,
            released: growth.released,
            pooled: growth.pool.len(),
            live: self.directory.load().len(),
        }
    }

    fn slot_chunk(&self, sequence: i64) -> Result<Arc<Chunk<T>>> {
        self.chunk_for(sequence)
            .ok_or(DisruptorError::InvalidSequence(sequence))
    }

    /// Read access to the slot for `sequence`
    ///
    /// # Errors
    /// Returns `DisruptorError::InvalidSequence` if the sequence is not resident
    ///
    /// # Safety
    /// No producer may be writing the slot: `sequence` must have been published
    /// and the caller's progress must still gate its chunk from being recycled.
    pub unsafe fn get(&self, sequence: i64) -> Result<SlotRef<T>> {
        Ok(SlotRef {
            chunk: self.slot_chunk(sequence)?,
            offset: self.offset(sequence),
        })
    }

    /// Consumer-side access; identical to [`UnboundedBuffer::get`]
    ///
    /// # Errors
    /// Returns `DisruptorError::InvalidSequence` if the sequence is not resident
    ///
    /// # Safety
    /// Same contract as [`UnboundedBuffer::get`].
    pub unsafe fn consumer_get(&self, sequence: i64) -> Result<SlotRef<T>> {
        self.get(sequence)
    }

    /// Producer-side access to a claimed slot
    ///
    /// # Errors
    /// Returns `DisruptorError::InvalidSequence` if the sequence is not resident
    ///
    /// # Safety
    /// The caller must have claimed `sequence` from this buffer and not yet
    /// published it, and must drop the returned guard before publishing.
    pub unsafe fn producer_get(&self, sequence: i64) -> Result<SlotMut<T>> {
        Ok(SlotMut {
            chunk: self.slot_chunk(sequence)?,
            offset: self.offset(sequence),
        })
    }

    /// Claim one slot, fill it through `translator` and publish it
    ///
    /// # Returns
    /// The published sequence
    pub fn publish_event<F>(&self, translator: F) -> Result<i64>
    where
        F: FnOnce(&mut T, i64),
    {
        let sequence = self.claim_range(1)?;
        {
            // SAFETY: `sequence` was just claimed and is unpublished
            let mut slot = unsafe { self.producer_get(sequence)? };
            translator(&mut *slot, sequence);
        }
        self.mark_published(sequence);
        self.signal();
        Ok(sequence)
    }

    fn claim_range(&self, n: i64) -> Result<i64> {
        if n < 1 {
            return Err(DisruptorError::InvalidClaimCount(n));
        }
        let hi = self.cursor.add_and_get(n);
        self.ensure_chunks(hi);
        Ok(hi)
    }

    fn mark_published(&self, sequence: i64) {
        let chunk_index = self.chunk_index(sequence);
        let offset = self.offset(sequence);
        let marked = self.directory.load().with_chunk(chunk_index, |chunk| {
            chunk.published[offset].store(chunk_index, Ordering::Release);
        });
        if marked.is_none() {
            trace!(sequence, chunk_index, "Publish of a sequence with no resident chunk");
        }
        debug_assert!(
            marked.is_some(),
            "published sequence {sequence} has no resident chunk"
        );
    }

    fn signal(&self) {
        if let Some(blocker) = &self.blocker {
            blocker.signal_all();
        }
    }

    /// Extend the chain so it reaches `hi`, reclaiming consumed head chunks
    fn ensure_chunks(&self, hi: i64) {
        let needed = self.chunk_index(hi);
        if self.directory.load().next_index() > needed {
            return;
        }

        let mut growth = self.growth.lock();
        let mut directory = self.directory.load_full();
        if directory.next_index() > needed {
            return;
        }

        let minimum = self.gating.minimum_sequence(INITIAL_SEQUENCE);
        while directory.len() > 0 {
            let last_sequence = (directory.first_index() + 1) * self.chunk_size - 1;
            if last_sequence > minimum {
                break;
            }
            if let Some((index, chunk)) = directory.pop_head() {
                self.reclaim(&mut growth, chunk, index);
            }
        }

        for index in directory.next_index()..=needed {
            let chunk = self.take_chunk(&mut growth, index);
            if let Err(chunk) = directory.push(chunk) {
                let grown = Arc::new(directory.grown_with(chunk));
                debug!(capacity = grown.entries.len(), "Grew chunk directory");
                self.directory.store(Arc::clone(&grown));
                directory = grown;
            }
        }
    }

    fn reclaim(&self, growth: &mut Growth<T>, chunk: Arc<Chunk<T>>, index: i64) {
        if growth.pool.len() < self.max_pooled_chunks {
            growth.pool.push(chunk);
            debug!(index, pooled = growth.pool.len(), "Pooled consumed chunk");
        } else {
            growth.released += 1;
            debug!(index, "Released consumed chunk");
        }
    }

    fn take_chunk(&self, growth: &mut Growth<T>, index: i64) -> Arc<Chunk<T>> {
        match growth.pool.pop() {
            Some(chunk) => {
                let previous = chunk.index();
                chunk.reindex(index);
                growth.recycled += 1;
                debug!(previous, index, "Recycled chunk");
                chunk
            }
            None => {
                growth.allocated += 1;
                debug!(index, "Allocated chunk");
                Arc::new(Chunk::new(index, self.factory.as_ref(), self.chunk_size as usize))
            }
        }
    }

    /// Restart the chain at the chunk holding `sequence + 1`
    fn rebase(&self, sequence: i64) {
        let mut growth = self.growth.lock();
        let current = self.directory.load_full();
        while let Some((index, chunk)) = current.pop_head() {
            self.reclaim(&mut growth, chunk, index);
        }

        let first_index = self.chunk_index(sequence + 1);
        let first = self.take_chunk(&mut growth, first_index);
        self.directory
            .store(Arc::new(ChunkDirectory::starting_with(first_index, first)));
    }
}

impl<T> fmt::Debug for UnboundedBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnboundedBuffer")
            .field("chunk_size", &self.chunk_size)
            .field("max_pooled_chunks", &self.max_pooled_chunks)
            .field("cursor", &self.cursor)
            .field("gating", &self.gating.len())
            .finish()
    }
}

impl<T: Send + Sync + 'static> SequenceBarrier for UnboundedBuffer<T> {
    fn sequence(&self) -> i64 {
        self.cursor.get_acquire()
    }

    fn claim(&self, sequence: i64) {
        self.rebase(sequence);
        self.cursor.set_release(sequence);
    }

    fn is_producer(&self) -> bool {
        true
    }
}

impl<T: Send + Sync + 'static> Sequencer for UnboundedBuffer<T> {
    fn buffer_size(&self) -> i64 {
        i64::MAX
    }

    fn cursor(&self) -> i64 {
        self.cursor.get_acquire()
    }

    fn next_n(&self, n: i64) -> Result<i64> {
        self.claim_range(n)
    }

    fn next_interruptibly(&self, n: i64, _interrupt: &Interrupt) -> Result<i64> {
        // Never waits, so there is no point at which to observe the request
        self.claim_range(n)
    }

    fn try_next_n(&self, n: i64) -> Result<Option<i64>> {
        self.claim_range(n).map(Some)
    }

    fn publish(&self, sequence: i64) {
        self.mark_published(sequence);
        self.signal();
    }

    fn publish_range(&self, lo: i64, hi: i64) {
        for sequence in lo..=hi {
            self.mark_published(sequence);
        }
        self.signal();
    }

    fn has_available_capacity(&self, required: i64) -> Result<bool> {
        if required < 0 {
            return Err(DisruptorError::InvalidCapacity(required));
        }
        Ok(true)
    }

    fn remaining_capacity(&self) -> i64 {
        i64::MAX
    }

    fn is_published(&self, sequence: i64) -> bool {
        let chunk_index = self.chunk_index(sequence);
        let offset = self.offset(sequence);
        self.directory
            .load()
            .with_chunk(chunk_index, |chunk| {
                chunk.published[offset].load(Ordering::Acquire) == chunk_index
            })
            .unwrap_or(false)
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
        let cursor = || self.cursor.get_acquire();
        self.gating.add(barriers, Some(&cursor as &dyn Fn() -> i64));
        debug!(
            added = barriers.len(),
            total = self.gating.len(),
            "Added gating barriers"
        );
    }

    fn remove_dependent_barrier(&self, barrier: &dyn SequenceBarrier) -> bool {
        let removed = self.gating.remove(barrier);
        if removed {
            debug!(total = self.gating.len(), "Removed gating barrier");
        }
        removed
    }

    fn blocker(&self) -> Option<&Blocker> {
        self.blocker.as_deref()
    }

    fn as_barrier(self: Arc<Self>) -> Arc<dyn SequenceBarrier> {
        self
    }
}

impl<T: Send + Sync> DataProvider<T> for UnboundedBuffer<T> {
    unsafe fn read_published<R>(&self, sequence: i64, reader: impl FnOnce(&T) -> R) -> Result<R> {
        let slot = self.consumer_get(sequence)?;
        Ok(reader(&slot))
    }
}
