//! Ring Buffer Implementation
//!
//! This module provides the fixed-capacity storage of the engine. The ring buffer
//! is a pre-allocated circular array of slots and knows nothing about producers
//! or consumers: which thread may touch which slot is decided entirely by the
//! sequencer protocol. Keeping storage and sequencing apart lets either side be
//! tested on its own.

use crate::disruptor::event_factory::populate_slots;
use crate::disruptor::event_processor::DataProvider;
use crate::disruptor::{is_power_of_two, DisruptorError, EventFactory, Result, Sequencer};
use std::cell::UnsafeCell;

/// Fixed-size, power-of-two circular array of pre-populated slots
///
/// A sequence resolves to a slot with `sequence & (buffer_size - 1)`; slots are
/// created once by the factory and then mutated in place, so publishing never
/// allocates.
///
/// # Type Parameters
/// * `T` - The slot type stored in the buffer
#[derive(Debug)]
pub struct RingBuffer<T> {
    slots: Box<[UnsafeCell<T>]>,
    index_mask: i64,
}

impl<T> RingBuffer<T> {
    /// Create a new ring buffer with the specified size and event factory
    ///
    /// # Errors
    /// Returns `DisruptorError::InvalidBufferSize` if buffer_size is not a power of 2
    pub fn new<F>(buffer_size: usize, event_factory: F) -> Result<Self>
    where
        F: EventFactory<T>,
    {
        if !is_power_of_two(buffer_size) {
            return Err(DisruptorError::InvalidBufferSize(buffer_size));
        }

        Ok(Self {
            slots: populate_slots(&event_factory, buffer_size),
            index_mask: (buffer_size - 1) as i64,
        })
    }

    #[inline]
    fn slot(&self, sequence: i64) -> &UnsafeCell<T> {
        let index = (sequence & self.index_mask) as usize;
        // SAFETY: the mask keeps the index below slots.len()
        unsafe { self.slots.get_unchecked(index) }
    }

    /// Get a reference to the slot for `sequence`
    ///
    /// # Safety
    /// No producer may be writing the slot: `sequence` must have been published
    /// and the caller's progress must still gate the producer from reusing it.
    #[inline]
    pub unsafe fn get(&self, sequence: i64) -> &T {
        &*self.slot(sequence).get()
    }

    /// Consumer-side access; identical to [`RingBuffer::get`]
    ///
    /// # Safety
    /// Same contract as [`RingBuffer::get`].
    #[inline]
    pub unsafe fn consumer_get(&self, sequence: i64) -> &T {
        self.get(sequence)
    }

    /// Producer-side access to a claimed slot
    ///
    /// # Safety
    /// The caller must have claimed `sequence` from the sequencer gating this
    /// buffer and must not have published it yet. That claim is what makes the
    /// returned reference exclusive.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn producer_get(&self, sequence: i64) -> &mut T {
        &mut *self.slot(sequence).get()
    }

    /// Get a mutable reference to a slot through exclusive ownership
    pub fn get_mut(&mut self, sequence: i64) -> &mut T {
        let index = (sequence & self.index_mask) as usize;
        self.slots[index].get_mut()
    }

    /// Get the size of the buffer
    pub fn buffer_size(&self) -> usize {
        self.slots.len()
    }

    /// Get the size of the buffer as i64, the unit of sequence arithmetic
    pub fn size(&self) -> i64 {
        self.slots.len() as i64
    }

    fn check_sequencer(&self, sequencer: &dyn Sequencer) -> Result<()> {
        if sequencer.buffer_size() > self.size() {
            return Err(DisruptorError::InvalidBufferSize(self.buffer_size()));
        }
        Ok(())
    }

    /// Claim one slot, fill it through `translator` and publish it
    ///
    /// Blocks while the buffer is full.
    ///
    /// # Returns
    /// The published sequence
    ///
    /// # Errors
    /// Returns `DisruptorError::InvalidBufferSize` if the sequencer covers more
    /// sequences than this buffer holds
    pub fn publish_event<F>(&self, sequencer: &dyn Sequencer, translator: F) -> Result<i64>
    where
        F: FnOnce(&mut T, i64),
    {
        self.check_sequencer(sequencer)?;
        let sequence = sequencer.next()?;
        // SAFETY: `sequence` was just claimed and is unpublished
        translator(unsafe { self.producer_get(sequence) }, sequence);
        sequencer.publish(sequence);
        Ok(sequence)
    }

    /// Like [`RingBuffer::publish_event`] but gives up when the buffer is full
    ///
    /// # Returns
    /// `Ok(None)` if there was no capacity, otherwise the published sequence
    pub fn try_publish_event<F>(
        &self,
        sequencer: &dyn Sequencer,
        translator: F,
    ) -> Result<Option<i64>>
    where
        F: FnOnce(&mut T, i64),
    {
        self.check_sequencer(sequencer)?;
        let Some(sequence) = sequencer.try_next()? else {
            return Ok(None);
        };
        // SAFETY: `sequence` was just claimed and is unpublished
        translator(unsafe { self.producer_get(sequence) }, sequence);
        sequencer.publish(sequence);
        Ok(Some(sequence))
    }

    /// Claim `n` slots, fill each through `translator` and publish them as one batch
    ///
    /// # Returns
    /// The highest published sequence
    pub fn publish_events<F>(
        &self,
        sequencer: &dyn Sequencer,
        n: i64,
        mut translator: F,
    ) -> Result<i64>
    where
        F: FnMut(&mut T, i64),
    {
        self.check_sequencer(sequencer)?;
        let hi = sequencer.next_n(n)?;
        let lo = hi - (n - 1);
        for sequence in lo..=hi {
            // SAFETY: the whole range [lo, hi] was just claimed and is unpublished
            translator(unsafe { self.producer_get(sequence) }, sequence);
        }
        sequencer.publish_range(lo, hi);
        Ok(hi)
    }
}

// SAFETY: slots are only shared across threads under the sequencer protocol,
// which hands each slot to exactly one writer at a time
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send + Sync> Sync for RingBuffer<T> {}

impl<T: Send + Sync> DataProvider<T> for RingBuffer<T> {
    unsafe fn read_published<R>(&self, sequence: i64, reader: impl FnOnce(&T) -> R) -> Result<R> {
        Ok(reader(self.consumer_get(sequence)))
    }
}
