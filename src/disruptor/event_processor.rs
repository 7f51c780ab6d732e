//! Event Processor implementation for the Disruptor
//!
//! Event processors run the consumer side of the protocol: wait on a consumer
//! barrier, hand every available slot to a handler, then advance the barrier's
//! progress so upstream producers can reuse the slots. Waiting in batches means
//! a consumer that falls behind catches up without paying the wait cost per slot.

use crate::disruptor::{ConsumerBarrier, DisruptorError, Result};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::debug;

const IDLE: u8 = 0;
const HALTED: u8 = 1;
const RUNNING: u8 = 2;

/// Read access to published slots, implemented by both buffer kinds
pub trait DataProvider<T>: Send + Sync {
    /// Run `reader` against the slot holding `sequence`
    ///
    /// # Errors
    /// Returns `DisruptorError::InvalidSequence` if the provider no longer (or
    /// not yet) stores `sequence`
    ///
    /// # Safety
    /// `sequence` must be published and not yet released by the caller's
    /// progress, so that no producer can be writing the slot.
    unsafe fn read_published<R>(&self, sequence: i64, reader: impl FnOnce(&T) -> R) -> Result<R>;
}

/// Handler for processing events from the Disruptor
///
/// This trait must be implemented by consumers to process events.
///
/// # Examples
/// ```
/// use ringgate::disruptor::{EventHandler, Result};
///
/// struct Summer {
///     total: i64,
/// }
///
/// impl EventHandler<i64> for Summer {
///     fn on_event(&mut self, event: &i64, _sequence: i64, _end_of_batch: bool) -> Result<()> {
///         self.total += *event;
///         Ok(())
///     }
/// }
/// ```
pub trait EventHandler<T>: Send {
    /// Process one event
    ///
    /// # Arguments
    /// * `event` - The published slot
    /// * `sequence` - The sequence number of the event
    /// * `end_of_batch` - True if this is the last event of the available batch
    ///
    /// # Errors
    /// Any error stops the processor and is returned from [`BatchEventProcessor::run`]
    fn on_event(&mut self, event: &T, sequence: i64, end_of_batch: bool) -> Result<()>;

    /// Called once before the first wait
    fn on_start(&mut self) {}

    /// Called once when the processor stops, whatever the reason
    fn on_shutdown(&mut self) {}

    /// Called when the wait strategy gave up waiting for `sequence`
    fn on_timeout(&mut self, _sequence: i64) -> Result<()> {
        Ok(())
    }
}

/// Batch event processor that processes events in batches for efficiency
///
/// Progress is published through member 0 of the barrier. The processor stops
/// when the barrier is alerted; alert it from another thread through
/// [`BatchEventProcessor::barrier`] to halt a running processor.
pub struct BatchEventProcessor<T, D, H> {
    data_provider: Arc<D>,
    barrier: Arc<ConsumerBarrier>,
    handler: H,
    state: AtomicU8,
    _event: PhantomData<fn(&T)>,
}

impl<T, D, H> BatchEventProcessor<T, D, H>
where
    D: DataProvider<T>,
    H: EventHandler<T>,
{
    /// Create a new batch event processor
    ///
    /// # Arguments
    /// * `data_provider` - The buffer being consumed
    /// * `barrier` - The barrier that gates this consumer; it must sequence
    ///   `data_provider`
    /// * `handler` - Receives every event
    pub fn new(data_provider: Arc<D>, barrier: Arc<ConsumerBarrier>, handler: H) -> Self {
        Self {
            data_provider,
            barrier,
            handler,
            state: AtomicU8::new(IDLE),
            _event: PhantomData,
        }
    }

    /// The barrier this processor waits on and publishes progress through
    pub fn barrier(&self) -> &Arc<ConsumerBarrier> {
        &self.barrier
    }

    /// Stop the processor at its next wait
    ///
    /// A halt issued before [`BatchEventProcessor::run`] makes that run return
    /// without processing anything.
    pub fn halt(&self) {
        self.state.store(HALTED, Ordering::Release);
        self.barrier.alert();
    }

    /// Check if the processor is inside [`BatchEventProcessor::run`]
    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Consume the processor, returning its handler
    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Process events until the barrier is alerted
    ///
    /// Returns at once, leaving the handler untouched, if [`halt`] was called
    /// since the last run. Otherwise clears any alert left over from a previous
    /// run before starting.
    ///
    /// [`halt`]: BatchEventProcessor::halt
    ///
    /// # Errors
    /// Returns the first error raised by the handler or the barrier, other than
    /// the alert that stops the loop and timeouts, which go to the handler's
    /// `on_timeout`
    pub fn run(&mut self) -> Result<()> {
        if self.state.swap(RUNNING, Ordering::AcqRel) == HALTED {
            self.state.store(IDLE, Ordering::Release);
            debug!("Batch event processor halted before start");
            return Ok(());
        }
        self.barrier.clear_alert();
        self.handler.on_start();
        debug!(
            progress = self.barrier.progress().get(),
            "Batch event processor started"
        );

        let result = self.process_events();

        self.state.store(IDLE, Ordering::Release);
        self.handler.on_shutdown();
        debug!(
            progress = self.barrier.progress().get(),
            "Batch event processor stopped"
        );
        result
    }

    fn process_events(&mut self) -> Result<()> {
        let mut next_sequence = self.barrier.progress().get() + 1;

        loop {
            let available = match self.barrier.wait_for(next_sequence) {
                Ok(available) => available,
                Err(DisruptorError::Alert) => return Ok(()),
                Err(DisruptorError::Timeout) => {
                    self.handler.on_timeout(next_sequence)?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if available < next_sequence {
                continue;
            }

            for sequence in next_sequence..=available {
                let end_of_batch = sequence == available;
                let handler = &mut self.handler;
                // SAFETY: the barrier reported `sequence` published, and our
                // progress still holds it back from the producer
                let outcome = unsafe {
                    self.data_provider.read_published(sequence, |event| {
                        handler.on_event(event, sequence, end_of_batch)
                    })
                };
                outcome??;
            }

            self.barrier.progress().set_release(available);
            next_sequence = available + 1;
        }
    }
}
