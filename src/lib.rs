//! `RingGate` - Disruptor-style sequencing core
//!
//! Lock-free coordination between producers and consumers of a pre-allocated
//! ring buffer, following the LMAX Disruptor design from
//! <https://github.com/LMAX-Exchange/disruptor>, plus an unbounded chunked
//! buffer that runs the same claim/publish/gate protocol without a capacity
//! ceiling.
//!
//! ## Features
//!
//! - **Sequencers**: single producer (plain bookkeeping) and multi producer
//!   (compare-and-swap claims, per-slot publication markers)
//! - **Consumer barriers**: dependency graphs of consumers, consumer groups,
//!   alerting, and gap-aware waits
//! - **Wait strategies**: busy spin, yielding, sleeping and timeout
//! - **Unbounded buffer**: chunks appended on demand, consumed chunks pooled
//!   for reuse
//! - **Configuration**: JSON-loadable builders for all of the above
//!
//! ## Quick Start
//!
//! ```rust
//! use ringgate::disruptor::{
//!     BatchEventProcessor, ConsumerBarrier, DefaultEventFactory, EventHandler, Result,
//!     RingBuffer, SingleProducerSequencer, YieldingWaitStrategy,
//! };
//! use std::sync::Arc;
//! use std::thread;
//!
//! #[derive(Debug, Default)]
//! struct Trade {
//!     price: i64,
//! }
//!
//! #[derive(Default)]
//! struct Totaliser {
//!     total: i64,
//! }
//!
//! impl EventHandler<Trade> for Totaliser {
//!     fn on_event(&mut self, event: &Trade, _sequence: i64, _end_of_batch: bool) -> Result<()> {
//!         self.total += event.price;
//!         Ok(())
//!     }
//! }
//!
//! let ring_buffer = Arc::new(RingBuffer::new(64, DefaultEventFactory::<Trade>::new()).unwrap());
//! let sequencer = Arc::new(SingleProducerSequencer::new(64).unwrap());
//! let barrier = Arc::new(ConsumerBarrier::new(
//!     sequencer.clone(),
//!     Arc::new(YieldingWaitStrategy::new()),
//!     Vec::new(),
//! ));
//! barrier.attach();
//!
//! let mut processor =
//!     BatchEventProcessor::new(ring_buffer.clone(), barrier.clone(), Totaliser::default());
//! let consumer = thread::spawn(move || {
//!     processor.run().unwrap();
//!     processor.into_handler()
//! });
//!
//! for price in 1..=10 {
//!     ring_buffer.publish_event(&*sequencer, |trade, _| trade.price = price).unwrap();
//! }
//! while barrier.progress().get_acquire() < 9 {
//!     thread::yield_now();
//! }
//! barrier.alert();
//!
//! assert_eq!(consumer.join().unwrap().total, 55);
//! barrier.detach();
//! ```
//!
//! ## Architecture
//!
//! - **`Sequence`**: padded atomic counter, the unit of progress
//! - **`Sequencer`**: claims and publishes sequences, gated by consumers
//! - **`RingBuffer`** / **`UnboundedBuffer`**: the slots being sequenced
//! - **`ConsumerBarrier`**: waits on dependents and publishes consumer progress
//! - **`WaitStrategy`**: how a consumer waits for its dependents
//! - **`BatchEventProcessor`**: drives an `EventHandler` from a barrier

pub mod disruptor;

// Re-export the main types for convenience
pub use disruptor::{
    is_power_of_two,
    BatchEventProcessor,
    Blocker,
    BusySpinWaitStrategy,
    ClaimWait,
    ConsumerBarrier,
    DefaultEventFactory,
    DisruptorError,
    EventFactory,
    EventHandler,
    Interrupt,
    MultiProducerSequencer,
    ProducerType,
    Result,
    RingBuffer,
    Sequence,
    SequenceBarrier,
    Sequencer,
    SequencerConfig,
    SingleProducerSequencer,
    SleepingWaitStrategy,
    TimeoutWaitStrategy,
    UnboundedBuffer,
    UnboundedConfig,
    WaitStrategy,
    WaitStrategyConfig,
    YieldingWaitStrategy,
    // Constants
    INITIAL_SEQUENCE,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the version of the `RingGate` library
#[must_use]
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
