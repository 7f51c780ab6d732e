//! RingGate Disruptor Implementation
//!
//! This module provides the sequencing core of a Disruptor-style engine: sequence
//! counters, the fixed-size ring buffer, single and multi producer sequencers,
//! consumer barriers with pluggable wait strategies, and an unbounded chunked
//! buffer that runs the same protocol without a capacity ceiling.

pub mod chunked_buffer;
pub mod config;
pub mod consumer_barrier;
pub mod event_factory;
pub mod event_processor;
pub mod interrupt;
pub mod producer_type;
pub mod ring_buffer;
pub mod sequence;
pub mod sequence_barrier;
pub mod sequencer;
pub mod wait_strategy;


pub use chunked_buffer::{Chunk, ChunkStats, SlotMut, SlotRef, UnboundedBuffer};
pub use config::{SequencerConfig, UnboundedConfig, WaitStrategyConfig};
pub use consumer_barrier::ConsumerBarrier;
pub use event_factory::{DefaultEventFactory, EventFactory};
pub use event_processor::{BatchEventProcessor, DataProvider, EventHandler};
pub use interrupt::Interrupt;
pub use producer_type::ProducerType;
pub use ring_buffer::RingBuffer;
pub use sequence::Sequence;
pub use sequence_barrier::SequenceBarrier;
pub use sequencer::{ClaimWait, MultiProducerSequencer, Sequencer, SingleProducerSequencer};
pub use wait_strategy::{
    Blocker, BusySpinWaitStrategy, SleepingWaitStrategy, TimeoutWaitStrategy, WaitStrategy,
    YieldingWaitStrategy,
};

/// The value of a sequence before anything has been produced or consumed
pub const INITIAL_SEQUENCE: i64 = -1;

/// Errors that can occur in the Disruptor
#[derive(Debug, thiserror::Error)]
pub enum DisruptorError {
    #[error("Buffer size must be a power of 2, got: {0}")]
    InvalidBufferSize(usize),

    #[error("Claim count must be positive and no larger than the buffer, got: {0}")]
    InvalidClaimCount(i64),

    #[error("Required capacity must not be negative, got: {0}")]
    InvalidCapacity(i64),

    #[error("A consumer group needs at least one member, got: {0}")]
    InvalidMemberCount(usize),

    #[error("Invalid sequence: {0}")]
    InvalidSequence(i64),

    #[error("Barrier has been alerted")]
    Alert,

    #[error("Timeout waiting for sequence")]
    Timeout,

    #[error("Claim was interrupted")]
    Interrupted,

    #[error("Configuration error: {0}")]
    Configuration(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

pub type Result<T> = std::result::Result<T, DisruptorError>;

/// Utility function to check if a number is a power of 2
pub fn is_power_of_two(n: usize) -> bool {
    n != 0 && (n & (n - 1)) == 0
}
