//! Configuration
//!
//! Construction parameters for sequencers, unbounded buffers and wait
//! strategies, loadable from JSON. Missing fields take their defaults and every
//! value is validated before anything is built.
//!
//! ```
//! use ringgate::disruptor::SequencerConfig;
//!
//! let config = SequencerConfig::from_json(
//!     r#"{ "buffer_size": 256, "producer_type": "single",
//!          "wait_strategy": { "kind": "yielding" } }"#,
//! )
//! .unwrap();
//! let sequencer = config.build_sequencer().unwrap();
//! assert_eq!(sequencer.buffer_size(), 256);
//! ```

use crate::disruptor::{
    is_power_of_two, Blocker, BusySpinWaitStrategy, ClaimWait, DisruptorError, EventFactory,
    ProducerType, Result, Sequencer, SleepingWaitStrategy, TimeoutWaitStrategy, UnboundedBuffer,
    WaitStrategy, YieldingWaitStrategy,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

fn default_spin_tries() -> u32 {
    100
}

fn default_yield_tries() -> u32 {
    100
}

fn default_park_nanos() -> u64 {
    100
}

fn default_timeout_park_nanos() -> u64 {
    100_000
}

/// Wait strategy selection, tagged by `kind`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WaitStrategyConfig {
    /// [`BusySpinWaitStrategy`]
    BusySpin,
    /// [`YieldingWaitStrategy`]
    Yielding {
        #[serde(default = "default_spin_tries")]
        spin_tries: u32,
    },
    /// [`SleepingWaitStrategy`]
    Sleeping {
        #[serde(default = "default_spin_tries")]
        spin_tries: u32,
        #[serde(default = "default_yield_tries")]
        yield_tries: u32,
        #[serde(default = "default_park_nanos")]
        park_nanos: u64,
    },
    /// [`TimeoutWaitStrategy`]
    Timeout {
        timeout_micros: u64,
        #[serde(default = "default_spin_tries")]
        spin_tries: u32,
        #[serde(default = "default_yield_tries")]
        yield_tries: u32,
        #[serde(default = "default_timeout_park_nanos")]
        park_nanos: u64,
    },
}

impl Default for WaitStrategyConfig {
    fn default() -> Self {
        WaitStrategyConfig::Sleeping {
            spin_tries: default_spin_tries(),
            yield_tries: default_yield_tries(),
            park_nanos: default_park_nanos(),
        }
    }
}

impl WaitStrategyConfig {
    /// # Errors
    /// Returns `DisruptorError::InvalidConfiguration` for a zero timeout or park
    pub fn validate(&self) -> Result<()> {
        match self {
            WaitStrategyConfig::Sleeping { park_nanos: 0, .. }
            | WaitStrategyConfig::Timeout { park_nanos: 0, .. } => Err(
                DisruptorError::InvalidConfiguration("park_nanos must be positive".to_string()),
            ),
            WaitStrategyConfig::Timeout {
                timeout_micros: 0, ..
            } => Err(DisruptorError::InvalidConfiguration(
                "timeout_micros must be positive".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Build the configured strategy
    pub fn build(&self) -> Result<Arc<dyn WaitStrategy>> {
        self.validate()?;
        Ok(match *self {
            WaitStrategyConfig::BusySpin => Arc::new(BusySpinWaitStrategy::new()),
            WaitStrategyConfig::Yielding { spin_tries } => {
                Arc::new(YieldingWaitStrategy::with_spin_tries(spin_tries))
            }
            WaitStrategyConfig::Sleeping {
                spin_tries,
                yield_tries,
                park_nanos,
            } => Arc::new(SleepingWaitStrategy::with_tries(
                spin_tries,
                yield_tries,
                Duration::from_nanos(park_nanos),
            )),
            WaitStrategyConfig::Timeout {
                timeout_micros,
                spin_tries,
                yield_tries,
                park_nanos,
            } => Arc::new(TimeoutWaitStrategy::with_tries(
                Duration::from_micros(timeout_micros),
                spin_tries,
                yield_tries,
                Duration::from_nanos(park_nanos),
            )),
        })
    }
}

/// Parameters of a fixed-capacity sequencer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// Buffer size, a power of 2
    pub buffer_size: usize,
    pub producer_type: ProducerType,
    /// Give the sequencer a [`Blocker`] that parked consumers wait on
    pub blocking: bool,
    /// Park interval of a claim waiting for capacity; backoff when absent
    pub claim_park_nanos: Option<u64>,
    pub wait_strategy: WaitStrategyConfig,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1024,
            producer_type: ProducerType::default(),
            blocking: false,
            claim_park_nanos: None,
            wait_strategy: WaitStrategyConfig::default(),
        }
    }
}

impl SequencerConfig {
    /// Parse and validate a JSON configuration
    ///
    /// # Errors
    /// Returns `DisruptorError::Configuration` for malformed JSON and
    /// `DisruptorError::InvalidConfiguration` for values that fail validation
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !is_power_of_two(self.buffer_size) {
            return Err(DisruptorError::InvalidConfiguration(format!(
                "buffer_size must be a power of 2, got: {}",
                self.buffer_size
            )));
        }
        if self.claim_park_nanos == Some(0) {
            return Err(DisruptorError::InvalidConfiguration(
                "claim_park_nanos must be positive".to_string(),
            ));
        }
        self.wait_strategy.validate()
    }

    fn claim_wait(&self) -> ClaimWait {
        self.claim_park_nanos
            .map_or(ClaimWait::Backoff, |nanos| ClaimWait::Park(Duration::from_nanos(nanos)))
    }

    /// Build the configured sequencer
    pub fn build_sequencer(&self) -> Result<Arc<dyn Sequencer>> {
        self.validate()?;
        let blocker = self.blocking.then(|| Arc::new(Blocker::new()));
        let sequencer =
            self.producer_type
                .create_sequencer_with(self.buffer_size, blocker, self.claim_wait())?;
        debug!(
            buffer_size = self.buffer_size,
            producer_type = %self.producer_type,
            blocking = self.blocking,
            "Built sequencer from configuration"
        );
        Ok(sequencer)
    }

    /// Build the configured consumer wait strategy
    pub fn build_wait_strategy(&self) -> Result<Arc<dyn WaitStrategy>> {
        self.wait_strategy.build()
    }
}

/// Parameters of an unbounded chunked buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnboundedConfig {
    /// Slots per chunk, a power of 2
    pub chunk_size: usize,
    /// Consumed chunks kept for reuse
    pub max_pooled_chunks: usize,
    /// Give the buffer a [`Blocker`] that parked consumers wait on
    pub blocking: bool,
    pub wait_strategy: WaitStrategyConfig,
}

impl Default for UnboundedConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            max_pooled_chunks: 4,
            blocking: false,
            wait_strategy: WaitStrategyConfig::default(),
        }
    }
}

impl UnboundedConfig {
    /// Parse and validate a JSON configuration
    ///
    /// # Errors
    /// Returns `DisruptorError::Configuration` for malformed JSON and
    /// `DisruptorError::InvalidConfiguration` for values that fail validation
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !is_power_of_two(self.chunk_size) {
            return Err(DisruptorError::InvalidConfiguration(format!(
                "chunk_size must be a power of 2, got: {}",
                self.chunk_size
            )));
        }
        self.wait_strategy.validate()
    }

    /// Build the configured buffer
    pub fn build_buffer<T, F>(&self, factory: F) -> Result<Arc<UnboundedBuffer<T>>>
    where
        T: Send + Sync + 'static,
        F: EventFactory<T> + 'static,
    {
        self.validate()?;
        let mut buffer = UnboundedBuffer::new(self.chunk_size, self.max_pooled_chunks, factory)?;
        if self.blocking {
            buffer = buffer.with_blocker(Arc::new(Blocker::new()));
        }
        debug!(
            chunk_size = self.chunk_size,
            max_pooled_chunks = self.max_pooled_chunks,
            blocking = self.blocking,
            "Built unbounded buffer from configuration"
        );
        Ok(Arc::new(buffer))
    }

    /// Build the configured consumer wait strategy
    pub fn build_wait_strategy(&self) -> Result<Arc<dyn WaitStrategy>> {
        self.wait_strategy.build()
    }
}
