//! Producer Type Implementation
//!
//! This module provides the ProducerType enum for choosing between the single
//! and multi producer sequencers, and a factory that builds the chosen one.

use crate::disruptor::{
    Blocker, ClaimWait, MultiProducerSequencer, Result, Sequencer, SingleProducerSequencer,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Specifies how many threads may claim sequences
///
/// # Examples
/// ```
/// use ringgate::disruptor::{ProducerType, Sequencer};
///
/// let sequencer = ProducerType::Single.create_sequencer(1024).unwrap();
/// assert_eq!(sequencer.buffer_size(), 1024);
/// assert!(ProducerType::Multi.is_multi());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerType {
    /// Exactly one thread claims sequences
    ///
    /// Claim bookkeeping needs no atomic read-modify-write and consumers never
    /// have to scan for publication gaps. Claiming from two threads breaks the
    /// sequencer.
    Single,

    /// Any number of threads claim sequences concurrently
    ///
    /// This is the default because it is correct regardless of how many
    /// threads publish.
    #[default]
    Multi,
}

impl ProducerType {
    pub fn is_single(&self) -> bool {
        matches!(self, ProducerType::Single)
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, ProducerType::Multi)
    }

    /// Build a sequencer of this type with default pacing and no blocker
    ///
    /// # Errors
    /// Returns `DisruptorError::InvalidBufferSize` if buffer_size is not a power of 2
    pub fn create_sequencer(&self, buffer_size: usize) -> Result<Arc<dyn Sequencer>> {
        self.create_sequencer_with(buffer_size, None, ClaimWait::default())
    }

    /// Build a sequencer of this type
    ///
    /// # Arguments
    /// * `buffer_size` - The size of the buffer being sequenced
    /// * `blocker` - Signalled on every publish, for consumers that park on it
    /// * `claim_wait` - How claims wait while the buffer is full
    pub fn create_sequencer_with(
        &self,
        buffer_size: usize,
        blocker: Option<Arc<Blocker>>,
        claim_wait: ClaimWait,
    ) -> Result<Arc<dyn Sequencer>> {
        let sequencer: Arc<dyn Sequencer> = match self {
            ProducerType::Single => {
                let mut sequencer =
                    SingleProducerSequencer::new(buffer_size)?.with_claim_wait(claim_wait);
                if let Some(blocker) = blocker {
                    sequencer = sequencer.with_blocker(blocker);
                }
                Arc::new(sequencer)
            }
            ProducerType::Multi => {
                let mut sequencer =
                    MultiProducerSequencer::new(buffer_size)?.with_claim_wait(claim_wait);
                if let Some(blocker) = blocker {
                    sequencer = sequencer.with_blocker(blocker);
                }
                Arc::new(sequencer)
            }
        };
        Ok(sequencer)
    }
}

impl std::fmt::Display for ProducerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProducerType::Single => write!(f, "Single"),
            ProducerType::Multi => write!(f, "Multi"),
        }
    }
}

impl std::str::FromStr for ProducerType {
    type Err = String;

    /// Parse a producer type, ignoring case
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single" => Ok(ProducerType::Single),
            "multi" => Ok(ProducerType::Multi),
            _ => Err(format!(
                "Invalid producer type: '{s}'. Valid values are 'single' or 'multi'"
            )),
        }
    }
}
