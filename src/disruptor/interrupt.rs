//! Interrupt Token
//!
//! Interruptible claims take an [`Interrupt`] and poll it at every wait step.
//! A request is consumed by the claim that observes it; claims that are not
//! interruptible never look at the token, so a pending request stays pending
//! until somebody asks.

use crate::disruptor::{DisruptorError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shareable interrupt request flag
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    requested: Arc<AtomicBool>,
}

impl Interrupt {
    /// Create a token with no pending request
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an interrupt
    pub fn interrupt(&self) {
        self.requested.store(true, Ordering::Release);
    }

    /// True if a request is pending
    pub fn is_interrupted(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Consume a pending request
    ///
    /// # Errors
    /// Returns `DisruptorError::Interrupted` if a request was pending; the
    /// request is cleared
    pub fn check(&self) -> Result<()> {
        if self.requested.swap(false, Ordering::AcqRel) {
            return Err(DisruptorError::Interrupted);
        }
        Ok(())
    }
}
