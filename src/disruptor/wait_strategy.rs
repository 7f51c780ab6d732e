//! Wait Strategy Implementation
//!
//! This module provides different wait strategies for the Disruptor pattern.
//! Wait strategies determine how consumers wait for new slots to become available.
//!
//! Every strategy re-checks the consumer barrier's alert flag on each iteration,
//! so a shutdown request is observed within one wait step. The escalating
//! strategies finish by parking; when the producer was built with a [`Blocker`]
//! they park on it and are woken by the next publish or alert instead of
//! sleeping out the whole interval.

use crate::disruptor::{ConsumerBarrier, DisruptorError, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{fence, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::trace;

/// Strategy for waiting for slots to become available
///
/// This trait defines how consumers wait for new sequences. Different
/// strategies provide different trade-offs between CPU usage, latency, and
/// throughput.
pub trait WaitStrategy: Send + Sync + std::fmt::Debug {
    /// Wait until the barrier's dependencies have reached `sequence`
    ///
    /// # Arguments
    /// * `sequence` - The sequence to wait for
    /// * `blocker` - Wake primitive of the producer, if it has one
    /// * `barrier` - The consumer barrier doing the waiting
    ///
    /// # Returns
    /// The dependency sequence observed, which may be higher than requested.
    /// Strategies that are allowed to give up early may return a lower value.
    ///
    /// # Errors
    /// Returns `DisruptorError::Alert` if the barrier was alerted and
    /// `DisruptorError::Timeout` if the strategy gave up
    fn wait_for(
        &self,
        sequence: i64,
        blocker: Option<&Blocker>,
        barrier: &ConsumerBarrier,
    ) -> Result<i64>;
}

/// Condition-variable wake primitive shared by a producer and its consumers
///
/// Waiters register before re-checking their condition and signallers only
/// take the lock when somebody is registered, so a publish with no sleeping
/// consumers costs one fence and one load.
#[derive(Debug, Default)]
pub struct Blocker {
    mutex: Mutex<()>,
    condvar: Condvar,
    waiters: AtomicUsize,
}

impl Blocker {
    /// Create a new blocker with no waiters
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake every thread parked in [`Blocker::wait_timeout`]
    pub fn signal_all(&self) {
        fence(Ordering::SeqCst);
        if self.waiters.load(Ordering::Relaxed) > 0 {
            let _guard = self.mutex.lock();
            self.condvar.notify_all();
        }
    }

    /// Park for at most `timeout` unless `still_waiting` says otherwise
    ///
    /// # Returns
    /// False if the full timeout elapsed without a signal
    pub fn wait_timeout<F>(&self, timeout: Duration, still_waiting: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        let mut guard = self.mutex.lock();
        self.waiters.fetch_add(1, Ordering::Relaxed);
        fence(Ordering::SeqCst);

        let signalled = if still_waiting() {
            !self.condvar.wait_for(&mut guard, timeout).timed_out()
        } else {
            true
        };

        self.waiters.fetch_sub(1, Ordering::Relaxed);
        signalled
    }

    /// Number of threads currently parked
    pub fn waiters(&self) -> usize {
        self.waiters.load(Ordering::Relaxed)
    }
}

/// Busy-spin wait strategy
///
/// This strategy continuously polls without yielding the CPU.
/// It provides the lowest latency but uses 100% CPU while waiting.
/// Use this only when you can dedicate CPU cores to consumers.
#[derive(Debug, Default, Clone, Copy)]
pub struct BusySpinWaitStrategy;

impl BusySpinWaitStrategy {
    /// Create a new busy-spin wait strategy
    pub fn new() -> Self {
        Self
    }
}

impl WaitStrategy for BusySpinWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        _blocker: Option<&Blocker>,
        barrier: &ConsumerBarrier,
    ) -> Result<i64> {
        loop {
            barrier.check_alert()?;
            let available = barrier.dependency_sequence();
            if available >= sequence {
                return Ok(available);
            }
            std::hint::spin_loop();
        }
    }
}

/// Yielding wait strategy
///
/// Spins for a number of tries, then yields the CPU to other threads on every
/// further iteration.
#[derive(Debug, Clone, Copy)]
pub struct YieldingWaitStrategy {
    spin_tries: u32,
}

impl YieldingWaitStrategy {
    /// Create a new yielding wait strategy that spins 100 times before yielding
    pub fn new() -> Self {
        Self::with_spin_tries(100)
    }

    /// Create a new yielding wait strategy
    ///
    /// # Arguments
    /// * `spin_tries` - Iterations spent spinning before the first yield
    pub fn with_spin_tries(spin_tries: u32) -> Self {
        Self { spin_tries }
    }
}

impl Default for YieldingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for YieldingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        _blocker: Option<&Blocker>,
        barrier: &ConsumerBarrier,
    ) -> Result<i64> {
        let mut counter = self.spin_tries;
        loop {
            barrier.check_alert()?;
            let available = barrier.dependency_sequence();
            if available >= sequence {
                return Ok(available);
            }
            if counter == 0 {
                thread::yield_now();
            } else {
                counter -= 1;
                std::hint::spin_loop();
            }
        }
    }
}

/// Spin, then yield, then park
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Escalation {
    spin_tries: u32,
    yield_tries: u32,
    park: Duration,
}

impl Escalation {
    /// Advance the wait by one step, `step` counting the steps taken so far
    fn pause(
        &self,
        step: &mut u32,
        sequence: i64,
        blocker: Option<&Blocker>,
        barrier: &ConsumerBarrier,
    ) {
        if *step < self.spin_tries {
            std::hint::spin_loop();
        } else if *step < self.spin_tries.saturating_add(self.yield_tries) {
            thread::yield_now();
        } else {
            match blocker {
                Some(blocker) => {
                    blocker.wait_timeout(self.park, || {
                        !barrier.is_alerted() && barrier.dependency_sequence() < sequence
                    });
                }
                None => thread::park_timeout(self.park),
            }
            return;
        }
        *step += 1;
    }
}

/// Sleeping wait strategy
///
/// This strategy spins for a fixed number of iterations, then yields for a
/// fixed number, then parks for a short interval on every further iteration.
/// It trades a little latency for an idle consumer that costs almost no CPU.
#[derive(Debug, Clone, Copy)]
pub struct SleepingWaitStrategy {
    escalation: Escalation,
}

impl SleepingWaitStrategy {
    /// Create a new sleeping wait strategy: 100 spins, 100 yields, 100ns parks
    pub fn new() -> Self {
        Self::with_tries(100, 100, Duration::from_nanos(100))
    }

    /// Create a new sleeping wait strategy with custom escalation
    ///
    /// # Arguments
    /// * `spin_tries` - Iterations spent spinning
    /// * `yield_tries` - Iterations spent yielding after the spins
    /// * `park` - How long each later iteration parks
    pub fn with_tries(spin_tries: u32, yield_tries: u32, park: Duration) -> Self {
        Self {
            escalation: Escalation {
                spin_tries,
                yield_tries,
                park,
            },
        }
    }
}

impl Default for SleepingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for SleepingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        blocker: Option<&Blocker>,
        barrier: &ConsumerBarrier,
    ) -> Result<i64> {
        let mut step = 0;
        loop {
            barrier.check_alert()?;
            let available = barrier.dependency_sequence();
            if available >= sequence {
                return Ok(available);
            }
            self.escalation.pause(&mut step, sequence, blocker, barrier);
        }
    }
}

/// Timeout wait strategy
///
/// Escalates like [`SleepingWaitStrategy`] but gives up with
/// `DisruptorError::Timeout` once `timeout` has elapsed, so a consumer
/// periodically regains control. The timeout is recoverable: waiting again
/// starts a fresh deadline.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutWaitStrategy {
    timeout: Duration,
    escalation: Escalation,
}

impl TimeoutWaitStrategy {
    /// Create a new timeout wait strategy with the default escalation
    ///
    /// # Arguments
    /// * `timeout` - Total time a single wait may take
    pub fn new(timeout: Duration) -> Self {
        Self::with_tries(timeout, 100, 100, Duration::from_micros(100))
    }

    /// Create a new timeout wait strategy with custom escalation
    pub fn with_tries(
        timeout: Duration,
        spin_tries: u32,
        yield_tries: u32,
        park: Duration,
    ) -> Self {
        Self {
            timeout,
            escalation: Escalation {
                spin_tries,
                yield_tries,
                park: park.min(timeout),
            },
        }
    }

    /// The deadline applied to each wait
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl WaitStrategy for TimeoutWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        blocker: Option<&Blocker>,
        barrier: &ConsumerBarrier,
    ) -> Result<i64> {
        let deadline = Instant::now() + self.timeout;
        let mut step = 0;
        loop {
            barrier.check_alert()?;
            let available = barrier.dependency_sequence();
            if available >= sequence {
                return Ok(available);
            }
            if Instant::now() >= deadline {
                trace!(sequence, available, timeout = ?self.timeout, "Wait timed out");
                return Err(DisruptorError::Timeout);
            }
            self.escalation.pause(&mut step, sequence, blocker, barrier);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disruptor::{Sequencer, SingleProducerSequencer};
    use std::sync::Arc;

    fn barrier_with(
        strategy: Arc<dyn WaitStrategy>,
        blocker: Option<Arc<Blocker>>,
    ) -> (Arc<SingleProducerSequencer>, ConsumerBarrier) {
        let mut sequencer = SingleProducerSequencer::new(16).unwrap();
        if let Some(blocker) = blocker {
            sequencer = sequencer.with_blocker(blocker);
        }
        let sequencer = Arc::new(sequencer);
        let barrier = ConsumerBarrier::new(sequencer.clone(), strategy, Vec::new());
        (sequencer, barrier)
    }

    fn all_strategies() -> Vec<Arc<dyn WaitStrategy>> {
        vec![
            Arc::new(BusySpinWaitStrategy::new()),
            Arc::new(YieldingWaitStrategy::new()),
            Arc::new(SleepingWaitStrategy::new()),
            Arc::new(TimeoutWaitStrategy::new(Duration::from_secs(5))),
        ]
    }

    #[test]
    fn test_returns_immediately_when_available() {
        for strategy in all_strategies() {
            let (sequencer, barrier) = barrier_with(strategy.clone(), None);
            let hi = sequencer.next_n(11).unwrap();
            sequencer.publish(hi);

            assert_eq!(strategy.wait_for(5, None, &barrier).unwrap(), 10);
        }
    }

    #[test]
    fn test_waits_for_publication() {
        for strategy in all_strategies() {
            let blocker = Arc::new(Blocker::new());
            let (sequencer, barrier) = barrier_with(strategy.clone(), Some(blocker));

            let producer = {
                let sequencer = Arc::clone(&sequencer);
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(10));
                    let sequence = sequencer.next().unwrap();
                    sequencer.publish(sequence);
                })
            };

            assert_eq!(strategy.wait_for(0, sequencer.blocker(), &barrier).unwrap(), 0);
            producer.join().unwrap();
        }
    }

    #[test]
    fn test_alert_interrupts_wait() {
        for strategy in all_strategies() {
            let (_sequencer, barrier) =
                barrier_with(strategy.clone(), Some(Arc::new(Blocker::new())));
            let barrier = Arc::new(barrier);

            let alerter = {
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(10));
                    barrier.alert();
                })
            };

            let result = barrier.wait_for(0);
            assert!(matches!(result, Err(DisruptorError::Alert)));
            alerter.join().unwrap();
        }
    }

    #[test]
    fn test_timeout_strategy_gives_up() {
        let strategy = Arc::new(TimeoutWaitStrategy::new(Duration::from_millis(20)));
        let (_sequencer, barrier) = barrier_with(strategy.clone(), None);

        let started = Instant::now();
        assert!(matches!(
            strategy.wait_for(0, None, &barrier),
            Err(DisruptorError::Timeout)
        ));
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(strategy.timeout(), Duration::from_millis(20));
    }

    #[test]
    fn test_blocker_skips_wait_when_condition_met() {
        let blocker = Blocker::new();
        let started = Instant::now();
        assert!(blocker.wait_timeout(Duration::from_secs(5), || false));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(blocker.waiters(), 0);
    }

    #[test]
    fn test_blocker_wakes_parked_thread() {
        let blocker = Arc::new(Blocker::new());
        let waiter = {
            let blocker = Arc::clone(&blocker);
            thread::spawn(move || blocker.wait_timeout(Duration::from_secs(10), || true))
        };

        while blocker.waiters() == 0 {
            thread::yield_now();
        }
        blocker.signal_all();

        assert!(waiter.join().unwrap());
        assert_eq!(blocker.waiters(), 0);
    }

    #[test]
    fn test_blocker_times_out() {
        let blocker = Blocker::new();
        assert!(!blocker.wait_timeout(Duration::from_millis(5), || true));
    }
}
