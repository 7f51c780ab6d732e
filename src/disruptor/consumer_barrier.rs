//! Consumer Barrier Implementation
//!
//! A consumer barrier answers one question for its consumer: what is the highest
//! sequence that may safely be read right now? It waits on its dependents
//! (the producer, or upstream consumers) through the configured wait strategy,
//! collapses the answer to the contiguously published range when a producer is
//! among its dependents, and publishes the consumer's own progress for
//! whoever gates on it.
//!
//! A barrier may have several members. Each member is a worker thread with its
//! own progress counter; downstream participants see only the group sequence,
//! the minimum across members, so the workers act as one logical consumer.

use crate::disruptor::sequence_barrier::BarrierSet;
use crate::disruptor::{
    DisruptorError, Result, Sequence, SequenceBarrier, Sequencer, WaitStrategy,
};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Progress tracker and dependency gate for one consumer or consumer group
pub struct ConsumerBarrier {
    sequencer: Arc<dyn Sequencer>,
    wait_strategy: Arc<dyn WaitStrategy>,
    members: Box<[Sequence]>,
    dependents: BarrierSet,
    alerted: AtomicBool,
}

impl ConsumerBarrier {
    /// Create a single-member barrier
    ///
    /// # Arguments
    /// * `sequencer` - The producer whose buffer is consumed
    /// * `wait_strategy` - How to wait for dependents
    /// * `dependents` - Upstream barriers to wait on; empty means the producer
    pub fn new(
        sequencer: Arc<dyn Sequencer>,
        wait_strategy: Arc<dyn WaitStrategy>,
        dependents: Vec<Arc<dyn SequenceBarrier>>,
    ) -> Self {
        Self::build(sequencer, wait_strategy, dependents, 1)
    }

    /// Create a barrier shared by `member_count` worker threads
    ///
    /// # Errors
    /// Returns `DisruptorError::InvalidMemberCount` if member_count is zero
    pub fn with_members(
        sequencer: Arc<dyn Sequencer>,
        wait_strategy: Arc<dyn WaitStrategy>,
        dependents: Vec<Arc<dyn SequenceBarrier>>,
        member_count: usize,
    ) -> Result<Self> {
        if member_count == 0 {
            return Err(DisruptorError::InvalidMemberCount(member_count));
        }
        Ok(Self::build(sequencer, wait_strategy, dependents, member_count))
    }

    fn build(
        sequencer: Arc<dyn Sequencer>,
        wait_strategy: Arc<dyn WaitStrategy>,
        mut dependents: Vec<Arc<dyn SequenceBarrier>>,
        member_count: usize,
    ) -> Self {
        if dependents.is_empty() {
            dependents.push(Arc::clone(&sequencer).as_barrier());
        }
        Self {
            sequencer,
            wait_strategy,
            members: (0..member_count).map(|_| Sequence::default()).collect(),
            dependents: BarrierSet::new(dependents),
            alerted: AtomicBool::new(false),
        }
    }

    /// Wait until `sequence` may be consumed
    ///
    /// # Returns
    /// The highest sequence that may be consumed. It is at least `sequence`
    /// unless the wait strategy gave up early, or a producer among the
    /// dependents has not finished publishing `sequence` yet.
    ///
    /// # Errors
    /// Returns `DisruptorError::Alert` once the barrier is alerted and
    /// `DisruptorError::Timeout` if a timeout wait strategy gave up
    pub fn wait_for(&self, sequence: i64) -> Result<i64> {
        self.check_alert()?;

        let available = self
            .wait_strategy
            .wait_for(sequence, self.sequencer.blocker(), self)?;
        if available < sequence {
            return Ok(available);
        }

        if self.dependents.includes_producer() {
            return Ok(self
                .sequencer
                .get_highest_published_sequence(sequence, available));
        }
        Ok(available)
    }

    /// Minimum progress across the dependents
    pub fn dependency_sequence(&self) -> i64 {
        self.dependents.minimum_sequence(self.sequencer.cursor())
    }

    /// Raise the alert and wake any waiter
    pub fn alert(&self) {
        self.alerted.store(true, Ordering::Release);
        if let Some(blocker) = self.sequencer.blocker() {
            blocker.signal_all();
        }
        debug!("Consumer barrier alerted");
    }

    /// Lower the alert
    pub fn clear_alert(&self) {
        self.alerted.store(false, Ordering::Release);
        debug!("Consumer barrier alert cleared");
    }

    pub fn is_alerted(&self) -> bool {
        self.alerted.load(Ordering::Acquire)
    }

    /// # Errors
    /// Returns `DisruptorError::Alert` if the barrier is alerted
    pub fn check_alert(&self) -> Result<()> {
        if self.is_alerted() {
            return Err(DisruptorError::Alert);
        }
        Ok(())
    }

    /// Progress counter of member `index`
    pub fn member_sequence(&self, index: usize) -> Option<&Sequence> {
        self.members.get(index)
    }

    /// Progress counter of the first member, the only one of a single-member barrier
    pub fn progress(&self) -> &Sequence {
        &self.members[0]
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Minimum progress across members
    pub fn group_sequence(&self) -> i64 {
        self.members
            .iter()
            .map(Sequence::get_acquire)
            .min()
            .unwrap_or(crate::disruptor::INITIAL_SEQUENCE)
    }

    /// Also wait on `barriers`
    ///
    /// Unlike a producer, a consumer does not claim the barriers it gains: an
    /// upstream barrier's position is its own to report.
    pub fn add_dependent_barriers(&self, barriers: &[Arc<dyn SequenceBarrier>]) {
        self.dependents.add(barriers, None);
        debug!(
            added = barriers.len(),
            total = self.dependents.len(),
            "Added dependent barriers"
        );
    }

    /// Stop waiting on `barrier`
    ///
    /// # Returns
    /// True if the barrier was a dependent
    pub fn remove_dependent_barrier(&self, barrier: &dyn SequenceBarrier) -> bool {
        let removed = self.dependents.remove(barrier);
        if removed {
            debug!(total = self.dependents.len(), "Removed dependent barrier");
        }
        removed
    }

    /// Gate the producer on this barrier
    pub fn attach(self: &Arc<Self>) {
        let barrier: Arc<dyn SequenceBarrier> = Arc::clone(self) as Arc<dyn SequenceBarrier>;
        self.sequencer.add_dependent_barriers(&[barrier]);
    }

    /// Stop gating the producer and drop every dependent
    ///
    /// This breaks the references between producer and consumer so both can be
    /// dropped.
    pub fn detach(&self) {
        self.sequencer.remove_dependent_barrier(self);
        self.dependents.clear();
        debug!("Consumer barrier detached");
    }

    /// The producer this barrier consumes from
    pub fn sequencer(&self) -> &Arc<dyn Sequencer> {
        &self.sequencer
    }
}

impl SequenceBarrier for ConsumerBarrier {
    fn sequence(&self) -> i64 {
        self.group_sequence()
    }

    fn claim(&self, sequence: i64) {
        for member in self.members.iter() {
            member.set_release(sequence);
        }
    }
}

impl fmt::Debug for ConsumerBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerBarrier")
            .field("members", &self.members)
            .field("dependents", &self.dependents.len())
            .field("alerted", &self.is_alerted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disruptor::{
        BusySpinWaitStrategy, MultiProducerSequencer, SingleProducerSequencer,
        SleepingWaitStrategy,
    };
    use std::thread;
    use std::time::Duration;

    fn spin() -> Arc<dyn WaitStrategy> {
        Arc::new(BusySpinWaitStrategy::new())
    }

    #[test]
    fn test_defaults_to_producer_dependency() {
        let sequencer = Arc::new(SingleProducerSequencer::new(8).unwrap());
        let barrier = ConsumerBarrier::new(sequencer.clone(), spin(), Vec::new());

        assert_eq!(barrier.dependency_sequence(), -1);
        let hi = sequencer.next_n(3).unwrap();
        sequencer.publish(hi);
        assert_eq!(barrier.dependency_sequence(), 2);
        assert_eq!(barrier.wait_for(0).unwrap(), 2);
    }

    #[test]
    fn test_wait_for_stops_at_multi_producer_gap() {
        let sequencer = Arc::new(MultiProducerSequencer::new(8).unwrap());
        let barrier = ConsumerBarrier::new(sequencer.clone(), spin(), Vec::new());

        sequencer.next_n(4).unwrap();
        sequencer.publish(0);
        sequencer.publish(2);
        sequencer.publish(3);

        // Cursor is at 3 but sequence 1 is still being filled
        assert_eq!(barrier.wait_for(0).unwrap(), 0);
        assert_eq!(barrier.wait_for(1).unwrap(), 0);

        sequencer.publish(1);
        assert_eq!(barrier.wait_for(1).unwrap(), 3);
    }

    #[test]
    fn test_waits_on_upstream_consumer() {
        let sequencer = Arc::new(SingleProducerSequencer::new(8).unwrap());
        let upstream = Arc::new(ConsumerBarrier::new(sequencer.clone(), spin(), Vec::new()));
        let downstream = ConsumerBarrier::new(
            sequencer.clone(),
            spin(),
            vec![upstream.clone() as Arc<dyn SequenceBarrier>],
        );

        let hi = sequencer.next_n(5).unwrap();
        sequencer.publish(hi);
        upstream.progress().set_release(2);

        assert_eq!(downstream.dependency_sequence(), 2);
        assert_eq!(downstream.wait_for(1).unwrap(), 2);
    }

    #[test]
    fn test_alert_lifecycle() {
        let sequencer = Arc::new(SingleProducerSequencer::new(8).unwrap());
        let barrier = ConsumerBarrier::new(sequencer, spin(), Vec::new());

        assert!(!barrier.is_alerted());
        assert!(barrier.check_alert().is_ok());

        barrier.alert();
        assert!(barrier.is_alerted());
        assert!(matches!(barrier.check_alert(), Err(DisruptorError::Alert)));
        assert!(matches!(barrier.wait_for(0), Err(DisruptorError::Alert)));

        barrier.clear_alert();
        assert!(barrier.check_alert().is_ok());
    }

    #[test]
    fn test_member_group_sequence_is_minimum() {
        let sequencer = Arc::new(SingleProducerSequencer::new(8).unwrap());
        let barrier = ConsumerBarrier::with_members(sequencer, spin(), Vec::new(), 3).unwrap();

        assert_eq!(barrier.member_count(), 3);
        barrier.member_sequence(0).unwrap().set_release(5);
        barrier.member_sequence(1).unwrap().set_release(3);
        barrier.member_sequence(2).unwrap().set_release(7);
        assert!(barrier.member_sequence(3).is_none());

        assert_eq!(barrier.group_sequence(), 3);
        assert_eq!(barrier.sequence(), 3);

        barrier.claim(10);
        assert_eq!(barrier.group_sequence(), 10);
    }

    #[test]
    fn test_zero_members_rejected() {
        let sequencer = Arc::new(SingleProducerSequencer::new(8).unwrap());
        assert!(matches!(
            ConsumerBarrier::with_members(sequencer, spin(), Vec::new(), 0),
            Err(DisruptorError::InvalidMemberCount(0))
        ));
    }

    #[test]
    fn test_attach_gates_producer_and_detach_releases() {
        let sequencer = Arc::new(SingleProducerSequencer::new(4).unwrap());
        let barrier = Arc::new(ConsumerBarrier::new(sequencer.clone(), spin(), Vec::new()));
        barrier.attach();

        assert_eq!(sequencer.try_next_n(4).unwrap(), Some(3));
        sequencer.publish(3);
        assert_eq!(sequencer.try_next().unwrap(), None);

        barrier.progress().set_release(3);
        assert_eq!(sequencer.remaining_capacity(), 4);

        barrier.detach();
        assert!(!sequencer.remove_dependent_barrier(&*barrier));
        assert_eq!(Arc::strong_count(&barrier), 1);
    }

    #[test]
    fn test_add_and_remove_dependents() {
        let sequencer = Arc::new(SingleProducerSequencer::new(8).unwrap());
        let barrier = ConsumerBarrier::new(sequencer.clone(), spin(), Vec::new());
        let upstream: Arc<dyn SequenceBarrier> = Arc::new(Sequence::new(1));

        let hi = sequencer.next_n(6).unwrap();
        sequencer.publish(hi);

        barrier.add_dependent_barriers(&[upstream.clone()]);
        // Not claimed: the upstream keeps its own position
        assert_eq!(upstream.sequence(), 1);
        assert_eq!(barrier.dependency_sequence(), 1);

        assert!(barrier.remove_dependent_barrier(upstream.as_ref()));
        assert_eq!(barrier.dependency_sequence(), 5);
    }

    #[test]
    fn test_blocked_consumer_observes_alert() {
        let sequencer = Arc::new(SingleProducerSequencer::new(8).unwrap());
        let barrier = Arc::new(ConsumerBarrier::new(
            sequencer,
            Arc::new(SleepingWaitStrategy::with_tries(1, 1, Duration::from_millis(1))),
            Vec::new(),
        ));

        let consumer = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || barrier.wait_for(0))
        };

        thread::sleep(Duration::from_millis(20));
        barrier.alert();
        assert!(matches!(consumer.join().unwrap(), Err(DisruptorError::Alert)));
    }
}
