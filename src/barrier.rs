//! Sequence barriers - dependency-aware waiting with cancellation
//!
//! A barrier is a consumer's read-only view over the publisher cursor and
//! the sequences of any upstream consumers it must trail. `wait_for`
//! resolves the highest sequence that is both reached by every dependency
//! and, under multi-producer publishing, contiguously published.
//!
//! Barriers also carry the cancellation signal: `alert` unblocks any wait
//! in flight and makes subsequent waits fail until the alert is cleared.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{GyreError, Result};
use crate::sequence::{DependentSequences, FixedSequenceGroup, Sequence};
use crate::sequencer::Sequencer;
use crate::wait_strategy::WaitStrategy;

/// Cancellation flag polled by wait strategies.
pub struct AlertFlag {
    alerted: AtomicBool,
}

impl AlertFlag {
    pub fn new() -> Self {
        Self {
            alerted: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.alerted.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self) {
        self.alerted.store(true, Ordering::Release);
    }

    #[inline]
    pub fn clear(&self) {
        self.alerted.store(false, Ordering::Release);
    }

    /// Fail with [`GyreError::Alert`] if the flag is set
    #[inline]
    pub fn check(&self) -> Result<()> {
        if self.is_set() {
            Err(GyreError::Alert)
        } else {
            Ok(())
        }
    }
}

impl Default for AlertFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Coordination barrier between a consumer and its upstream dependencies.
pub struct ProcessingSequenceBarrier {
    wait_strategy: Arc<dyn WaitStrategy>,
    dependents: DependentSequences,
    cursor: Arc<Sequence>,
    sequencer: Arc<dyn Sequencer>,
    alert: AlertFlag,
}

impl ProcessingSequenceBarrier {
    /// Build a barrier over `sequencer`. With no dependent sequences the
    /// barrier trails the publisher cursor directly.
    pub(crate) fn new(sequencer: Arc<dyn Sequencer>, dependents: Vec<Arc<Sequence>>) -> Self {
        let cursor = sequencer.cursor_sequence().clone();
        let wait_strategy = sequencer.wait_strategy().clone();
        let dependents = if dependents.is_empty() {
            DependentSequences::Cursor(cursor.clone())
        } else {
            DependentSequences::Group(FixedSequenceGroup::new(dependents))
        };

        Self {
            wait_strategy,
            dependents,
            cursor,
            sequencer,
            alert: AlertFlag::new(),
        }
    }

    /// Wait until `sequence` is available for consumption.
    ///
    /// Returns the highest contiguously published sequence reached by every
    /// dependency, which may exceed the request. A value below the request
    /// means the wait strategy returned early; the caller must not treat it
    /// as progress.
    pub fn wait_for(&self, sequence: i64) -> Result<i64> {
        self.alert.check()?;

        let available =
            self.wait_strategy
                .wait_for(sequence, &self.cursor, &self.dependents, &self.alert)?;

        if available < sequence {
            return Ok(available);
        }

        Ok(self
            .sequencer
            .highest_published_sequence(sequence, available))
    }

    /// Current position of the slowest dependency
    pub fn cursor(&self) -> i64 {
        self.dependents.get()
    }

    pub fn is_alerted(&self) -> bool {
        self.alert.is_set()
    }

    /// Cancel any wait in flight and fail subsequent waits
    pub fn alert(&self) {
        self.alert.set();
        self.wait_strategy.signal_all_when_blocking();
    }

    /// Re-arm the barrier after an alert
    pub fn clear_alert(&self) {
        self.alert.clear();
    }

    /// Fail with [`GyreError::Alert`] if the barrier is alerted
    pub fn check_alert(&self) -> Result<()> {
        self.alert.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::{MultiProducerSequencer, Sequencer, SingleProducerSequencer};
    use crate::wait_strategy::BusySpinWaitStrategy;

    fn single_sequencer(size: usize) -> Arc<SingleProducerSequencer> {
        Arc::new(
            SingleProducerSequencer::new(size, Arc::new(BusySpinWaitStrategy::new())).unwrap(),
        )
    }

    #[test]
    fn test_wait_for_returns_published_sequence() {
        let sequencer = single_sequencer(8);
        let barrier =
            ProcessingSequenceBarrier::new(sequencer.clone() as Arc<dyn Sequencer>, Vec::new());

        let sequence = sequencer.next();
        sequencer.publish(sequence);

        assert_eq!(barrier.wait_for(0).unwrap(), 0);
    }

    #[test]
    fn test_alert_fails_wait() {
        let sequencer = single_sequencer(8);
        let barrier =
            ProcessingSequenceBarrier::new(sequencer.clone() as Arc<dyn Sequencer>, Vec::new());

        barrier.alert();
        assert!(barrier.is_alerted());
        assert!(matches!(barrier.wait_for(0), Err(GyreError::Alert)));

        barrier.clear_alert();
        assert!(barrier.check_alert().is_ok());
    }

    #[test]
    fn test_dependent_group_bounds_wait() {
        let sequencer = single_sequencer(8);
        let upstream = Arc::new(Sequence::new(2));
        let barrier = ProcessingSequenceBarrier::new(
            sequencer.clone() as Arc<dyn Sequencer>,
            vec![upstream.clone()],
        );

        for _ in 0..6 {
            let sequence = sequencer.next();
            sequencer.publish(sequence);
        }

        // The barrier trails the upstream consumer, not the cursor.
        assert_eq!(barrier.wait_for(0).unwrap(), 2);
        assert_eq!(barrier.cursor(), 2);
        upstream.set(5);
        assert_eq!(barrier.wait_for(3).unwrap(), 5);
    }

    #[test]
    fn test_multi_producer_barrier_hides_gaps() {
        let sequencer = Arc::new(
            MultiProducerSequencer::new(8, Arc::new(BusySpinWaitStrategy::new())).unwrap(),
        );
        let barrier =
            ProcessingSequenceBarrier::new(sequencer.clone() as Arc<dyn Sequencer>, Vec::new());

        let _ = sequencer.next_n(4).unwrap();
        sequencer.publish(0);
        sequencer.publish(1);
        sequencer.publish(3);

        // Cursor is at 3 but only 0..=1 are contiguously published.
        assert_eq!(barrier.wait_for(0).unwrap(), 1);
        sequencer.publish(2);
        assert_eq!(barrier.wait_for(0).unwrap(), 3);
    }
}
