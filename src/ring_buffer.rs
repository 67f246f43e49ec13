//! Main ring buffer implementation
//!
//! A fixed-size, pre-allocated array of event slots coordinated by a
//! sequencer. Events are constructed once by a user-supplied factory and
//! mutated in place forever; no allocation ever happens on the publish
//! path.
//!
//! The discipline that makes shared slot access sound is sequence
//! ownership:
//!
//! - a claimed but unpublished sequence is exclusively writable by the
//!   claiming producer;
//! - a published sequence is readable by consumers and untouchable by
//!   producers until it drops below the gating minimum;
//! - once every gating consumer has passed it, the slot is writable again.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use gyre::{RingBuffer, BusySpinWaitStrategy};
//!
//! let ring = RingBuffer::single_producer(|| 0i64, 8, Arc::new(BusySpinWaitStrategy::new())).unwrap();
//! ring.publish_event(|slot: &mut i64, sequence| *slot = sequence * 10);
//! assert!(ring.is_available(0));
//! ```

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::Arc;

use crate::barrier::ProcessingSequenceBarrier;
use crate::constants::BUFFER_PAD;
use crate::error::Result;
use crate::poller::EventPoller;
use crate::sequence::Sequence;
use crate::sequencer::{
    MultiProducerSequencer, ProducerType, Sequencer, SingleProducerSequencer,
};
use crate::wait_strategy::WaitStrategy;

/// Pre-allocated circular buffer of event slots.
///
/// Storage holds `2 * BUFFER_PAD` unused slots around the live window so
/// hot slots do not share cache lines with whatever the allocator placed
/// next to the buffer.
pub struct RingBuffer<E> {
    entries: Box<[UnsafeCell<MaybeUninit<E>>]>,
    index_mask: i64,
    buffer_size: usize,
    sequencer: Arc<dyn Sequencer>,
}

// Slots are handed out according to the sequence ownership protocol above,
// so the buffer can be shared like a lock: E only needs to be Send.
unsafe impl<E: Send> Send for RingBuffer<E> {}
unsafe impl<E: Send> Sync for RingBuffer<E> {}

impl<E> RingBuffer<E> {
    /// Create a ring buffer claimed by a single publishing thread
    pub fn single_producer(
        factory: impl FnMut() -> E,
        buffer_size: usize,
        wait_strategy: Arc<dyn WaitStrategy>,
    ) -> Result<Arc<Self>> {
        let sequencer = SingleProducerSequencer::new(buffer_size, wait_strategy)?;
        Ok(Arc::new(Self::with_sequencer(factory, Arc::new(sequencer))))
    }

    /// Create a ring buffer safe for concurrent publishers
    pub fn multi_producer(
        factory: impl FnMut() -> E,
        buffer_size: usize,
        wait_strategy: Arc<dyn WaitStrategy>,
    ) -> Result<Arc<Self>> {
        let sequencer = MultiProducerSequencer::new(buffer_size, wait_strategy)?;
        Ok(Arc::new(Self::with_sequencer(factory, Arc::new(sequencer))))
    }

    /// Create a ring buffer for the given producer topology
    pub fn new(
        producer_type: ProducerType,
        factory: impl FnMut() -> E,
        buffer_size: usize,
        wait_strategy: Arc<dyn WaitStrategy>,
    ) -> Result<Arc<Self>> {
        match producer_type {
            ProducerType::Single => Self::single_producer(factory, buffer_size, wait_strategy),
            ProducerType::Multi => Self::multi_producer(factory, buffer_size, wait_strategy),
        }
    }

    fn with_sequencer(mut factory: impl FnMut() -> E, sequencer: Arc<dyn Sequencer>) -> Self {
        let buffer_size = sequencer.buffer_size();
        let total = buffer_size + 2 * BUFFER_PAD;

        let mut entries: Vec<UnsafeCell<MaybeUninit<E>>> = Vec::with_capacity(total);
        for index in 0..total {
            let in_window = (BUFFER_PAD..BUFFER_PAD + buffer_size).contains(&index);
            if in_window {
                entries.push(UnsafeCell::new(MaybeUninit::new(factory())));
            } else {
                entries.push(UnsafeCell::new(MaybeUninit::uninit()));
            }
        }

        Self {
            entries: entries.into_boxed_slice(),
            index_mask: buffer_size as i64 - 1,
            buffer_size,
            sequencer,
        }
    }

    /// Mutable access to the slot owning `sequence`.
    ///
    /// # Safety
    ///
    /// The caller must hold the sequence according to the ownership
    /// protocol: producers may only touch claimed-but-unpublished
    /// sequences, consumers only published ones their barrier released.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut(&self, sequence: i64) -> &mut E {
        let index = BUFFER_PAD + (sequence & self.index_mask) as usize;
        &mut *(*self.entries.get_unchecked(index).get()).as_mut_ptr()
    }

    /// Shared access to the slot owning `sequence`.
    ///
    /// # Safety
    ///
    /// `sequence` must be published and not yet wrapped.
    #[inline]
    pub unsafe fn get(&self, sequence: i64) -> &E {
        let index = BUFFER_PAD + (sequence & self.index_mask) as usize;
        &*(*self.entries.get_unchecked(index).get()).as_ptr()
    }

    /// Number of slots
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Highest published (single producer) or highest claimed (multi
    /// producer) sequence
    pub fn cursor(&self) -> i64 {
        self.sequencer.cursor()
    }

    pub(crate) fn cursor_sequence(&self) -> Arc<Sequence> {
        self.sequencer.cursor_sequence().clone()
    }

    pub(crate) fn highest_published_sequence(&self, next_sequence: i64, available: i64) -> i64 {
        self.sequencer
            .highest_published_sequence(next_sequence, available)
    }

    /// Claim the next sequence, waiting for capacity
    pub fn next(&self) -> i64 {
        self.sequencer.next()
    }

    /// Claim the next `n` sequences, waiting for capacity
    pub fn next_n(&self, n: usize) -> Result<i64> {
        self.sequencer.next_n(n)
    }

    /// Claim the next sequence or fail with
    /// [`GyreError::InsufficientCapacity`]
    ///
    /// [`GyreError::InsufficientCapacity`]: crate::GyreError::InsufficientCapacity
    pub fn try_next(&self) -> Result<i64> {
        self.sequencer.try_next()
    }

    /// Claim the next `n` sequences or fail
    pub fn try_next_n(&self, n: usize) -> Result<i64> {
        self.sequencer.try_next_n(n)
    }

    /// Publish a claimed sequence
    pub fn publish(&self, sequence: i64) {
        self.sequencer.publish(sequence);
    }

    /// Publish a claimed range
    pub fn publish_range(&self, lo: i64, hi: i64) {
        self.sequencer.publish_range(lo, hi);
    }

    /// Whether `sequence` is published and still inside the window
    pub fn is_available(&self, sequence: i64) -> bool {
        self.sequencer.is_available(sequence)
    }

    /// Free slots before producers would have to wait
    pub fn remaining_capacity(&self) -> i64 {
        self.sequencer.remaining_capacity()
    }

    /// Whether `required` slots could be claimed right now
    pub fn has_available_capacity(&self, required: usize) -> bool {
        self.sequencer.has_available_capacity(required)
    }

    /// Minimum of the gating sequences and the cursor
    pub fn minimum_gating_sequence(&self) -> i64 {
        self.sequencer.minimum_sequence()
    }

    /// Add consumer sequences that gate producers against wrapping
    pub fn add_gating_sequences(&self, sequences: &[Arc<Sequence>]) {
        self.sequencer.add_gating_sequences(sequences);
    }

    /// Remove a gating sequence by identity
    pub fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool {
        self.sequencer.remove_gating_sequence(sequence)
    }

    /// Build a barrier trailing the given dependent sequences (the cursor
    /// when empty)
    pub fn new_barrier(&self, dependents: Vec<Arc<Sequence>>) -> ProcessingSequenceBarrier {
        ProcessingSequenceBarrier::new(self.sequencer.clone(), dependents)
    }

    /// Build a pull-mode poller over `ring`, gated on the given sequences
    /// (the cursor when empty)
    pub fn new_poller(ring: &Arc<Self>, gating: Vec<Arc<Sequence>>) -> EventPoller<E> {
        EventPoller::new(ring.clone(), gating)
    }

    /// Claim one slot, fill it through `translator`, publish it.
    ///
    /// The claimed sequence is published even if the translator panics: a
    /// withheld publish would stall every consumer on the gap forever. The
    /// slot then simply carries its previous contents.
    pub fn publish_event<F: FnOnce(&mut E, i64)>(&self, translator: F) {
        let sequence = self.sequencer.next();
        let _publish = PublishGuard {
            sequencer: &*self.sequencer,
            lo: sequence,
            hi: sequence,
        };
        translator(unsafe { self.get_mut(sequence) }, sequence);
    }

    /// As [`publish_event`] but failing instead of waiting when the ring
    /// is full.
    ///
    /// [`publish_event`]: RingBuffer::publish_event
    pub fn try_publish_event<F: FnOnce(&mut E, i64)>(&self, translator: F) -> Result<()> {
        let sequence = self.sequencer.try_next()?;
        let _publish = PublishGuard {
            sequencer: &*self.sequencer,
            lo: sequence,
            hi: sequence,
        };
        translator(unsafe { self.get_mut(sequence) }, sequence);
        Ok(())
    }

    /// Claim a contiguous range, fill each slot through its translator,
    /// publish the whole range. Publication is unconditional, as with
    /// [`publish_event`].
    ///
    /// [`publish_event`]: RingBuffer::publish_event
    pub fn publish_events<F: FnOnce(&mut E, i64)>(&self, translators: Vec<F>) -> Result<()> {
        if translators.is_empty() {
            return Ok(());
        }

        let batch_size = translators.len();
        let hi = self.sequencer.next_n(batch_size)?;
        let lo = hi - (batch_size as i64 - 1);
        let _publish = PublishGuard {
            sequencer: &*self.sequencer,
            lo,
            hi,
        };
        for (offset, translator) in translators.into_iter().enumerate() {
            let sequence = lo + offset as i64;
            translator(unsafe { self.get_mut(sequence) }, sequence);
        }
        Ok(())
    }

    /// As [`publish_events`] but failing instead of waiting when the ring
    /// cannot hold the batch.
    ///
    /// [`publish_events`]: RingBuffer::publish_events
    pub fn try_publish_events<F: FnOnce(&mut E, i64)>(&self, translators: Vec<F>) -> Result<()> {
        if translators.is_empty() {
            return Ok(());
        }

        let batch_size = translators.len();
        let hi = self.sequencer.try_next_n(batch_size)?;
        let lo = hi - (batch_size as i64 - 1);
        let _publish = PublishGuard {
            sequencer: &*self.sequencer,
            lo,
            hi,
        };
        for (offset, translator) in translators.into_iter().enumerate() {
            let sequence = lo + offset as i64;
            translator(unsafe { self.get_mut(sequence) }, sequence);
        }
        Ok(())
    }
}

impl<E> Drop for RingBuffer<E> {
    fn drop(&mut self) {
        // Only the live window was initialized; padding slots stay untouched.
        for index in BUFFER_PAD..BUFFER_PAD + self.buffer_size {
            unsafe {
                (*self.entries[index].get()).assume_init_drop();
            }
        }
    }
}

/// Publishes the claimed range when dropped, including during unwinding.
struct PublishGuard<'a> {
    sequencer: &'a dyn Sequencer,
    lo: i64,
    hi: i64,
}

impl Drop for PublishGuard<'_> {
    fn drop(&mut self) {
        self.sequencer.publish_range(self.lo, self.hi);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GyreError;
    use crate::wait_strategy::BusySpinWaitStrategy;

    fn ring(size: usize) -> Arc<RingBuffer<i64>> {
        RingBuffer::single_producer(|| -1i64, size, Arc::new(BusySpinWaitStrategy::new())).unwrap()
    }

    #[test]
    fn test_rejects_invalid_sizes() {
        let strategy: Arc<dyn WaitStrategy> = Arc::new(BusySpinWaitStrategy::new());
        assert!(RingBuffer::single_producer(|| 0u8, 0, strategy.clone()).is_err());
        assert!(RingBuffer::single_producer(|| 0u8, 6, strategy.clone()).is_err());
        assert!(RingBuffer::multi_producer(|| 0u8, 1000, strategy).is_err());
    }

    #[test]
    fn test_buffer_size_one_is_valid() {
        let ring = ring(1);
        assert_eq!(ring.buffer_size(), 1);
        ring.publish_event(|slot: &mut i64, _| *slot = 9);
        assert!(ring.is_available(0));
    }

    #[test]
    fn test_factory_prefills_every_slot() {
        let mut next = 0i64;
        let ring = RingBuffer::single_producer(
            || {
                next += 1;
                next
            },
            8,
            Arc::new(BusySpinWaitStrategy::new()),
        )
        .unwrap();

        let values: Vec<i64> = (0..8).map(|s| unsafe { *ring.get(s) }).collect();
        assert_eq!(values, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_index_wraps_with_mask() {
        let ring = ring(4);
        unsafe {
            *ring.get_mut(2) = 77;
            // Sequence 6 maps onto the same slot as 2.
            assert_eq!(*ring.get(6), 77);
        }
    }

    #[test]
    fn test_publish_event_claims_fills_publishes() {
        let ring = ring(8);
        ring.publish_event(|slot: &mut i64, sequence| *slot = sequence * 2);
        ring.publish_event(|slot: &mut i64, sequence| *slot = sequence * 2);

        assert_eq!(ring.cursor(), 1);
        unsafe {
            assert_eq!(*ring.get(0), 0);
            assert_eq!(*ring.get(1), 2);
        }
    }

    #[test]
    fn test_publish_events_batch() {
        let ring = ring(8);
        let translators: Vec<_> = (0..5)
            .map(|_| |slot: &mut i64, sequence: i64| *slot = sequence + 100)
            .collect();
        ring.publish_events(translators).unwrap();

        assert_eq!(ring.cursor(), 4);
        for sequence in 0..5 {
            unsafe { assert_eq!(*ring.get(sequence), sequence + 100) };
        }
    }

    #[test]
    fn test_try_publish_event_fails_when_full() {
        let ring = ring(2);
        let gate = Arc::new(Sequence::default());
        ring.add_gating_sequences(&[gate]);

        ring.try_publish_event(|slot: &mut i64, _| *slot = 1).unwrap();
        ring.try_publish_event(|slot: &mut i64, _| *slot = 2).unwrap();
        let result = ring.try_publish_event(|slot: &mut i64, _| *slot = 3);
        assert!(matches!(result, Err(GyreError::InsufficientCapacity)));
    }

    #[test]
    fn test_panicking_translator_still_publishes() {
        let ring = ring(8);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            ring.publish_event(|_slot: &mut i64, _| panic!("translator failed"));
        }));
        assert!(outcome.is_err());

        // The claimed sequence must be visible; a gap would stall consumers.
        assert_eq!(ring.cursor(), 0);
        assert!(ring.is_available(0));
    }

    #[test]
    fn test_panicking_batch_translator_publishes_whole_range() {
        let ring = ring(8);
        let mut translators: Vec<Box<dyn FnOnce(&mut i64, i64)>> = Vec::new();
        translators.push(Box::new(|slot: &mut i64, _| *slot = 1));
        translators.push(Box::new(|_: &mut i64, _| panic!("second translator failed")));
        translators.push(Box::new(|slot: &mut i64, _| *slot = 3));

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            ring.publish_events(translators).unwrap();
        }));
        assert!(outcome.is_err());
        assert_eq!(ring.cursor(), 2);
        for sequence in 0..3 {
            assert!(ring.is_available(sequence));
        }
    }

    #[test]
    fn test_capacity_accessors() {
        let ring = ring(4);
        let gate = Arc::new(Sequence::default());
        ring.add_gating_sequences(&[gate.clone()]);

        assert_eq!(ring.remaining_capacity(), 4);
        assert!(ring.has_available_capacity(4));
        ring.publish_event(|_: &mut i64, _| {});
        assert_eq!(ring.remaining_capacity(), 3);
        assert_eq!(ring.minimum_gating_sequence(), -1);
        assert!(ring.remove_gating_sequence(&gate));
    }
}
