//! Sequencers - claim/publish coordination for producers
//!
//! A sequencer hands out sequence ranges to producers and tracks which
//! sequences have been published and are therefore visible to consumers.
//! Two variants cover the producer topologies:
//!
//! - [`SingleProducerSequencer`] - one publishing thread, no claim
//!   contention, gating minimum cached locally
//! - [`MultiProducerSequencer`] - any number of publishing threads, claims
//!   via fetch-add on the cursor plus a per-slot availability array
//!
//! Both enforce the gating invariant: a producer may never claim a sequence
//! that would wrap the ring over an event a gating consumer has not yet
//! processed.

pub mod multi;
pub mod single;

pub use multi::MultiProducerSequencer;
pub use single::SingleProducerSequencer;

use std::sync::Arc;

use crate::error::{GyreError, Result};
use crate::gating::SharedSequences;
use crate::sequence::Sequence;
use crate::wait_strategy::WaitStrategy;

/// Producer topology selector, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerType {
    /// Exactly one thread claims and publishes
    Single,
    /// Any number of threads claim and publish concurrently
    Multi,
}

/// Claim/publish surface shared by both sequencer variants.
pub trait Sequencer: Send + Sync {
    /// Number of slots in the ring
    fn buffer_size(&self) -> usize;

    /// Current cursor value
    fn cursor(&self) -> i64;

    /// The cursor sequence itself, for barriers and pollers
    fn cursor_sequence(&self) -> &Arc<Sequence>;

    /// Wait strategy shared with barriers built over this sequencer
    fn wait_strategy(&self) -> &Arc<dyn WaitStrategy>;

    /// Claim the next sequence, waiting for capacity if the ring is full
    fn next(&self) -> i64;

    /// Claim the next `n` sequences, waiting for capacity.
    ///
    /// Returns the highest claimed sequence. Fails with
    /// [`GyreError::InvalidConfig`] when `n` is zero or exceeds the buffer
    /// size.
    fn next_n(&self, n: usize) -> Result<i64>;

    /// Claim the next sequence without waiting.
    ///
    /// Fails with [`GyreError::InsufficientCapacity`] when the claim would
    /// wrap over an unconsumed event.
    fn try_next(&self) -> Result<i64>;

    /// Claim the next `n` sequences without waiting
    fn try_next_n(&self, n: usize) -> Result<i64>;

    /// Publish a claimed sequence, making it visible to consumers
    fn publish(&self, sequence: i64);

    /// Publish a claimed range `lo..=hi`
    fn publish_range(&self, lo: i64, hi: i64);

    /// Whether `sequence` has been published and not yet wrapped
    fn is_available(&self, sequence: i64) -> bool;

    /// Highest sequence in `next_sequence..=available_sequence` such that
    /// every sequence up to it has been published.
    ///
    /// Returns `next_sequence - 1` when the first slot in the range is
    /// still unpublished.
    fn highest_published_sequence(&self, next_sequence: i64, available_sequence: i64) -> i64;

    /// Free slots remaining before producers would have to wait
    fn remaining_capacity(&self) -> i64;

    /// Whether `required` slots could be claimed right now
    fn has_available_capacity(&self, required: usize) -> bool;

    /// Add consumer sequences that gate producers against wrapping.
    ///
    /// Safe to call while producers are running; the added sequences are
    /// stamped with the current cursor so they do not gate below it.
    fn add_gating_sequences(&self, sequences: &[Arc<Sequence>]);

    /// Remove a gating sequence by identity. Returns whether it was present.
    fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool;

    /// Minimum of the gating sequences and the cursor
    fn minimum_sequence(&self) -> i64;
}

/// State common to both sequencer variants: ring geometry, cursor, wait
/// strategy and the gating set.
pub(crate) struct SequencerCore {
    buffer_size: usize,
    cursor: Arc<Sequence>,
    wait_strategy: Arc<dyn WaitStrategy>,
    gating_sequences: SharedSequences,
}

impl SequencerCore {
    pub fn new(buffer_size: usize, wait_strategy: Arc<dyn WaitStrategy>) -> Result<Self> {
        if buffer_size < 1 {
            return Err(GyreError::config("buffer size must not be less than 1"));
        }
        if !buffer_size.is_power_of_two() {
            return Err(GyreError::config("buffer size must be a power of 2"));
        }

        Ok(Self {
            buffer_size,
            cursor: Arc::new(Sequence::default()),
            wait_strategy,
            gating_sequences: SharedSequences::new(),
        })
    }

    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    #[inline]
    pub fn cursor(&self) -> &Arc<Sequence> {
        &self.cursor
    }

    #[inline]
    pub fn wait_strategy(&self) -> &Arc<dyn WaitStrategy> {
        &self.wait_strategy
    }

    /// Minimum of the gating sequences, starting from `default`
    #[inline]
    pub fn minimum_gating_sequence(&self, default: i64) -> i64 {
        self.gating_sequences.minimum(default)
    }

    pub fn add_gating_sequences(&self, sequences: &[Arc<Sequence>]) {
        self.gating_sequences.add(&self.cursor, sequences);
    }

    pub fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool {
        self.gating_sequences.remove(sequence)
    }

    #[cfg(test)]
    pub fn gating_sequence_count(&self) -> usize {
        self.gating_sequences.len()
    }
}
