//! Single-producer sequencer
//!
//! The fast path for topologies with exactly one publishing thread. The
//! producer keeps its claim position and the last observed gating minimum
//! in plain (relaxed) cells, touching shared state only when a claim might
//! wrap the ring.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;

use crate::error::{GyreError, Result};
use crate::sequence::{Sequence, INITIAL_CURSOR_VALUE};
use crate::sequencer::{Sequencer, SequencerCore};
use crate::wait_strategy::WaitStrategy;

/// Sequencer for a single publishing thread.
///
/// `next_value` and `cached_value` are only ever written by the producer
/// thread, so they are accessed with relaxed ordering; all cross-thread
/// visibility flows through the cursor and the gating sequences.
///
/// Claiming concurrently from more than one thread violates the
/// single-producer contract and garbles the claim accounting; use
/// [`MultiProducerSequencer`] for that topology.
///
/// [`MultiProducerSequencer`]: crate::sequencer::MultiProducerSequencer
pub struct SingleProducerSequencer {
    core: SequencerCore,
    /// Highest sequence claimed by the producer (producer-private)
    next_value: AtomicI64,
    /// Last observed gating minimum (producer-private)
    cached_value: AtomicI64,
}

impl SingleProducerSequencer {
    pub fn new(buffer_size: usize, wait_strategy: Arc<dyn WaitStrategy>) -> Result<Self> {
        Ok(Self {
            core: SequencerCore::new(buffer_size, wait_strategy)?,
            next_value: AtomicI64::new(INITIAL_CURSOR_VALUE),
            cached_value: AtomicI64::new(INITIAL_CURSOR_VALUE),
        })
    }

    fn has_capacity(&self, required: usize, store_cursor: bool) -> bool {
        let next_value = self.next_value.load(Ordering::Relaxed);
        let wrap_point = next_value + required as i64 - self.core.buffer_size() as i64;
        let cached_gating_sequence = self.cached_value.load(Ordering::Relaxed);

        // The second disjunct covers a gating set that moved backwards when
        // sequences were re-added.
        if wrap_point > cached_gating_sequence || cached_gating_sequence > next_value {
            if store_cursor {
                // StoreLoad fence between exposing the claim position and
                // reading the gating sequences.
                self.core.cursor().set_volatile(next_value);
            }

            let min_sequence = self.core.minimum_gating_sequence(next_value);
            self.cached_value.store(min_sequence, Ordering::Relaxed);

            if wrap_point > min_sequence {
                return false;
            }
        }

        true
    }

    fn next_inner(&self, n: i64) -> i64 {
        let next_value = self.next_value.load(Ordering::Relaxed);
        let next_sequence = next_value + n;
        let wrap_point = next_sequence - self.core.buffer_size() as i64;
        let cached_gating_sequence = self.cached_value.load(Ordering::Relaxed);

        if wrap_point > cached_gating_sequence || cached_gating_sequence > next_value {
            self.core.cursor().set_volatile(next_value);

            let mut min_sequence = self.core.minimum_gating_sequence(next_value);
            while wrap_point > min_sequence {
                thread::yield_now();
                min_sequence = self.core.minimum_gating_sequence(next_value);
            }

            self.cached_value.store(min_sequence, Ordering::Relaxed);
        }

        self.next_value.store(next_sequence, Ordering::Relaxed);
        next_sequence
    }
}

impl Sequencer for SingleProducerSequencer {
    fn buffer_size(&self) -> usize {
        self.core.buffer_size()
    }

    fn cursor(&self) -> i64 {
        self.core.cursor().get()
    }

    fn cursor_sequence(&self) -> &Arc<Sequence> {
        self.core.cursor()
    }

    fn wait_strategy(&self) -> &Arc<dyn WaitStrategy> {
        self.core.wait_strategy()
    }

    fn next(&self) -> i64 {
        self.next_inner(1)
    }

    fn next_n(&self, n: usize) -> Result<i64> {
        if n < 1 || n > self.core.buffer_size() {
            return Err(GyreError::config(
                "claim count must be > 0 and <= buffer size",
            ));
        }
        Ok(self.next_inner(n as i64))
    }

    fn try_next(&self) -> Result<i64> {
        self.try_next_n(1)
    }

    fn try_next_n(&self, n: usize) -> Result<i64> {
        if n < 1 {
            return Err(GyreError::config("claim count must be > 0"));
        }

        if !self.has_capacity(n, true) {
            return Err(GyreError::InsufficientCapacity);
        }

        let next_sequence = self.next_value.load(Ordering::Relaxed) + n as i64;
        self.next_value.store(next_sequence, Ordering::Relaxed);
        Ok(next_sequence)
    }

    fn publish(&self, sequence: i64) {
        self.core.cursor().set(sequence);
        self.core.wait_strategy().signal_all_when_blocking();
    }

    fn publish_range(&self, _lo: i64, hi: i64) {
        self.publish(hi);
    }

    fn is_available(&self, sequence: i64) -> bool {
        let current = self.core.cursor().get();
        sequence <= current && sequence > current - self.core.buffer_size() as i64
    }

    fn highest_published_sequence(&self, _next_sequence: i64, available_sequence: i64) -> i64 {
        // A single producer publishes contiguously; no gaps to scan for.
        available_sequence
    }

    fn remaining_capacity(&self) -> i64 {
        let next_value = self.next_value.load(Ordering::Relaxed);
        let consumed = self.core.minimum_gating_sequence(next_value);
        self.core.buffer_size() as i64 - (next_value - consumed)
    }

    fn has_available_capacity(&self, required: usize) -> bool {
        self.has_capacity(required, false)
    }

    fn add_gating_sequences(&self, sequences: &[Arc<Sequence>]) {
        self.core.add_gating_sequences(sequences);
    }

    fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool {
        self.core.remove_gating_sequence(sequence)
    }

    fn minimum_sequence(&self) -> i64 {
        self.core.minimum_gating_sequence(self.core.cursor().get())
    }
}
