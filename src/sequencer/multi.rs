//! Multi-producer sequencer
//!
//! Claims are handed out with a fetch-add on the cursor, so any number of
//! threads can publish concurrently. Because claims complete out of order,
//! publication is tracked per slot in an availability array: each cell
//! records the "round" (`sequence >> log2(N)`) at which its slot was last
//! published, and a slot is visible only when its cell matches the round of
//! the queried sequence.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;

use crate::error::{GyreError, Result};
use crate::sequence::Sequence;
use crate::sequencer::{Sequencer, SequencerCore};
use crate::util;
use crate::wait_strategy::WaitStrategy;

/// Per-slot publication flags.
///
/// A cell holding round `r` means sequence `r * N + index` was published.
/// The i32 round counter cannot wrap before the index mask collides, so 32
/// bits is wide enough for the full 64-bit sequence range.
struct AvailabilityBuffer {
    flags: Box<[AtomicI32]>,
    index_mask: i64,
    index_shift: u32,
}

impl AvailabilityBuffer {
    fn new(buffer_size: usize) -> Self {
        let flags = (0..buffer_size)
            .map(|_| AtomicI32::new(-1))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            flags,
            index_mask: buffer_size as i64 - 1,
            index_shift: util::log2(buffer_size),
        }
    }

    #[inline]
    fn index_of(&self, sequence: i64) -> usize {
        (sequence & self.index_mask) as usize
    }

    #[inline]
    fn flag_of(&self, sequence: i64) -> i32 {
        (sequence >> self.index_shift) as i32
    }

    #[inline]
    fn set(&self, sequence: i64) {
        self.flags[self.index_of(sequence)].store(self.flag_of(sequence), Ordering::Release);
    }

    #[inline]
    fn is_set(&self, sequence: i64) -> bool {
        self.flags[self.index_of(sequence)].load(Ordering::Acquire) == self.flag_of(sequence)
    }

    /// Largest `h` in `[lo - 1, hi]` with every sequence in `[lo, h]`
    /// published
    fn highest_published(&self, lo: i64, hi: i64) -> i64 {
        for sequence in lo..=hi {
            if !self.is_set(sequence) {
                return sequence - 1;
            }
        }
        hi
    }
}

/// Sequencer safe for concurrent publishing from any number of threads.
pub struct MultiProducerSequencer {
    core: SequencerCore,
    /// Cached gating minimum, shared by all producers
    gating_cache: Sequence,
    available: AvailabilityBuffer,
}

impl MultiProducerSequencer {
    pub fn new(buffer_size: usize, wait_strategy: Arc<dyn WaitStrategy>) -> Result<Self> {
        let core = SequencerCore::new(buffer_size, wait_strategy)?;
        Ok(Self {
            core,
            gating_cache: Sequence::default(),
            available: AvailabilityBuffer::new(buffer_size),
        })
    }

    fn has_capacity(&self, required: usize, cursor_value: i64) -> bool {
        let wrap_point = cursor_value + required as i64 - self.core.buffer_size() as i64;
        let cached_gating_sequence = self.gating_cache.get();

        if wrap_point > cached_gating_sequence || cached_gating_sequence > cursor_value {
            let min_sequence = self.core.minimum_gating_sequence(cursor_value);
            self.gating_cache.set(min_sequence);

            if wrap_point > min_sequence {
                return false;
            }
        }

        true
    }

    fn next_inner(&self, n: i64) -> i64 {
        let current = self.core.cursor().get_and_add(n);
        let next_sequence = current + n;
        let wrap_point = next_sequence - self.core.buffer_size() as i64;
        let cached_gating_sequence = self.gating_cache.get();

        if wrap_point > cached_gating_sequence || cached_gating_sequence > current {
            let mut gating_sequence = self.core.minimum_gating_sequence(current);
            while wrap_point > gating_sequence {
                thread::yield_now();
                gating_sequence = self.core.minimum_gating_sequence(current);
            }
            self.gating_cache.set(gating_sequence);
        }

        next_sequence
    }
}

impl Sequencer for MultiProducerSequencer {
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

        loop {
            let current = self.core.cursor().get();
            let next = current + n as i64;

            if !self.has_capacity(n, current) {
                return Err(GyreError::InsufficientCapacity);
            }

            if self.core.cursor().compare_and_set(current, next) {
                return Ok(next);
            }
        }
    }

    fn publish(&self, sequence: i64) {
        self.available.set(sequence);
        self.core.wait_strategy().signal_all_when_blocking();
    }

    fn publish_range(&self, lo: i64, hi: i64) {
        for sequence in lo..=hi {
            self.available.set(sequence);
        }
        self.core.wait_strategy().signal_all_when_blocking();
    }

    fn is_available(&self, sequence: i64) -> bool {
        self.available.is_set(sequence)
    }

    fn highest_published_sequence(&self, next_sequence: i64, available_sequence: i64) -> i64 {
        self.available
            .highest_published(next_sequence, available_sequence)
    }

    fn remaining_capacity(&self) -> i64 {
        let produced = self.core.cursor().get();
        let consumed = self.core.minimum_gating_sequence(produced);
        self.core.buffer_size() as i64 - (produced - consumed)
    }

    fn has_available_capacity(&self, required: usize) -> bool {
        self.has_capacity(required, self.core.cursor().get())
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
