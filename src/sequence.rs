//! Sequence counters for coordinating producers and consumers
//!
//! A [`Sequence`] is a monotonically increasing signed 64-bit counter that
//! identifies a logical position in the event stream. Producers and
//! consumers never share mutable event state directly; all coordination
//! flows through sequences with acquire/release atomics.
//!
//! Counters are padded to two cache lines so that a hot producer cursor and
//! a hot consumer sequence never ping-pong the same line between cores.

use std::fmt;
use std::sync::atomic::{fence, AtomicI64, Ordering};
use std::sync::Arc;

use static_assertions::const_assert_eq;

use crate::constants::SEQUENCE_PADDING;
use crate::util;

/// Initial value of every sequence: nothing has been claimed or published.
pub const INITIAL_CURSOR_VALUE: i64 = -1;

/// Cache-line padded atomic sequence counter.
///
/// Uses 128-byte alignment to prevent false sharing on modern Intel CPUs
/// that prefetch two cache lines at a time.
#[repr(align(128))]
pub struct Sequence {
    value: AtomicI64,
    _padding: [u8; SEQUENCE_PADDING - 8],
}

const_assert_eq!(std::mem::size_of::<Sequence>(), 128);
const_assert_eq!(std::mem::align_of::<Sequence>(), 128);

impl Sequence {
    /// Create a sequence with the given initial value
    pub fn new(initial: i64) -> Self {
        Self {
            value: AtomicI64::new(initial),
            _padding: [0; SEQUENCE_PADDING - 8],
        }
    }

    /// Current value (acquire load)
    #[inline]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Set the value (release store)
    #[inline]
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    /// Set the value and erect a full StoreLoad fence.
    ///
    /// Used by the single-producer claim path: the cursor store must be
    /// ordered before the subsequent gating-sequence loads.
    #[inline]
    pub fn set_volatile(&self, value: i64) {
        self.value.store(value, Ordering::Release);
        fence(Ordering::SeqCst);
    }

    /// Compare-and-set; acq-rel on success
    #[inline]
    pub fn compare_and_set(&self, expected: i64, new: i64) -> bool {
        self.value
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Atomically add `increment` and return the new value
    #[inline]
    pub fn add_and_get(&self, increment: i64) -> i64 {
        self.value.fetch_add(increment, Ordering::AcqRel) + increment
    }

    /// Atomically add `increment` and return the previous value
    #[inline]
    pub fn get_and_add(&self, increment: i64) -> i64 {
        self.value.fetch_add(increment, Ordering::AcqRel)
    }

    /// Atomically increment and return the new value
    #[inline]
    pub fn increment_and_get(&self) -> i64 {
        self.add_and_get(1)
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new(INITIAL_CURSOR_VALUE)
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Sequence").field(&self.get()).finish()
    }
}

/// Immutable group of sequences read as their minimum.
///
/// A barrier whose consumer depends on several upstream consumers tracks
/// them through one of these; the group never changes after construction.
pub struct FixedSequenceGroup {
    sequences: Vec<Arc<Sequence>>,
}

impl FixedSequenceGroup {
    pub fn new(sequences: Vec<Arc<Sequence>>) -> Self {
        Self { sequences }
    }

    /// Minimum of the member sequences
    #[inline]
    pub fn get(&self) -> i64 {
        util::minimum_sequence(&self.sequences, i64::MAX)
    }
}

/// The set of sequences a waiting consumer must trail.
///
/// Root consumers trail the publisher cursor directly; chained consumers
/// trail the minimum of their upstream group.
pub enum DependentSequences {
    Cursor(Arc<Sequence>),
    Group(FixedSequenceGroup),
}

impl DependentSequences {
    #[inline]
    pub fn get(&self) -> i64 {
        match self {
            DependentSequences::Cursor(cursor) => cursor.get(),
            DependentSequences::Group(group) => group.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_value() {
        let sequence = Sequence::default();
        assert_eq!(sequence.get(), INITIAL_CURSOR_VALUE);
    }

    #[test]
    fn test_set_and_get() {
        let sequence = Sequence::default();
        sequence.set(17);
        assert_eq!(sequence.get(), 17);
        sequence.set_volatile(18);
        assert_eq!(sequence.get(), 18);
    }

    #[test]
    fn test_compare_and_set() {
        let sequence = Sequence::new(5);
        assert!(!sequence.compare_and_set(4, 10));
        assert_eq!(sequence.get(), 5);
        assert!(sequence.compare_and_set(5, 10));
        assert_eq!(sequence.get(), 10);
    }

    #[test]
    fn test_arithmetic() {
        let sequence = Sequence::new(0);
        assert_eq!(sequence.increment_and_get(), 1);
        assert_eq!(sequence.add_and_get(4), 5);
        assert_eq!(sequence.get_and_add(3), 5);
        assert_eq!(sequence.get(), 8);
    }

    #[test]
    fn test_fixed_group_minimum() {
        let low = Arc::new(Sequence::new(2));
        let high = Arc::new(Sequence::new(9));
        let group = FixedSequenceGroup::new(vec![high.clone(), low.clone()]);
        assert_eq!(group.get(), 2);

        low.set(11);
        assert_eq!(group.get(), 9);
    }

    #[test]
    fn test_empty_fixed_group_reads_max() {
        let group = FixedSequenceGroup::new(Vec::new());
        assert_eq!(group.get(), i64::MAX);
    }

    #[test]
    fn test_dependents_follow_cursor() {
        let cursor = Arc::new(Sequence::default());
        let dependents = DependentSequences::Cursor(cursor.clone());
        assert_eq!(dependents.get(), INITIAL_CURSOR_VALUE);
        cursor.set(33);
        assert_eq!(dependents.get(), 33);
    }
}
