//! Lock-free snapshot lists of sequences.
//!
//! Sequencers gate producers on a set of consumer sequences that can change
//! while producers are running. Readers must always observe a consistent
//! set, so updates swap in a freshly allocated immutable vector with a CAS
//! and retire the old snapshot through epoch reclamation; readers pin an
//! epoch and scan whichever snapshot they loaded.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam::epoch::{self, Atomic, Owned};

use crate::sequence::Sequence;
use crate::util;

/// Atomically replaceable list of sequences.
///
/// Writers allocate-then-CAS; readers take a snapshot. Used for sequencer
/// gating sets and for [`SequenceGroup`].
pub(crate) struct SharedSequences {
    snapshot: Atomic<Vec<Arc<Sequence>>>,
}

impl SharedSequences {
    pub fn new() -> Self {
        Self {
            snapshot: Atomic::new(Vec::new()),
        }
    }

    /// Minimum over the current snapshot, starting from `minimum`.
    pub fn minimum(&self, minimum: i64) -> i64 {
        let guard = epoch::pin();
        let snapshot = self.snapshot.load(Ordering::Acquire, &guard);
        // The snapshot pointer is never null after construction.
        let sequences = unsafe { snapshot.deref() };
        util::minimum_sequence(sequences, minimum)
    }

    /// Number of sequences in the current snapshot
    pub fn len(&self) -> usize {
        let guard = epoch::pin();
        let snapshot = self.snapshot.load(Ordering::Acquire, &guard);
        unsafe { snapshot.deref() }.len()
    }

    /// Copy of the current snapshot
    pub fn to_vec(&self) -> Vec<Arc<Sequence>> {
        let guard = epoch::pin();
        let snapshot = self.snapshot.load(Ordering::Acquire, &guard);
        unsafe { snapshot.deref() }.clone()
    }

    /// Append sequences, stamping each with the cursor value so a freshly
    /// added consumer sequence does not gate producers below their current
    /// claim.
    pub fn add(&self, cursor: &Sequence, to_add: &[Arc<Sequence>]) {
        let guard = epoch::pin();
        loop {
            let current = self.snapshot.load(Ordering::Acquire, &guard);
            let mut updated = unsafe { current.deref() }.clone();
            updated.reserve(to_add.len());

            let cursor_value = cursor.get();
            for sequence in to_add {
                sequence.set(cursor_value);
                updated.push(sequence.clone());
            }

            match self.snapshot.compare_exchange(
                current,
                Owned::new(updated),
                Ordering::AcqRel,
                Ordering::Acquire,
                &guard,
            ) {
                Ok(_) => {
                    unsafe { guard.defer_destroy(current) };
                    break;
                }
                Err(_) => continue,
            }
        }

        // The cursor may have advanced during the swap; re-stamp so the new
        // members can never sit below a value the producers already passed.
        let cursor_value = cursor.get();
        for sequence in to_add {
            sequence.set(cursor_value);
        }
    }

    /// Remove a sequence by identity. Returns whether it was present.
    pub fn remove(&self, to_remove: &Arc<Sequence>) -> bool {
        let guard = epoch::pin();
        loop {
            let current = self.snapshot.load(Ordering::Acquire, &guard);
            let sequences = unsafe { current.deref() };

            if !sequences.iter().any(|s| Arc::ptr_eq(s, to_remove)) {
                return false;
            }

            let updated: Vec<Arc<Sequence>> = sequences
                .iter()
                .filter(|s| !Arc::ptr_eq(s, to_remove))
                .cloned()
                .collect();

            match self.snapshot.compare_exchange(
                current,
                Owned::new(updated),
                Ordering::AcqRel,
                Ordering::Acquire,
                &guard,
            ) {
                Ok(_) => {
                    unsafe { guard.defer_destroy(current) };
                    return true;
                }
                Err(_) => continue,
            }
        }
    }
}

impl Drop for SharedSequences {
    fn drop(&mut self) {
        // Exclusive access here; reclaim the final snapshot directly.
        unsafe {
            let snapshot = self
                .snapshot
                .load(Ordering::Relaxed, epoch::unprotected());
            if !snapshot.is_null() {
                drop(snapshot.into_owned());
            }
        }
    }
}

/// Dynamic group of sequences that reads as the minimum of its members.
///
/// Useful for tracking a set of consumers as a single gating sequence.
/// An empty group reads `i64::MAX` so it never gates anything.
pub struct SequenceGroup {
    sequences: SharedSequences,
}

impl SequenceGroup {
    pub fn new() -> Self {
        Self {
            sequences: SharedSequences::new(),
        }
    }

    /// Minimum of the member sequences, or `i64::MAX` when empty
    pub fn get(&self) -> i64 {
        self.sequences.minimum(i64::MAX)
    }

    /// Set every member to `value`
    pub fn set(&self, value: i64) {
        for sequence in self.sequences.to_vec() {
            sequence.set(value);
        }
    }

    /// Add a sequence, stamping it with the group's current position.
    ///
    /// Only safe before publishing begins; use [`add_while_running`] once
    /// producers are live.
    ///
    /// [`add_while_running`]: SequenceGroup::add_while_running
    pub fn add(&self, sequence: Arc<Sequence>) {
        let stamp = Sequence::new(self.get());
        self.sequences.add(&stamp, &[sequence]);
    }

    /// Add a sequence while producers are running, stamping it with the
    /// given cursor so it starts at the live position.
    pub fn add_while_running(&self, cursor: &Sequence, sequence: Arc<Sequence>) {
        self.sequences.add(cursor, &[sequence]);
    }

    /// Remove a sequence by identity. Returns whether it was present.
    pub fn remove(&self, sequence: &Arc<Sequence>) -> bool {
        self.sequences.remove(sequence)
    }

    /// Number of sequences in the group
    pub fn size(&self) -> usize {
        self.sequences.len()
    }
}

impl Default for SequenceGroup {
    fn default() -> Self {
        Self::new()
    }
}
