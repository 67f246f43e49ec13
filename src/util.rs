//! Small helpers shared by the sequencers and sequence groups.

use std::sync::Arc;

use crate::sequence::Sequence;

/// Floor of log2 for a positive value.
///
/// Callers validate power-of-two buffer sizes before using this to derive
/// index shifts, so for those inputs the result is exact.
#[inline]
pub fn log2(value: usize) -> u32 {
    debug_assert!(value >= 1, "log2 requires a positive value");
    usize::BITS - 1 - value.leading_zeros()
}

/// Minimum over a set of sequences, starting from `minimum`.
///
/// Returns `minimum` unchanged when the slice is empty.
#[inline]
pub fn minimum_sequence(sequences: &[Arc<Sequence>], minimum: i64) -> i64 {
    sequences
        .iter()
        .map(|sequence| sequence.get())
        .fold(minimum, i64::min)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log2_powers_of_two() {
        assert_eq!(log2(1), 0);
        assert_eq!(log2(2), 1);
        assert_eq!(log2(8), 3);
        assert_eq!(log2(1024), 10);
        assert_eq!(log2(1024 * 1024), 20);
    }

    #[test]
    fn test_log2_rounds_down() {
        assert_eq!(log2(3), 1);
        assert_eq!(log2(1023), 9);
    }

    #[test]
    fn test_minimum_sequence() {
        let sequences: Vec<Arc<Sequence>> = [7, 3, 11]
            .iter()
            .map(|&v| Arc::new(Sequence::new(v)))
            .collect();

        assert_eq!(minimum_sequence(&sequences, i64::MAX), 3);
        assert_eq!(minimum_sequence(&sequences, 1), 1);
        assert_eq!(minimum_sequence(&[], 42), 42);
    }
}
