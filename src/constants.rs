//! Performance tuning constants used throughout the library.

/// Cache line size for alignment optimizations (64 bytes on most modern CPUs)
pub const CACHE_LINE_SIZE: usize = 64;

/// Sequence counters are padded to two cache lines to defeat adjacent-line
/// prefetching on modern Intel CPUs
pub const SEQUENCE_PADDING: usize = 2 * CACHE_LINE_SIZE;

/// Unused slots allocated on each side of the ring storage so that hot slots
/// never share a cache line with neighbouring allocations
pub const BUFFER_PAD: usize = 32;

/// Spin iterations before the yielding wait strategy starts yielding
pub const YIELD_SPIN_TRIES: u32 = 100;

/// Spin iterations between clock reads in the phased backoff wait strategy
pub const PHASED_SPIN_TRIES: u32 = 10_000;

/// Default retry budget for the sleeping wait strategy
pub const SLEEP_DEFAULT_RETRIES: u32 = 200;

/// Default sleep quantum for the sleeping wait strategy, in nanoseconds
pub const SLEEP_DEFAULT_NANOS: u64 = 100;
