//! gyre - high-throughput inter-thread messaging
//!
//! Moves events between producer and consumer threads through a
//! pre-allocated ring buffer coordinated by monotonic sequence counters,
//! instead of a lock-based queue. Memory is bounded, nothing allocates on
//! the publish path, and consumers see events in claim order with
//! acquire/release visibility guarantees.
//!
//! ## Key pieces
//!
//! - [`RingBuffer`] - fixed array of pre-constructed event slots, reused
//!   forever
//! - [`Sequence`] - cache-line padded atomic counter; one per consumer,
//!   one cursor per ring
//! - wait strategies - how consumers wait for new events, from busy-spin
//!   to condvar parking with deadlines
//! - [`BatchEventProcessor`] - a consumer thread driving an
//!   [`EventHandler`] over batches, with exception routing and batch
//!   rewind
//! - [`EventPoller`] - pull-mode consumption from a caller-owned loop
//! - [`dsl::Disruptor`] - wires handlers, barriers and gating sequences
//!   into a dependency graph and manages processor threads
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicI64, Ordering};
//! use gyre::dsl::Disruptor;
//! use gyre::{BusySpinWaitStrategy, ProducerType};
//!
//! let disruptor = Disruptor::new(
//!     ProducerType::Single,
//!     || 0i64,
//!     64,
//!     Arc::new(BusySpinWaitStrategy::new()),
//! ).unwrap();
//!
//! let sum = Arc::new(AtomicI64::new(0));
//! let seen = sum.clone();
//! disruptor
//!     .handle_events_with(vec![Box::new(
//!         move |event: &mut i64, _sequence: i64, _end: bool| -> gyre::Result<()> {
//!             seen.fetch_add(*event, Ordering::Relaxed);
//!             Ok(())
//!         },
//!     )])
//!     .unwrap();
//!
//! disruptor.start().unwrap();
//! for value in 1..=10 {
//!     disruptor.publish_event(move |event: &mut i64, _| *event = value);
//! }
//! disruptor.shutdown();
//! assert_eq!(sum.load(Ordering::Relaxed), 55);
//! ```

pub mod barrier;
pub mod constants;
pub mod dsl;
pub mod error;
pub mod exception;
pub mod gating;
pub mod handler;
pub mod poller;
pub mod processor;
pub mod rewind;
pub mod ring_buffer;
pub mod sequence;
pub mod sequencer;
pub mod thread;
pub mod util;
pub mod wait_strategy;

// Re-export main components
pub use barrier::{AlertFlag, ProcessingSequenceBarrier};
pub use error::{GyreError, Result};
pub use exception::{
    default_handler, ExceptionHandler, ExceptionHandlerWrapper, FatalExceptionHandler,
    IgnoreExceptionHandler,
};
pub use gating::SequenceGroup;
pub use handler::{AggregateEventHandler, EventHandler};
pub use poller::{EventPoller, PollState};
pub use processor::{BatchEventProcessor, BatchEventProcessorBuilder, ProcessorHandle};
pub use rewind::{
    EventuallyGiveUpRewindStrategy, PauseRewindStrategy, RewindAction, RewindStrategy,
    SimpleRewindStrategy,
};
pub use ring_buffer::RingBuffer;
pub use sequence::{DependentSequences, FixedSequenceGroup, Sequence, INITIAL_CURSOR_VALUE};
pub use sequencer::{MultiProducerSequencer, ProducerType, Sequencer, SingleProducerSequencer};
pub use thread::{DefaultThreadFactory, ThreadFactory};
pub use wait_strategy::{
    BlockingWaitStrategy, BusySpinWaitStrategy, LiteBlockingWaitStrategy,
    LiteTimeoutBlockingWaitStrategy, PhasedBackoffWaitStrategy, SleepingWaitStrategy,
    TimeoutBlockingWaitStrategy, WaitStrategy, YieldingWaitStrategy,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_ring_buffer_creation() {
        let ring = RingBuffer::single_producer(|| 0u64, 1024, Arc::new(BusySpinWaitStrategy::new()));
        assert!(ring.is_ok());
        assert_eq!(ring.unwrap().buffer_size(), 1024);
    }

    #[test]
    fn test_publish_and_poll_round_trip() {
        let ring =
            RingBuffer::single_producer(|| 0u64, 16, Arc::new(BusySpinWaitStrategy::new()))
                .unwrap();
        let mut poller = RingBuffer::new_poller(&ring, Vec::new());
        ring.add_gating_sequences(&[poller.sequence()]);

        for _ in 0..3 {
            ring.publish_event(|slot: &mut u64, sequence| *slot = sequence as u64 + 1);
        }

        let mut received = Vec::new();
        let state = poller
            .poll(|event, _sequence, _end| {
                received.push(*event);
                Ok(true)
            })
            .unwrap();

        assert_eq!(state, PollState::Processing);
        assert_eq!(received, vec![1, 2, 3]);
    }
}
