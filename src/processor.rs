//! Batch event processor
//!
//! Owns one consumer sequence and drives an [`EventHandler`] over batches
//! of published events. The loop waits on a barrier, clamps the delivered
//! batch to the configured maximum, hands each event to the handler and
//! republishes its own sequence with release semantics so the sequencer
//! can gate producers on it.
//!
//! Failure handling, per error kind:
//!
//! - timeouts from the wait strategy surface as `on_timeout` and the loop
//!   resumes
//! - an alert exits the loop only once the processor is no longer RUNNING
//! - rewind requests from a rewindable handler are delegated to the
//!   configured [`RewindStrategy`], replaying the batch from its first
//!   sequence or surfacing the failure
//! - any other handler error is routed through the exception handler and
//!   the processor advances past the offending event; if the exception
//!   handler itself fails, the processor halts rather than taking the
//!   process down

use std::cmp;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::barrier::ProcessingSequenceBarrier;
use crate::error::{GyreError, Result};
use crate::exception::{ExceptionHandler, ExceptionHandlerWrapper};
use crate::handler::EventHandler;
use crate::rewind::{RewindAction, RewindStrategy};
use crate::ring_buffer::RingBuffer;
use crate::sequence::Sequence;

const IDLE: u8 = 0;
const HALTED: u8 = 1;
const RUNNING: u8 = 2;

/// Drives a handler over claimed ranges on its own thread.
///
/// Built through [`BatchEventProcessorBuilder`]. `run` is the thread body;
/// `halt` may be called from any thread and alerts the barrier so a parked
/// processor wakes promptly.
pub struct BatchEventProcessor<E: Send + 'static> {
    ring: Arc<RingBuffer<E>>,
    barrier: Arc<ProcessingSequenceBarrier>,
    handler: Box<dyn EventHandler<E>>,
    sequence: Arc<Sequence>,
    running: Arc<AtomicU8>,
    exception_handler: Arc<ExceptionHandlerWrapper<E>>,
    rewind_strategy: Option<Box<dyn RewindStrategy>>,
    batch_limit_offset: i64,
    retries_attempted: u64,
}

enum BatchOutcome {
    /// Batch fully delivered up to the contained sequence
    Completed(i64),
    /// Replay the batch from its first sequence
    Rewound,
    /// Error routed; advance past the contained sequence
    Faulted(i64),
    /// Processor halted itself
    Halted,
}

impl<E: Send + 'static> BatchEventProcessor<E> {
    /// The processor's own sequence, for gating and chaining
    pub fn sequence(&self) -> Arc<Sequence> {
        self.sequence.clone()
    }

    /// The barrier this processor waits on
    pub fn barrier(&self) -> Arc<ProcessingSequenceBarrier> {
        self.barrier.clone()
    }

    /// Whether the processor is currently started
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) != IDLE
    }

    /// Replace the exception handler consulted on handler failures
    pub fn set_exception_handler(&self, handler: Arc<dyn ExceptionHandler<E>>) {
        self.exception_handler.switch_to(handler);
    }

    /// Stop the processor and alert its barrier
    pub fn halt(&self) {
        self.running.store(HALTED, Ordering::Release);
        self.barrier.alert();
    }

    /// Detached control handle for halting after the processor has moved
    /// onto its thread
    pub fn handle(&self) -> ProcessorHandle {
        ProcessorHandle {
            running: self.running.clone(),
            barrier: self.barrier.clone(),
        }
    }

    pub(crate) fn exception_wrapper(&self) -> Arc<ExceptionHandlerWrapper<E>> {
        self.exception_handler.clone()
    }

    /// Thread body: process events until halted.
    ///
    /// Fails with [`GyreError::InvalidState`] when the processor is
    /// already running.
    pub fn run(&mut self) -> Result<()> {
        match self
            .running
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                self.barrier.clear_alert();
                debug!("event processor starting");

                self.notify_start();
                if self.running.load(Ordering::Acquire) == RUNNING {
                    self.process_events();
                }
                self.notify_shutdown();

                self.running.store(IDLE, Ordering::Release);
                debug!("event processor stopped");
                Ok(())
            }
            Err(state) if state == RUNNING => {
                Err(GyreError::state("event processor is already running"))
            }
            Err(_) => {
                // Halted before the first run; lifecycle hooks still fire
                // exactly once.
                self.notify_start();
                self.notify_shutdown();
                Ok(())
            }
        }
    }

    fn process_events(&mut self) {
        let mut next_sequence = self.sequence.get() + 1;

        loop {
            let start_of_batch = next_sequence;

            match self.barrier.wait_for(next_sequence) {
                Ok(available) => {
                    if available < next_sequence {
                        continue;
                    }

                    let end_of_batch = cmp::min(
                        next_sequence.saturating_add(self.batch_limit_offset),
                        available,
                    );

                    match self.deliver_batch(next_sequence, end_of_batch, available) {
                        BatchOutcome::Completed(end) => {
                            self.retries_attempted = 0;
                            self.sequence.set(end);
                            next_sequence = end + 1;
                        }
                        BatchOutcome::Rewound => {
                            next_sequence = start_of_batch;
                        }
                        BatchOutcome::Faulted(at) => {
                            self.sequence.set(at);
                            next_sequence = at + 1;
                        }
                        BatchOutcome::Halted => return,
                    }
                }
                Err(GyreError::Timeout) => {
                    self.notify_timeout(self.sequence.get());
                }
                Err(GyreError::Alert) => {
                    if self.running.load(Ordering::Acquire) != RUNNING {
                        return;
                    }
                }
                Err(error) => {
                    // Unexpected barrier failure; treat like an event error.
                    match self.route(error, next_sequence, false) {
                        BatchOutcome::Halted => return,
                        _ => {
                            self.sequence.set(next_sequence);
                            next_sequence += 1;
                        }
                    }
                }
            }
        }
    }

    fn deliver_batch(&mut self, start: i64, end: i64, available: i64) -> BatchOutcome {
        if let Err(error) = self
            .handler
            .on_batch_start(end - start + 1, available - start + 1)
        {
            return self.fail(error, start);
        }

        let mut next = start;
        while next <= end {
            let event = unsafe { self.ring.get_mut(next) };
            if let Err(error) = self.handler.on_event(event, next, next == end) {
                return self.fail(error, next);
            }
            next += 1;
        }

        BatchOutcome::Completed(end)
    }

    fn fail(&mut self, error: GyreError, sequence: i64) -> BatchOutcome {
        if error.is_rewind() {
            self.attempt_rewind(error, sequence)
        } else {
            self.route(error, sequence, true)
        }
    }

    fn attempt_rewind(&mut self, error: GyreError, sequence: i64) -> BatchOutcome {
        match &self.rewind_strategy {
            Some(strategy) => {
                self.retries_attempted += 1;
                match strategy.handle_rewind(&error, self.retries_attempted) {
                    RewindAction::Rewind => BatchOutcome::Rewound,
                    RewindAction::Throw => {
                        self.retries_attempted = 0;
                        self.route(error, sequence, true)
                    }
                }
            }
            None => self.route(
                GyreError::state("rewind requested by a non-rewindable handler"),
                sequence,
                true,
            ),
        }
    }

    /// Route an error through the exception handler. Returns `Faulted` to
    /// advance past `sequence`, or `Halted` when the exception handler
    /// itself failed.
    fn route(&mut self, error: GyreError, sequence: i64, include_event: bool) -> BatchOutcome {
        let event = if include_event {
            Some(unsafe { self.ring.get(sequence) })
        } else {
            None
        };

        match self
            .exception_handler
            .handle_event_exception(error, sequence, event)
        {
            Ok(()) => BatchOutcome::Faulted(sequence),
            Err(fatal) => {
                debug!(sequence, %fatal, "exception handler failed, halting processor");
                self.halt();
                BatchOutcome::Halted
            }
        }
    }

    fn notify_timeout(&mut self, sequence: i64) {
        if let Err(error) = self.handler.on_timeout(sequence) {
            let _ = self.route(error, sequence, false);
        }
    }

    fn notify_start(&mut self) {
        if let Err(error) = self.handler.on_start() {
            self.exception_handler.handle_on_start_exception(&error);
        }
    }

    fn notify_shutdown(&mut self) {
        if let Err(error) = self.handler.on_shutdown() {
            self.exception_handler.handle_on_shutdown_exception(&error);
        }
    }
}

/// Control handle over a processor that has been moved onto its thread.
#[derive(Clone)]
pub struct ProcessorHandle {
    running: Arc<AtomicU8>,
    barrier: Arc<ProcessingSequenceBarrier>,
}

impl ProcessorHandle {
    /// Stop the processor and alert its barrier
    pub fn halt(&self) {
        self.running.store(HALTED, Ordering::Release);
        self.barrier.alert();
    }

    /// Whether the processor is currently started
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) != IDLE
    }
}

/// Configures and builds a [`BatchEventProcessor`].
pub struct BatchEventProcessorBuilder {
    max_batch_size: Option<usize>,
}

impl BatchEventProcessorBuilder {
    pub fn new() -> Self {
        Self {
            max_batch_size: None,
        }
    }

    /// Cap the number of events delivered per batch (unbounded by default)
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = Some(max_batch_size);
        self
    }

    /// Build a processor for a plain handler.
    ///
    /// Fails with [`GyreError::InvalidConfig`] when the handler declares
    /// rewind capability; rewindable handlers carry their strategy through
    /// [`build_rewindable`].
    ///
    /// [`build_rewindable`]: BatchEventProcessorBuilder::build_rewindable
    pub fn build<E: Send + 'static>(
        self,
        ring: Arc<RingBuffer<E>>,
        barrier: Arc<ProcessingSequenceBarrier>,
        handler: Box<dyn EventHandler<E>>,
    ) -> Result<BatchEventProcessor<E>> {
        if handler.is_rewindable() {
            return Err(GyreError::config(
                "rewindable handler requires a rewind strategy",
            ));
        }
        self.build_inner(ring, barrier, handler, None)
    }

    /// Build a processor for a rewindable handler with its replay policy
    pub fn build_rewindable<E: Send + 'static>(
        self,
        ring: Arc<RingBuffer<E>>,
        barrier: Arc<ProcessingSequenceBarrier>,
        handler: Box<dyn EventHandler<E>>,
        rewind_strategy: Box<dyn RewindStrategy>,
    ) -> Result<BatchEventProcessor<E>> {
        self.build_inner(ring, barrier, handler, Some(rewind_strategy))
    }

    fn build_inner<E: Send + 'static>(
        self,
        ring: Arc<RingBuffer<E>>,
        barrier: Arc<ProcessingSequenceBarrier>,
        mut handler: Box<dyn EventHandler<E>>,
        rewind_strategy: Option<Box<dyn RewindStrategy>>,
    ) -> Result<BatchEventProcessor<E>> {
        let batch_limit_offset = match self.max_batch_size {
            Some(0) => {
                return Err(GyreError::config("max batch size must be greater than 0"));
            }
            Some(max) => max as i64 - 1,
            None => i64::MAX,
        };

        let sequence = Arc::new(Sequence::default());
        handler.set_sequence_callback(sequence.clone());

        Ok(BatchEventProcessor {
            ring,
            barrier,
            handler,
            sequence,
            running: Arc::new(AtomicU8::new(IDLE)),
            exception_handler: Arc::new(ExceptionHandlerWrapper::new()),
            rewind_strategy,
            batch_limit_offset,
            retries_attempted: 0,
        })
    }
}

impl Default for BatchEventProcessorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
