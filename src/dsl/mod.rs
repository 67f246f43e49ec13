//! Coordinator DSL - wire handlers into a dependency graph and run it
//!
//! [`Disruptor`] owns the ring buffer and every consumer built over it.
//! Handlers registered through `handle_events_with` consume directly
//! behind the publishers; `then` chains further handlers behind an
//! existing group, `and` unions two groups so a dependent gates on every
//! member, and `after` starts a chain behind handlers registered earlier.
//!
//! `start` spawns one thread per processor and must be called exactly
//! once, after which no more handlers can be added. The ring buffer is
//! gated on the end-of-chain consumers only: when a handler gains a
//! downstream dependent, its sequence leaves the gating set and the
//! dependent's joins it.
//!
//! Consumer bookkeeping lives behind a mutex so that several
//! [`EventHandlerGroup`]s can be held at once and combined; every path
//! that takes the lock is a setup or shutdown path, never event flow.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gyre::dsl::Disruptor;
//! use gyre::{BlockingWaitStrategy, ProducerType};
//!
//! let disruptor = Disruptor::new(
//!     ProducerType::Single,
//!     || 0i64,
//!     1024,
//!     Arc::new(BlockingWaitStrategy::new()),
//! ).unwrap();
//!
//! disruptor
//!     .handle_events_with(vec![Box::new(
//!         |event: &mut i64, sequence: i64, _end: bool| -> gyre::Result<()> {
//!             *event += sequence;
//!             Ok(())
//!         },
//!     )])
//!     .unwrap();
//!
//! disruptor.start().unwrap();
//! disruptor.publish_event(|event: &mut i64, _| *event = 42);
//! disruptor.shutdown();
//! ```

mod repository;

pub use repository::HandlerId;

use std::hint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use repository::ConsumerRepository;

use crate::barrier::ProcessingSequenceBarrier;
use crate::error::{GyreError, Result};
use crate::exception::{ExceptionHandler, ExceptionHandlerWrapper};
use crate::handler::EventHandler;
use crate::poller::EventPoller;
use crate::processor::BatchEventProcessorBuilder;
use crate::rewind::RewindStrategy;
use crate::ring_buffer::RingBuffer;
use crate::sequence::Sequence;
use crate::sequencer::ProducerType;
use crate::thread::{DefaultThreadFactory, ThreadFactory};
use crate::wait_strategy::WaitStrategy;

struct HandlerSpec<E> {
    handler: Box<dyn EventHandler<E>>,
    rewind: Option<Box<dyn RewindStrategy>>,
}

/// Owns a ring buffer and the graph of consumers built over it.
pub struct Disruptor<E: Send + 'static> {
    ring: Arc<RingBuffer<E>>,
    thread_factory: Mutex<Box<dyn ThreadFactory>>,
    repository: Mutex<ConsumerRepository<E>>,
    started: AtomicBool,
    default_handler: Arc<ExceptionHandlerWrapper<E>>,
    default_replaced: AtomicBool,
}

impl<E: Send + 'static> Disruptor<E> {
    /// Build a disruptor with the default thread factory
    pub fn new(
        producer_type: ProducerType,
        factory: impl FnMut() -> E,
        buffer_size: usize,
        wait_strategy: Arc<dyn WaitStrategy>,
    ) -> Result<Self> {
        Self::with_thread_factory(
            producer_type,
            factory,
            buffer_size,
            wait_strategy,
            Box::new(DefaultThreadFactory),
        )
    }

    /// Build a disruptor spawning processor threads through `thread_factory`
    pub fn with_thread_factory(
        producer_type: ProducerType,
        factory: impl FnMut() -> E,
        buffer_size: usize,
        wait_strategy: Arc<dyn WaitStrategy>,
        thread_factory: Box<dyn ThreadFactory>,
    ) -> Result<Self> {
        let ring = RingBuffer::new(producer_type, factory, buffer_size, wait_strategy)?;
        Ok(Self {
            ring,
            thread_factory: Mutex::new(thread_factory),
            repository: Mutex::new(ConsumerRepository::new()),
            started: AtomicBool::new(false),
            default_handler: Arc::new(ExceptionHandlerWrapper::new()),
            default_replaced: AtomicBool::new(false),
        })
    }

    /// Register consumers that process events straight behind the
    /// publishers. Each handler gets its own processor and thread.
    pub fn handle_events_with(
        &self,
        handlers: Vec<Box<dyn EventHandler<E>>>,
    ) -> Result<EventHandlerGroup<'_, E>> {
        let specs = handlers
            .into_iter()
            .map(|handler| HandlerSpec {
                handler,
                rewind: None,
            })
            .collect();
        self.create_event_processors(Vec::new(), specs)
    }

    /// Register a rewindable consumer behind the publishers, with its
    /// replay policy
    pub fn handle_events_with_rewind(
        &self,
        handler: Box<dyn EventHandler<E>>,
        rewind_strategy: Box<dyn RewindStrategy>,
    ) -> Result<EventHandlerGroup<'_, E>> {
        self.create_event_processors(
            Vec::new(),
            vec![HandlerSpec {
                handler,
                rewind: Some(rewind_strategy),
            }],
        )
    }

    /// Begin a chain behind handlers registered earlier
    pub fn after(&self, ids: &[HandlerId]) -> Result<EventHandlerGroup<'_, E>> {
        let repository = self.repository.lock();
        let mut sequences = Vec::with_capacity(ids.len());
        for &id in ids {
            sequences.push(repository.sequence_for(id)?);
        }
        drop(repository);

        Ok(EventHandlerGroup {
            disruptor: self,
            ids: ids.to_vec(),
            sequences,
        })
    }

    /// Install the default exception handler used by consumers without an
    /// explicit one.
    ///
    /// Fails with [`GyreError::InvalidState`] after
    /// [`handle_exceptions_with`] has installed an override, or once the
    /// disruptor has started.
    ///
    /// [`handle_exceptions_with`]: Disruptor::handle_exceptions_with
    pub fn set_default_exception_handler(
        &self,
        handler: Arc<dyn ExceptionHandler<E>>,
    ) -> Result<()> {
        self.check_not_started()?;
        if self.default_replaced.load(Ordering::Acquire) {
            return Err(GyreError::state(
                "set_default_exception_handler cannot be used after handle_exceptions_with",
            ));
        }
        self.default_handler.switch_to(handler);
        Ok(())
    }

    /// Replace the exception handler for every consumer that has not set
    /// an explicit one, disabling later
    /// [`set_default_exception_handler`] calls.
    ///
    /// [`set_default_exception_handler`]: Disruptor::set_default_exception_handler
    pub fn handle_exceptions_with(&self, handler: Arc<dyn ExceptionHandler<E>>) {
        self.default_handler.switch_to(handler);
        self.default_replaced.store(true, Ordering::Release);
    }

    /// Override the exception handler for a single consumer
    pub fn handle_exceptions_for(&self, id: HandlerId) -> ExceptionHandlerSetting<'_, E> {
        ExceptionHandlerSetting {
            disruptor: self,
            id,
        }
    }

    /// Spawn every processor thread. May only be called once.
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(GyreError::state("start must only be called once"));
        }

        let mut repository = self.repository.lock();
        debug!(processors = repository.count(), "starting disruptor");
        let mut thread_factory = self.thread_factory.lock();
        repository.start_all(&mut **thread_factory)
    }

    /// Whether `start` has been called
    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Halt every processor without draining
    pub fn halt(&self) {
        self.repository.lock().halt_all();
    }

    /// Drain until every end-of-chain consumer has caught up with the
    /// cursor, then halt and join all processor threads.
    pub fn shutdown(&self) {
        while self.has_backlog() {
            hint::spin_loop();
        }
        self.halt_and_join();
    }

    /// As [`shutdown`], but giving up after `timeout`. The processors are
    /// halted and joined regardless; [`GyreError::Timeout`] reports that
    /// events were abandoned in the ring.
    ///
    /// [`shutdown`]: Disruptor::shutdown
    pub fn shutdown_with_timeout(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while self.has_backlog() {
            if Instant::now() >= deadline {
                self.halt_and_join();
                return Err(GyreError::Timeout);
            }
            hint::spin_loop();
        }
        self.halt_and_join();
        Ok(())
    }

    /// Whether any end-of-chain consumer still trails the cursor
    pub fn has_backlog(&self) -> bool {
        self.repository.lock().has_backlog(self.ring.cursor(), false)
    }

    /// The shared ring buffer, e.g. for producer threads
    pub fn ring_buffer(&self) -> Arc<RingBuffer<E>> {
        self.ring.clone()
    }

    /// Claim, fill and publish one event
    pub fn publish_event<F: FnOnce(&mut E, i64)>(&self, translator: F) {
        self.ring.publish_event(translator);
    }

    /// Build a pull-mode poller over the ring, gated on `gating` (the
    /// cursor when empty). Remember to add the poller's sequence to the
    /// gating set if producers must not wrap over unpolled events.
    pub fn event_poller(&self, gating: Vec<Arc<Sequence>>) -> EventPoller<E> {
        RingBuffer::new_poller(&self.ring, gating)
    }

    /// Highest published (single producer) or claimed (multi producer)
    /// sequence
    pub fn cursor(&self) -> i64 {
        self.ring.cursor()
    }

    /// Number of slots in the ring
    pub fn buffer_size(&self) -> usize {
        self.ring.buffer_size()
    }

    /// Number of registered consumers
    pub fn processor_count(&self) -> usize {
        self.repository.lock().count()
    }

    /// A registered handler's sequence
    pub fn sequence_for(&self, id: HandlerId) -> Result<Arc<Sequence>> {
        self.repository.lock().sequence_for(id)
    }

    /// A registered handler's current sequence value
    pub fn sequence_value_for(&self, id: HandlerId) -> Result<i64> {
        Ok(self.sequence_for(id)?.get())
    }

    /// The barrier a registered handler waits on
    pub fn barrier_for(&self, id: HandlerId) -> Result<Arc<ProcessingSequenceBarrier>> {
        self.repository.lock().barrier_for(id)
    }

    fn check_not_started(&self) -> Result<()> {
        if self.has_started() {
            return Err(GyreError::state(
                "all event handlers must be added before calling start",
            ));
        }
        Ok(())
    }

    fn halt_and_join(&self) {
        let mut repository = self.repository.lock();
        repository.halt_all();
        repository.join_all();
    }

    fn create_event_processors(
        &self,
        barrier_sequences: Vec<Arc<Sequence>>,
        specs: Vec<HandlerSpec<E>>,
    ) -> Result<EventHandlerGroup<'_, E>> {
        self.check_not_started()?;

        let mut repository = self.repository.lock();

        // Handlers gaining a dependent stop gating the ring buffer; their
        // dependents take over below.
        repository.unmark_end_of_chain(&barrier_sequences);

        let mut ids = Vec::with_capacity(specs.len());
        let mut sequences = Vec::with_capacity(specs.len());

        for spec in specs {
            let barrier = Arc::new(self.ring.new_barrier(barrier_sequences.clone()));
            let builder = BatchEventProcessorBuilder::new();
            let processor = match spec.rewind {
                Some(strategy) => builder.build_rewindable(
                    self.ring.clone(),
                    barrier,
                    spec.handler,
                    strategy,
                )?,
                None => builder.build(self.ring.clone(), barrier, spec.handler)?,
            };
            processor.set_exception_handler(
                self.default_handler.clone() as Arc<dyn ExceptionHandler<E>>
            );

            sequences.push(processor.sequence());
            ids.push(repository.add(processor));
        }

        drop(repository);

        self.ring.add_gating_sequences(&sequences);
        for sequence in &barrier_sequences {
            self.ring.remove_gating_sequence(sequence);
        }

        Ok(EventHandlerGroup {
            disruptor: self,
            ids,
            sequences,
        })
    }
}

impl<E: Send + 'static> Drop for Disruptor<E> {
    fn drop(&mut self) {
        // Threads first, then processors, barriers and the ring fall out of
        // scope in declaration order.
        self.halt_and_join();
    }
}

/// A group of consumers created together; the anchor for chaining.
pub struct EventHandlerGroup<'d, E: Send + 'static> {
    disruptor: &'d Disruptor<E>,
    ids: Vec<HandlerId>,
    sequences: Vec<Arc<Sequence>>,
}

impl<'d, E: Send + 'static> EventHandlerGroup<'d, E> {
    /// Ids of the handlers in this group
    pub fn ids(&self) -> &[HandlerId] {
        &self.ids
    }

    /// Union this group with another group from the same coordinator.
    ///
    /// A dependent chained behind the combined group only sees an event
    /// once every handler from both sides has processed it.
    pub fn and(self, other: EventHandlerGroup<'d, E>) -> EventHandlerGroup<'d, E> {
        debug_assert!(
            std::ptr::eq(self.disruptor, other.disruptor),
            "groups must come from the same disruptor"
        );

        let mut ids = self.ids;
        ids.extend(other.ids);
        let mut sequences = self.sequences;
        sequences.extend(other.sequences);

        EventHandlerGroup {
            disruptor: self.disruptor,
            ids,
            sequences,
        }
    }

    /// Chain consumers behind this group: they only see an event once
    /// every handler in the group has processed it.
    pub fn then(
        self,
        handlers: Vec<Box<dyn EventHandler<E>>>,
    ) -> Result<EventHandlerGroup<'d, E>> {
        let specs = handlers
            .into_iter()
            .map(|handler| HandlerSpec {
                handler,
                rewind: None,
            })
            .collect();
        self.disruptor.create_event_processors(self.sequences, specs)
    }

    /// Chain a rewindable consumer behind this group
    pub fn then_with_rewind(
        self,
        handler: Box<dyn EventHandler<E>>,
        rewind_strategy: Box<dyn RewindStrategy>,
    ) -> Result<EventHandlerGroup<'d, E>> {
        self.disruptor.create_event_processors(
            self.sequences,
            vec![HandlerSpec {
                handler,
                rewind: Some(rewind_strategy),
            }],
        )
    }
}

/// Builder step binding an exception handler to one consumer.
pub struct ExceptionHandlerSetting<'d, E: Send + 'static> {
    disruptor: &'d Disruptor<E>,
    id: HandlerId,
}

impl<E: Send + 'static> ExceptionHandlerSetting<'_, E> {
    /// Install `handler` for the consumer
    pub fn with(self, handler: Arc<dyn ExceptionHandler<E>>) -> Result<()> {
        self.disruptor
            .repository
            .lock()
            .switch_exception_handler(self.id, handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait_strategy::BusySpinWaitStrategy;

    fn disruptor(buffer_size: usize) -> Disruptor<i64> {
        Disruptor::new(
            ProducerType::Single,
            || 0i64,
            buffer_size,
            Arc::new(BusySpinWaitStrategy::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_registration_after_start_is_rejected() {
        let disruptor = disruptor(8);
        disruptor
            .handle_events_with(vec![Box::new(|_: &mut i64, _: i64, _: bool| -> Result<()> { Ok(()) })])
            .unwrap();
        disruptor.start().unwrap();

        let result = disruptor
            .handle_events_with(vec![Box::new(|_: &mut i64, _: i64, _: bool| -> Result<()> { Ok(()) })]);
        assert!(matches!(result, Err(GyreError::InvalidState { .. })));
        disruptor.shutdown();
    }

    #[test]
    fn test_double_start_is_rejected() {
        let disruptor = disruptor(8);
        disruptor
            .handle_events_with(vec![Box::new(|_: &mut i64, _: i64, _: bool| -> Result<()> { Ok(()) })])
            .unwrap();
        disruptor.start().unwrap();
        assert!(matches!(
            disruptor.start(),
            Err(GyreError::InvalidState { .. })
        ));
        disruptor.shutdown();
    }

    #[test]
    fn test_default_handler_locked_after_override() {
        let disruptor = disruptor(8);
        disruptor.handle_exceptions_with(Arc::new(crate::exception::IgnoreExceptionHandler));
        let result =
            disruptor.set_default_exception_handler(Arc::new(crate::exception::IgnoreExceptionHandler));
        assert!(matches!(result, Err(GyreError::InvalidState { .. })));
    }

    #[test]
    fn test_chaining_moves_gating_to_end_of_chain() {
        let disruptor = disruptor(8);
        let group = disruptor
            .handle_events_with(vec![Box::new(|_: &mut i64, _: i64, _: bool| -> Result<()> { Ok(()) })])
            .unwrap();
        let first_id = group.ids()[0];
        let tail = group
            .then(vec![Box::new(|_: &mut i64, _: i64, _: bool| -> Result<()> { Ok(()) })])
            .unwrap();
        let tail_id = tail.ids()[0];

        let first_sequence = disruptor.sequence_for(first_id).unwrap();
        let tail_sequence = disruptor.sequence_for(tail_id).unwrap();

        let ring = disruptor.ring_buffer();
        // Only the tail gates the ring now.
        assert!(!ring.remove_gating_sequence(&first_sequence));
        assert!(ring.remove_gating_sequence(&tail_sequence));
    }

    #[test]
    fn test_and_unions_two_groups() {
        let disruptor = disruptor(8);
        let left = disruptor
            .handle_events_with(vec![Box::new(|_: &mut i64, _: i64, _: bool| -> Result<()> { Ok(()) })])
            .unwrap();
        let right = disruptor
            .handle_events_with(vec![Box::new(|_: &mut i64, _: i64, _: bool| -> Result<()> { Ok(()) })])
            .unwrap();
        let left_id = left.ids()[0];
        let right_id = right.ids()[0];

        let combined = left.and(right);
        assert_eq!(combined.ids(), &[left_id, right_id]);

        let tail = combined
            .then(vec![Box::new(|_: &mut i64, _: i64, _: bool| -> Result<()> { Ok(()) })])
            .unwrap();
        let tail_sequence = disruptor.sequence_for(tail.ids()[0]).unwrap();

        // Both members left the gating set in favour of the tail.
        let left_sequence = disruptor.sequence_for(left_id).unwrap();
        let right_sequence = disruptor.sequence_for(right_id).unwrap();
        let ring = disruptor.ring_buffer();
        assert!(!ring.remove_gating_sequence(&left_sequence));
        assert!(!ring.remove_gating_sequence(&right_sequence));
        assert!(ring.remove_gating_sequence(&tail_sequence));
    }

    #[test]
    fn test_unknown_handler_id_is_rejected() {
        let other = disruptor(8);
        let foreign_group = other
            .handle_events_with(vec![Box::new(|_: &mut i64, _: i64, _: bool| -> Result<()> { Ok(()) })])
            .unwrap();
        let foreign = foreign_group.ids()[0];
        drop(foreign_group);

        let disruptor = disruptor(8);
        assert!(disruptor.sequence_value_for(HandlerId(foreign.0 + 10)).is_err());
        let _ = disruptor;
    }
}
