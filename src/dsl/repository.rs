//! Consumer bookkeeping for the coordinator
//!
//! Tracks, per registered handler: its processor (until start moves it
//! onto a thread), its sequence and barrier, its exception-handler
//! wrapper, its thread, and whether it is still end-of-chain. End-of-chain
//! consumers are the ones whose sequences gate the ring buffer.

use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::error;

use crate::barrier::ProcessingSequenceBarrier;
use crate::error::{GyreError, Result};
use crate::exception::{ExceptionHandler, ExceptionHandlerWrapper};
use crate::processor::{BatchEventProcessor, ProcessorHandle};
use crate::sequence::Sequence;
use crate::thread::ThreadFactory;

/// Token identifying a handler registered with a
/// [`Disruptor`](crate::dsl::Disruptor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(pub(crate) usize);

struct ConsumerEntry<E: Send + 'static> {
    /// Present until `start_all` moves the processor onto its thread
    processor: Option<BatchEventProcessor<E>>,
    handle: ProcessorHandle,
    sequence: Arc<Sequence>,
    barrier: Arc<ProcessingSequenceBarrier>,
    exception_wrapper: Arc<ExceptionHandlerWrapper<E>>,
    thread: Option<JoinHandle<()>>,
    end_of_chain: bool,
}

pub(crate) struct ConsumerRepository<E: Send + 'static> {
    entries: Vec<ConsumerEntry<E>>,
}

impl<E: Send + 'static> ConsumerRepository<E> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn add(&mut self, processor: BatchEventProcessor<E>) -> HandlerId {
        let id = HandlerId(self.entries.len());
        self.entries.push(ConsumerEntry {
            handle: processor.handle(),
            sequence: processor.sequence(),
            barrier: processor.barrier(),
            exception_wrapper: processor.exception_wrapper(),
            processor: Some(processor),
            thread: None,
            end_of_chain: true,
        });
        id
    }

    fn entry(&self, id: HandlerId) -> Result<&ConsumerEntry<E>> {
        self.entries
            .get(id.0)
            .ok_or_else(|| GyreError::state("handler is not registered with this disruptor"))
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn sequence_for(&self, id: HandlerId) -> Result<Arc<Sequence>> {
        Ok(self.entry(id)?.sequence.clone())
    }

    pub fn barrier_for(&self, id: HandlerId) -> Result<Arc<ProcessingSequenceBarrier>> {
        Ok(self.entry(id)?.barrier.clone())
    }

    /// Swap the exception handler consulted by one consumer. The barrier is
    /// alerted so a live processor re-evaluates promptly; an idle one
    /// clears the alert on start.
    pub fn switch_exception_handler(
        &self,
        id: HandlerId,
        handler: Arc<dyn ExceptionHandler<E>>,
    ) -> Result<()> {
        let entry = self.entry(id)?;
        entry.exception_wrapper.switch_to(handler);
        entry.barrier.alert();
        Ok(())
    }

    /// Mark the owners of `sequences` as no longer end-of-chain; they have
    /// become dependencies of a downstream consumer.
    pub fn unmark_end_of_chain(&mut self, sequences: &[Arc<Sequence>]) {
        for entry in &mut self.entries {
            if sequences.iter().any(|s| Arc::ptr_eq(s, &entry.sequence)) {
                entry.end_of_chain = false;
            }
        }
    }

    pub fn end_of_chain_sequences(&self) -> Vec<Arc<Sequence>> {
        self.entries
            .iter()
            .filter(|entry| entry.end_of_chain)
            .map(|entry| entry.sequence.clone())
            .collect()
    }

    /// Whether any end-of-chain consumer still trails `cursor`
    pub fn has_backlog(&self, cursor: i64, include_stopped: bool) -> bool {
        self.entries.iter().any(|entry| {
            entry.end_of_chain
                && (include_stopped || entry.handle.is_running())
                && entry.sequence.get() < cursor
        })
    }

    /// Spawn one thread per processor through the factory
    pub fn start_all(&mut self, factory: &mut dyn ThreadFactory) -> Result<()> {
        for (index, entry) in self.entries.iter_mut().enumerate() {
            let mut processor = entry
                .processor
                .take()
                .ok_or_else(|| GyreError::state("processor already started"))?;
            let name = format!("gyre-processor-{index}");
            let thread = factory.spawn(
                &name,
                Box::new(move || {
                    if let Err(err) = processor.run() {
                        error!(%err, "event processor terminated abnormally");
                    }
                }),
            )?;
            entry.thread = Some(thread);
        }
        Ok(())
    }

    pub fn halt_all(&self) {
        for entry in &self.entries {
            entry.handle.halt();
        }
    }

    pub fn join_all(&mut self) {
        for entry in &mut self.entries {
            if let Some(thread) = entry.thread.take() {
                let _ = thread.join();
            }
        }
    }
}
