//! Pull-mode event poller
//!
//! The caller-driven alternative to [`BatchEventProcessor`]: instead of
//! parking a dedicated thread on a barrier, the application calls `poll`
//! whenever it wants to drain available events, e.g. from its own
//! scheduling loop.
//!
//! [`BatchEventProcessor`]: crate::processor::BatchEventProcessor

use std::sync::Arc;

use crate::error::Result;
use crate::ring_buffer::RingBuffer;
use crate::sequence::{DependentSequences, FixedSequenceGroup, Sequence};

/// Outcome of one `poll` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// At least one event was delivered to the handler
    Processing,
    /// The cursor has moved on but an upstream dependency has not; the
    /// poller is bottlenecked on its gating sequences
    Gating,
    /// Nothing new behind the cursor
    Idle,
}

/// Caller-driven consumer over a ring buffer.
pub struct EventPoller<E> {
    ring: Arc<RingBuffer<E>>,
    sequence: Arc<Sequence>,
    gating: DependentSequences,
}

impl<E> EventPoller<E> {
    pub(crate) fn new(ring: Arc<RingBuffer<E>>, gating: Vec<Arc<Sequence>>) -> Self {
        let gating = if gating.is_empty() {
            DependentSequences::Cursor(ring.cursor_sequence())
        } else {
            DependentSequences::Group(FixedSequenceGroup::new(gating))
        };

        Self {
            ring,
            sequence: Arc::new(Sequence::default()),
            gating,
        }
    }

    /// The poller's own sequence. Add it to the ring buffer's gating set
    /// so producers cannot wrap over unpolled events.
    pub fn sequence(&self) -> Arc<Sequence> {
        self.sequence.clone()
    }

    /// Drain available events into `handler`.
    ///
    /// The handler returns whether to keep consuming within this poll;
    /// `false` stops after the current event. On a handler error the
    /// events delivered before the failure are committed, then the error
    /// propagates.
    pub fn poll<F>(&mut self, mut handler: F) -> Result<PollState>
    where
        F: FnMut(&mut E, i64, bool) -> Result<bool>,
    {
        let current = self.sequence.get();
        let mut next = current + 1;
        let available = self
            .ring
            .highest_published_sequence(next, self.gating.get());

        if next <= available {
            let mut processed = current;

            let outcome = loop {
                let event = unsafe { self.ring.get_mut(next) };
                match handler(event, next, next == available) {
                    Ok(keep_going) => {
                        processed = next;
                        next += 1;
                        if next > available || !keep_going {
                            break Ok(());
                        }
                    }
                    Err(error) => break Err(error),
                }
            };

            self.sequence.set(processed);
            outcome?;
            Ok(PollState::Processing)
        } else if self.ring.cursor() >= next {
            Ok(PollState::Gating)
        } else {
            Ok(PollState::Idle)
        }
    }
}
