//! Event handler surface
//!
//! A consumer is a user type implementing [`EventHandler`]. Only
//! `on_event` is required; the remaining hooks default to no-ops:
//!
//! - `on_batch_start` runs before each delivered batch with its size and
//!   the depth of the backlog behind it
//! - `on_start` / `on_shutdown` run once per processor lifecycle
//! - `on_timeout` runs when a timeout wait strategy gives up a wait
//! - `set_sequence_callback` hands early-release handlers the processor
//!   sequence so they can publish progress mid-batch
//!
//! A handler that may raise [`GyreError::Rewind`] declares it by returning
//! `true` from `is_rewindable`; the processor checks the flag once at
//! construction.
//!
//! [`GyreError::Rewind`]: crate::GyreError::Rewind

use std::sync::Arc;

use crate::error::Result;
use crate::sequence::Sequence;

/// Callback driven by a batch event processor or poller.
pub trait EventHandler<E>: Send {
    /// Process one event. `end_of_batch` is true exactly on the last event
    /// before the processor republishes its sequence.
    fn on_event(&mut self, event: &mut E, sequence: i64, end_of_batch: bool) -> Result<()>;

    /// Called before each batch with the batch size and total backlog depth
    fn on_batch_start(&mut self, _batch_size: i64, _queue_depth: i64) -> Result<()> {
        Ok(())
    }

    /// Called once when the owning processor starts
    fn on_start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once when the owning processor shuts down
    fn on_shutdown(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called when a timeout wait strategy expires, with the handler's
    /// current sequence
    fn on_timeout(&mut self, _sequence: i64) -> Result<()> {
        Ok(())
    }

    /// Receives the processor sequence so the handler can release progress
    /// before its batch ends
    fn set_sequence_callback(&mut self, _sequence: Arc<Sequence>) {}

    /// Whether this handler may raise [`GyreError::Rewind`]
    ///
    /// [`GyreError::Rewind`]: crate::GyreError::Rewind
    fn is_rewindable(&self) -> bool {
        false
    }
}

impl<E, F> EventHandler<E> for F
where
    F: FnMut(&mut E, i64, bool) -> Result<()> + Send,
{
    fn on_event(&mut self, event: &mut E, sequence: i64, end_of_batch: bool) -> Result<()> {
        self(event, sequence, end_of_batch)
    }
}

/// Fans one event stream out to several handlers on a single consumer
/// thread, in registration order.
pub struct AggregateEventHandler<E> {
    handlers: Vec<Box<dyn EventHandler<E>>>,
}

impl<E> AggregateEventHandler<E> {
    pub fn new(handlers: Vec<Box<dyn EventHandler<E>>>) -> Self {
        Self { handlers }
    }
}

impl<E> EventHandler<E> for AggregateEventHandler<E> {
    fn on_event(&mut self, event: &mut E, sequence: i64, end_of_batch: bool) -> Result<()> {
        for handler in &mut self.handlers {
            handler.on_event(event, sequence, end_of_batch)?;
        }
        Ok(())
    }

    fn on_start(&mut self) -> Result<()> {
        for handler in &mut self.handlers {
            handler.on_start()?;
        }
        Ok(())
    }

    fn on_shutdown(&mut self) -> Result<()> {
        for handler in &mut self.handlers {
            handler.on_shutdown()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    struct Recorder {
        seen: Arc<AtomicI64>,
    }

    impl EventHandler<i64> for Recorder {
        fn on_event(&mut self, event: &mut i64, _sequence: i64, _end_of_batch: bool) -> Result<()> {
            self.seen.fetch_add(*event, Ordering::Relaxed);
            Ok(())
        }
    }

    #[test]
    fn test_closure_is_a_handler() {
        let mut total = 0i64;
        {
            let mut handler = |event: &mut i64, _sequence: i64, _end: bool| -> Result<()> {
                total += *event;
                Ok(())
            };
            let mut event = 21;
            handler.on_event(&mut event, 0, false).unwrap();
            handler.on_event(&mut event, 1, true).unwrap();
        }
        assert_eq!(total, 42);
    }

    #[test]
    fn test_aggregate_delivers_to_every_member() {
        let first = Arc::new(AtomicI64::new(0));
        let second = Arc::new(AtomicI64::new(0));
        let mut aggregate = AggregateEventHandler::new(vec![
            Box::new(Recorder { seen: first.clone() }) as Box<dyn EventHandler<i64>>,
            Box::new(Recorder {
                seen: second.clone(),
            }),
        ]);

        let mut event = 7;
        aggregate.on_event(&mut event, 0, true).unwrap();
        assert_eq!(first.load(Ordering::Relaxed), 7);
        assert_eq!(second.load(Ordering::Relaxed), 7);
    }

    #[test]
    fn test_default_hooks_are_no_ops() {
        let mut handler = |_: &mut i64, _: i64, _: bool| -> Result<()> { Ok(()) };
        assert!(EventHandler::<i64>::on_batch_start(&mut handler, 4, 9).is_ok());
        assert!(EventHandler::<i64>::on_start(&mut handler).is_ok());
        assert!(EventHandler::<i64>::on_shutdown(&mut handler).is_ok());
        assert!(EventHandler::<i64>::on_timeout(&mut handler, 3).is_ok());
        assert!(!EventHandler::<i64>::is_rewindable(&handler));
    }
}
