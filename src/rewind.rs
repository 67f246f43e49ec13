//! Rewind strategies - replay policy for rewindable batches
//!
//! When a rewindable handler raises [`GyreError::Rewind`], its processor
//! asks the configured [`RewindStrategy`] what to do: replay the whole
//! batch from its first sequence, or give up and treat the failure like
//! any other handler error.
//!
//! [`GyreError::Rewind`]: crate::GyreError::Rewind

use std::thread;
use std::time::Duration;

use crate::error::GyreError;

/// Decision returned by a rewind strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewindAction {
    /// Replay the batch from its first sequence
    Rewind,
    /// Stop retrying and surface the failure
    Throw,
}

/// Policy consulted on each rewind request, with the running attempt count
/// for the current batch.
pub trait RewindStrategy: Send {
    fn handle_rewind(&self, error: &GyreError, attempts: u64) -> RewindAction;
}

/// Always replay the batch.
pub struct SimpleRewindStrategy;

impl RewindStrategy for SimpleRewindStrategy {
    fn handle_rewind(&self, _error: &GyreError, _attempts: u64) -> RewindAction {
        RewindAction::Rewind
    }
}

/// Replay the batch after a fixed pause, giving a transient downstream
/// failure time to clear.
pub struct PauseRewindStrategy {
    pause: Duration,
}

impl PauseRewindStrategy {
    pub fn new(pause: Duration) -> Self {
        Self { pause }
    }
}

impl RewindStrategy for PauseRewindStrategy {
    fn handle_rewind(&self, _error: &GyreError, _attempts: u64) -> RewindAction {
        thread::sleep(self.pause);
        RewindAction::Rewind
    }
}

/// Replay up to `max_attempts` times, then surface the failure.
pub struct EventuallyGiveUpRewindStrategy {
    max_attempts: u64,
}

impl EventuallyGiveUpRewindStrategy {
    pub fn new(max_attempts: u64) -> Self {
        Self { max_attempts }
    }
}

impl RewindStrategy for EventuallyGiveUpRewindStrategy {
    fn handle_rewind(&self, _error: &GyreError, attempts: u64) -> RewindAction {
        if attempts > self.max_attempts {
            RewindAction::Throw
        } else {
            RewindAction::Rewind
        }
    }
}
