//! Exception handlers - pluggable failure policy for processors
//!
//! Errors raised by event handlers are routed through an
//! [`ExceptionHandler`] instead of unwinding the processor thread. The
//! handler decides whether the failure is fatal: returning the error marks
//! it fatal and halts only the owning processor, never the host process.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::{error, warn};

use crate::error::{GyreError, Result};

/// Failure policy consulted by a processor when a handler errs.
pub trait ExceptionHandler<E>: Send + Sync {
    /// Handle an error from `on_event` or `on_batch_start`.
    ///
    /// Returning `Ok` lets the processor advance past the failing event;
    /// returning an error halts the processor.
    fn handle_event_exception(
        &self,
        error: GyreError,
        sequence: i64,
        event: Option<&E>,
    ) -> Result<()>;

    /// Handle an error from `on_start`
    fn handle_on_start_exception(&self, error: &GyreError);

    /// Handle an error from `on_shutdown`
    fn handle_on_shutdown_exception(&self, error: &GyreError);
}

/// Default policy: log and re-raise, halting the owning processor.
pub struct FatalExceptionHandler;

impl<E> ExceptionHandler<E> for FatalExceptionHandler {
    fn handle_event_exception(
        &self,
        error: GyreError,
        sequence: i64,
        _event: Option<&E>,
    ) -> Result<()> {
        error!(sequence, %error, "exception processing event");
        Err(error)
    }

    fn handle_on_start_exception(&self, error: &GyreError) {
        error!(%error, "exception during on_start");
    }

    fn handle_on_shutdown_exception(&self, error: &GyreError) {
        error!(%error, "exception during on_shutdown");
    }
}

/// Policy that logs failures and keeps the processor running.
pub struct IgnoreExceptionHandler;

impl<E> ExceptionHandler<E> for IgnoreExceptionHandler {
    fn handle_event_exception(
        &self,
        error: GyreError,
        sequence: i64,
        _event: Option<&E>,
    ) -> Result<()> {
        warn!(sequence, %error, "exception processing event, continuing");
        Ok(())
    }

    fn handle_on_start_exception(&self, error: &GyreError) {
        warn!(%error, "exception during on_start, continuing");
    }

    fn handle_on_shutdown_exception(&self, error: &GyreError) {
        warn!(%error, "exception during on_shutdown, continuing");
    }
}

static DEFAULT_HANDLER: Lazy<Arc<FatalExceptionHandler>> =
    Lazy::new(|| Arc::new(FatalExceptionHandler));

/// The shared default exception handler
pub fn default_handler<E>() -> Arc<dyn ExceptionHandler<E>> {
    DEFAULT_HANDLER.clone() as Arc<dyn ExceptionHandler<E>>
}

/// Exception handler whose delegate can be swapped after the owning
/// processor was built. Falls back to [`FatalExceptionHandler`] until a
/// delegate is installed.
pub struct ExceptionHandlerWrapper<E> {
    delegate: RwLock<Option<Arc<dyn ExceptionHandler<E>>>>,
}

impl<E> ExceptionHandlerWrapper<E> {
    pub fn new() -> Self {
        Self {
            delegate: RwLock::new(None),
        }
    }

    /// Replace the delegate
    pub fn switch_to(&self, handler: Arc<dyn ExceptionHandler<E>>) {
        *self.delegate.write() = Some(handler);
    }

    fn current(&self) -> Arc<dyn ExceptionHandler<E>> {
        self.delegate
            .read()
            .clone()
            .unwrap_or_else(default_handler::<E>)
    }
}

impl<E> Default for ExceptionHandlerWrapper<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> ExceptionHandler<E> for ExceptionHandlerWrapper<E> {
    fn handle_event_exception(
        &self,
        error: GyreError,
        sequence: i64,
        event: Option<&E>,
    ) -> Result<()> {
        self.current().handle_event_exception(error, sequence, event)
    }

    fn handle_on_start_exception(&self, error: &GyreError) {
        self.current().handle_on_start_exception(error);
    }

    fn handle_on_shutdown_exception(&self, error: &GyreError) {
        self.current().handle_on_shutdown_exception(error);
    }
}
