//! Thread factory used by the coordinator to spawn processor threads.

use std::thread::{Builder, JoinHandle};

use crate::error::Result;

/// Spawns the dedicated thread backing each event processor.
///
/// Implement this to control stack sizes, affinity or naming; the default
/// factory spawns plain named OS threads.
pub trait ThreadFactory: Send {
    fn spawn(&mut self, name: &str, body: Box<dyn FnOnce() + Send + 'static>)
        -> Result<JoinHandle<()>>;
}

/// Default factory: `std::thread::Builder` with the given name.
pub struct DefaultThreadFactory;

impl ThreadFactory for DefaultThreadFactory {
    fn spawn(
        &mut self,
        name: &str,
        body: Box<dyn FnOnce() + Send + 'static>,
    ) -> Result<JoinHandle<()>> {
        Ok(Builder::new().name(name.to_string()).spawn(body)?)
    }
}
