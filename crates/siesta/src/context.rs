//! The owning context shared by a service and all of its resources.
//!
//! Resource state commits, observer notifications and request callbacks all run
//! while holding this context, so they never interleave with one another. The
//! lock is reentrant: a callback may start new requests or read resources
//! without deadlocking. Network work and response transformation happen in
//! spawned tasks outside the context and only enter it to deliver results.

use std::future::Future;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use tokio::runtime::Handle;

#[derive(Debug, Default)]
pub(crate) struct OwningContext {
    lock: ReentrantMutex<()>,
    runtime: Option<Handle>,
}

impl OwningContext {
    pub(crate) fn new(runtime: Option<Handle>) -> Self {
        Self {
            lock: ReentrantMutex::new(()),
            runtime,
        }
    }

    pub(crate) fn enter(&self) -> ReentrantMutexGuard<'_, ()> {
        self.lock.lock()
    }

    /// Spawns background work on the configured runtime, or the ambient one.
    /// Returns `false` when no runtime is available.
    pub(crate) fn spawn<F>(&self, future: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = self
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok());
        match handle {
            Some(handle) => {
                handle.spawn(future);
                true
            }
            None => false,
        }
    }
}
