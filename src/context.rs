//! Process-wide context: at most one started resolver behind a guarded cell

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{DiError, DiResult};
use crate::resolver::Resolver;

static CONTEXT: Mutex<Option<Resolver>> = Mutex::new(None);

/// Register `resolver` as the process-wide resolver.
pub fn start(resolver: Resolver) -> DiResult<()> {
    let mut cell = CONTEXT.lock();
    if cell.is_some() {
        return Err(DiError::AlreadyStarted);
    }
    *cell = Some(resolver);
    debug!("Global context started");
    Ok(())
}

/// Create a resolver, register it and run `setup` on it, typically to
/// load modules and properties. When setup fails the context is stopped
/// again and the error surfaces.
pub fn start_with<F>(setup: F) -> DiResult<Resolver>
where
    F: FnOnce(&Resolver) -> DiResult<()>,
{
    let resolver = Resolver::new();
    start(resolver.clone())?;
    if let Err(err) = setup(&resolver) {
        stop();
        return Err(err);
    }
    Ok(resolver)
}

/// The started resolver.
pub fn current() -> DiResult<Resolver> {
    try_current().ok_or(DiError::NotStarted)
}

/// The started resolver, if any.
pub fn try_current() -> Option<Resolver> {
    CONTEXT.lock().clone()
}

/// Unregister and close the started resolver. Stopping a stopped context
/// is a no-op.
pub fn stop() {
    let stopped = CONTEXT.lock().take();
    if let Some(resolver) = stopped {
        resolver.close();
        debug!("Global context stopped");
    }
}
