//! Free operations on the current thread's scheduler.
//!
//! These cover the common case where the caller does not hold a scheduler
//! handle: the thread-local instance is looked up on every call. From
//! within a fiber they act on the scheduler that owns the fiber.

use crate::error::SpawnError;
use crate::fiber::{Fiber, FiberHandle};
use crate::runtime;
use crate::types::FiberId;
use std::time::{Duration, Instant};

/// Creates a fiber running `body` and spawns it on the current thread's
/// scheduler; the body runs immediately until its first suspension point.
pub fn spawn<F>(body: F) -> Result<FiberHandle, SpawnError>
where
    F: FnOnce() + Send + 'static,
{
    let fiber = Fiber::new(body)?;
    runtime::current().spawn(&fiber);
    Ok(fiber)
}

/// Blocks until `fiber` completes.
pub fn join(fiber: &FiberHandle) {
    runtime::current().join(fiber);
}

/// Synchronously cancels `fiber`, unwinding its stack.
pub fn cancel(fiber: &FiberHandle) {
    runtime::current().cancel(fiber);
}

/// Returns the identity of the executing fiber, or `None` when called from
/// a thread's main stack.
#[must_use]
pub fn current_id() -> Option<FiberId> {
    runtime::current().active().map(|fiber| fiber.id())
}

/// Reschedules the calling fiber behind every currently runnable fiber.
///
/// Must be called from within a fiber.
pub fn yield_now() {
    runtime::current().yield_now();
}

/// Suspends the calling fiber until `deadline`. Returns immediately if the
/// deadline has already passed.
///
/// Must be called from within a fiber.
pub fn sleep_until(deadline: Instant) {
    runtime::current().sleep_until(deadline);
}

/// Suspends the calling fiber for at least `duration`.
///
/// Must be called from within a fiber.
pub fn sleep_for(duration: Duration) {
    sleep_until(Instant::now() + duration);
}
