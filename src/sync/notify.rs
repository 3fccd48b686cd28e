//! Waiter notification capabilities.
//!
//! A notifier decouples whoever releases a resource from knowing what kind
//! of waiter is blocked on it: a suspended fiber, or a thread's main stack
//! pumping the scheduler. The releaser holds a [`NotifyHandle`] and calls
//! `set_ready` exactly once per wake-up; both notifier kinds tolerate
//! repeated calls.

use crate::fiber::FiberHandle;
use crate::runtime::Scheduler;
use crate::tracing_compat::trace;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A capability used to wake one waiter.
pub trait Notify: Send + Sync {
    /// Marks the waiter ready, waking it if it is a suspended fiber.
    /// Idempotent: only the first call has an effect.
    fn set_ready(&self);

    /// Returns true once [`Self::set_ready`] has been called.
    fn is_ready(&self) -> bool;
}

/// Shared handle to a notifier.
pub type NotifyHandle = Arc<dyn Notify>;

/// Notifier for a suspended fiber.
///
/// Readiness moves the fiber from the waiting set to the front of the run
/// queue. A fiber that completed since registration (cancelled while it
/// waited) is left alone.
pub struct FiberNotify {
    scheduler: Arc<Scheduler>,
    fiber: FiberHandle,
    ready: AtomicBool,
}

impl FiberNotify {
    /// Creates a notifier that wakes `fiber` on `scheduler`.
    #[must_use]
    pub fn new(scheduler: Arc<Scheduler>, fiber: FiberHandle) -> Self {
        Self {
            scheduler,
            fiber,
            ready: AtomicBool::new(false),
        }
    }
}

impl Notify for FiberNotify {
    fn set_ready(&self) {
        if self.ready.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.fiber.is_complete() {
            trace!(fiber = %self.fiber.id(), "waiter completed before wake-up");
            return;
        }
        self.scheduler.notify(&self.fiber);
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

/// Notifier for a thread's main stack.
///
/// Readiness is a flag the main bridge polls while pumping
/// [`Scheduler::run`]; no scheduler bookkeeping is involved.
#[derive(Debug, Default)]
pub struct MainNotify {
    ready: AtomicBool,
}

impl MainNotify {
    /// Creates an unset notifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Notify for MainNotify {
    fn set_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiber::Fiber;
    use crate::runtime;
    use crate::test_utils::init_test_logging;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn main_notify_is_a_latch() {
        init_test("main_notify_is_a_latch");
        let notify = MainNotify::new();
        crate::assert_with_log!(!notify.is_ready(), "starts unset", false, notify.is_ready());
        notify.set_ready();
        notify.set_ready();
        crate::assert_with_log!(notify.is_ready(), "latched", true, notify.is_ready());
        crate::test_complete!("main_notify_is_a_latch");
    }

    #[test]
    fn fiber_notify_moves_the_waiter_to_the_run_queue() {
        init_test("fiber_notify_moves_the_waiter_to_the_run_queue");
        let sched = runtime::current();
        let fiber = Fiber::new(|| {
            runtime::current().wait();
        })
        .expect("create fiber");

        sched.spawn(&fiber);
        crate::assert_with_log!(sched.waiting_count() == 1, "parked", 1, sched.waiting_count());

        let notify = FiberNotify::new(Arc::clone(&sched), fiber.clone());
        notify.set_ready();
        crate::assert_with_log!(sched.waiting_count() == 0, "left the waiting set", 0, sched.waiting_count());
        crate::assert_with_log!(sched.runnable_count() == 1, "runnable", 1, sched.runnable_count());

        // Idempotent: a second call must not enqueue the fiber again.
        notify.set_ready();
        crate::assert_with_log!(sched.runnable_count() == 1, "no duplicate", 1, sched.runnable_count());

        let ran = sched.run();
        crate::assert_with_log!(ran, "waiter resumed", true, ran);
        crate::assert_with_log!(fiber.is_complete(), "waiter finished", true, fiber.is_complete());
        crate::test_complete!("fiber_notify_moves_the_waiter_to_the_run_queue");
    }

    #[test]
    fn fiber_notify_skips_a_cancelled_waiter() {
        init_test("fiber_notify_skips_a_cancelled_waiter");
        let sched = runtime::current();
        let fiber = Fiber::new(|| {
            runtime::current().wait();
        })
        .expect("create fiber");

        sched.spawn(&fiber);
        let notify = FiberNotify::new(Arc::clone(&sched), fiber.clone());
        sched.cancel(&fiber);
        notify.set_ready();
        crate::assert_with_log!(sched.runnable_count() == 0, "nothing enqueued", 0, sched.runnable_count());
        crate::test_complete!("fiber_notify_skips_a_cancelled_waiter");
    }
}
