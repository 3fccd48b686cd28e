//! Per-thread scheduler access.
//!
//! A thread-local slot lazily constructs one scheduler per OS thread on
//! first access; different threads hold independent schedulers, and fibers
//! are not portable between them. Fiber trampolines install their owning
//! scheduler into the fiber's slot before the body runs, so fiber code
//! always observes the scheduler that spawned it, never a fresh one.

use crate::runtime::Scheduler;
use std::cell::RefCell;
use std::sync::Arc;

thread_local! {
    static CURRENT: RefCell<Option<Arc<Scheduler>>> = const { RefCell::new(None) };
}

/// Returns this thread's scheduler, creating it on first access.
#[must_use]
pub fn current() -> Arc<Scheduler> {
    CURRENT.with(|slot| {
        Arc::clone(
            slot.borrow_mut()
                .get_or_insert_with(Scheduler::new),
        )
    })
}

/// Installs `scheduler` as this thread's instance until the guard drops.
///
/// Used by fiber trampolines; a fiber's stack must see the scheduler that
/// owns it.
pub(crate) fn enter(scheduler: Arc<Scheduler>) -> EnterGuard {
    CURRENT.with(|slot| {
        let previous = slot.borrow_mut().replace(scheduler);
        debug_assert!(
            previous.is_none(),
            "a scheduler is already installed on this thread"
        );
    });
    EnterGuard { _private: () }
}

/// Clears the thread's scheduler slot on drop.
pub(crate) struct EnterGuard {
    _private: (),
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        CURRENT.with(|slot| slot.borrow_mut().take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn repeated_access_returns_the_same_instance() {
        init_test("repeated_access_returns_the_same_instance");
        let first = current();
        let second = current();
        let same = Arc::ptr_eq(&first, &second);
        crate::assert_with_log!(same, "one scheduler per thread", true, same);
        crate::test_complete!("repeated_access_returns_the_same_instance");
    }

    #[test]
    fn threads_hold_independent_schedulers() {
        init_test("threads_hold_independent_schedulers");
        let here = current();
        let there = std::thread::spawn(current).join().expect("thread finished");
        let distinct = !Arc::ptr_eq(&here, &there);
        crate::assert_with_log!(distinct, "independent instances", true, distinct);
        crate::test_complete!("threads_hold_independent_schedulers");
    }

    #[test]
    fn fibers_observe_their_owning_scheduler() {
        init_test("fibers_observe_their_owning_scheduler");
        let sched = current();
        let observed = Arc::new(parking_lot::Mutex::new(None));
        let slot = Arc::clone(&observed);
        let fiber = crate::fiber::Fiber::new(move || {
            *slot.lock() = Some(current());
        })
        .expect("create fiber");
        sched.spawn(&fiber);
        let inner = observed.lock().take().expect("fiber stored a scheduler");
        let same = Arc::ptr_eq(&sched, &inner);
        crate::assert_with_log!(same, "fiber sees its owner", true, same);
        crate::test_complete!("fibers_observe_their_owning_scheduler");
    }
}
