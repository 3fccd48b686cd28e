//! Single-threaded cooperative scheduler core.
//!
//! The scheduler owns the active fiber slot, the run queue, and the
//! waiting set. At most one fiber of a scheduler executes at any instant;
//! control changes hands only at explicit suspension points. Every
//! operation that hands control to a fiber restores the previous active
//! fiber on all exit paths, including unwinds, and wakes the fiber's
//! joiners as soon as a resume observes completion.
//!
//! The state lock is held only between suspension points, never across a
//! handoff, so the strict control-token discipline keeps it uncontended.

use crate::fiber::FiberHandle;
use crate::runtime::run_queue::RunQueue;
use crate::runtime::schedulable::Schedulable;
use crate::runtime::waiting_set::WaitingSet;
use crate::tracing_compat::trace;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Instant;

#[derive(Debug, Default)]
struct SchedState {
    active: Option<FiberHandle>,
    run_queue: RunQueue,
    waiting: WaitingSet,
}

/// The per-thread scheduler state machine.
///
/// Obtain an instance through [`crate::runtime::current`]; one scheduler
/// exists per OS thread, and fibers are not portable between instances.
#[derive(Debug)]
pub struct Scheduler {
    state: Mutex<SchedState>,
    self_ref: Weak<Self>,
}

/// Restores the previously active fiber when a resume returns or unwinds,
/// then wakes joiners if the resumed fiber completed.
struct ResumeScope<'a> {
    scheduler: &'a Scheduler,
    fiber: &'a FiberHandle,
    prev: Option<FiberHandle>,
}

impl Drop for ResumeScope<'_> {
    fn drop(&mut self) {
        self.scheduler.state.lock().active = self.prev.take();
        if self.fiber.is_complete() {
            self.scheduler.wake_joiners(self.fiber);
        }
    }
}

impl Scheduler {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            state: Mutex::new(SchedState::default()),
            self_ref: weak.clone(),
        })
    }

    fn handle(&self) -> Arc<Self> {
        self.self_ref.upgrade().expect("scheduler was dropped")
    }

    /// Returns the currently executing fiber, or `None` when the scheduler
    /// is driven from the thread's main stack.
    #[must_use]
    pub fn active(&self) -> Option<FiberHandle> {
        self.state.lock().active.clone()
    }

    /// Number of runnable fibers currently queued.
    #[must_use]
    pub fn runnable_count(&self) -> usize {
        self.state.lock().run_queue.len()
    }

    /// Number of fibers suspended in the waiting set.
    #[must_use]
    pub fn waiting_count(&self) -> usize {
        self.state.lock().waiting.len()
    }

    /// Immediately resumes `fiber`, running it until its first suspension
    /// point or completion. The previous active fiber is restored when the
    /// callee hands control back.
    pub fn spawn(&self, fiber: &FiberHandle) {
        debug_assert!(!fiber.is_complete(), "spawn of a complete fiber");
        trace!(fiber = %fiber.id(), "spawn");
        self.resume_as_active(fiber);
    }

    /// Blocks until `fiber` completes.
    ///
    /// From within a fiber this registers the caller as a joiner and
    /// suspends it; from the main stack it pumps [`Self::run`]. Returns
    /// immediately if `fiber` is already complete.
    pub fn join(&self, fiber: &FiberHandle) {
        let active = self.active();
        debug_assert!(
            active.as_ref().map_or(true, |a| a.id() != fiber.id()),
            "a fiber cannot join itself"
        );
        if fiber.is_complete() {
            return;
        }
        trace!(fiber = %fiber.id(), "join");
        if let Some(waiter) = active {
            // The joiner list is drained by whichever resume observes
            // completion; wait() parks the caller until then.
            fiber.register_joiner(waiter);
            self.wait();
        } else {
            while !fiber.is_complete() {
                if !self.run() {
                    std::thread::yield_now();
                }
            }
        }
        debug_assert!(fiber.is_complete());
    }

    /// Synchronously cancels `fiber`, unwinding its stack. Does nothing if
    /// the fiber is already complete.
    pub fn cancel(&self, fiber: &FiberHandle) {
        if fiber.is_complete() {
            return;
        }
        trace!(fiber = %fiber.id(), "cancel");
        {
            let prev = {
                let mut state = self.state.lock();
                debug_assert!(
                    state.active.as_ref().map_or(true, |a| a.id() != fiber.id()),
                    "a fiber cannot cancel itself"
                );
                state.active.replace(Arc::clone(fiber))
            };
            let _scope = ResumeScope {
                scheduler: self,
                fiber,
                prev,
            };
            fiber.terminate();
        }
        // The fiber may have been parked in the waiting set when its stack
        // was unwound.
        self.state.lock().waiting.remove(fiber.id());
        debug_assert!(fiber.is_complete());
    }

    /// Moves a waiting fiber to the front of the run queue.
    ///
    /// Front insertion gives freshly ready fibers priority over yielders,
    /// so mutex handoff is prompt. A fiber that already left the waiting
    /// set (deadline sweep racing the releaser) is left where it is.
    pub fn notify(&self, fiber: &FiberHandle) {
        debug_assert!(!fiber.is_complete(), "notify of a complete fiber");
        debug_assert!(!fiber.is_resumed(), "notify of a resumed fiber");
        let mut state = self.state.lock();
        debug_assert!(
            state.active.as_ref().map_or(true, |a| a.id() != fiber.id()),
            "cannot notify the active fiber"
        );
        if state.waiting.remove(fiber.id()).is_some() {
            trace!(fiber = %fiber.id(), "notified");
            state.run_queue.push_front(Arc::clone(fiber));
        }
    }

    /// Executes at most one fiber; returns true if one ran.
    ///
    /// Waiters whose deadline has passed are promoted to the front of the
    /// run queue first; completed fibers that linger in the queue (for
    /// example cancelled after a yield) are skipped.
    pub fn run(&self) -> bool {
        let next = {
            let mut state = self.state.lock();
            let now = Instant::now();
            for expired in state.waiting.take_expired(now) {
                trace!(fiber = %expired.fiber.id(), "deadline reached");
                state.run_queue.push_front(expired.fiber);
            }
            loop {
                let Some(fiber) = state.run_queue.pop_front() else {
                    return false;
                };
                if fiber.is_complete() {
                    continue;
                }
                debug_assert!(!state.waiting.contains(fiber.id()));
                break fiber;
            }
        };
        self.resume_as_active(&next);
        true
    }

    /// Suspends the active fiber until another agent notifies or cancels
    /// it. On return the wait condition has been satisfied.
    pub fn wait(&self) {
        let active = {
            let mut state = self.state.lock();
            let active = state
                .active
                .clone()
                .expect("wait requires an active fiber");
            state.waiting.insert(Schedulable::new(Arc::clone(&active)));
            active
        };
        active.suspend();
    }

    /// Suspends the active fiber until notified or until `deadline`
    /// passes; returns true if the wake-up came before the deadline.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let active = {
            let mut state = self.state.lock();
            let active = state
                .active
                .clone()
                .expect("wait_until requires an active fiber");
            state
                .waiting
                .insert(Schedulable::with_deadline(Arc::clone(&active), deadline));
            active
        };
        active.suspend();
        // Whoever woke us removed the record already; drop it defensively
        // in case a racing path left it behind.
        self.state.lock().waiting.remove(active.id());
        Instant::now() < deadline
    }

    /// Reschedules the active fiber behind every currently runnable fiber
    /// and suspends it. Fibers woken by notification still jump ahead.
    pub fn yield_now(&self) {
        let active = {
            let mut state = self.state.lock();
            let active = state
                .active
                .clone()
                .expect("yield requires an active fiber");
            state.run_queue.push_back(Arc::clone(&active));
            active
        };
        active.suspend();
    }

    /// Suspends the active fiber until `deadline`. Returns immediately if
    /// the deadline has already passed.
    pub fn sleep_until(&self, deadline: Instant) {
        if deadline <= Instant::now() {
            return;
        }
        let active = {
            let mut state = self.state.lock();
            let active = state
                .active
                .clone()
                .expect("sleep_until requires an active fiber");
            state
                .waiting
                .insert(Schedulable::with_deadline(Arc::clone(&active), deadline));
            active
        };
        active.suspend();
    }

    fn resume_as_active(&self, fiber: &FiberHandle) {
        let prev = {
            let mut state = self.state.lock();
            debug_assert!(
                state.active.as_ref().map_or(true, |a| a.id() != fiber.id()),
                "a fiber cannot resume itself"
            );
            state.active.replace(Arc::clone(fiber))
        };
        let _scope = ResumeScope {
            scheduler: self,
            fiber,
            prev,
        };
        fiber.resume(&self.handle());
    }

    fn wake_joiners(&self, fiber: &FiberHandle) {
        for joiner in fiber.take_joiners() {
            // A joiner cancelled while it waited is already complete.
            if !joiner.is_complete() {
                self.notify(&joiner);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiber::Fiber;
    use crate::runtime;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn spawn_runs_until_first_suspension() {
        init_test("spawn_runs_until_first_suspension");
        let sched = runtime::current();
        let counter = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&counter);
        let fiber = Fiber::new(move || {
            seen.fetch_add(1, Ordering::SeqCst);
            crate::ops::yield_now();
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .expect("create fiber");

        sched.spawn(&fiber);
        let after_spawn = counter.load(Ordering::SeqCst);
        crate::assert_with_log!(after_spawn == 1, "ran to the yield", 1u32, after_spawn);
        crate::assert_with_log!(!fiber.is_complete(), "suspended, not complete", false, fiber.is_complete());
        crate::assert_with_log!(sched.runnable_count() == 1, "yield back-queued it", 1, sched.runnable_count());

        let ran = sched.run();
        crate::assert_with_log!(ran, "run resumed the yielder", true, ran);
        crate::assert_with_log!(fiber.is_complete(), "complete after resume", true, fiber.is_complete());
        let total = counter.load(Ordering::SeqCst);
        crate::assert_with_log!(total == 2, "body finished", 2u32, total);
        crate::test_complete!("spawn_runs_until_first_suspension");
    }

    #[test]
    fn run_reports_idle_when_nothing_is_runnable() {
        init_test("run_reports_idle_when_nothing_is_runnable");
        let sched = runtime::current();
        let ran = sched.run();
        crate::assert_with_log!(!ran, "nothing to run", false, ran);
        crate::test_complete!("run_reports_idle_when_nothing_is_runnable");
    }

    #[test]
    fn sleeping_fiber_is_promoted_by_the_deadline_sweep() {
        init_test("sleeping_fiber_is_promoted_by_the_deadline_sweep");
        let sched = runtime::current();
        let fiber = Fiber::new(|| {
            crate::ops::sleep_for(Duration::from_millis(20));
        })
        .expect("create fiber");

        sched.spawn(&fiber);
        crate::assert_with_log!(sched.waiting_count() == 1, "parked with deadline", 1, sched.waiting_count());
        let ran = sched.run();
        crate::assert_with_log!(!ran, "deadline not reached yet", false, ran);

        std::thread::sleep(Duration::from_millis(30));
        let ran = sched.run();
        crate::assert_with_log!(ran, "sweep promoted the sleeper", true, ran);
        crate::assert_with_log!(fiber.is_complete(), "sleeper finished", true, fiber.is_complete());
        crate::test_complete!("sleeping_fiber_is_promoted_by_the_deadline_sweep");
    }

    #[test]
    fn cancelled_fiber_in_run_queue_is_skipped() {
        init_test("cancelled_fiber_in_run_queue_is_skipped");
        let sched = runtime::current();
        let fiber = Fiber::new(|| loop {
            crate::ops::yield_now();
        })
        .expect("create fiber");

        sched.spawn(&fiber);
        crate::assert_with_log!(sched.runnable_count() == 1, "yielder queued", 1, sched.runnable_count());
        sched.cancel(&fiber);
        crate::assert_with_log!(fiber.is_complete(), "cancel completed it", true, fiber.is_complete());

        // The stale queue entry is skipped, leaving nothing runnable.
        let ran = sched.run();
        crate::assert_with_log!(!ran, "stale entry skipped", false, ran);
        crate::test_complete!("cancelled_fiber_in_run_queue_is_skipped");
    }

    #[test]
    fn join_from_main_pumps_until_completion() {
        init_test("join_from_main_pumps_until_completion");
        let sched = runtime::current();
        let counter = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&counter);
        let fiber = Fiber::new(move || {
            for _ in 0..3 {
                seen.fetch_add(1, Ordering::SeqCst);
                crate::ops::yield_now();
            }
        })
        .expect("create fiber");

        sched.spawn(&fiber);
        sched.join(&fiber);
        crate::assert_with_log!(fiber.is_complete(), "joined", true, fiber.is_complete());
        let total = counter.load(Ordering::SeqCst);
        crate::assert_with_log!(total == 3, "all iterations ran", 3u32, total);
        crate::test_complete!("join_from_main_pumps_until_completion");
    }

    #[test]
    fn join_from_a_fiber_suspends_until_the_target_completes() {
        init_test("join_from_a_fiber_suspends_until_the_target_completes");
        let sched = runtime::current();
        let order = Arc::new(parking_lot::Mutex::new(Vec::<&'static str>::new()));

        let log = Arc::clone(&order);
        let target = Fiber::new(move || {
            log.lock().push("target-start");
            crate::ops::yield_now();
            log.lock().push("target-end");
        })
        .expect("create fiber");

        let log = Arc::clone(&order);
        let handle = target.clone();
        let joiner = Fiber::new(move || {
            crate::ops::join(&handle);
            log.lock().push("joiner-after-join");
        })
        .expect("create fiber");

        sched.spawn(&target);
        sched.spawn(&joiner);
        sched.join(&joiner);

        let got = order.lock().clone();
        crate::assert_with_log!(
            got == vec!["target-start", "target-end", "joiner-after-join"],
            "joiner resumed only after target completed",
            vec!["target-start", "target-end", "joiner-after-join"],
            got
        );
        crate::test_complete!("join_from_a_fiber_suspends_until_the_target_completes");
    }

    #[test]
    fn notified_fiber_outranks_a_yielder() {
        init_test("notified_fiber_outranks_a_yielder");
        let sched = runtime::current();
        let order = Arc::new(parking_lot::Mutex::new(Vec::<&'static str>::new()));

        let log = Arc::clone(&order);
        let waiter = Fiber::new(move || {
            crate::runtime::current().wait();
            log.lock().push("waiter");
        })
        .expect("create fiber");

        let log = Arc::clone(&order);
        let yielder = Fiber::new(move || {
            crate::ops::yield_now();
            log.lock().push("yielder");
        })
        .expect("create fiber");

        sched.spawn(&waiter);
        sched.spawn(&yielder);
        // yielder is runnable already; waking the waiter jumps the queue.
        sched.notify(&waiter);

        sched.run();
        let first = order.lock().first().copied();
        crate::assert_with_log!(
            first == Some("waiter"),
            "notified fiber ran first",
            Some("waiter"),
            first
        );
        while sched.run() {}
        crate::test_complete!("notified_fiber_outranks_a_yielder");
    }
}
