//! Fiber handles and their execution substrate.
//!
//! A fiber is a stackful unit of cooperative execution. Each fiber owns a
//! dedicated execution stack (backed by an OS thread) and takes part in a
//! two-party handoff protocol: `resume` transfers control to the fiber's
//! stack and blocks until the fiber hands it back; `suspend`, callable only
//! on the fiber's own stack, hands control back to whoever resumed it. The
//! handoff guarantees that at most one stack of a scheduler family executes
//! at any instant, so scheduling stays strictly cooperative.
//!
//! Termination resumes the fiber with an unwind signal: the suspension
//! point raises a private panic sentinel, the fiber's stack unwinds through
//! its drop guards, and the trampoline absorbs the sentinel and reports
//! normal completion. A panic from the fiber body itself is carried across
//! the handoff and re-raised on the resumer's stack.

mod builder;

pub use builder::FiberBuilder;

use crate::error::SpawnError;
use crate::runtime::Scheduler;
use crate::tracing_compat::trace;
use crate::types::FiberId;
use core::fmt;
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Shared handle to a fiber.
///
/// Ownership is shared between whoever holds the handle outside the
/// scheduler and any scheduler queue currently referencing the fiber;
/// release is automatic when no reference remains.
pub type FiberHandle = Arc<Fiber>;

/// Panic payload used to unwind a fiber's stack on termination.
struct UnwindFiber;

/// Signal delivered to a parked fiber when control is handed to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResumeSignal {
    /// Continue executing the fiber body.
    Continue,
    /// Unwind the fiber's stack through the cancellation sentinel.
    Unwind,
}

/// Signal handed back to the resumer when the fiber releases control.
enum SuspendSignal {
    /// The fiber reached a suspension point.
    Suspended,
    /// The fiber body finished, or its stack unwound on termination.
    Finished,
    /// The fiber body panicked; the payload re-raises on the resumer.
    Panicked(Box<dyn Any + Send + 'static>),
}

/// Control-token exchange between a fiber's stack and its resumer.
struct HandoffState {
    to_fiber: Option<ResumeSignal>,
    to_resumer: Option<SuspendSignal>,
    /// Owning scheduler, delivered with the first resume so the fiber's
    /// stack observes the scheduler that spawned it.
    scheduler: Option<Arc<Scheduler>>,
}

struct Handoff {
    state: Mutex<HandoffState>,
    condvar: Condvar,
}

impl Handoff {
    fn new() -> Self {
        Self {
            state: Mutex::new(HandoffState {
                to_fiber: None,
                to_resumer: None,
                scheduler: None,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Resumer side: hand control to the fiber and block until it is
    /// handed back.
    fn resume_turn(
        &self,
        signal: ResumeSignal,
        scheduler: Option<Arc<Scheduler>>,
    ) -> SuspendSignal {
        let mut state = self.state.lock();
        debug_assert!(state.to_fiber.is_none(), "fiber resumed twice");
        if scheduler.is_some() {
            state.scheduler = scheduler;
        }
        state.to_fiber = Some(signal);
        self.condvar.notify_all();
        while state.to_resumer.is_none() {
            self.condvar.wait(&mut state);
        }
        state.to_resumer.take().expect("suspend signal present")
    }

    /// Fiber side: block until the first resume arrives.
    fn recv_first(&self) -> (ResumeSignal, Option<Arc<Scheduler>>) {
        let mut state = self.state.lock();
        while state.to_fiber.is_none() {
            self.condvar.wait(&mut state);
        }
        let signal = state.to_fiber.take().expect("resume signal present");
        let scheduler = state.scheduler.take();
        (signal, scheduler)
    }

    /// Fiber side: hand control back and block until resumed again.
    fn suspend_turn(&self) -> ResumeSignal {
        let mut state = self.state.lock();
        state.to_resumer = Some(SuspendSignal::Suspended);
        self.condvar.notify_all();
        while state.to_fiber.is_none() {
            self.condvar.wait(&mut state);
        }
        state.to_fiber.take().expect("resume signal present")
    }

    /// Fiber side: final handback; the fiber's stack is done.
    fn finish(&self, outcome: SuspendSignal) {
        let mut state = self.state.lock();
        state.to_resumer = Some(outcome);
        self.condvar.notify_all();
    }
}

/// A stackful, cooperatively scheduled fiber.
///
/// Fibers are created with [`Fiber::new`] or [`FiberBuilder`] and enter a
/// scheduler through [`Scheduler::spawn`]. The handle exposes identity and
/// lifecycle observation; resumption and suspension are driven by the
/// scheduler.
pub struct Fiber {
    id: FiberId,
    name: Option<String>,
    started: AtomicBool,
    resumed: AtomicBool,
    complete: AtomicBool,
    handoff: Arc<Handoff>,
    joiners: Mutex<SmallVec<[FiberHandle; 2]>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Fiber {
    /// Creates a fiber with default attributes.
    ///
    /// The body does not run until the fiber is spawned on a scheduler.
    pub fn new<F>(body: F) -> Result<FiberHandle, SpawnError>
    where
        F: FnOnce() + Send + 'static,
    {
        FiberBuilder::new().build(body)
    }

    pub(crate) fn create(
        builder: &FiberBuilder,
        body: Box<dyn FnOnce() + Send + 'static>,
    ) -> Result<FiberHandle, SpawnError> {
        let id = FiberId::next();
        let handoff = Arc::new(Handoff::new());
        let thread_handoff = Arc::clone(&handoff);
        let mut tb = thread::Builder::new().name(
            builder
                .name
                .clone()
                .unwrap_or_else(|| format!("fiber-{id}")),
        );
        if let Some(bytes) = builder.stack_size {
            tb = tb.stack_size(bytes);
        }
        let join = tb.spawn(move || trampoline(&thread_handoff, body))?;
        trace!(fiber = %id, "fiber created");
        Ok(Arc::new(Self {
            id,
            name: builder.name.clone(),
            started: AtomicBool::new(false),
            resumed: AtomicBool::new(false),
            complete: AtomicBool::new(false),
            handoff,
            joiners: Mutex::new(SmallVec::new()),
            thread: Mutex::new(Some(join)),
        }))
    }

    /// Returns the fiber's identity.
    #[must_use]
    pub fn id(&self) -> FiberId {
        self.id
    }

    /// Returns the fiber's name, if one was set at construction.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns true once the fiber's body has returned or its stack has
    /// been unwound. Terminal: a complete fiber is never resumed again.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// Returns true while control is on the fiber's stack (executing or
    /// mid-handoff).
    #[must_use]
    pub fn is_resumed(&self) -> bool {
        self.resumed.load(Ordering::Acquire)
    }

    /// Transfers control to the fiber's stack; returns when the fiber
    /// suspends or completes.
    pub(crate) fn resume(&self, owner: &Arc<Scheduler>) {
        self.resume_with(ResumeSignal::Continue, Some(owner));
    }

    /// Unwinds the fiber's stack; the fiber is complete on return.
    ///
    /// A never-resumed fiber completes without running its body.
    pub(crate) fn terminate(&self) {
        if self.is_complete() {
            return;
        }
        trace!(fiber = %self.id, "terminating fiber");
        self.resume_with(ResumeSignal::Unwind, None);
        debug_assert!(self.is_complete());
    }

    fn resume_with(&self, signal: ResumeSignal, owner: Option<&Arc<Scheduler>>) {
        debug_assert!(!self.is_complete(), "fiber {} resumed after completion", self.id);
        debug_assert!(!self.is_resumed(), "fiber {} is already resumed", self.id);
        let first = !self.started.swap(true, Ordering::AcqRel);
        let scheduler = if first { owner.map(Arc::clone) } else { None };
        self.resumed.store(true, Ordering::Release);
        let outcome = self.handoff.resume_turn(signal, scheduler);
        self.resumed.store(false, Ordering::Release);
        match outcome {
            SuspendSignal::Suspended => {}
            SuspendSignal::Finished => {
                self.complete.store(true, Ordering::Release);
                self.reap();
            }
            SuspendSignal::Panicked(payload) => {
                self.complete.store(true, Ordering::Release);
                self.reap();
                panic::resume_unwind(payload);
            }
        }
    }

    /// Hands control back to the resumer. Callable only on the fiber's own
    /// stack; raises the unwind sentinel if the next resume terminates the
    /// fiber.
    pub(crate) fn suspend(&self) {
        debug_assert!(self.is_resumed(), "suspend outside the fiber's stack");
        if self.handoff.suspend_turn() == ResumeSignal::Unwind {
            panic::panic_any(UnwindFiber);
        }
    }

    /// Registers `waiter` to be woken when this fiber completes.
    pub(crate) fn register_joiner(&self, waiter: FiberHandle) {
        debug_assert!(!self.is_complete(), "joining a complete fiber");
        self.joiners.lock().push(waiter);
    }

    /// Drains the fibers registered via [`Self::register_joiner`].
    pub(crate) fn take_joiners(&self) -> SmallVec<[FiberHandle; 2]> {
        std::mem::take(&mut *self.joiners.lock())
    }

    /// Joins the backing thread once the fiber is complete.
    fn reap(&self) {
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("complete", &self.is_complete())
            .field("resumed", &self.is_resumed())
            .finish_non_exhaustive()
    }
}

impl Drop for Fiber {
    fn drop(&mut self) {
        if self.complete.load(Ordering::Acquire) {
            return;
        }
        // Last handle dropped while the fiber is parked between resumes.
        // Unwind its stack so drop guards run and the backing thread exits.
        let outcome = self.handoff.resume_turn(ResumeSignal::Unwind, None);
        debug_assert!(!matches!(outcome, SuspendSignal::Suspended));
        self.complete.store(true, Ordering::Release);
        if let Some(handle) = self.thread.get_mut().take() {
            let _ = handle.join();
        }
    }
}

/// Entry point of the backing thread: waits for the first resume, runs the
/// body with the owning scheduler installed, and reports the outcome.
fn trampoline(handoff: &Handoff, body: Box<dyn FnOnce() + Send + 'static>) {
    let (signal, scheduler) = handoff.recv_first();
    let outcome = match signal {
        ResumeSignal::Unwind => SuspendSignal::Finished,
        ResumeSignal::Continue => {
            let _ctx = scheduler.map(crate::runtime::enter);
            match panic::catch_unwind(AssertUnwindSafe(body)) {
                Ok(()) => SuspendSignal::Finished,
                Err(payload) if payload.is::<UnwindFiber>() => SuspendSignal::Finished,
                Err(payload) => SuspendSignal::Panicked(payload),
            }
        }
    };
    handoff.finish(outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::AtomicU32;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn unspawned_fiber_drops_cleanly() {
        init_test("unspawned_fiber_drops_cleanly");
        let fiber = Fiber::new(|| {}).expect("create fiber");
        let complete = fiber.is_complete();
        crate::assert_with_log!(!complete, "not complete before spawn", false, complete);
        drop(fiber);
        crate::test_complete!("unspawned_fiber_drops_cleanly");
    }

    #[test]
    fn terminate_before_first_resume_skips_body() {
        init_test("terminate_before_first_resume_skips_body");
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let fiber = Fiber::new(move || flag.store(true, Ordering::SeqCst)).expect("create fiber");
        fiber.terminate();
        let complete = fiber.is_complete();
        crate::assert_with_log!(complete, "complete after terminate", true, complete);
        let body_ran = ran.load(Ordering::SeqCst);
        crate::assert_with_log!(!body_ran, "body never ran", false, body_ran);
        crate::test_complete!("terminate_before_first_resume_skips_body");
    }

    #[test]
    fn spawned_fiber_runs_to_completion() {
        init_test("spawned_fiber_runs_to_completion");
        let counter = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&counter);
        let fiber = Fiber::new(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .expect("create fiber");
        runtime::current().spawn(&fiber);
        let complete = fiber.is_complete();
        crate::assert_with_log!(complete, "complete after spawn", true, complete);
        let count = counter.load(Ordering::SeqCst);
        crate::assert_with_log!(count == 1, "body ran once", 1u32, count);
        crate::test_complete!("spawned_fiber_runs_to_completion");
    }

    #[test]
    fn builder_sets_name_and_stack_size() {
        init_test("builder_sets_name_and_stack_size");
        let fiber = FiberBuilder::new()
            .name("worker")
            .stack_size(256 * 1024)
            .build(|| {})
            .expect("create fiber");
        let name = fiber.name().map(str::to_owned);
        crate::assert_with_log!(
            name.as_deref() == Some("worker"),
            "name recorded",
            Some("worker"),
            name.as_deref()
        );
        fiber.terminate();
        crate::test_complete!("builder_sets_name_and_stack_size");
    }

    #[test]
    fn panic_in_body_reaches_the_resumer() {
        init_test("panic_in_body_reaches_the_resumer");
        let fiber = Fiber::new(|| panic!("fiber body failure")).expect("create fiber");
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            runtime::current().spawn(&fiber);
        }));
        crate::assert_with_log!(result.is_err(), "panic propagated", true, result.is_err());
        let complete = fiber.is_complete();
        crate::assert_with_log!(complete, "fiber complete after panic", true, complete);
        crate::test_complete!("panic_in_body_reaches_the_resumer");
    }
}
