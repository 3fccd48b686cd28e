//! Re-entrant mutex with fiber-aware blocking and timed acquisition.
//!
//! Contended acquirers do not block their OS thread: a fiber parks itself
//! in the scheduler's waiting set, and a caller on the main stack pumps the
//! scheduler until its notifier flips. Lock and unlock are explicit; a
//! holder must issue exactly as many unlocks as successful acquisitions.
//!
//! Waiters are woken FIFO per release, but a woken waiter races the fast
//! path of concurrently arriving lockers: the design guarantees eventual
//! forward progress for each waiter while the scheduler pumps, not
//! hand-off.

use crate::runtime::{self, Scheduler};
use crate::sync::notify::{FiberNotify, MainNotify, NotifyHandle};
use crate::tracing_compat::trace;
use crate::types::FiberId;
use core::fmt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const UNLOCKED: u8 = 0;
const LOCKED: u8 = 1;

/// Identity of a lock holder: a fiber, or a thread's main stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockOwner {
    Main,
    Fiber(FiberId),
}

fn current_owner(scheduler: &Scheduler) -> LockOwner {
    scheduler
        .active()
        .map_or(LockOwner::Main, |fiber| LockOwner::Fiber(fiber.id()))
}

/// Bookkeeping behind the internal lock: owner identity, recursion depth,
/// and the FIFO of blocked acquirers' notifiers.
#[derive(Default)]
struct MutexInner {
    owner: Option<LockOwner>,
    count: usize,
    waiters: VecDeque<NotifyHandle>,
}

/// Removes a registered notifier on every exit path. A normal wake-up has
/// already consumed the entry, making removal a no-op; on timeout or
/// cancellation unwind this is what keeps the waiter list consistent.
struct WaiterGuard<'a> {
    mutex: &'a RecursiveTimedMutex,
    notifier: NotifyHandle,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.mutex.remove_waiter(&self.notifier);
    }
}

fn same_notifier(a: &NotifyHandle, b: &NotifyHandle) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

/// A re-entrant mutex whose blocked acquirers suspend their fiber instead
/// of blocking the thread.
///
/// The same holder may lock the mutex repeatedly; it unlocks once the
/// release count matches the acquisition count. Timed acquisition is
/// available through [`Self::try_lock_until`] and [`Self::try_lock_for`].
///
/// # Example
///
/// ```
/// use cofiber::RecursiveTimedMutex;
///
/// let mutex = RecursiveTimedMutex::new();
/// mutex.lock();
/// mutex.lock(); // re-entrant
/// mutex.unlock();
/// assert!(mutex.is_locked());
/// mutex.unlock();
/// assert!(!mutex.is_locked());
/// ```
pub struct RecursiveTimedMutex {
    state: AtomicU8,
    inner: Mutex<MutexInner>,
}

impl RecursiveTimedMutex {
    /// Creates an unlocked mutex.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(UNLOCKED),
            inner: Mutex::new(MutexInner::default()),
        }
    }

    /// Returns true while some holder owns the mutex.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::SeqCst) == LOCKED
    }

    /// Number of acquirers currently blocked on the mutex.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    /// Acquires the mutex, suspending the caller while it is contended.
    pub fn lock(&self) {
        let scheduler = runtime::current();
        let me = current_owner(&scheduler);
        if self.try_reenter(me) {
            return;
        }
        while !self.try_acquire() {
            trace!(owner = ?me, "mutex contended");
            match scheduler.active() {
                Some(fiber) => {
                    let notifier: NotifyHandle =
                        Arc::new(FiberNotify::new(Arc::clone(&scheduler), fiber));
                    self.enqueue_waiter(Arc::clone(&notifier));
                    let _waiting = WaiterGuard {
                        mutex: self,
                        notifier,
                    };
                    // Suspend until a releaser marks us ready.
                    scheduler.wait();
                }
                None => {
                    let notifier: NotifyHandle = Arc::new(MainNotify::new());
                    self.enqueue_waiter(Arc::clone(&notifier));
                    let _waiting = WaiterGuard {
                        mutex: self,
                        notifier: Arc::clone(&notifier),
                    };
                    while !notifier.is_ready() {
                        if !scheduler.run() {
                            std::thread::yield_now();
                        }
                    }
                }
            }
        }
        self.claim(me);
    }

    /// Makes one acquisition attempt; returns false on contention.
    ///
    /// A failed attempt yields once (from a fiber) or pumps the scheduler
    /// once (from the main stack) so retry loops stay cooperative.
    #[must_use]
    pub fn try_lock(&self) -> bool {
        let scheduler = runtime::current();
        let me = current_owner(&scheduler);
        if self.try_reenter(me) {
            return true;
        }
        if self.try_acquire() {
            self.claim(me);
            return true;
        }
        // Give the holder a chance to release before the caller retries.
        if scheduler.active().is_some() {
            scheduler.yield_now();
        } else {
            scheduler.run();
        }
        false
    }

    /// Attempts to acquire the mutex until `deadline`; returns false on
    /// timeout. A deadline in the past fails without suspending.
    #[must_use]
    pub fn try_lock_until(&self, deadline: Instant) -> bool {
        let scheduler = runtime::current();
        let me = current_owner(&scheduler);
        if self.try_reenter(me) {
            return true;
        }
        let mut acquired = false;
        while Instant::now() < deadline {
            if self.try_acquire() {
                acquired = true;
                break;
            }
            match scheduler.active() {
                Some(fiber) => {
                    let notifier: NotifyHandle =
                        Arc::new(FiberNotify::new(Arc::clone(&scheduler), fiber));
                    self.enqueue_waiter(Arc::clone(&notifier));
                    let _waiting = WaiterGuard {
                        mutex: self,
                        notifier,
                    };
                    if !scheduler.wait_until(deadline) {
                        trace!(owner = ?me, "timed out waiting for mutex");
                        return false;
                    }
                }
                None => {
                    let notifier: NotifyHandle = Arc::new(MainNotify::new());
                    self.enqueue_waiter(Arc::clone(&notifier));
                    let _waiting = WaiterGuard {
                        mutex: self,
                        notifier: Arc::clone(&notifier),
                    };
                    while !notifier.is_ready() {
                        // The notifier may flip right as the timer expires;
                        // expiry wins and the acquisition is discarded.
                        if Instant::now() >= deadline {
                            trace!(owner = ?me, "timed out waiting for mutex");
                            return false;
                        }
                        if !scheduler.run() {
                            std::thread::yield_now();
                        }
                    }
                }
            }
        }
        if !acquired {
            return false;
        }
        self.claim(me);
        true
    }

    /// Attempts to acquire the mutex for at most `timeout` from now.
    #[must_use]
    pub fn try_lock_for(&self, timeout: Duration) -> bool {
        self.try_lock_until(Instant::now() + timeout)
    }

    /// Releases one level of ownership.
    ///
    /// The caller must be the current owner. Once the release count
    /// matches the acquisition count the mutex unlocks and the oldest
    /// blocked acquirer, if any, is marked ready.
    pub fn unlock(&self) {
        debug_assert_eq!(
            self.state.load(Ordering::SeqCst),
            LOCKED,
            "unlock of an unlocked mutex"
        );
        let next = {
            let mut inner = self.inner.lock();
            debug_assert_eq!(
                inner.owner,
                Some(current_owner(&runtime::current())),
                "unlock from a non-owner"
            );
            debug_assert!(inner.count > 0, "unlock without a matching lock");
            inner.count -= 1;
            if inner.count > 0 {
                return;
            }
            inner.owner = None;
            inner.waiters.pop_front()
        };
        self.state.store(UNLOCKED, Ordering::SeqCst);
        if let Some(notifier) = next {
            notifier.set_ready();
        }
    }

    /// Re-entrant fast path: the current holder bumps its count.
    fn try_reenter(&self, me: LockOwner) -> bool {
        if self.state.load(Ordering::SeqCst) != LOCKED {
            return false;
        }
        let mut inner = self.inner.lock();
        if inner.owner == Some(me) {
            inner.count += 1;
            true
        } else {
            false
        }
    }

    /// One CAS attempt on the lock word.
    fn try_acquire(&self) -> bool {
        self.state
            .compare_exchange(UNLOCKED, LOCKED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Records ownership right after a successful CAS.
    fn claim(&self, me: LockOwner) {
        let mut inner = self.inner.lock();
        debug_assert!(inner.owner.is_none(), "acquired a mutex that has an owner");
        debug_assert_eq!(inner.count, 0, "acquired a mutex with a live count");
        inner.owner = Some(me);
        inner.count = 1;
    }

    fn enqueue_waiter(&self, notifier: NotifyHandle) {
        self.inner.lock().waiters.push_back(notifier);
    }

    fn remove_waiter(&self, notifier: &NotifyHandle) {
        self.inner
            .lock()
            .waiters
            .retain(|waiter| !same_notifier(waiter, notifier));
    }
}

impl Default for RecursiveTimedMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RecursiveTimedMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("RecursiveTimedMutex")
            .field("locked", &self.is_locked())
            .field("count", &inner.count)
            .field("waiters", &inner.waiters.len())
            .finish_non_exhaustive()
    }
}

impl Drop for RecursiveTimedMutex {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        debug_assert!(inner.owner.is_none(), "mutex dropped while locked");
        debug_assert_eq!(inner.count, 0, "mutex dropped with a live count");
        debug_assert!(inner.waiters.is_empty(), "mutex dropped with waiters");
    }
}
