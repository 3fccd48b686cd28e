//! Cofiber: cooperative stackful fibers with deadline-aware scheduling.
//!
//! # Overview
//!
//! Cofiber multiplexes lightweight, stackful fibers onto a single scheduler
//! with strictly cooperative hand-over: at most one fiber of a scheduler
//! runs at any instant, and control changes hands only at explicit
//! suspension points (`wait`, `yield_now`, `sleep_until`, spawn/run of
//! another fiber, termination). On top of the scheduler sits a re-entrant
//! mutex with timed acquisition whose blocked acquirers suspend their fiber
//! instead of blocking the thread.
//!
//! # Core guarantees
//!
//! - **Single active fiber**: a fiber appears at most once across the run
//!   queue, the waiting set, and the active slot.
//! - **Scoped restoration**: whoever resumes a fiber gets the previous
//!   active fiber restored on every exit path, including unwinds.
//! - **Notify-before-yield priority**: notification front-pushes the run
//!   queue, so freshly woken waiters outrank yielding fibers.
//! - **Synchronous cancellation**: `cancel` unwinds the target's stack and
//!   returns only once the fiber is complete; bookkeeping guards keep every
//!   waiter list consistent across the unwind.
//!
//! # Module structure
//!
//! - [`types`]: core identifiers ([`FiberId`])
//! - [`fiber`]: fiber handles and the execution substrate
//! - [`runtime`]: scheduler core and the per-thread accessor
//! - [`sync`]: notifier capability and the recursive timed mutex
//! - [`ops`]: free operations forwarding to the current scheduler
//! - [`error`]: error types
//! - [`tracing_compat`]: logging shim (no-op without `tracing-integration`)
//! - [`test_utils`]: shared test logging helpers
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::sync::Arc;
//!
//! let counter = Arc::new(AtomicU32::new(0));
//! let seen = Arc::clone(&counter);
//! let fiber = cofiber::spawn(move || {
//!     seen.fetch_add(1, Ordering::SeqCst);
//!     cofiber::yield_now();
//!     seen.fetch_add(1, Ordering::SeqCst);
//! })
//! .expect("fiber stack allocation");
//!
//! cofiber::join(&fiber);
//! assert_eq!(counter.load(Ordering::SeqCst), 2);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod error;
pub mod fiber;
pub mod ops;
pub mod runtime;
pub mod sync;
pub mod test_utils;
pub mod tracing_compat;
pub mod types;

pub use error::SpawnError;
pub use fiber::{Fiber, FiberBuilder, FiberHandle};
pub use ops::{cancel, current_id, join, sleep_for, sleep_until, spawn, yield_now};
pub use runtime::{current, Scheduler};
pub use sync::{FiberNotify, MainNotify, Notify, NotifyHandle, RecursiveTimedMutex};
pub use types::FiberId;
