//! Synchronization primitives built on the scheduler's waiter mechanics.

mod mutex;
mod notify;

pub use mutex::RecursiveTimedMutex;
pub use notify::{FiberNotify, MainNotify, Notify, NotifyHandle};
