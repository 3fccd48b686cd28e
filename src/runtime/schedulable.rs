//! The atomic unit stored in scheduler queues.

use crate::fiber::FiberHandle;
use core::fmt;
use std::time::Instant;

/// A fiber plus an optional absolute deadline.
///
/// Records inserted for an indefinite wait carry no deadline and never
/// participate in deadline scans. Two records are equal iff they refer to
/// the same fiber; the deadline does not take part in identity.
#[derive(Clone)]
pub(crate) struct Schedulable {
    pub(crate) fiber: FiberHandle,
    pub(crate) deadline: Option<Instant>,
}

impl Schedulable {
    /// Record for an indefinite wait.
    pub(crate) fn new(fiber: FiberHandle) -> Self {
        Self {
            fiber,
            deadline: None,
        }
    }

    /// Record for a deadline-bounded wait.
    pub(crate) fn with_deadline(fiber: FiberHandle, deadline: Instant) -> Self {
        Self {
            fiber,
            deadline: Some(deadline),
        }
    }
}

impl PartialEq for Schedulable {
    fn eq(&self, other: &Self) -> bool {
        self.fiber.id() == other.fiber.id()
    }
}

impl Eq for Schedulable {}

impl fmt::Debug for Schedulable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schedulable")
            .field("fiber", &self.fiber.id())
            .field("deadline", &self.deadline)
            .finish()
    }
}
