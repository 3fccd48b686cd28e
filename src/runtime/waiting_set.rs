//! Dual-indexed container of suspended fibers.
//!
//! The waiting set is indexed two ways, kept in lockstep: by fiber
//! identity for O(log n) removal on notify/cancel, and by deadline for
//! O(log n) expiry scans. Records without a deadline are invisible to the
//! deadline index. Since the scheduler hands control over only at explicit
//! suspension points, both indices are always updated before any fiber can
//! observe the set.

use crate::runtime::schedulable::Schedulable;
use crate::types::FiberId;
use std::collections::BTreeMap;
use std::time::Instant;

#[derive(Debug, Default)]
pub(crate) struct WaitingSet {
    by_fiber: BTreeMap<FiberId, Schedulable>,
    by_deadline: BTreeMap<(Instant, FiberId), ()>,
}

impl WaitingSet {
    /// Inserts a record. The fiber must not already be waiting.
    pub(crate) fn insert(&mut self, record: Schedulable) {
        let id = record.fiber.id();
        if let Some(deadline) = record.deadline {
            self.by_deadline.insert((deadline, id), ());
        }
        let previous = self.by_fiber.insert(id, record);
        debug_assert!(previous.is_none(), "fiber {id} is already waiting");
    }

    /// Removes the record for `id`, if present, from both indices.
    pub(crate) fn remove(&mut self, id: FiberId) -> Option<Schedulable> {
        let record = self.by_fiber.remove(&id)?;
        if let Some(deadline) = record.deadline {
            self.by_deadline.remove(&(deadline, id));
        }
        Some(record)
    }

    /// Returns true if `id` is waiting.
    pub(crate) fn contains(&self, id: FiberId) -> bool {
        self.by_fiber.contains_key(&id)
    }

    /// Removes and returns every record whose deadline is at or before
    /// `now`, in deadline order.
    pub(crate) fn take_expired(&mut self, now: Instant) -> Vec<Schedulable> {
        let mut expired = Vec::new();
        while let Some((&(deadline, id), _)) = self.by_deadline.first_key_value() {
            if deadline > now {
                break;
            }
            self.by_deadline.pop_first();
            let record = self
                .by_fiber
                .remove(&id)
                .expect("deadline index out of lockstep");
            expired.push(record);
        }
        expired
    }

    /// Returns the number of waiting fibers.
    pub(crate) fn len(&self) -> usize {
        self.by_fiber.len()
    }

    /// Number of records visible to the deadline index.
    #[cfg(test)]
    fn deadline_index_len(&self) -> usize {
        self.by_deadline.len()
    }
}
