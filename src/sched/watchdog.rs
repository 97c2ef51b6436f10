// src/sched/watchdog.rs

//! Deadline bookkeeping for the dispatch loop.
//!
//! Deadlines are kept in a min-heap and never removed eagerly: when one
//! expires the loop checks whether its target is still relevant (the job may
//! have completed or been replayed in the meantime) and drops it otherwise.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Weak;

use tokio::time::Instant;

use crate::sched::entity::EntityShared;
use crate::sched::job::JobId;

/// What a deadline guards.
#[derive(Debug)]
pub(crate) enum WatchTarget {
    /// A job submitted to hardware; `attempt` distinguishes replays.
    Job { job: JobId, attempt: u64 },
    /// An entity blocked on the dependency of its head job `seq`.
    Dependency { entity: Weak<EntityShared>, seq: u64 },
}

#[derive(Debug)]
struct Deadline {
    at: Instant,
    /// Insertion order, breaks ties between equal instants.
    order: u64,
    target: WatchTarget,
}

impl PartialEq for Deadline {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Deadline {}

impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.at, self.order).cmp(&(other.at, other.order))
    }
}

#[derive(Debug, Default)]
pub(crate) struct Watchdog {
    heap: BinaryHeap<Reverse<Deadline>>,
    armed: u64,
}

impl Watchdog {
    pub fn arm(&mut self, at: Instant, target: WatchTarget) {
        self.armed += 1;
        self.heap.push(Reverse(Deadline {
            at,
            order: self.armed,
            target,
        }));
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(d)| d.at)
    }

    /// Remove and return every target whose deadline is `<= now`, earliest
    /// first.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<WatchTarget> {
        let mut expired = Vec::new();
        while let Some(Reverse(next)) = self.heap.peek() {
            if next.at > now {
                break;
            }
            if let Some(Reverse(deadline)) = self.heap.pop() {
                expired.push(deadline.target);
            }
        }
        expired
    }

    /// Armed deadlines, stale ones included.
    pub fn len(&self) -> usize {
        self.heap.len()
    }
}
