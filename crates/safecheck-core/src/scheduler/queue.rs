use std::cmp::Reverse;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};

/// One armed deadline. Fires a snooze (or escalation) for `checkin_id`
/// only if the check-in still has `expected_count` snoozes when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline {
    pub at: DateTime<Utc>,
    pub checkin_id: i64,
    pub expected_count: u8,
}

/// Min-heap of deadlines. Superseded entries are left in place and
/// discarded when they fire.
#[derive(Debug, Default)]
pub struct DeadlineQueue {
    heap: BinaryHeap<Reverse<Deadline>>,
}

impl DeadlineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the new entry is now the earliest.
    pub fn push(&mut self, deadline: Deadline) -> bool {
        let earliest = self.peek().map_or(true, |head| deadline.at < head);
        self.heap.push(Reverse(deadline));
        earliest
    }

    pub fn peek(&self) -> Option<DateTime<Utc>> {
        self.heap.peek().map(|Reverse(d)| d.at)
    }

    /// Remove and return every entry due at or before `now`, earliest first.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<Deadline> {
        let mut due = Vec::new();
        while let Some(Reverse(head)) = self.heap.peek() {
            if head.at > now {
                break;
            }
            if let Some(Reverse(d)) = self.heap.pop() {
                due.push(d);
            }
        }
        due
    }

    /// Whether a deadline for this check-in and count is armed.
    pub fn contains(&self, checkin_id: i64, expected_count: u8) -> bool {
        self.heap
            .iter()
            .any(|Reverse(d)| d.checkin_id == checkin_id && d.expected_count == expected_count)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
