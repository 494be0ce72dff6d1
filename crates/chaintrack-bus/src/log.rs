//! # Bounded Event Log
//!
//! Most-recent-first history with a hard capacity. Publishing at capacity
//! evicts the oldest event regardless of topic.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::events::Event;

/// Capacity-bounded event history, exclusively owned by the broker.
#[derive(Debug)]
pub struct EventLog {
    /// Newest at the front.
    entries: VecDeque<Arc<Event>>,
    capacity: usize,
}

impl EventLog {
    /// Create an empty log. A zero capacity is treated as one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an event, returning the evicted oldest event on overflow.
    pub fn push(&mut self, event: Arc<Event>) -> Option<Arc<Event>> {
        self.entries.push_front(event);
        if self.entries.len() > self.capacity {
            self.entries.pop_back()
        } else {
            None
        }
    }

    /// Point-in-time copy, most-recent-first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Event>> {
        self.entries.iter().cloned().collect()
    }

    /// Point-in-time copy of the events accepted by `predicate`.
    pub fn snapshot_where<F>(&self, mut predicate: F) -> Vec<Arc<Event>>
    where
        F: FnMut(&Event) -> bool,
    {
        self.entries
            .iter()
            .filter(|event| predicate(event))
            .cloned()
            .collect()
    }

    /// Most recent event.
    #[must_use]
    pub fn latest(&self) -> Option<&Arc<Event>> {
        self.entries.front()
    }

    /// Number of retained events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
