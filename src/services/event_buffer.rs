//! Bounded, arrival-ordered store of recently processed events.

use std::collections::VecDeque;

use crate::domain::models::{CanonicalEvent, EventType};

/// FIFO ring of the last `capacity` canonical events.
#[derive(Debug, Clone)]
pub struct EventBuffer {
    capacity: usize,
    events: VecDeque<CanonicalEvent>,
}

impl EventBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity),
        }
    }

    /// Append an event, dropping the oldest once full.
    pub fn append(&mut self, event: CanonicalEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// The last `limit` events in arrival order.
    pub fn recent(&self, limit: usize) -> Vec<CanonicalEvent> {
        let skip = self.events.len().saturating_sub(limit);
        self.events.iter().skip(skip).cloned().collect()
    }

    /// The last `limit` events of one type, in arrival order.
    pub fn by_type(&self, event_type: EventType, limit: usize) -> Vec<CanonicalEvent> {
        let mut matching: Vec<CanonicalEvent> = self
            .events
            .iter()
            .rev()
            .filter(|e| e.event_type == event_type)
            .take(limit)
            .cloned()
            .collect();
        matching.reverse();
        matching
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
