//! FIFO event queue shared by producers (`track`) and the dispatcher.
//!
//! Retried events are put back at the head so they go out before anything
//! tracked after them.

use std::collections::VecDeque;

use parking_lot::Mutex;
use pulse_core::Event;

#[derive(Debug, Default)]
pub struct EventQueue {
    inner: Mutex<VecDeque<Event>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&self, event: Event) -> usize {
        let mut queue = self.inner.lock();
        queue.push_back(event);
        queue.len()
    }

    /// Take every pending event, oldest first, leaving the queue empty.
    pub fn drain_all(&self) -> Vec<Event> {
        self.inner.lock().drain(..).collect()
    }

    /// Put events back at the head, keeping their relative order.
    pub fn requeue_front(&self, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }
        let mut queue = self.inner.lock();
        for event in events.into_iter().rev() {
            queue.push_front(event);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn clear(&self) -> usize {
        let mut queue = self.inner.lock();
        let dropped = queue.len();
        queue.clear();
        dropped
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.inner.lock().iter().cloned().collect()
    }
}
