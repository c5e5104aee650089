//! FIFO of deferred engine invocations.
//!
//! Requests arriving while the engine is busy are appended here and run
//! after the in-flight cycle concludes. Draining takes the whole queue
//! first: a request appended while a drain is running waits for the next
//! drain instead of joining the current one.

use log::debug;
use std::collections::VecDeque;

#[derive(Debug)]
pub struct TaskQueue<T> {
    items: VecDeque<T>,
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// Empty the queue, returning its items in FIFO order.
    pub fn take_all(&mut self) -> Vec<T> {
        if !self.items.is_empty() {
            debug!("Draining {} deferred tasks", self.items.len());
        }
        self.items.drain(..).collect()
    }

    pub fn clear(&mut self) {
        if !self.items.is_empty() {
            debug!("Discarding {} deferred tasks", self.items.len());
        }
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
