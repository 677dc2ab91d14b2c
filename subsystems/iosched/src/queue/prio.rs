//! # Priority Lane
//!
//! Requests inserted at head skip deadline ordering entirely. The lane sits
//! in front of all other work: dispatch always drains it first. Each head
//! insertion goes in front of the lane, so the latest one leaves first.

use alloc::collections::VecDeque;

use spin::Mutex;

use crate::types::RequestId;

/// Bypass queue drained ahead of deadline ordered work
#[derive(Debug, Default)]
pub struct PriorityLane {
    queue: Mutex<VecDeque<RequestId>>,
}

impl PriorityLane {
    /// Create an empty lane
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Place a request at the front of the dispatch order
    pub fn push_front(&self, id: RequestId) {
        self.queue.lock().push_front(id);
    }

    /// Take the next bypassing request
    pub fn pop_front(&self) -> Option<RequestId> {
        self.queue.lock().pop_front()
    }

    /// Drop a request that was merged away before dispatch
    pub fn remove(&self, id: RequestId) -> bool {
        let mut queue = self.queue.lock();
        if let Some(pos) = queue.iter().position(|&queued| queued == id) {
            queue.remove(pos);
            true
        } else {
            false
        }
    }

    /// Number of waiting requests
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Is the lane empty?
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================
