//! # Request Records
//!
//! Scheduler-private state attached to host requests. A record is acquired
//! when the host prepares a request and released when the request finishes.
//! Acquisition never blocks and may fail; a request without a record is
//! still scheduled but its latency is neither counted nor learned from.

use hashbrown::HashMap;
use spin::Mutex;

use crate::error::{SchedError, SchedResult};
use crate::types::{Nanoseconds, RequestId};

/// Per-request record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingRequest {
    /// Size at admission, zero until admitted
    pub size: u64,
    /// Predicted latency at admission
    pub pred_lat: Nanoseconds,
}

/// Bounded table of request records
#[derive(Debug)]
pub struct RequestRecords {
    table: Mutex<HashMap<RequestId, PendingRequest>>,
    capacity: usize,
}

impl RequestRecords {
    /// Create a table holding at most `capacity` records
    pub fn new(capacity: usize) -> Self {
        Self {
            table: Mutex::new(HashMap::with_capacity(capacity)),
            capacity,
        }
    }

    /// Attach a zeroed record to `id`
    pub fn acquire(&self, id: RequestId) -> SchedResult<()> {
        let mut table = self.table.lock();
        if table.contains_key(&id) {
            return Err(SchedError::AlreadyTracked);
        }
        if table.len() >= self.capacity {
            return Err(SchedError::RecordsExhausted);
        }
        table
            .try_reserve(1)
            .map_err(|_| SchedError::RecordsExhausted)?;
        table.insert(id, PendingRequest::default());
        Ok(())
    }

    /// Store the admission values; returns `false` for untracked requests
    pub fn annotate(&self, id: RequestId, size: u64, pred_lat: Nanoseconds) -> bool {
        match self.table.lock().get_mut(&id) {
            Some(record) => {
                record.size = size;
                record.pred_lat = pred_lat;
                true
            },
            None => false,
        }
    }

    /// Copy of the record of `id`
    pub fn get(&self, id: RequestId) -> Option<PendingRequest> {
        self.table.lock().get(&id).copied()
    }

    /// Is `id` tracked?
    pub fn contains(&self, id: RequestId) -> bool {
        self.table.lock().contains_key(&id)
    }

    /// Detach and return the record of `id`
    pub fn release(&self, id: RequestId) -> Option<PendingRequest> {
        self.table.lock().remove(&id)
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// Are there no live records?
    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }

    /// Maximum number of live records
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// =============================================================================
// TESTS
// =============================================================================
