//! # Deadline Index
//!
//! Pending requests ordered by deadline. Requests whose deadline is exactly
//! equal share one group, so the ordered map grows with the number of
//! distinct deadlines rather than the number of requests. Within a group,
//! order is strict arrival (FIFO).

use alloc::collections::{BTreeMap, VecDeque};

use hashbrown::HashMap;

use crate::model::LatencyModel;
use crate::types::{Nanoseconds, OpType, Request, RequestId};

/// An indexed request and the values computed for it at admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexedRequest {
    /// Request identifier
    pub id: RequestId,
    /// Scheduling class
    pub op: OpType,
    /// Size in bytes at admission
    pub size: u64,
    /// Sort key
    pub deadline: Nanoseconds,
    /// Predicted latency at admission
    pub pred_lat: Nanoseconds,
    /// Whether the request has a side record (counts toward outstanding latency)
    pub tracked: bool,
}

/// Deadline ordered index of pending requests
#[derive(Debug, Default)]
pub struct DeadlineIndex {
    groups: BTreeMap<Nanoseconds, VecDeque<RequestId>>,
    members: HashMap<RequestId, IndexedRequest>,
}

impl DeadlineIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self {
            groups: BTreeMap::new(),
            members: HashMap::new(),
        }
    }

    /// Compute the deadline of `rq` and index it
    ///
    /// `deadline = start_time + target + model.predict(size)`.
    pub fn admit(
        &mut self,
        rq: &Request,
        model: &LatencyModel,
        target: Nanoseconds,
        tracked: bool,
    ) -> IndexedRequest {
        let pred_lat = model.predict(rq.size);
        let entry = IndexedRequest {
            id: rq.id,
            op: rq.op_type(),
            size: rq.size,
            deadline: rq.start_time_ns.saturating_add(target).saturating_add(pred_lat),
            pred_lat,
            tracked,
        };
        self.insert(entry);
        entry
    }

    /// Insert a prepared entry
    ///
    /// Returns `true` when a new deadline group had to be created. An entry
    /// already present under the same id is replaced.
    pub fn insert(&mut self, entry: IndexedRequest) -> bool {
        if self.members.contains_key(&entry.id) {
            self.remove(entry.id);
        }

        let mut created = false;
        let group = self.groups.entry(entry.deadline).or_insert_with(|| {
            created = true;
            VecDeque::new()
        });
        group.push_back(entry.id);
        self.members.insert(entry.id, entry);
        created
    }

    /// Remove a request, dropping its group once empty
    pub fn remove(&mut self, id: RequestId) -> Option<IndexedRequest> {
        let entry = self.members.remove(&id)?;

        let emptied = match self.groups.get_mut(&entry.deadline) {
            Some(group) => {
                if let Some(pos) = group.iter().position(|&member| member == id) {
                    group.remove(pos);
                }
                group.is_empty()
            },
            None => {
                debug_assert!(false, "indexed request {:?} without a group", id);
                false
            },
        };
        if emptied {
            self.groups.remove(&entry.deadline);
        }

        Some(entry)
    }

    /// Earliest deadline request, without removing it
    pub fn peek_earliest(&self) -> Option<&IndexedRequest> {
        let (_, group) = self.groups.first_key_value()?;
        let id = group.front()?;
        self.members.get(id)
    }

    /// Remove and return the earliest deadline request
    #[cfg(test)]
    pub fn pop_earliest(&mut self) -> Option<IndexedRequest> {
        let id = self.peek_earliest()?.id;
        self.remove(id)
    }

    /// Look up an indexed request
    #[cfg(test)]
    pub fn get(&self, id: RequestId) -> Option<&IndexedRequest> {
        self.members.get(&id)
    }

    /// Is the request indexed?
    #[cfg(test)]
    pub fn contains(&self, id: RequestId) -> bool {
        self.members.contains_key(&id)
    }

    /// Number of indexed requests
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Is the index empty?
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Number of distinct deadlines
    #[cfg(test)]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Requests sharing `deadline`, in FIFO order
    #[cfg(test)]
    pub fn group(&self, deadline: Nanoseconds) -> Option<&VecDeque<RequestId>> {
        self.groups.get(&deadline)
    }
}

// =============================================================================
// TESTS
// =============================================================================
