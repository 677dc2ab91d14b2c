//! # Host Boundary
//!
//! Services the scheduler needs from the block layer that owns the requests.
//! The host keeps request lifetimes, merge detection and the merge hash; the
//! scheduler only asks for them and is told about their outcome.
//!
//! Merge attempts are made while the scheduler holds its queue lock. The host
//! reports what it merged through a [`MergeSink`] passed into the attempt, so
//! it must never call back into the scheduler's inbound API from inside
//! [`BlockQueue::try_insert_merge`] or [`BlockQueue::try_bio_merge`].

use crate::types::{Nanoseconds, Request, RequestId};

// =============================================================================
// MERGE REPORTING
// =============================================================================

/// Which end of a request grew in a merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    /// New data was prepended; the request start moved
    Front,
    /// New data was appended
    Back,
}

/// Receiver of merge outcomes during a merge attempt
pub trait MergeSink {
    /// `rq` absorbed new data and now carries its updated size
    fn request_merged(&mut self, rq: &Request, kind: MergeKind);

    /// `absorbed` was folded into `survivor` and is gone
    fn requests_merged(&mut self, survivor: &Request, absorbed: RequestId);
}

/// Result of a bio merge attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BioMerge {
    /// The bio was merged into an existing request
    pub merged: bool,
    /// A request that became redundant and must be freed by the scheduler
    pub freed: Option<RequestId>,
}

impl BioMerge {
    /// No merge happened
    pub const NONE: BioMerge = BioMerge {
        merged: false,
        freed: None,
    };
}

// =============================================================================
// BLOCK QUEUE
// =============================================================================

/// Block layer services used by the scheduler
pub trait BlockQueue {
    /// Host representation of an unattached I/O fragment
    type Bio;

    /// Get the monotonic clock in nanoseconds
    fn now_ns(&self) -> Nanoseconds;

    /// Make `rq` a merge candidate
    fn hash_add(&self, rq: &Request);

    /// Withdraw `id` from the merge candidates
    fn hash_del(&self, id: RequestId);

    /// Try to merge a newly inserted request into a queued one
    ///
    /// Returns `true` if `rq` was absorbed; the scheduler then frees it.
    fn try_insert_merge(&self, rq: &Request, sink: &mut dyn MergeSink) -> bool;

    /// Try to merge a bio into a queued request
    fn try_bio_merge(&self, bio: &Self::Bio, sink: &mut dyn MergeSink) -> BioMerge;

    /// Give a request that was merged away back to the host
    fn free_request(&self, id: RequestId);

    /// Arm the model update timer to fire at `expires_ns`
    fn arm_timer(&self, expires_ns: Nanoseconds);

    /// Get the number of requests the queue may allocate
    fn nr_requests(&self) -> u32;
}
