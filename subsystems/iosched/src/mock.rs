//! In-memory block queue used by the unit tests.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::host::{BioMerge, BlockQueue, MergeKind, MergeSink};
use crate::types::{Nanoseconds, Request, RequestId};

/// Scripted outcome of one bio merge attempt
#[derive(Debug, Default)]
pub(crate) struct MockBio {
    /// Request that grows at the front, with its new size
    pub front: Option<Request>,
    /// Survivor and the request it absorbs
    pub absorb: Option<(Request, RequestId)>,
}

#[derive(Debug, Default)]
pub(crate) struct MockHost {
    pub clock: AtomicU64,
    pub hashed: Mutex<Vec<RequestId>>,
    pub freed: Mutex<Vec<RequestId>>,
    pub armed: Mutex<Vec<Nanoseconds>>,
    pub insert_merge_into: Mutex<Option<Request>>,
    pub nr_requests: u32,
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            nr_requests: 64,
            ..Self::default()
        }
    }

    pub fn set_clock(&self, now: Nanoseconds) {
        self.clock.store(now, Ordering::SeqCst);
    }

    pub fn is_hashed(&self, id: RequestId) -> bool {
        self.hashed.lock().contains(&id)
    }
}

impl BlockQueue for MockHost {
    type Bio = MockBio;

    fn now_ns(&self) -> Nanoseconds {
        self.clock.load(Ordering::SeqCst)
    }

    fn hash_add(&self, rq: &Request) {
        self.hashed.lock().push(rq.id);
    }

    fn hash_del(&self, id: RequestId) {
        self.hashed.lock().retain(|&hashed| hashed != id);
    }

    fn try_insert_merge(&self, rq: &Request, sink: &mut dyn MergeSink) -> bool {
        match self.insert_merge_into.lock().take() {
            Some(survivor) => {
                sink.requests_merged(&survivor, rq.id);
                true
            },
            None => false,
        }
    }

    fn try_bio_merge(&self, bio: &MockBio, sink: &mut dyn MergeSink) -> BioMerge {
        let mut result = BioMerge::NONE;
        if let Some(rq) = &bio.front {
            sink.request_merged(rq, MergeKind::Front);
            result.merged = true;
        }
        if let Some((survivor, absorbed)) = &bio.absorb {
            sink.requests_merged(survivor, *absorbed);
            result.merged = true;
            result.freed = Some(*absorbed);
        }
        result
    }

    fn free_request(&self, id: RequestId) {
        self.freed.lock().push(id);
    }

    fn arm_timer(&self, expires_ns: Nanoseconds) {
        self.armed.lock().push(expires_ns);
    }

    fn nr_requests(&self) -> u32 {
        self.nr_requests
    }
}
