//! # Adaptive Deadline Scheduler
//!
//! Request lifecycle:
//!
//! ```text
//!   prepare ─▶ admit ─┬─▶ PriorityLane ─────────────────────────┐
//!                     └─▶ DeadlineIndex ──fill──▶ BatchPipeline ─┴─▶ dispatch
//!                                                                       │
//!   finish ◀── complete (outstanding -= pred, model.observe) ◀──────────┘
//! ```
//!
//! ## Locking
//!
//! Every substructure has its own lock. Where two are held together they are
//! taken in the order batch, queue, records. The configuration lock is only
//! held long enough to copy values out. The outstanding latency counter is a
//! lone atomic and may be momentarily stale.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use spin::{Mutex, RwLock};

use crate::config::SchedConfig;
use crate::error::SchedResult;
use crate::host::{BlockQueue, MergeKind, MergeSink};
use crate::model::{LatencyModel, ModelSnapshot};
use crate::queue::{BatchPipeline, BatchStats, DeadlineIndex, IndexedRequest, PriorityLane};
use crate::records::RequestRecords;
use crate::timer::{UpdateTimer, UPDATE_DELAY_NS};
use crate::types::{InsertFlags, Nanoseconds, OpType, Request, RequestId};
use crate::{NAME, VERSION};

// =============================================================================
// SCHEDULER
// =============================================================================

/// Adaptive deadline I/O scheduler for one block queue
#[derive(Debug)]
pub struct AdaptiveDeadlineScheduler<H: BlockQueue> {
    host: H,
    pub(crate) config: RwLock<SchedConfig>,
    pub(crate) models: [LatencyModel; OpType::COUNT],
    queue: Mutex<DeadlineIndex>,
    prio: PriorityLane,
    pub(crate) batch: Mutex<BatchPipeline>,
    records: RequestRecords,
    /// Predicted latency of staged and in-flight tracked requests
    total_pred_lat: AtomicU64,
    async_depth: AtomicU32,
    timer: UpdateTimer,
    stopped: AtomicBool,
}

impl<H: BlockQueue> AdaptiveDeadlineScheduler<H> {
    /// Create a scheduler on top of `host`
    pub fn new(host: H, config: SchedConfig) -> SchedResult<Self> {
        config.validate()?;

        let now = host.now_ns();
        let async_depth = host.nr_requests();

        log::info!(
            "{} v{}: window {} ns, refill below {}%, {} records",
            NAME,
            VERSION,
            config.global_latency_window,
            config.refill_ratio,
            config.record_capacity
        );

        Ok(Self {
            records: RequestRecords::new(config.record_capacity),
            config: RwLock::new(config),
            models: core::array::from_fn(|_| LatencyModel::new(now)),
            queue: Mutex::new(DeadlineIndex::new()),
            prio: PriorityLane::new(),
            batch: Mutex::new(BatchPipeline::new()),
            total_pred_lat: AtomicU64::new(0),
            async_depth: AtomicU32::new(async_depth),
            timer: UpdateTimer::new(),
            stopped: AtomicBool::new(false),
            host,
        })
    }

    /// Get the host block queue
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Get a copy of the current configuration
    pub fn config(&self) -> SchedConfig {
        self.config.read().clone()
    }

    // =========================================================================
    // Admission
    // =========================================================================

    /// Attach a side record to a freshly allocated request
    ///
    /// Returns `false` when no record could be allocated. The request is
    /// still scheduled, but its latency is neither counted nor learned from.
    pub fn prepare_request(&self, rq: &Request) -> bool {
        match self.records.acquire(rq.id) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("{:?}: {}; latency tracking disabled", rq.id, err);
                false
            },
        }
    }

    /// Insert one request
    pub fn admit(&self, rq: &Request, flags: InsertFlags) {
        self.admit_bulk(core::slice::from_ref(rq), flags);
    }

    /// Insert a list of requests under one queue lock acquisition
    pub fn admit_bulk(&self, rqs: &[Request], flags: InsertFlags) {
        let targets = self.config.read().latency_target;
        let mut absorbed = Vec::new();

        let strays = {
            let mut index = self.queue.lock();
            let mut ctx = MergeContext::new(self, &mut index, targets);
            for rq in rqs {
                if self.insert_locked(&mut ctx, rq, flags) {
                    absorbed.push(rq.id);
                }
            }
            ctx.strays
        };

        self.settle_strays(strays, &absorbed);
        for id in absorbed {
            self.host.free_request(id);
        }
    }

    fn insert_locked(&self, ctx: &mut MergeContext<'_, H>, rq: &Request, flags: InsertFlags) -> bool {
        if flags.contains(InsertFlags::AT_HEAD) {
            self.prio.push_front(rq.id);
            log::trace!("{:?} -> priority lane", rq.id);
            return false;
        }

        if self.host.try_insert_merge(rq, ctx) {
            log::trace!("{:?} merged on insert", rq.id);
            return true;
        }

        let entry = self.index_request(ctx.index, rq, &ctx.targets);
        if rq.is_mergeable() {
            self.host.hash_add(rq);
        }
        log::trace!(
            "{:?} ({}) indexed: deadline {} pred {}",
            rq.id,
            entry.op.name(),
            entry.deadline,
            entry.pred_lat
        );
        false
    }

    /// Compute the deadline of `rq` and index it
    fn index_request(
        &self,
        index: &mut DeadlineIndex,
        rq: &Request,
        targets: &[Nanoseconds; OpType::COUNT],
    ) -> IndexedRequest {
        let op = rq.op_type().index();
        let tracked = self.records.contains(rq.id);
        let entry = index.admit(rq, &self.models[op], targets[op], tracked);
        if tracked {
            self.records.annotate(rq.id, entry.size, entry.pred_lat);
        }
        entry
    }

    // =========================================================================
    // Merging
    // =========================================================================

    /// Try to merge a bio into a queued request
    pub fn try_bio_merge(&self, bio: &H::Bio) -> bool {
        let targets = self.config.read().latency_target;

        let (result, strays) = {
            let mut index = self.queue.lock();
            let mut ctx = MergeContext::new(self, &mut index, targets);
            let result = self.host.try_bio_merge(bio, &mut ctx);
            (result, ctx.strays)
        };

        self.settle_strays(strays, &[]);
        if let Some(freed) = result.freed {
            self.host.free_request(freed);
        }
        result.merged
    }

    /// `rq` grew through a merge the host performed outside a merge attempt
    pub fn notify_request_merged(&self, rq: &Request, kind: MergeKind) {
        let targets = self.config.read().latency_target;
        let mut index = self.queue.lock();
        MergeContext::new(self, &mut index, targets).request_merged(rq, kind);
    }

    /// `absorbed` was folded into `survivor` outside a merge attempt
    pub fn notify_requests_merged(&self, survivor: &Request, absorbed: RequestId) {
        let targets = self.config.read().latency_target;
        let strays = {
            let mut index = self.queue.lock();
            let mut ctx = MergeContext::new(self, &mut index, targets);
            ctx.requests_merged(survivor, absorbed);
            ctx.strays
        };
        self.settle_strays(strays, &[]);
    }

    /// Forget a request that was merged away before dispatch
    pub fn remove_on_merge(&self, id: RequestId) {
        let indexed = self.queue.lock().remove(id).is_some();
        self.host.hash_del(id);
        if !indexed {
            self.cancel_unindexed(id);
        }
    }

    /// Remove requests that had already left the index
    fn settle_strays(&self, strays: Vec<RequestId>, skip: &[RequestId]) {
        for id in strays.into_iter().filter(|id| !skip.contains(id)) {
            self.cancel_unindexed(id);
        }
    }

    /// Remove a staged or prioritized request
    ///
    /// Requests only ever move from the index into a batch page, so a request
    /// missed by the index lookup is found here if it still exists.
    fn cancel_unindexed(&self, id: RequestId) -> bool {
        if let Some(entry) = self.batch.lock().cancel(id) {
            if entry.tracked {
                self.sub_outstanding(entry.pred_lat);
            }
            log::trace!("{:?} cancelled from batch", id);
            return true;
        }
        self.prio.remove(id)
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Next request for the device, if any
    pub fn dispatch_next(&self) -> Option<RequestId> {
        if let Some(id) = self.prio.pop_front() {
            log::trace!("dispatch {:?} from priority lane", id);
            return Some(id);
        }

        let (threshold, batch_limit, window) = {
            let config = self.config.read();
            (config.refill_threshold(), config.batch_limit, config.global_latency_window)
        };

        let mut batch = self.batch.lock();
        let outstanding = self.total_pred_lat.load(Ordering::Acquire);

        if batch.needs_refill(outstanding, threshold) {
            let mut index = self.queue.lock();
            let report = batch.fill(
                &mut index,
                &self.models,
                &batch_limit,
                window,
                outstanding,
                |entry| self.host.hash_del(entry.id),
            );
            drop(index);

            if report.staged_lat != 0 {
                self.total_pred_lat.fetch_add(report.staged_lat, Ordering::AcqRel);
            }
            if report.count != 0 {
                log::trace!(
                    "filled {} requests ({} ns) on top of {} ns outstanding",
                    report.count,
                    report.staged_lat,
                    outstanding
                );
            }
        }

        let entry = batch.pop_next()?;
        log::trace!("dispatch {:?} ({})", entry.id, entry.op.name());
        Some(entry.id)
    }

    /// Is anything waiting for dispatch?
    pub fn has_pending_work(&self) -> bool {
        !self.prio.is_empty() || self.batch.lock().has_work() || !self.queue.lock().is_empty()
    }

    // =========================================================================
    // Completion
    // =========================================================================

    /// The device completed `rq` at `now`
    pub fn on_request_completed(&self, rq: &Request, now: Nanoseconds) {
        let Some(record) = self.records.get(rq.id) else {
            return;
        };

        self.sub_outstanding(record.pred_lat);

        let Some(io_start) = rq.io_start_time_ns else {
            return;
        };
        if record.size == 0 {
            return;
        }

        let latency = now.saturating_sub(io_start);
        self.models[rq.op_type().index()].observe(record.size, latency, record.pred_lat, now);

        let expires = now.saturating_add(UPDATE_DELAY_NS);
        if self.timer.reduce(expires) {
            self.host.arm_timer(expires);
        }
    }

    /// Final cleanup of `id`
    pub fn on_request_finished(&self, id: RequestId) {
        self.records.release(id);
    }

    /// Periodic update callback armed through [`BlockQueue::arm_timer`]
    pub fn on_update_timer(&self) {
        self.timer.fire();
        let now = self.host.now_ns();
        for op in OpType::ALL {
            let report = self.models[op.index()].update(now);
            if report.small || report.large {
                log::trace!("{} model folded: {:?}", op.name(), self.models[op.index()].snapshot());
            }
        }
    }

    fn sub_outstanding(&self, latency: Nanoseconds) {
        if latency == 0 {
            return;
        }
        // Never wraps: a stale read can only make the subtraction saturate
        let _ = self
            .total_pred_lat
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(latency))
            });
    }

    // =========================================================================
    // Queue depth
    // =========================================================================

    /// The host queue depth changed
    pub fn configure_queue_depth(&self, depth: u32) {
        self.async_depth.store(depth, Ordering::Release);
        log::debug!("async depth set to {}", depth);
    }

    /// Allocation depth limit for `rq`, `None` for unthrottled requests
    ///
    /// Synchronous reads are never throttled.
    pub fn limit_depth(&self, rq: &Request) -> Option<u32> {
        if rq.is_sync() && !rq.op.is_write() {
            return None;
        }
        Some(self.async_depth.load(Ordering::Acquire))
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Get the latency model of one class
    pub fn model(&self, op: OpType) -> &LatencyModel {
        &self.models[op.index()]
    }

    /// Get the published parameters of one class
    pub fn model_snapshot(&self, op: OpType) -> ModelSnapshot {
        self.models[op.index()].snapshot()
    }

    /// Get the predicted latency of staged and in-flight requests
    pub fn outstanding_latency(&self) -> Nanoseconds {
        self.total_pred_lat.load(Ordering::Acquire)
    }

    /// Get the batch high-water marks
    pub fn batch_stats(&self) -> BatchStats {
        self.batch.lock().stats()
    }

    /// Number of requests in the deadline index
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Number of requests staged in batch pages
    pub fn staged(&self) -> usize {
        self.batch.lock().staged()
    }

    /// Number of live side records
    pub fn tracked(&self) -> usize {
        self.records.len()
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Stop the scheduler; later calls are no-ops
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.timer.fire();
        if !self.prio.is_empty() {
            log::warn!("{}: {} requests left in priority lane", NAME, self.prio.len());
        }
        log::info!("{} stopped", NAME);
    }
}

impl<H: BlockQueue> Drop for AdaptiveDeadlineScheduler<H> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// =============================================================================
// MERGE CONTEXT
// =============================================================================

/// Applies merge outcomes to the deadline index while the queue lock is held
struct MergeContext<'a, H: BlockQueue> {
    sched: &'a AdaptiveDeadlineScheduler<H>,
    index: &'a mut DeadlineIndex,
    targets: [Nanoseconds; OpType::COUNT],
    /// Absorbed requests that were not in the index
    strays: Vec<RequestId>,
}

impl<'a, H: BlockQueue> MergeContext<'a, H> {
    fn new(
        sched: &'a AdaptiveDeadlineScheduler<H>,
        index: &'a mut DeadlineIndex,
        targets: [Nanoseconds; OpType::COUNT],
    ) -> Self {
        Self {
            sched,
            index,
            targets,
            strays: Vec::new(),
        }
    }
}

impl<H: BlockQueue> MergeSink for MergeContext<'_, H> {
    fn request_merged(&mut self, rq: &Request, kind: MergeKind) {
        // A front merge moves the request start, so its deadline is recomputed
        if kind == MergeKind::Front && self.index.remove(rq.id).is_some() {
            let entry = self.sched.index_request(self.index, rq, &self.targets);
            log::trace!("{:?} re-keyed to {}", rq.id, entry.deadline);
        }
    }

    fn requests_merged(&mut self, survivor: &Request, absorbed: RequestId) {
        if self.index.remove(absorbed).is_none() {
            self.strays.push(absorbed);
        }
        self.sched.host.hash_del(absorbed);
        log::trace!("{:?} merged into {:?}", absorbed, survivor.id);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NSEC_PER_MSEC;
    use crate::mock::{MockBio, MockHost};
    use crate::types::{ReqOp, RequestFlags};
    use alloc::collections::BTreeSet;

    const MS: u64 = NSEC_PER_MSEC;

    fn scheduler(config: SchedConfig) -> AdaptiveDeadlineScheduler<MockHost> {
        AdaptiveDeadlineScheduler::new(MockHost::new(), config).unwrap()
    }

    fn calibrate(sched: &AdaptiveDeadlineScheduler<MockHost>, op: OpType, base: u64) {
        sched.model(op).observe(4096, base, 0, 0);
        assert_eq!(sched.model(op).base(), base);
    }

    fn submit(sched: &AdaptiveDeadlineScheduler<MockHost>, rq: &Request) {
        assert!(sched.prepare_request(rq));
        sched.admit(rq, InsertFlags::empty());
    }

    #[test]
    fn test_every_request_dispatched_once() {
        let sched = scheduler(SchedConfig::default());
        calibrate(&sched, OpType::Read, 200_000);

        let ops = [ReqOp::Read, ReqOp::Write, ReqOp::Discard, ReqOp::Flush];
        let requests: Vec<Request> = (0..64)
            .map(|i| Request::new(i, ops[i as usize % ops.len()], 4096 * (1 + i % 5), i * 1_000))
            .collect();
        for rq in &requests {
            submit(&sched, rq);
        }
        assert_eq!(sched.queued(), requests.len());

        let mut dispatched = Vec::new();
        while let Some(id) = sched.dispatch_next() {
            dispatched.push(id);
            let rq = requests[id.raw() as usize].with_io_start(10 * MS);
            sched.on_request_completed(&rq, 11 * MS);
            sched.on_request_finished(id);
        }

        assert_eq!(dispatched.len(), requests.len());
        let unique: BTreeSet<RequestId> = dispatched.iter().copied().collect();
        assert_eq!(unique.len(), requests.len());
        assert!(!sched.has_pending_work());
        assert_eq!(sched.outstanding_latency(), 0);
        assert_eq!(sched.tracked(), 0);
    }

    #[test]
    fn test_identical_requests_share_group() {
        let sched = scheduler(SchedConfig::default());
        let a = Request::new(1, ReqOp::Read, 4096, 5_000);
        let b = Request::new(2, ReqOp::Read, 4096, 5_000);
        submit(&sched, &a);
        submit(&sched, &b);

        assert_eq!(sched.queue.lock().group_count(), 1);

        sched.remove_on_merge(a.id);
        assert_eq!(sched.queue.lock().group_count(), 1);
        assert!(sched.queue.lock().contains(b.id));
        assert!(!sched.host().is_hashed(a.id));

        sched.remove_on_merge(b.id);
        assert_eq!(sched.queue.lock().group_count(), 0);
    }

    #[test]
    fn test_write_batch_cap() {
        let sched = scheduler(SchedConfig::default().with_batch_limit(OpType::Write, 1));
        calibrate(&sched, OpType::Write, 100_000);

        for id in 1..=3 {
            submit(&sched, &Request::new(id, ReqOp::Write, 4096, id));
        }

        assert_eq!(sched.dispatch_next(), Some(RequestId(1)));
        assert_eq!(sched.queued(), 2);
        assert_eq!(sched.batch_stats().max_per_type[OpType::Write.index()], 1);
        assert_eq!(sched.batch_stats().max_total, 1);
    }

    #[test]
    fn test_first_completion_calibrates_base() {
        let sched = scheduler(SchedConfig::default());
        assert!(!sched.model(OpType::Read).is_calibrated());

        let rq = Request::new(1, ReqOp::Read, 4096, 0);
        submit(&sched, &rq);
        assert_eq!(sched.dispatch_next(), Some(rq.id));

        sched.on_request_completed(&rq.with_io_start(MS), 4 * MS);
        assert_eq!(sched.model_snapshot(OpType::Read).base, 3 * MS);
        assert_eq!(*sched.host().armed.lock(), [4 * MS + UPDATE_DELAY_NS]);

        // Second request is predicted with the calibrated base
        let next = Request::new(2, ReqOp::Read, 4096, 10 * MS);
        submit(&sched, &next);
        let entry = sched.queue.lock().get(next.id).copied();
        assert_eq!(entry.map(|e| e.deadline), Some(10 * MS + 2 * MS + 3 * MS));
    }

    #[test]
    fn test_fill_always_takes_one() {
        let sched = scheduler(SchedConfig::default().with_latency_window(1));
        calibrate(&sched, OpType::Read, 50 * MS);

        submit(&sched, &Request::new(1, ReqOp::Read, 4096, 0));
        submit(&sched, &Request::new(2, ReqOp::Read, 4096, 0));

        assert_eq!(sched.dispatch_next(), Some(RequestId(1)));
        assert_eq!(sched.outstanding_latency(), 50 * MS);
        // Outstanding latency is above the refill threshold
        assert_eq!(sched.dispatch_next(), None);
        assert!(sched.has_pending_work());

        sched.on_request_completed(&Request::new(1, ReqOp::Read, 4096, 0), MS);
        assert_eq!(sched.outstanding_latency(), 0);
        assert_eq!(sched.dispatch_next(), Some(RequestId(2)));
    }

    #[test]
    fn test_priority_lane_first() {
        let sched = scheduler(SchedConfig::default());
        submit(&sched, &Request::new(1, ReqOp::Read, 4096, 0));
        submit(&sched, &Request::new(2, ReqOp::Write, 4096, 0));

        let urgent = Request::new(3, ReqOp::Flush, 0, 100);
        assert!(sched.prepare_request(&urgent));
        sched.admit(&urgent, InsertFlags::AT_HEAD);
        assert!(!sched.host().is_hashed(urgent.id));

        assert_eq!(sched.dispatch_next(), Some(urgent.id));

        // Bypassing requests are not modeled
        sched.on_request_completed(&urgent.with_io_start(200), 5 * MS);
        assert!(!sched.model(OpType::Other).is_calibrated());
    }

    #[test]
    fn test_head_insertions_latest_first() {
        let sched = scheduler(SchedConfig::default());
        submit(&sched, &Request::new(1, ReqOp::Read, 4096, 0));

        let urgent: Vec<Request> = (10..13).map(|id| Request::new(id, ReqOp::Flush, 0, 0)).collect();
        sched.admit_bulk(&urgent, InsertFlags::AT_HEAD);
        sched.admit(&Request::new(20, ReqOp::Flush, 0, 0), InsertFlags::AT_HEAD);

        let order: Vec<u64> = core::iter::from_fn(|| sched.dispatch_next())
            .map(|id| id.raw())
            .collect();
        assert_eq!(order, [20, 12, 11, 10, 1]);
    }

    #[test]
    fn test_concurrent_admit_and_dispatch() {
        use core::sync::atomic::AtomicUsize;

        const SUBMITTERS: u64 = 4;
        const PER_SUBMITTER: u64 = 500;
        const TOTAL: usize = (SUBMITTERS * PER_SUBMITTER) as usize;

        let ops = [ReqOp::Read, ReqOp::Write, ReqOp::Discard, ReqOp::Flush];
        let describe = |id: u64| Request::new(id, ops[id as usize % ops.len()], 4096 * (1 + id % 3), id);

        let sched = scheduler(SchedConfig::default());
        calibrate(&sched, OpType::Read, 100_000);
        calibrate(&sched, OpType::Write, 300_000);
        let submitted = AtomicUsize::new(0);

        let dispatched = std::thread::scope(|scope| {
            for submitter in 0..SUBMITTERS {
                let sched = &sched;
                let submitted = &submitted;
                scope.spawn(move || {
                    for i in 0..PER_SUBMITTER {
                        let rq = describe(submitter * PER_SUBMITTER + i);
                        assert!(sched.prepare_request(&rq));
                        sched.admit(&rq, InsertFlags::empty());
                        submitted.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }

            let mut dispatched = Vec::with_capacity(TOTAL);
            while dispatched.len() < TOTAL {
                match sched.dispatch_next() {
                    Some(id) => {
                        dispatched.push(id);
                        let rq = describe(id.raw()).with_io_start(id.raw());
                        sched.on_request_completed(&rq, id.raw() + 500_000);
                        sched.on_request_finished(id);
                    },
                    None => {
                        assert!(
                            submitted.load(Ordering::SeqCst) < TOTAL || sched.has_pending_work(),
                            "dispatch stalled with nothing pending"
                        );
                        std::thread::yield_now();
                    },
                }
            }
            dispatched
        });

        let unique: BTreeSet<RequestId> = dispatched.iter().copied().collect();
        assert_eq!(dispatched.len(), TOTAL);
        assert_eq!(unique.len(), TOTAL);
        assert_eq!(sched.dispatch_next(), None);
        assert!(!sched.has_pending_work());
        assert_eq!(sched.outstanding_latency(), 0);
        assert_eq!(sched.tracked(), 0);
    }

    #[test]
    fn test_insert_merge_frees_request() {
        let sched = scheduler(SchedConfig::default());
        let survivor = Request::new(1, ReqOp::Write, 4096, 0);
        submit(&sched, &survivor);

        *sched.host().insert_merge_into.lock() = Some(survivor.with_io_start(0));
        let merged = Request::new(2, ReqOp::Write, 4096, 0);
        submit(&sched, &merged);

        assert_eq!(sched.queued(), 1);
        assert_eq!(*sched.host().freed.lock(), [merged.id]);
        assert!(sched.host().is_hashed(survivor.id));
    }

    #[test]
    fn test_front_merge_rekeys() {
        let sched = scheduler(SchedConfig::default());
        calibrate(&sched, OpType::Read, MS);
        sched.models[OpType::Read.index()].observe(8192, 2 * MS, MS, 0);
        sched.model(OpType::Read).update(0);
        assert!(sched.model(OpType::Read).slope() > 0);

        let rq = Request::new(1, ReqOp::Read, 4096, 0);
        submit(&sched, &rq);
        let before = sched.queue.lock().get(rq.id).copied().map(|e| e.deadline);

        let grown = Request { size: 64 * 1024, ..rq };
        let bio = MockBio {
            front: Some(grown),
            absorb: None,
        };
        assert!(sched.try_bio_merge(&bio));

        let after = sched.queue.lock().get(rq.id).copied();
        assert_eq!(after.map(|e| e.size), Some(64 * 1024));
        assert!(after.map(|e| e.deadline) > before);
        assert_eq!(sched.records.get(rq.id).map(|r| r.size), Some(64 * 1024));
    }

    #[test]
    fn test_bio_merge_absorbs_request() {
        let sched = scheduler(SchedConfig::default());
        let a = Request::new(1, ReqOp::Write, 4096, 0);
        let b = Request::new(2, ReqOp::Write, 4096, 0);
        submit(&sched, &a);
        submit(&sched, &b);

        let bio = MockBio {
            front: None,
            absorb: Some((a, b.id)),
        };
        assert!(sched.try_bio_merge(&bio));
        assert!(!sched.try_bio_merge(&MockBio::default()));

        assert_eq!(sched.queued(), 1);
        assert!(!sched.host().is_hashed(b.id));
        assert_eq!(*sched.host().freed.lock(), [b.id]);
    }

    #[test]
    fn test_cancel_staged_releases_latency() {
        let sched = scheduler(SchedConfig::default());
        calibrate(&sched, OpType::Read, MS);

        submit(&sched, &Request::new(1, ReqOp::Read, 4096, 0));
        submit(&sched, &Request::new(2, ReqOp::Read, 4096, 1));

        assert_eq!(sched.dispatch_next(), Some(RequestId(1)));
        assert_eq!(sched.staged(), 1);
        assert_eq!(sched.outstanding_latency(), 2 * MS);

        sched.remove_on_merge(RequestId(2));
        assert_eq!(sched.staged(), 0);
        assert_eq!(sched.outstanding_latency(), MS);
        assert_eq!(sched.dispatch_next(), None);
    }

    #[test]
    fn test_untracked_request_still_dispatched() {
        let sched = AdaptiveDeadlineScheduler::new(
            MockHost::new(),
            SchedConfig::default().with_record_capacity(1),
        )
        .unwrap();

        let tracked = Request::new(1, ReqOp::Read, 4096, 0);
        let untracked = Request::new(2, ReqOp::Read, 4096, 0);
        assert!(sched.prepare_request(&tracked));
        assert!(!sched.prepare_request(&untracked));
        sched.admit(&untracked, InsertFlags::empty());

        assert_eq!(sched.dispatch_next(), Some(untracked.id));
        sched.on_request_completed(&untracked.with_io_start(0), 3 * MS);
        assert!(!sched.model(OpType::Read).is_calibrated());
        assert_eq!(sched.outstanding_latency(), 0);
    }

    #[test]
    fn test_limit_depth() {
        let sched = scheduler(SchedConfig::default());
        let read = Request::new(1, ReqOp::Read, 4096, 0);
        let write = Request::new(2, ReqOp::Write, 4096, 0);
        let sync_write = write.with_flags(RequestFlags::SYNC);

        assert_eq!(sched.limit_depth(&read), None);
        assert_eq!(sched.limit_depth(&write), Some(64));
        assert_eq!(sched.limit_depth(&sync_write), Some(64));

        sched.configure_queue_depth(32);
        assert_eq!(sched.limit_depth(&write), Some(32));
    }

    #[test]
    fn test_update_timer_folds_models() {
        let sched = scheduler(SchedConfig::default());
        calibrate(&sched, OpType::Write, MS);

        for id in 0..10 {
            submit(&sched, &Request::new(id, ReqOp::Write, 4096, 0));
        }
        while let Some(id) = sched.dispatch_next() {
            let rq = Request::new(id.raw(), ReqOp::Write, 4096, 0).with_io_start(0);
            sched.on_request_completed(&rq, 3 * MS);
        }
        assert_eq!(sched.queued(), 0);
        assert_eq!(sched.host().armed.lock().len(), 1);
        assert_eq!(sched.model(OpType::Write).base(), MS);

        sched.host().set_clock(crate::model::UPDATE_INTERVAL_NS + 1);
        sched.on_update_timer();
        assert!(sched.model(OpType::Write).base() > MS);
    }

    #[test]
    fn test_shutdown_idempotent() {
        let sched = scheduler(SchedConfig::default());
        sched.admit(&Request::new(1, ReqOp::Flush, 0, 0), InsertFlags::AT_HEAD);
        sched.shutdown();
        sched.shutdown();
        assert!(sched.has_pending_work());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let result = AdaptiveDeadlineScheduler::new(
            MockHost::new(),
            SchedConfig::default().with_refill_ratio(150),
        );
        assert!(result.is_err());
    }
}
