//! # Batch Pipeline
//!
//! Two alternating pages of per-class queues. A fill pass moves the
//! earliest-deadline requests out of the [`DeadlineIndex`] into the inactive
//! page, bounded by per-class batch limits and by a global budget of
//! predicted latency. Dispatch drains the active page and flips to the
//! pre-filled one once it runs dry.
//!
//! ```text
//!   DeadlineIndex ──fill──▶ page[inactive] ─┐
//!                                           │ flip when active page is empty
//!   dispatch ◀── page[active] ◀─────────────┘
//! ```

use alloc::collections::VecDeque;

use static_assertions::const_assert_eq;

use super::deadline::{DeadlineIndex, IndexedRequest};
use crate::config::DEFAULT_BATCH_LIMIT;
use crate::model::LatencyModel;
use crate::types::{Nanoseconds, OpType, RequestId};

/// Number of alternating pages
pub const BATCH_PAGES: usize = 2;

const_assert_eq!(BATCH_PAGES, 2);

// =============================================================================
// BATCH PAGE
// =============================================================================

/// One staging buffer
#[derive(Debug)]
struct BatchPage {
    queues: [VecDeque<IndexedRequest>; OpType::COUNT],
    counts: [u32; OpType::COUNT],
}

impl BatchPage {
    fn new() -> Self {
        Self {
            queues: core::array::from_fn(|op| VecDeque::with_capacity(DEFAULT_BATCH_LIMIT[op] as usize)),
            counts: [0; OpType::COUNT],
        }
    }

    fn is_empty(&self) -> bool {
        self.queues.iter().all(|queue| queue.is_empty())
    }

    fn len(&self) -> usize {
        self.queues.iter().map(|queue| queue.len()).sum()
    }

    /// Next request in class priority order
    fn pop(&mut self) -> Option<IndexedRequest> {
        self.queues.iter_mut().find_map(|queue| queue.pop_front())
    }

    fn remove(&mut self, id: RequestId) -> Option<IndexedRequest> {
        for queue in &mut self.queues {
            if let Some(pos) = queue.iter().position(|staged| staged.id == id) {
                return queue.remove(pos);
            }
        }
        None
    }
}

// =============================================================================
// FILL REPORT
// =============================================================================

/// Outcome of a fill pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillReport {
    /// Requests staged
    pub count: u32,
    /// Requests staged per class
    pub per_type: [u32; OpType::COUNT],
    /// Predicted latency of the staged tracked requests
    pub staged_lat: Nanoseconds,
}

/// Largest batches seen so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Largest per-class batch
    pub max_per_type: [u32; OpType::COUNT],
    /// Largest total batch
    pub max_total: u32,
}

// =============================================================================
// BATCH PIPELINE
// =============================================================================

/// Double buffered staging area between the deadline index and dispatch
#[derive(Debug)]
pub struct BatchPipeline {
    pages: [BatchPage; BATCH_PAGES],
    active: usize,
    more_ready: bool,
    stats: BatchStats,
}

impl BatchPipeline {
    /// Create an empty pipeline
    pub fn new() -> Self {
        Self {
            pages: [BatchPage::new(), BatchPage::new()],
            active: 0,
            more_ready: false,
            stats: BatchStats::default(),
        }
    }

    #[inline(always)]
    fn inactive(&self) -> usize {
        (self.active + 1) % BATCH_PAGES
    }

    /// Is the inactive page filled and waiting?
    pub fn more_ready(&self) -> bool {
        self.more_ready
    }

    /// Should a fill pass run before serving?
    pub fn needs_refill(&self, outstanding: Nanoseconds, threshold: Nanoseconds) -> bool {
        !self.more_ready && (outstanding == 0 || outstanding < threshold)
    }

    /// Stage the earliest requests of `index` into the inactive page
    ///
    /// The first request is always taken. After that the pass stops at the
    /// first request whose class has no calibrated model, whose class batch
    /// limit is reached, or whose predicted latency would push the running
    /// total (starting at `outstanding`) past `window`. `on_stage` sees each
    /// request as it leaves the index.
    pub fn fill(
        &mut self,
        index: &mut DeadlineIndex,
        models: &[LatencyModel; OpType::COUNT],
        batch_limit: &[u32; OpType::COUNT],
        window: Nanoseconds,
        outstanding: Nanoseconds,
        mut on_stage: impl FnMut(&IndexedRequest),
    ) -> FillReport {
        let page_idx = self.inactive();
        let page = &mut self.pages[page_idx];
        debug_assert!(page.is_empty(), "filling a page that still holds requests");
        page.counts = [0; OpType::COUNT];

        let mut report = FillReport::default();
        let mut current_lat = outstanding;

        while let Some(entry) = index.peek_earliest().copied() {
            let op = entry.op.index();
            current_lat = current_lat.saturating_add(entry.pred_lat);

            if report.count > 0
                && (!models[op].is_calibrated()
                    || page.counts[op] >= batch_limit[op]
                    || current_lat > window)
            {
                break;
            }

            index.remove(entry.id);
            on_stage(&entry);
            log::trace!(
                "staged {:?} ({}) deadline {} pred {}",
                entry.id,
                entry.op.name(),
                entry.deadline,
                entry.pred_lat
            );

            page.queues[op].push_back(entry);
            page.counts[op] += 1;
            if entry.tracked {
                report.staged_lat = report.staged_lat.saturating_add(entry.pred_lat);
            }
            report.per_type[op] += 1;
            report.count += 1;
        }

        if report.count > 0 {
            self.more_ready = true;
            for op in OpType::ALL {
                let i = op.index();
                self.stats.max_per_type[i] = self.stats.max_per_type[i].max(report.per_type[i]);
            }
            self.stats.max_total = self.stats.max_total.max(report.count);
        }

        report
    }

    /// Take the next request to dispatch
    ///
    /// Classes are served Read, Write, Discard, Other. When the active page
    /// is exhausted and the other page is ready, the pages flip.
    pub fn pop_next(&mut self) -> Option<IndexedRequest> {
        loop {
            if let Some(entry) = self.pages[self.active].pop() {
                return Some(entry);
            }
            if !self.more_ready {
                return None;
            }
            self.flip();
        }
    }

    fn flip(&mut self) {
        self.more_ready = false;
        self.active = self.inactive();
    }

    /// Remove a staged request before dispatch
    pub fn cancel(&mut self, id: RequestId) -> Option<IndexedRequest> {
        let active = self.active;
        let inactive = self.inactive();
        self.pages[active]
            .remove(id)
            .or_else(|| self.pages[inactive].remove(id))
    }

    /// Is there anything to dispatch?
    pub fn has_work(&self) -> bool {
        !self.pages[self.active].is_empty() || self.more_ready
    }

    /// Requests staged across both pages
    pub fn staged(&self) -> usize {
        self.pages.iter().map(|page| page.len()).sum()
    }

    /// High-water marks
    pub fn stats(&self) -> BatchStats {
        self.stats
    }

    /// Clear the high-water marks
    pub fn reset_stats(&mut self) {
        self.stats = BatchStats::default();
    }
}

impl Default for BatchPipeline {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// TESTS
// =============================================================================
