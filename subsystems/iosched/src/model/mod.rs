//! # Latency Model
//!
//! Online, per-class estimate of request latency as a function of size:
//!
//! ```text
//!   predict(size) = base                                       size <= 4 KiB
//!                 = base + slope * ceil((size - 4 KiB) / 1 KiB) otherwise
//! ```
//!
//! Completions are binned into two histograms, one for small requests
//! (feeding `base`) and one for large requests (feeding `slope`). A periodic
//! fold trims the slowest 1% of each histogram and adds the rest to running
//! accumulators, which lose a quarter of their weight once they grow large so
//! recent behaviour keeps dominating.
//!
//! Sample ingestion and folding use separate locks so completions never wait
//! for an aggregation pass. `base` and `slope` are published through atomics;
//! zero means "not calibrated yet".

mod histogram;

pub use histogram::{Histogram, LatencyBucket, TrimmedSums, LAT_BUCKET_COUNT};

use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::config::NSEC_PER_MSEC;
use crate::types::Nanoseconds;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Requests up to this size feed `base`, larger ones feed `slope`
pub const BLOCK_SIZE_THRESHOLD: u64 = 4096;

/// Pending samples that force a fold before the interval elapses
pub const SAMPLES_THRESHOLD: u64 = 1024;

/// Minimum time between regular folds
pub const UPDATE_INTERVAL_NS: Nanoseconds = 1500 * NSEC_PER_MSEC;

/// Percentile of samples retained by a fold
pub const OUTLIER_PERCENTILE: u64 = 99;

/// Shrink the small accumulators past this many requests
const SHRINK_AT_REQUESTS: u64 = 10 * 1_000_000;

/// Shrink the large accumulators past this many bytes
const SHRINK_AT_BYTES: u64 = 100 * (1 << 30);

/// Accumulators keep `1 - 2^-SHRINK_RESIST` of their value when shrunk
const SHRINK_RESIST: u32 = 2;

// =============================================================================
// STATE
// =============================================================================

/// Running accumulators behind `base` and `slope`
#[derive(Debug, Clone, Copy, Default)]
struct Accumulators {
    small_sum_delay: u64,
    small_count: u64,
    large_sum_delay: u64,
    large_sum_size: u64,
    last_update_ns: Nanoseconds,
}

/// Sample histograms
#[derive(Debug, Clone, Default)]
struct Histograms {
    small: Histogram,
    large: Histogram,
}

/// Published model parameters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelSnapshot {
    /// Latency of a small request (ns)
    pub base: u64,
    /// Additional latency per KiB above the threshold (ns)
    pub slope: u64,
}

/// What a fold pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FoldReport {
    /// Small histogram was folded into `base`
    pub small: bool,
    /// Large histogram was folded into `slope`
    pub large: bool,
}

// =============================================================================
// LATENCY MODEL
// =============================================================================

/// Latency model for one operation class
#[derive(Debug)]
pub struct LatencyModel {
    base: AtomicU64,
    slope: AtomicU64,
    params: Mutex<Accumulators>,
    buckets: Mutex<Histograms>,
}

impl LatencyModel {
    /// Create an uncalibrated model
    pub fn new(now: Nanoseconds) -> Self {
        Self {
            base: AtomicU64::new(0),
            slope: AtomicU64::new(0),
            params: Mutex::new(Accumulators {
                last_update_ns: now,
                ..Accumulators::default()
            }),
            buckets: Mutex::new(Histograms::default()),
        }
    }

    /// Current `base`
    #[inline]
    pub fn base(&self) -> u64 {
        self.base.load(Ordering::Acquire)
    }

    /// Current `slope`
    #[inline]
    pub fn slope(&self) -> u64 {
        self.slope.load(Ordering::Acquire)
    }

    /// Has `base` been calibrated?
    #[inline]
    pub fn is_calibrated(&self) -> bool {
        self.base() != 0
    }

    /// Published parameters
    pub fn snapshot(&self) -> ModelSnapshot {
        let _params = self.params.lock();
        ModelSnapshot {
            base: self.base(),
            slope: self.slope(),
        }
    }

    /// Predicted latency for a request of `size` bytes
    pub fn predict(&self, size: u64) -> Nanoseconds {
        let mut latency = self.base();
        if size > BLOCK_SIZE_THRESHOLD {
            let kib = (size - BLOCK_SIZE_THRESHOLD).div_ceil(1024);
            latency = latency.saturating_add(self.slope().saturating_mul(kib));
        }
        latency
    }

    /// Feed one completion into the model
    ///
    /// `predicted` is the latency that was predicted for this request when it
    /// was admitted. Large samples are ignored until both `base` and the
    /// prediction are non-zero. The first small sample of an uncalibrated
    /// model folds immediately so prediction starts with the very first
    /// completion.
    pub fn observe(&self, size: u64, measured: Nanoseconds, predicted: Nanoseconds, now: Nanoseconds) {
        let mut buckets = self.buckets.lock();
        // Read outside the parameter lock; a stale value only mis-bins one sample
        let base = self.base();

        if size <= BLOCK_SIZE_THRESHOLD {
            let index = Histogram::bucket_index(measured, base.max(1));
            buckets.small.record(index, measured, 0);

            if base == 0 {
                drop(buckets);
                self.update(now);
            }
            return;
        }

        if base == 0 || predicted == 0 {
            return;
        }

        let index = Histogram::bucket_index(measured, predicted);
        buckets.large.record(index, measured, size);
    }

    /// Fold pending samples into `base` and `slope` when due
    ///
    /// A histogram is folded when the update interval has elapsed, when it
    /// holds at least [`SAMPLES_THRESHOLD`] samples, or when its parameter is
    /// still uncalibrated (in which case nothing is trimmed). The small fold
    /// runs first and the refreshed `base` is used as the intercept of the
    /// large fold in the same pass.
    pub fn update(&self, now: Nanoseconds) -> FoldReport {
        let mut params = self.params.lock();
        let mut report = FoldReport::default();

        let base = self.base();
        let slope = self.slope();
        let time_elapsed =
            base == 0 || params.last_update_ns.saturating_add(UPDATE_INTERVAL_NS) <= now;

        {
            let mut buckets = self.buckets.lock();

            let small_count = buckets.small.total();
            if small_count > 0 && (time_elapsed || small_count >= SAMPLES_THRESHOLD || base == 0) {
                fold_small(&mut params, &buckets.small, base == 0);
                buckets.small.clear();
                report.small = true;

                if params.small_count > 0 {
                    let new_base = params.small_sum_delay / params.small_count;
                    if base == 0 && new_base != 0 {
                        log::debug!("latency model calibrated: base {} ns", new_base);
                    }
                    self.base.store(new_base, Ordering::Release);
                }
            }

            let large_count = buckets.large.total();
            if large_count > 0 && (time_elapsed || large_count >= SAMPLES_THRESHOLD || slope == 0) {
                fold_large(&mut params, &buckets.large, self.base(), slope == 0);
                buckets.large.clear();
                report.large = true;
            }
        }

        if report.large && params.large_sum_size > 0 {
            let new_slope = params.large_sum_delay / params.large_sum_size.div_ceil(1024);
            if slope == 0 && new_slope != 0 {
                log::debug!("latency model calibrated: slope {} ns/KiB", new_slope);
            }
            self.slope.store(new_slope, Ordering::Release);
        }

        if time_elapsed {
            params.last_update_ns = now;
        }

        report
    }

    /// Forget `base` so the next small sample recalibrates it
    pub fn reset_base(&self) {
        let _params = self.params.lock();
        self.base.store(0, Ordering::Release);
    }

    /// Return to the uncalibrated state
    pub fn reset(&self) {
        let mut params = self.params.lock();
        let last_update_ns = params.last_update_ns;
        *params = Accumulators {
            last_update_ns,
            ..Accumulators::default()
        };
        self.base.store(0, Ordering::Release);
        self.slope.store(0, Ordering::Release);
    }

    /// Samples waiting for the next fold (small, large)
    pub fn pending_samples(&self) -> (u64, u64) {
        let buckets = self.buckets.lock();
        (buckets.small.total(), buckets.large.total())
    }
}

/// Fold the small histogram into the `base` accumulators
fn fold_small(params: &mut Accumulators, hist: &Histogram, count_all: bool) {
    let percentile = if count_all { 100 } else { OUTLIER_PERCENTILE };
    let sums = hist.trimmed(percentile);

    if params.small_count >= SHRINK_AT_REQUESTS && params.small_count >> SHRINK_RESIST != 0 {
        params.small_sum_delay -= params.small_sum_delay >> SHRINK_RESIST;
        params.small_count -= params.small_count >> SHRINK_RESIST;
    }

    params.small_sum_delay = params.small_sum_delay.saturating_add(sums.latency);
    params.small_count = params.small_count.saturating_add(sums.count);
}

/// Fold the large histogram into the `slope` accumulators
fn fold_large(params: &mut Accumulators, hist: &Histogram, base: u64, count_all: bool) {
    let percentile = if count_all { 100 } else { OUTLIER_PERCENTILE };
    let sums = hist.trimmed(percentile);

    if params.large_sum_size >= SHRINK_AT_BYTES && params.large_sum_size >> SHRINK_RESIST != 0 {
        params.large_sum_delay -= params.large_sum_delay >> SHRINK_RESIST;
        params.large_sum_size -= params.large_sum_size >> SHRINK_RESIST;
    }

    // Strip the fixed per-request cost, leaving the size dependent part.
    // Samples no slower than `base` are accumulated as they are.
    let intercept = base.saturating_mul(sums.count);
    let delay = if sums.latency > intercept {
        sums.latency - intercept
    } else {
        sums.latency
    };

    params.large_sum_delay = params.large_sum_delay.saturating_add(delay);
    params.large_sum_size = params.large_sum_size.saturating_add(sums.size);
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const MS: u64 = NSEC_PER_MSEC;

    #[test]
    fn test_uncalibrated_predicts_zero() {
        let model = LatencyModel::new(0);
        assert!(!model.is_calibrated());
        assert_eq!(model.predict(4096), 0);
        assert_eq!(model.predict(1 << 20), 0);
    }

    #[test]
    fn test_first_sample_bootstraps_base() {
        let model = LatencyModel::new(0);
        model.observe(4096, 3 * MS, 0, 10);

        assert_eq!(model.base(), 3 * MS);
        assert_eq!(model.predict(512), 3 * MS);
        assert_eq!(model.pending_samples(), (0, 0));
    }

    #[test]
    fn test_large_samples_skipped_until_calibrated() {
        let model = LatencyModel::new(0);
        model.observe(64 * 1024, 5 * MS, MS, 10);
        assert_eq!(model.pending_samples(), (0, 0));

        model.observe(4096, MS, 0, 10);
        model.observe(64 * 1024, 5 * MS, 0, 10);
        assert_eq!(model.pending_samples(), (0, 0));
    }

    #[test]
    fn test_fold_waits_for_interval() {
        let model = LatencyModel::new(0);
        model.observe(4096, 100_000, 0, 0);

        for _ in 0..10 {
            model.observe(4096, 200_000, 100_000, 1_000);
        }
        let report = model.update(1_000);
        assert!(!report.small);
        assert_eq!(model.base(), 100_000);
        assert_eq!(model.pending_samples(), (10, 0));

        let report = model.update(UPDATE_INTERVAL_NS + 1_000);
        assert!(report.small);
        assert!(model.base() > 100_000);
        assert_eq!(model.pending_samples(), (0, 0));
    }

    #[test]
    fn test_sample_threshold_forces_fold() {
        let model = LatencyModel::new(0);
        model.observe(4096, 100_000, 0, 0);

        for _ in 0..SAMPLES_THRESHOLD {
            model.observe(4096, 100_000, 100_000, 1);
        }
        assert!(model.update(2).small);
    }

    #[test]
    fn test_base_converges_to_constant_latency() {
        let model = LatencyModel::new(0);
        model.observe(4096, 7 * MS, 0, 0);
        model.reset();
        assert!(!model.is_calibrated());

        let mut now = 0;
        for round in 0..5 {
            for _ in 0..2000 {
                model.observe(2048, 2 * MS, model.predict(2048), now);
            }
            now += UPDATE_INTERVAL_NS;
            model.update(now);
            assert_eq!(model.base(), 2 * MS, "round {}", round);
        }
    }

    #[test]
    fn test_slope_calibration() {
        let model = LatencyModel::new(0);
        model.observe(4096, 100_000, 0, 0);
        assert_eq!(model.base(), 100_000);

        // 8 KiB requests costing 40 us above base
        for _ in 0..100 {
            model.observe(8192, 140_000, model.predict(8192), 1);
        }
        let report = model.update(2);
        assert!(report.large);

        // 100 * 40 us spread over 100 * 8 KiB
        assert_eq!(model.slope(), 5_000);
        assert_eq!(model.predict(8192), 100_000 + 4 * 5_000);
    }

    #[test]
    fn test_fast_large_requests_keep_full_delay() {
        let model = LatencyModel::new(0);
        model.observe(4096, 100_000, 0, 0);

        // 8 KiB requests finishing faster than base
        for _ in 0..100 {
            model.observe(8192, 50_000, model.predict(8192), 1);
        }
        assert!(model.update(2).large);

        // 100 * 50 us over 800 KiB
        assert_eq!(model.slope(), 6_250);
        let params = *model.params.lock();
        assert_eq!(params.large_sum_delay, 5_000_000);
        assert_eq!(params.large_sum_size, 819_200);
    }

    #[test]
    fn test_predict_monotonic_above_threshold() {
        let model = LatencyModel::new(0);
        model.observe(4096, 100_000, 0, 0);
        for _ in 0..50 {
            model.observe(16384, 300_000, model.predict(16384), 1);
        }
        model.update(2);
        assert!(model.slope() > 0);

        let mut last = 0;
        let mut size = BLOCK_SIZE_THRESHOLD + 1;
        while size < 4 << 20 {
            let predicted = model.predict(size);
            assert!(predicted >= last);
            last = predicted;
            size += 777;
        }
    }

    #[test]
    fn test_outliers_trimmed_after_calibration() {
        let model = LatencyModel::new(0);
        model.observe(4096, 1_000_000, 0, 0);

        for _ in 0..99 {
            model.observe(4096, 1_000_000, 1_000_000, 1);
        }
        model.observe(4096, 900_000_000, 1_000_000, 1);
        model.update(UPDATE_INTERVAL_NS + 1);

        assert_eq!(model.base(), 1_000_000);
    }

    #[test]
    fn test_shrink_keeps_average() {
        let model = LatencyModel::new(0);
        model.observe(4096, 1_000, 0, 0);
        {
            let mut params = model.params.lock();
            params.small_count = SHRINK_AT_REQUESTS;
            params.small_sum_delay = SHRINK_AT_REQUESTS * 1_000;
        }

        for _ in 0..100 {
            model.observe(4096, 1_000, 1_000, 1);
        }
        model.update(UPDATE_INTERVAL_NS + 1);

        let params = *model.params.lock();
        assert!(params.small_count < SHRINK_AT_REQUESTS);
        assert_eq!(model.base(), 1_000);
    }

    #[test]
    fn test_reset() {
        let model = LatencyModel::new(0);
        model.observe(4096, 5_000, 0, 0);
        assert!(model.is_calibrated());

        model.reset_base();
        assert_eq!(model.base(), 0);

        model.observe(4096, 5_000, 0, 1);
        assert!(model.is_calibrated());

        model.reset();
        assert_eq!(model.snapshot(), ModelSnapshot::default());
    }
}
