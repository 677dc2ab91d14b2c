//! Latency histograms and percentile trimming.

use static_assertions::const_assert;

/// Number of slots in each histogram
pub const LAT_BUCKET_COUNT: usize = 64;

const_assert!(LAT_BUCKET_COUNT > 40);

/// One histogram slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyBucket {
    /// Samples that landed in this slot
    pub count: u64,
    /// Sum of their measured latency
    pub sum_latency: u64,
    /// Sum of their request sizes (large histogram only)
    pub sum_size: u64,
}

/// Trimmed aggregate of one histogram
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrimmedSums {
    /// Samples retained below the percentile cutoff
    pub count: u64,
    /// Latency of the retained samples
    pub latency: u64,
    /// Size of the retained samples
    pub size: u64,
}

/// Fixed-size latency histogram
#[derive(Debug, Clone)]
pub struct Histogram {
    buckets: [LatencyBucket; LAT_BUCKET_COUNT],
}

impl Histogram {
    /// Create an empty histogram
    pub const fn new() -> Self {
        Self {
            buckets: [LatencyBucket {
                count: 0,
                sum_latency: 0,
                sum_size: 0,
            }; LAT_BUCKET_COUNT],
        }
    }

    /// Slot for a measurement relative to a reference latency
    ///
    /// Resolution is 1/20 of the reference below 2x, 1/10 up to 5x and 1/3
    /// beyond; everything past the end lands in the last slot.
    pub fn bucket_index(measured: u64, reference: u64) -> usize {
        let reference = reference.max(1);
        let index = if measured < reference.saturating_mul(2) {
            measured.saturating_mul(20) / reference
        } else if measured < reference.saturating_mul(5) {
            measured.saturating_mul(10) / reference + 20
        } else {
            measured.saturating_mul(3) / reference + 40
        };
        (index as usize).min(LAT_BUCKET_COUNT - 1)
    }

    /// Record one sample
    pub fn record(&mut self, index: usize, latency: u64, size: u64) {
        let bucket = &mut self.buckets[index.min(LAT_BUCKET_COUNT - 1)];
        bucket.count += 1;
        bucket.sum_latency = bucket.sum_latency.saturating_add(latency);
        bucket.sum_size = bucket.sum_size.saturating_add(size);
    }

    /// Total number of samples
    pub fn total(&self) -> u64 {
        self.buckets.iter().map(|b| b.count).sum()
    }

    /// Access one slot
    pub fn bucket(&self, index: usize) -> &LatencyBucket {
        &self.buckets[index]
    }

    /// Drop all samples
    pub fn clear(&mut self) {
        self.buckets = [LatencyBucket::default(); LAT_BUCKET_COUNT];
    }

    /// Aggregate the lowest `percentile` percent of samples
    ///
    /// Slots are walked in increasing latency order. The slot that crosses
    /// the cutoff contributes only the share of its sums matching the samples
    /// still needed, so the result is not quantized to slot boundaries.
    pub fn trimmed(&self, percentile: u64) -> TrimmedSums {
        let total = self.total();
        let threshold = total * percentile / 100;

        let mut sums = TrimmedSums::default();
        let mut cumulative = 0u64;

        for bucket in &self.buckets {
            let before = cumulative;
            cumulative += bucket.count;

            if cumulative < threshold {
                sums.count += bucket.count;
                sums.latency = sums.latency.saturating_add(bucket.sum_latency);
                sums.size = sums.size.saturating_add(bucket.sum_size);
                continue;
            }

            let remaining = threshold - before;
            if bucket.count > 0 {
                sums.count += remaining;
                sums.latency = sums
                    .latency
                    .saturating_add(proportion(bucket.sum_latency, remaining, bucket.count));
                sums.size = sums
                    .size
                    .saturating_add(proportion(bucket.sum_size, remaining, bucket.count));
            }
            break;
        }

        sums
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

/// `value * numerator / denominator` without intermediate overflow
fn proportion(value: u64, numerator: u64, denominator: u64) -> u64 {
    ((value as u128 * numerator as u128) / denominator as u128) as u64
}

// =============================================================================
// TESTS
// =============================================================================
