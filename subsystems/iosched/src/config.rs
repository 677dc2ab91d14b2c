//! # Scheduler Configuration
//!
//! Per-instance knobs. A [`SchedConfig`] is created with the scheduler and
//! lives behind a read-mostly lock inside it; boot-time values can be pulled
//! from any [`ConfigProvider`].

use crate::error::{SchedError, SchedResult};
use crate::types::{Nanoseconds, OpType};

/// Nanoseconds per millisecond
pub const NSEC_PER_MSEC: u64 = 1_000_000;

/// Default latency target per class
pub const DEFAULT_LATENCY_TARGET: [Nanoseconds; OpType::COUNT] = [
    2 * NSEC_PER_MSEC,    // read
    750 * NSEC_PER_MSEC,  // write
    5000 * NSEC_PER_MSEC, // discard
    0,                    // other
];

/// Default batch limit per class
pub const DEFAULT_BATCH_LIMIT: [u32; OpType::COUNT] = [16, 8, 1, 1];

/// Default global latency window
pub const DEFAULT_LATENCY_WINDOW: Nanoseconds = 16 * NSEC_PER_MSEC;

/// Default refill trigger, percent of the latency window
pub const DEFAULT_REFILL_RATIO: u32 = 15;

/// Default capacity of the side record table
pub const DEFAULT_RECORD_CAPACITY: usize = 4096;

// =============================================================================
// CONFIG PROVIDER
// =============================================================================

/// Source of boot-time configuration values
pub trait ConfigProvider {
    /// Look up an unsigned value
    fn get_uint(&self, key: &str) -> Option<u64>;

    /// Look up an unsigned value with a fallback
    fn get_uint_or(&self, key: &str, default: u64) -> u64 {
        self.get_uint(key).unwrap_or(default)
    }
}

// =============================================================================
// SCHEDULER CONFIG
// =============================================================================

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedConfig {
    /// Latency target per class
    pub latency_target: [Nanoseconds; OpType::COUNT],
    /// Maximum requests of one class staged by a single fill pass
    pub batch_limit: [u32; OpType::COUNT],
    /// Budget of predicted latency staged ahead of dispatch
    pub global_latency_window: Nanoseconds,
    /// Refill once outstanding latency drops below this percentage of the window
    pub refill_ratio: u32,
    /// Maximum number of tracked requests
    pub record_capacity: usize,
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self {
            latency_target: DEFAULT_LATENCY_TARGET,
            batch_limit: DEFAULT_BATCH_LIMIT,
            global_latency_window: DEFAULT_LATENCY_WINDOW,
            refill_ratio: DEFAULT_REFILL_RATIO,
            record_capacity: DEFAULT_RECORD_CAPACITY,
        }
    }
}

impl SchedConfig {
    /// Build a configuration from a provider, falling back to defaults
    ///
    /// Keys follow the tunable names: `lat_target_<class>`,
    /// `batch_limit_<class>`, `global_latency_window`,
    /// `bq_refill_below_ratio` and `record_capacity`.
    pub fn load(provider: &dyn ConfigProvider) -> SchedResult<Self> {
        let mut config = Self::default();

        for op in OpType::ALL {
            let mut key = [0u8; 32];
            let target_key = compose_key(&mut key, "lat_target_", op.name());
            if let Some(ns) = provider.get_uint(target_key) {
                config.latency_target[op.index()] = ns;
            }

            let mut key = [0u8; 32];
            let limit_key = compose_key(&mut key, "batch_limit_", op.name());
            if let Some(limit) = provider.get_uint(limit_key) {
                config.batch_limit[op.index()] =
                    u32::try_from(limit).map_err(|_| SchedError::OutOfRange)?;
            }
        }

        config.global_latency_window =
            provider.get_uint_or("global_latency_window", config.global_latency_window);
        config.refill_ratio = u32::try_from(
            provider.get_uint_or("bq_refill_below_ratio", config.refill_ratio as u64),
        )
        .map_err(|_| SchedError::OutOfRange)?;
        config.record_capacity = usize::try_from(
            provider.get_uint_or("record_capacity", config.record_capacity as u64),
        )
        .map_err(|_| SchedError::OutOfRange)?;

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the scheduler cannot work with
    pub fn validate(&self) -> SchedResult<()> {
        if self.batch_limit.iter().any(|&limit| limit == 0) {
            return Err(SchedError::OutOfRange);
        }
        if self.refill_ratio > 100 {
            return Err(SchedError::OutOfRange);
        }
        if self.record_capacity == 0 {
            return Err(SchedError::OutOfRange);
        }
        Ok(())
    }

    /// Set the latency target of one class
    pub fn with_latency_target(mut self, op: OpType, target: Nanoseconds) -> Self {
        self.latency_target[op.index()] = target;
        self
    }

    /// Set the batch limit of one class
    pub fn with_batch_limit(mut self, op: OpType, limit: u32) -> Self {
        self.batch_limit[op.index()] = limit;
        self
    }

    /// Set the global latency window
    pub fn with_latency_window(mut self, window: Nanoseconds) -> Self {
        self.global_latency_window = window;
        self
    }

    /// Set the refill ratio
    pub fn with_refill_ratio(mut self, ratio: u32) -> Self {
        self.refill_ratio = ratio;
        self
    }

    /// Set the side record capacity
    pub fn with_record_capacity(mut self, capacity: usize) -> Self {
        self.record_capacity = capacity;
        self
    }

    /// Outstanding latency below which a new fill pass is started
    pub fn refill_threshold(&self) -> Nanoseconds {
        self.global_latency_window / 100 * self.refill_ratio as u64
            + self.global_latency_window % 100 * self.refill_ratio as u64 / 100
    }
}

/// Concatenate `prefix` and `name` into `buf` without allocating
fn compose_key<'a>(buf: &'a mut [u8; 32], prefix: &str, name: &str) -> &'a str {
    let len = prefix.len() + name.len();
    debug_assert!(len <= buf.len());
    buf[..prefix.len()].copy_from_slice(prefix.as_bytes());
    buf[prefix.len()..len].copy_from_slice(name.as_bytes());
    // Both halves are ASCII literals
    core::str::from_utf8(&buf[..len]).unwrap_or("")
}

// =============================================================================
// TESTS
// =============================================================================
