//! # Runtime Tunables
//!
//! Text knobs exposed per scheduler instance. Values are plain decimal
//! numbers; surrounding whitespace, including a trailing newline, is ignored.
//! A rejected store leaves the previous value in place.
//!
//! | Name | Access | Meaning |
//! |------|--------|---------|
//! | `batch_actual_max` | RO | Largest batches staged so far |
//! | `bq_refill_below_ratio` | RW | Refill threshold, percent of the window |
//! | `global_latency_window` | RW | Staged latency budget (ns) |
//! | `batch_limit_<class>` | RW | Per-class batch limit, at least 1 |
//! | `lat_model_<class>` | RO | Model `base` and `slope` |
//! | `lat_target_<class>` | RW | Latency target (ns); recalibrates `base` |
//! | `reset_bq_stats` | WO | Write `1` to clear batch high-water marks |
//! | `reset_lat_model` | WO | Write `1` to reset every latency model |
//! | `adios_version` | RO | Scheduler version |

use alloc::format;
use alloc::string::String;

use bitflags::bitflags;

use crate::error::{SchedError, SchedResult};
use crate::host::BlockQueue;
use crate::scheduler::AdaptiveDeadlineScheduler;
use crate::types::OpType;
use crate::VERSION;

bitflags! {
    /// What a tunable supports
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TunableAccess: u8 {
        /// Can be shown
        const READ  = 1 << 0;
        /// Can be stored
        const WRITE = 1 << 1;
    }
}

/// A runtime tunable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tunable {
    /// Largest batches staged so far
    BatchActualMax,
    /// Refill threshold, percent of the latency window
    RefillBelowRatio,
    /// Staged latency budget
    GlobalLatencyWindow,
    /// Per-class batch limit
    BatchLimit(OpType),
    /// Per-class model parameters
    LatModel(OpType),
    /// Per-class latency target
    LatTarget(OpType),
    /// Clear batch high-water marks
    ResetBqStats,
    /// Reset every latency model
    ResetLatModel,
    /// Scheduler version
    Version,
}

/// Every tunable by name
pub const TUNABLES: [(&str, Tunable); 15] = [
    ("batch_actual_max", Tunable::BatchActualMax),
    ("bq_refill_below_ratio", Tunable::RefillBelowRatio),
    ("global_latency_window", Tunable::GlobalLatencyWindow),
    ("batch_limit_read", Tunable::BatchLimit(OpType::Read)),
    ("batch_limit_write", Tunable::BatchLimit(OpType::Write)),
    ("batch_limit_discard", Tunable::BatchLimit(OpType::Discard)),
    ("lat_model_read", Tunable::LatModel(OpType::Read)),
    ("lat_model_write", Tunable::LatModel(OpType::Write)),
    ("lat_model_discard", Tunable::LatModel(OpType::Discard)),
    ("lat_target_read", Tunable::LatTarget(OpType::Read)),
    ("lat_target_write", Tunable::LatTarget(OpType::Write)),
    ("lat_target_discard", Tunable::LatTarget(OpType::Discard)),
    ("reset_bq_stats", Tunable::ResetBqStats),
    ("reset_lat_model", Tunable::ResetLatModel),
    ("adios_version", Tunable::Version),
];

impl Tunable {
    /// Look up a tunable by name
    pub fn from_name(name: &str) -> Option<Self> {
        TUNABLES
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|&(_, tunable)| tunable)
    }

    /// Name of the tunable
    pub fn name(self) -> &'static str {
        TUNABLES
            .iter()
            .find(|&&(_, tunable)| tunable == self)
            .map(|&(name, _)| name)
            .unwrap_or("")
    }

    /// Supported operations
    pub fn access(self) -> TunableAccess {
        match self {
            Tunable::BatchActualMax | Tunable::LatModel(_) | Tunable::Version => TunableAccess::READ,
            Tunable::ResetBqStats | Tunable::ResetLatModel => TunableAccess::WRITE,
            _ => TunableAccess::READ | TunableAccess::WRITE,
        }
    }
}

fn parse_u64(input: &str) -> SchedResult<u64> {
    input.trim().parse::<u64>().map_err(|_| SchedError::Parse)
}

/// Reset actions only accept the value 1
fn parse_trigger(input: &str) -> SchedResult<()> {
    match parse_u64(input)? {
        1 => Ok(()),
        _ => Err(SchedError::OutOfRange),
    }
}

// =============================================================================
// SHOW / STORE
// =============================================================================

impl<H: BlockQueue> AdaptiveDeadlineScheduler<H> {
    /// Render a tunable by name
    pub fn show(&self, name: &str) -> SchedResult<String> {
        let tunable = Tunable::from_name(name).ok_or(SchedError::UnknownTunable)?;
        self.show_tunable(tunable)
    }

    /// Parse and apply a tunable by name
    pub fn store(&self, name: &str, input: &str) -> SchedResult<()> {
        let tunable = Tunable::from_name(name).ok_or(SchedError::UnknownTunable)?;
        self.store_tunable(tunable, input)
    }

    /// Render a tunable
    pub fn show_tunable(&self, tunable: Tunable) -> SchedResult<String> {
        if !tunable.access().contains(TunableAccess::READ) {
            return Err(SchedError::NotReadable);
        }

        let text = match tunable {
            Tunable::BatchActualMax => {
                let stats = self.batch_stats();
                format!(
                    "Total  : {}\nDiscard: {}\nRead   : {}\nWrite  : {}\n",
                    stats.max_total,
                    stats.max_per_type[OpType::Discard.index()],
                    stats.max_per_type[OpType::Read.index()],
                    stats.max_per_type[OpType::Write.index()]
                )
            },
            Tunable::RefillBelowRatio => format!("{}\n", self.config.read().refill_ratio),
            Tunable::GlobalLatencyWindow => {
                format!("{}\n", self.config.read().global_latency_window)
            },
            Tunable::BatchLimit(op) => format!("{}\n", self.config.read().batch_limit[op.index()]),
            Tunable::LatModel(op) => {
                let snapshot = self.model_snapshot(op);
                format!("base : {} ns\nslope: {} ns/KiB\n", snapshot.base, snapshot.slope)
            },
            Tunable::LatTarget(op) => {
                format!("{}\n", self.config.read().latency_target[op.index()])
            },
            Tunable::Version => format!("{}\n", VERSION),
            Tunable::ResetBqStats | Tunable::ResetLatModel => return Err(SchedError::NotReadable),
        };
        Ok(text)
    }

    /// Parse and apply a tunable
    pub fn store_tunable(&self, tunable: Tunable, input: &str) -> SchedResult<()> {
        if !tunable.access().contains(TunableAccess::WRITE) {
            return Err(SchedError::NotWritable);
        }

        match tunable {
            Tunable::RefillBelowRatio => {
                let ratio = input.trim().parse::<i64>().map_err(|_| SchedError::Parse)?;
                let ratio = u32::try_from(ratio)
                    .ok()
                    .filter(|&ratio| ratio <= 100)
                    .ok_or(SchedError::OutOfRange)?;
                self.config.write().refill_ratio = ratio;
            },
            Tunable::GlobalLatencyWindow => {
                self.config.write().global_latency_window = parse_u64(input)?;
            },
            Tunable::BatchLimit(op) => {
                let limit = u32::try_from(parse_u64(input)?)
                    .ok()
                    .filter(|&limit| limit != 0)
                    .ok_or(SchedError::OutOfRange)?;
                self.config.write().batch_limit[op.index()] = limit;
            },
            Tunable::LatTarget(op) => {
                let target = parse_u64(input)?;
                self.config.write().latency_target[op.index()] = target;
                // Recalibrate against the new target
                self.models[op.index()].reset_base();
            },
            Tunable::ResetBqStats => {
                parse_trigger(input)?;
                self.batch.lock().reset_stats();
            },
            Tunable::ResetLatModel => {
                parse_trigger(input)?;
                for model in &self.models {
                    model.reset();
                }
            },
            Tunable::BatchActualMax | Tunable::LatModel(_) | Tunable::Version => {
                return Err(SchedError::NotWritable);
            },
        }

        log::debug!("tunable {} <- {}", tunable.name(), input.trim());
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
