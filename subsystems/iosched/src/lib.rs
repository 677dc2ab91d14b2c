//! # Helix Adaptive I/O Scheduler
//!
//! A deadline scheduler for block queues that learns how long requests take.
//! Each request gets a deadline of `arrival + target[class] + predicted`,
//! where the prediction comes from an online, outlier-trimmed latency model
//! per operation class. Dispatch pre-selects batches of the earliest
//! deadlines, sized by a budget of predicted latency rather than a count.
//!
//! ## Components
//!
//! - **Latency Model**: `base + slope * KiB` regression fed by completions
//! - **Deadline Index**: requests ordered by deadline, grouped on equal keys
//! - **Priority Lane**: head insertions that bypass deadline ordering
//! - **Batch Pipeline**: double buffered staging ahead of dispatch
//! - **Scheduler**: request lifecycle on top of a host [`BlockQueue`]
//!
//! ## Host Contract
//!
//! The host owns requests and drives the scheduler:
//!
//! ```text
//!   prepare_request → admit / admit_bulk → dispatch_next
//!        → on_request_completed → on_request_finished
//! ```
//!
//! and fires [`AdaptiveDeadlineScheduler::on_update_timer`] whenever a
//! timer armed through [`BlockQueue::arm_timer`] expires.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod config;
pub mod error;
pub mod host;
pub mod model;
pub mod queue;
pub mod records;
pub mod scheduler;
pub mod timer;
pub mod tunables;
pub mod types;

#[cfg(test)]
mod mock;

pub use config::{ConfigProvider, SchedConfig};
pub use error::{SchedError, SchedResult};
pub use host::{BioMerge, BlockQueue, MergeKind, MergeSink};
pub use model::{LatencyModel, ModelSnapshot};
pub use scheduler::AdaptiveDeadlineScheduler;
pub use tunables::{Tunable, TunableAccess, TUNABLES};
pub use types::{InsertFlags, Nanoseconds, OpType, ReqOp, Request, RequestFlags, RequestId};

/// Scheduler name
pub const NAME: &str = "adios";

/// Scheduler version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
