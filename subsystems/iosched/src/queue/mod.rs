//! # Request Queues
//!
//! Containers a request can sit in between admission and dispatch:
//!
//! - [`DeadlineIndex`]: deadline ordered, grouped by equal deadline
//! - [`PriorityLane`]: head insertions that skip deadline ordering
//! - [`BatchPipeline`]: double buffered pages of pre-selected requests

mod batch;
mod deadline;
mod prio;

pub use batch::{BatchPipeline, BatchStats, FillReport, BATCH_PAGES};
pub use deadline::{DeadlineIndex, IndexedRequest};
pub use prio::PriorityLane;
