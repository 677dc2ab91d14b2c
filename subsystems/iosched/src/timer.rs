//! # Update Timer
//!
//! Debounced arming of the periodic model update. Completions ask for an
//! update shortly after themselves; the timer only moves when it is idle or
//! the new expiry is earlier, so a burst of completions arms it once.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::config::NSEC_PER_MSEC;
use crate::types::Nanoseconds;

/// Delay between a completion and the model update it requests
pub const UPDATE_DELAY_NS: Nanoseconds = 100 * NSEC_PER_MSEC;

/// Idle marker
const IDLE: u64 = 0;

/// Pending expiry of the model update callback
#[derive(Debug, Default)]
pub struct UpdateTimer {
    expires: AtomicU64,
}

impl UpdateTimer {
    /// Create an idle timer
    pub const fn new() -> Self {
        Self {
            expires: AtomicU64::new(IDLE),
        }
    }

    /// Request expiry at `expires`
    ///
    /// Returns `true` when the host must (re)arm its timer, i.e. the timer
    /// was idle or `expires` is earlier than the pending expiry.
    pub fn reduce(&self, expires: Nanoseconds) -> bool {
        let expires = expires.max(1);
        let mut current = self.expires.load(Ordering::Acquire);
        loop {
            if current != IDLE && current <= expires {
                return false;
            }
            match self.expires.compare_exchange_weak(
                current,
                expires,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Mark the pending expiry as delivered
    pub fn fire(&self) -> Option<Nanoseconds> {
        match self.expires.swap(IDLE, Ordering::AcqRel) {
            IDLE => None,
            expires => Some(expires),
        }
    }

    /// Pending expiry, if armed
    pub fn pending(&self) -> Option<Nanoseconds> {
        match self.expires.load(Ordering::Acquire) {
            IDLE => None,
            expires => Some(expires),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
