//! # Scheduler Errors
//!
//! Error types shared by the scheduler core and its tunable surface.
//!
//! | Category | Recovery | Example |
//! |----------|----------|---------|
//! | Resource | Local: request continues untracked | Side record table full |
//! | Input | Rejected at the boundary, state unchanged | `batch_limit_read` = 0 |
//! | Internal | Debug assertion, never on the release hot path | Group without members |

use core::fmt;

// =============================================================================
// ERROR TYPE
// =============================================================================

/// Errors reported by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// No tunable with this name exists
    UnknownTunable,
    /// The tunable cannot be read
    NotReadable,
    /// The tunable cannot be written
    NotWritable,
    /// Input is not a valid decimal number
    Parse,
    /// Input parsed but lies outside the accepted range
    OutOfRange,
    /// The side record table could not hold another request
    RecordsExhausted,
    /// The request is already tracked
    AlreadyTracked,
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTunable => write!(f, "Unknown tunable"),
            Self::NotReadable => write!(f, "Tunable is write-only"),
            Self::NotWritable => write!(f, "Tunable is read-only"),
            Self::Parse => write!(f, "Invalid number"),
            Self::OutOfRange => write!(f, "Value out of range"),
            Self::RecordsExhausted => write!(f, "Request record table exhausted"),
            Self::AlreadyTracked => write!(f, "Request already tracked"),
        }
    }
}

/// Result type for scheduler operations
pub type SchedResult<T> = Result<T, SchedError>;

// =============================================================================
// TESTS
// =============================================================================
