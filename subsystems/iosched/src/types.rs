//! # Request Types
//!
//! The scheduler never owns block requests. The host framework hands it a
//! [`Request`] descriptor that carries the stable identifier and the few
//! attributes scheduling depends on; the scheduler keeps its private state in
//! side tables keyed by [`RequestId`].

use bitflags::bitflags;
use static_assertions::const_assert_eq;

// =============================================================================
// BASIC TYPES
// =============================================================================

/// Nanoseconds on the host's monotonic clock
pub type Nanoseconds = u64;

/// Stable identifier of a host-owned request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

impl RequestId {
    /// Raw identifier value
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

// =============================================================================
// OPERATIONS
// =============================================================================

/// Block operation as issued by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReqOp {
    /// Read data
    Read        = 0,
    /// Write data
    Write       = 1,
    /// Flush the volatile cache
    Flush       = 2,
    /// Discard (TRIM) a range
    Discard     = 3,
    /// Secure erase a range
    SecureErase = 5,
    /// Write zeroes to a range
    WriteZeroes = 9,
    /// Zone management or driver private commands
    DrvPrivate  = 34,
}

impl ReqOp {
    /// Does the operation move data towards the device?
    ///
    /// Write-direction opcodes are odd.
    pub const fn is_write(self) -> bool {
        (self as u8) & 1 != 0
    }
}

/// Scheduling class a request is accounted under
///
/// Latency targets, batch limits and latency models are all partitioned by
/// this class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(usize)]
pub enum OpType {
    /// Reads
    Read    = 0,
    /// Writes
    Write   = 1,
    /// Discards
    Discard = 2,
    /// Everything else
    Other   = 3,
}

impl OpType {
    /// Number of scheduling classes
    pub const COUNT: usize = 4;

    /// All classes in dispatch priority order
    pub const ALL: [OpType; OpType::COUNT] =
        [OpType::Read, OpType::Write, OpType::Discard, OpType::Other];

    /// Classify a host operation
    ///
    /// Used both at insertion and at completion, so the mapping must stay a
    /// pure function of the operation.
    pub const fn classify(op: ReqOp) -> Self {
        match op {
            ReqOp::Read => OpType::Read,
            ReqOp::Write => OpType::Write,
            ReqOp::Discard => OpType::Discard,
            _ => OpType::Other,
        }
    }

    /// Table index
    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Lower-case name, as used in tunable names
    pub const fn name(self) -> &'static str {
        match self {
            OpType::Read => "read",
            OpType::Write => "write",
            OpType::Discard => "discard",
            OpType::Other => "other",
        }
    }
}

const_assert_eq!(OpType::ALL.len(), OpType::COUNT);
const_assert_eq!(OpType::Other as usize, OpType::COUNT - 1);

// =============================================================================
// FLAGS
// =============================================================================

bitflags! {
    /// Request attribute flags supplied by the host
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RequestFlags: u32 {
        /// Submitter waits for completion
        const SYNC      = 1 << 0;
        /// Request may be merged with adjacent I/O
        const MERGEABLE = 1 << 1;
        /// Forced unit access
        const FUA       = 1 << 2;
    }
}

bitflags! {
    /// Flags for a single insertion call
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InsertFlags: u32 {
        /// Place ahead of all deadline ordered work
        const AT_HEAD = 1 << 0;
    }
}

// =============================================================================
// REQUEST DESCRIPTOR
// =============================================================================

/// Scheduler view of a host-owned request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    /// Stable identifier
    pub id: RequestId,
    /// Operation
    pub op: ReqOp,
    /// Attribute flags
    pub flags: RequestFlags,
    /// Payload size in bytes
    pub size: u64,
    /// Time the request was allocated by the host
    pub start_time_ns: Nanoseconds,
    /// Time the device started the request, once issued
    pub io_start_time_ns: Option<Nanoseconds>,
}

impl Request {
    /// Create a new request descriptor
    pub fn new(id: u64, op: ReqOp, size: u64, start_time_ns: Nanoseconds) -> Self {
        Self {
            id: RequestId(id),
            op,
            flags: RequestFlags::MERGEABLE,
            size,
            start_time_ns,
            io_start_time_ns: None,
        }
    }

    /// Replace the attribute flags
    pub fn with_flags(mut self, flags: RequestFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Record the device issue time
    pub fn with_io_start(mut self, io_start_time_ns: Nanoseconds) -> Self {
        self.io_start_time_ns = Some(io_start_time_ns);
        self
    }

    /// Scheduling class of this request
    #[inline(always)]
    pub fn op_type(&self) -> OpType {
        OpType::classify(self.op)
    }

    /// Does the submitter wait for this request?
    pub fn is_sync(&self) -> bool {
        self.op == ReqOp::Read || self.flags.intersects(RequestFlags::SYNC | RequestFlags::FUA)
    }

    /// May the host merge other I/O into this request?
    pub fn is_mergeable(&self) -> bool {
        self.flags.contains(RequestFlags::MERGEABLE)
    }
}

// =============================================================================
// TESTS
// =============================================================================
