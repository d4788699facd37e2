//! Crate-wide error taxonomy and the hot-path bounds-check result.
//!
//! Every fallible public operation in this crate returns [`Result`], an alias
//! over [`BytesError`].  The variants correspond one-to-one to the failure
//! kinds a caller can meaningfully distinguish:
//!
//! - [`BytesError::BufferUnderflow`] / [`BytesError::BufferOverflow`] for
//!   bounds violations, with a decorated overflow variant that carries the
//!   attempted span and limit for diagnostics.
//! - [`BytesError::ClosedState`] for any operation on a released resource.
//! - [`BytesError::IoRuntime`] wrapping the OS error from mmap, grow, msync
//!   or lock syscalls.
//!
//! Bounds checks on the write fast path do not build an error value at all;
//! they return the small [`BoundsStatus`] enum and only the slow path
//! materialises a [`BytesError`].

use core::fmt;

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, BytesError>;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors produced by stores, cursors, the mapper and the wire codecs.
#[derive(Debug)]
pub enum BytesError {
    /// Read past the read limit, or an access before `start`.
    BufferUnderflow {
        /// Offset at which the access was attempted.
        offset: u64,
        /// Bytes actually available at that offset.
        available: u64,
    },
    /// Write past the addressable capacity.
    BufferOverflow {
        /// Offset at which the write was attempted.
        offset: u64,
        /// Capacity of the backing store.
        capacity: u64,
    },
    /// Write past the configured write limit.  The message carries the
    /// attempted span and the limit, e.g.
    /// `attempt to write 5 bytes to 5 limit: 4`.
    DecoratedBufferOverflow(String),
    /// Operation on a resource whose last reference was already released.
    ClosedState(&'static str),
    /// Concurrent misuse detected, e.g. a cursor written from a thread other
    /// than the one that stamped it.
    ThreadingIllegalState(String),
    /// `reset()` called with no prior `mark()`.
    InvalidMark,
    /// mmap, file growth, msync or file-lock failure.
    IoRuntime(std::io::Error),
    /// Stop-bit overflow or a numeric conversion out of range.
    Arithmetic(String),
    /// Malformed UTF-8, or a character not representable in 8-bit text.
    UtfDataFormat(String),
    /// An object failed its own validation during a marshalled read/write.
    InvalidMarshallable(String),
    /// The store kind cannot answer the question, e.g. `address()` on a heap
    /// store.
    UnsupportedOperation(&'static str),
    /// A contract violation that is not a bounds problem: guarded-tag
    /// mismatch, write on a read-only mapping, refcount misuse.
    IllegalState(String),
}

impl BytesError {
    /// Stable name of the error kind, independent of the payload.
    pub fn kind_name(&self) -> &'static str {
        match self {
            BytesError::BufferUnderflow { .. } => "BufferUnderflow",
            BytesError::BufferOverflow { .. } => "BufferOverflow",
            BytesError::DecoratedBufferOverflow(_) => "DecoratedBufferOverflow",
            BytesError::ClosedState(_) => "ClosedState",
            BytesError::ThreadingIllegalState(_) => "ThreadingIllegalState",
            BytesError::InvalidMark => "InvalidMark",
            BytesError::IoRuntime(_) => "IORuntime",
            BytesError::Arithmetic(_) => "ArithmeticError",
            BytesError::UtfDataFormat(_) => "UTFDataFormat",
            BytesError::InvalidMarshallable(_) => "InvalidMarshallable",
            BytesError::UnsupportedOperation(_) => "UnsupportedOperation",
            BytesError::IllegalState(_) => "IllegalState",
        }
    }
}

impl fmt::Display for BytesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BytesError::BufferUnderflow { offset, available } => write!(
                f,
                "buffer underflow: offset {} with {} byte(s) available",
                offset, available
            ),
            BytesError::BufferOverflow { offset, capacity } => write!(
                f,
                "buffer overflow: offset {} beyond capacity {}",
                offset, capacity
            ),
            BytesError::DecoratedBufferOverflow(msg) => f.write_str(msg),
            BytesError::ClosedState(what) => write!(f, "{} has been released", what),
            BytesError::ThreadingIllegalState(msg) => f.write_str(msg),
            BytesError::InvalidMark => f.write_str("reset with no prior mark"),
            BytesError::IoRuntime(e) => write!(f, "io failure: {}", e),
            BytesError::Arithmetic(msg) => f.write_str(msg),
            BytesError::UtfDataFormat(msg) => f.write_str(msg),
            BytesError::InvalidMarshallable(msg) => f.write_str(msg),
            BytesError::UnsupportedOperation(what) => {
                write!(f, "unsupported operation: {}", what)
            }
            BytesError::IllegalState(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for BytesError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BytesError::IoRuntime(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BytesError {
    fn from(e: std::io::Error) -> Self {
        BytesError::IoRuntime(e)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fast-path bounds status
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of a hot bounds check.
///
/// The write fast path calls this once per operation, so it deliberately
/// carries no payload; only when a caller needs to surface the failure does it
/// build the corresponding [`BytesError`] with full context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundsStatus {
    /// The access fits entirely below the safe limit.
    Ok,
    /// The access starts before `start`.
    Underflow,
    /// The access ends past the write limit (or capacity for a fixed store).
    Overflow,
    /// The access fits the write limit but crosses the safe limit; an elastic
    /// cursor must grow or remap before proceeding.
    NeedsResize,
}
