//! rawbytes: reference-counted byte stores, elastic cursors, memory-mapped
//! files and stop-bit wire codecs.
//!
//! The crate is layered bottom-up:
//!
//! - [`mem`]: unaligned, volatile and compare-and-swap accessors over raw
//!   memory, shared by every store kind.
//! - [`refcount`]: owner-tracked reference counting with release hooks.
//! - [`store`]: fixed random-access [`BytesStore`] regions over native,
//!   heap, mapped or caller-owned memory, plus the no-op and released
//!   sentinels.
//! - [`mmap`]: [`MappedFile`], a chunked page-aligned mapping of a growing
//!   file, with re-entrant OS file locks.
//! - [`bytes`]: the [`Bytes`] cursor: sequential read/write positions,
//!   elastic growth, the guarded and hex-dump debug variants.
//! - [`codec`]: the stop-bit integer/double codec and stop-character
//!   testers.
//! - [`method`]: the record-oriented method writer/reader protocol.
//! - [`time`]: unique host-tagged timestamps over a shared mapped page.

pub mod bytes;
pub mod codec;
pub mod error;
pub mod mem;
pub mod method;
pub mod mmap;
pub mod refcount;
pub mod store;
pub mod time;

// ─────────────────────────────────────────────────────────────────────────────
// Top-level convenience re-exports for the most common entry points.
// ─────────────────────────────────────────────────────────────────────────────

/// The sequential cursor over a store.
pub use bytes::Bytes;
/// Tag-checked debug cursor.
pub use bytes::GuardedBytes;
/// Annotated hex-dump cursor.
pub use bytes::HexDumpBytes;
/// Crate-wide error type.
pub use error::BytesError;
/// Crate-wide result alias.
pub use error::Result;
/// Record writer and demultiplexing reader for the method protocol.
pub use method::{MethodReader, MethodReaderBuilder, MethodWriter};
/// Chunked memory mapping of a file.
pub use mmap::{FileLockGuard, MappedFile, SyncMode};
/// Opaque reservation identity for reference-counted resources.
pub use refcount::ReferenceOwner;
/// Fixed random-access storage, shared as [`store::StoreRef`].
pub use store::{BytesStore, StoreRef};
/// Unique timestamp provider and its clock abstraction.
pub use time::{DistributedUniqueTimeProvider, SystemClock, TimeProvider};
