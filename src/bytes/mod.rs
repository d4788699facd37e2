//! The cursor layer: sequential read/write positions over one store.
//!
//! A [`Bytes`] wraps exactly one [`BytesStore`] at a time and maintains
//! `read_position ≤ read_limit` and `write_position ≤ write_limit` windows
//! over it.  Streaming operations advance the positions; absolute operations
//! delegate to the store with a bounds check.  The following holds before
//! and after every public operation:
//!
//! ```text
//! start ≤ read_position ≤ read_limit
//! read_position ≤ write_position ≤ write_limit ≤ capacity ≤ capacity_cap
//! ```
//!
//! An *elastic* cursor replaces its store in place when a write crosses the
//! safe limit: native and heap stores are reallocated at 1.5x (page rounded)
//! and the old bytes copied across; a cursor over a [`MappedFile`] releases
//! its chunk and acquires the one containing the write instead, which is
//! zero-copy.
//!
//! Cursors are single-owner: the first thread to write through the cursor
//! stamps it, and a write from any other thread fails with
//! `ThreadingIllegalState` until [`Bytes::single_threaded_check_reset`]
//! transfers affinity.  Equality and hashing are identity-based by design;
//! [`Bytes::content_equal`] is the byte-window comparison.

mod guarded;
mod hexdump;
mod stream;

pub use guarded::{BinaryTag, GuardedBytes};
pub use hexdump::HexDumpBytes;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{BoundsStatus, BytesError, Result};
use crate::mmap::MappedFile;
use crate::refcount::ReferenceOwner;
use crate::store::{page_round_up, page_size, BytesStore, StoreKind, StoreRef};

/// Capacity ceiling for elastic native cursors.
pub const NATIVE_CAPACITY_CAP: u64 = 1 << 40;

/// Capacity ceiling for elastic heap cursors.
pub const HEAP_CAPACITY_CAP: u64 = i32::MAX as u64 - 7;

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

fn thread_token() -> u64 {
    thread_local! {
        static TOKEN: u64 = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
    }
    TOKEN.with(|t| *t)
}

/// A sequential cursor over one reference-counted store.
pub struct Bytes {
    store: StoreRef,
    read_position: u64,
    read_limit: u64,
    write_position: u64,
    write_limit: u64,
    elastic: bool,
    capacity_cap: u64,
    mark: Option<u64>,
    owner: ReferenceOwner,
    mapped: Option<Arc<MappedFile>>,
    thread_stamp: AtomicU64,
}

impl Bytes {
    // ─────────────────────────────────────────────────────────────────────
    // Construction
    // ─────────────────────────────────────────────────────────────────────

    fn over_store(
        store: StoreRef,
        owner: ReferenceOwner,
        elastic: bool,
        capacity_cap: u64,
        mapped: Option<Arc<MappedFile>>,
    ) -> Bytes {
        let start = store.start();
        let write_limit = if elastic { capacity_cap } else { store.capacity() };
        Bytes {
            store,
            read_position: start,
            read_limit: start,
            write_position: start,
            write_limit,
            elastic,
            capacity_cap,
            mark: None,
            owner,
            mapped,
            thread_stamp: AtomicU64::new(0),
        }
    }

    /// An elastic off-heap cursor with one page of initial capacity.
    pub fn elastic() -> Result<Bytes> {
        Self::elastic_with_capacity(page_size())
    }

    /// An elastic off-heap cursor with at least `initial_capacity` bytes.
    pub fn elastic_with_capacity(initial_capacity: u64) -> Result<Bytes> {
        let owner = ReferenceOwner::new("bytes cursor");
        let store = BytesStore::native(initial_capacity.max(1), &owner)?;
        Ok(Self::over_store(
            store,
            owner,
            true,
            NATIVE_CAPACITY_CAP,
            None,
        ))
    }

    /// An elastic on-heap cursor.
    pub fn elastic_on_heap() -> Bytes {
        let owner = ReferenceOwner::new("bytes cursor");
        let store = BytesStore::on_heap(256, &owner);
        Self::over_store(store, owner, true, HEAP_CAPACITY_CAP, None)
    }

    /// A fixed cursor for writing over an existing store.  Reserves the store
    /// on the cursor's behalf.
    pub fn wrap_store_for_write(store: StoreRef) -> Result<Bytes> {
        let owner = ReferenceOwner::new("bytes cursor");
        store.reserve(&owner)?;
        Ok(Self::over_store(store, owner, false, u64::MAX, None))
    }

    /// A fixed cursor for reading the full contents of an existing store.
    pub fn wrap_store_for_read(store: StoreRef) -> Result<Bytes> {
        let owner = ReferenceOwner::new("bytes cursor");
        store.reserve(&owner)?;
        let mut b = Self::over_store(store, owner, false, u64::MAX, None);
        b.write_position = b.store.capacity();
        b.read_limit = b.write_position;
        Ok(b)
    }

    /// Wrap owned data as a fixed read cursor.
    pub fn wrap_vec(data: Vec<u8>) -> Bytes {
        let owner = ReferenceOwner::new("bytes cursor");
        let len = data.len() as u64;
        let store = BytesStore::wrap_vec(data, &owner);
        let mut b = Self::over_store(store, owner, false, u64::MAX, None);
        b.write_position = len;
        b.read_limit = len;
        b.write_limit = len;
        b
    }

    /// Copy a slice into a fixed read cursor.
    pub fn copy_of(data: &[u8]) -> Bytes {
        Self::wrap_vec(data.to_vec())
    }

    pub(crate) fn over_mapped(
        file: Arc<MappedFile>,
        store: StoreRef,
        owner: ReferenceOwner,
        offset: u64,
        for_write: bool,
    ) -> Result<Bytes> {
        if !store.inside(offset) && offset != store.capacity() {
            store.release(&owner)?;
            return Err(BytesError::BufferOverflow {
                offset,
                capacity: store.capacity(),
            });
        }
        let mut b = if for_write {
            let mut b = Self::over_store(store, owner, true, u64::MAX >> 1, Some(file));
            b.write_limit = b.capacity_cap;
            b
        } else {
            let mut b = Self::over_store(store, owner, false, u64::MAX >> 1, Some(file));
            b.write_position = b.store.capacity();
            b.read_limit = b.write_position;
            b.write_limit = b.store.capacity();
            b
        };
        b.read_position = offset;
        if for_write {
            b.write_position = offset;
            b.read_limit = offset;
        }
        Ok(b)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Observers
    // ─────────────────────────────────────────────────────────────────────

    /// Lowest valid offset of the current store.
    #[inline]
    pub fn start(&self) -> u64 {
        self.store.start()
    }

    /// Capacity visible to the cursor: the cap for elastic cursors, the
    /// store's capacity for fixed ones.
    #[inline]
    pub fn capacity(&self) -> u64 {
        if self.elastic {
            self.capacity_cap
        } else {
            self.store.capacity()
        }
    }

    /// Capacity of the current backing store.
    #[inline]
    pub fn real_capacity(&self) -> u64 {
        self.store.capacity()
    }

    /// The current store's safe limit.
    #[inline]
    pub fn safe_limit(&self) -> u64 {
        self.store.safe_limit()
    }

    #[inline]
    pub fn is_elastic(&self) -> bool {
        self.elastic
    }

    #[inline]
    pub fn read_position(&self) -> u64 {
        self.read_position
    }

    #[inline]
    pub fn read_limit(&self) -> u64 {
        self.read_limit
    }

    #[inline]
    pub fn write_position(&self) -> u64 {
        self.write_position
    }

    #[inline]
    pub fn write_limit(&self) -> u64 {
        self.write_limit
    }

    /// Bytes available for streaming reads.
    #[inline]
    pub fn read_remaining(&self) -> u64 {
        self.read_limit - self.read_position
    }

    /// Bytes writable before the write limit.
    #[inline]
    pub fn write_remaining(&self) -> u64 {
        self.write_limit.saturating_sub(self.write_position)
    }

    /// The cursor's reservation identity on its store.
    pub fn owner(&self) -> &ReferenceOwner {
        &self.owner
    }

    /// Shared handle to the current backing store.
    pub fn store(&self) -> &StoreRef {
        &self.store
    }

    /// `true` when both cursors currently wrap the same store instance.
    pub fn same_store(&self, other: &Bytes) -> bool {
        Arc::ptr_eq(&self.store, &other.store)
    }

    /// `true` iff the readable windows have equal length and equal bytes.
    pub fn content_equal(&self, other: &Bytes) -> bool {
        if self.read_remaining() != other.read_remaining() {
            return false;
        }
        let len = self.read_remaining();
        let mut a = [0u8; 64];
        let mut b = [0u8; 64];
        let mut done = 0u64;
        while done < len {
            let n = ((len - done) as usize).min(64);
            if self
                .store
                .read_into(self.read_position + done, &mut a[..n])
                .is_err()
                || other
                    .store
                    .read_into(other.read_position + done, &mut b[..n])
                    .is_err()
            {
                return false;
            }
            if a[..n] != b[..n] {
                return false;
            }
            done += n as u64;
        }
        true
    }

    /// Copy the readable window out as a vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let len = self.read_remaining() as usize;
        let mut out = vec![0u8; len];
        if len > 0 {
            // The window is inside the store by invariant.
            let _ = self.store.read_into(self.read_position, &mut out);
        }
        out
    }

    // ─────────────────────────────────────────────────────────────────────
    // Position and limit control
    // ─────────────────────────────────────────────────────────────────────

    /// Set the streaming read position.
    pub fn set_read_position(&mut self, position: u64) -> Result<()> {
        if position < self.start() || position > self.read_limit {
            return Err(BytesError::BufferUnderflow {
                offset: position,
                available: self.read_limit.saturating_sub(position),
            });
        }
        self.read_position = position;
        Ok(())
    }

    /// Set the read limit (the end of the readable window).
    pub fn set_read_limit(&mut self, limit: u64) -> Result<()> {
        if limit < self.read_position || limit > self.write_limit.max(self.write_position) {
            return Err(BytesError::IllegalState(format!(
                "read limit {} outside [{}, {}]",
                limit, self.read_position, self.write_limit
            )));
        }
        self.read_limit = limit;
        Ok(())
    }

    /// Set the streaming write position.
    pub fn set_write_position(&mut self, position: u64) -> Result<()> {
        if position < self.read_position || position > self.write_limit {
            return Err(BytesError::BufferOverflow {
                offset: position,
                capacity: self.write_limit,
            });
        }
        self.write_position = position;
        if self.read_limit < position {
            self.read_limit = position;
        }
        Ok(())
    }

    /// Set the write limit.
    pub fn set_write_limit(&mut self, limit: u64) -> Result<()> {
        if limit < self.write_position || limit > self.capacity() {
            return Err(BytesError::IllegalState(format!(
                "write limit {} outside [{}, {}]",
                limit,
                self.write_position,
                self.capacity()
            )));
        }
        self.write_limit = limit;
        Ok(())
    }

    /// Reset both positions to `start` and both limits to their initial
    /// values.  Idempotent.
    pub fn clear(&mut self) {
        let start = self.start();
        self.read_position = start;
        self.read_limit = start;
        self.write_position = start;
        self.write_limit = self.capacity();
        self.mark = None;
    }

    /// Clear, then reserve an `n`-byte prefix so later callers can fill it
    /// backwards.
    pub fn clear_and_pad(&mut self, n: u64) -> Result<()> {
        self.clear();
        let padded = self.start() + n;
        if padded > self.write_limit {
            return Err(BytesError::BufferOverflow {
                offset: padded,
                capacity: self.write_limit,
            });
        }
        self.read_position = padded;
        self.read_limit = padded;
        self.write_position = padded;
        Ok(())
    }

    /// Remember the current read position for [`reset`](Self::reset).
    pub fn mark(&mut self) {
        self.mark = Some(self.read_position);
    }

    /// Return the read position to the last [`mark`](Self::mark).
    pub fn reset(&mut self) -> Result<()> {
        match self.mark {
            Some(m) => {
                self.read_position = m;
                Ok(())
            }
            None => Err(BytesError::InvalidMark),
        }
    }

    /// Advance the read position by `n` bytes.
    pub fn skip(&mut self, n: u64) -> Result<()> {
        self.read_check(n)?;
        self.read_position += n;
        Ok(())
    }

    /// Roll the write position back to `position`, shrinking the readable
    /// window with it.  Used by record writers to discard a partial record.
    pub fn roll_back_write_to(&mut self, position: u64) -> Result<()> {
        if position < self.read_position || position > self.write_position {
            return Err(BytesError::IllegalState(format!(
                "cannot roll write position back to {} (read_position {}, write_position {})",
                position, self.read_position, self.write_position
            )));
        }
        self.write_position = position;
        if self.read_limit > position {
            self.read_limit = position;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Write fast path and elastic growth
    // ─────────────────────────────────────────────────────────────────────

    #[inline]
    fn bounds_for_write(&self, offset: u64, adding: u64) -> BoundsStatus {
        if offset < self.start() {
            return BoundsStatus::Underflow;
        }
        let Some(end) = offset.checked_add(adding) else {
            return BoundsStatus::Overflow;
        };
        // The write limit binds even below the safe limit.
        if end > self.write_limit {
            return BoundsStatus::Overflow;
        }
        if end <= self.store.safe_limit() {
            return BoundsStatus::Ok;
        }
        if !self.elastic {
            return BoundsStatus::Overflow;
        }
        BoundsStatus::NeedsResize
    }

    fn write_fail(&self, offset: u64, adding: u64) -> BytesError {
        let end = offset.saturating_add(adding);
        if end > self.write_limit {
            BytesError::DecoratedBufferOverflow(format!(
                "attempt to write {} bytes to {} limit: {}",
                adding, end, self.write_limit
            ))
        } else {
            BytesError::BufferOverflow {
                offset,
                capacity: self.store.capacity(),
            }
        }
    }

    /// Check that `adding` bytes can be written at `offset`, growing or
    /// remapping an elastic cursor as needed.
    pub fn write_check_offset(&mut self, offset: u64, adding: u64) -> Result<()> {
        self.check_thread()?;
        match self.bounds_for_write(offset, adding) {
            BoundsStatus::Ok => Ok(()),
            BoundsStatus::Underflow => Err(BytesError::BufferUnderflow {
                offset,
                available: 0,
            }),
            BoundsStatus::Overflow => Err(self.write_fail(offset, adding)),
            BoundsStatus::NeedsResize => self.grow_for(offset, adding),
        }
    }

    /// Grow (or remap) so that `n` more bytes fit at the write position.
    pub fn ensure_capacity(&mut self, n: u64) -> Result<()> {
        self.write_check_offset(self.write_position, n)
    }

    fn grow_for(&mut self, offset: u64, adding: u64) -> Result<()> {
        let end = offset + adding;
        if let Some(file) = self.mapped.clone() {
            // Overlap grace: a record that starts below the safe limit and
            // ends within the mapping stays in the current chunk.
            if offset >= self.store.start() && end <= self.store.capacity() {
                return Ok(());
            }
            let new_store = file.acquire_chunk_for(offset, &self.owner)?;
            if end > new_store.capacity() {
                new_store.release(&self.owner)?;
                return Err(BytesError::BufferOverflow {
                    offset,
                    capacity: new_store.capacity(),
                });
            }
            let old = std::mem::replace(&mut self.store, new_store);
            old.release(&self.owner)?;
            return Ok(());
        }

        let current = self.store.capacity();
        let grown = current + current / 2;
        let new_capacity = page_round_up(end.max(grown)).min(self.capacity_cap);
        let new_store = match self.store.kind() {
            StoreKind::Heap(_) => BytesStore::on_heap(new_capacity, &self.owner),
            _ => BytesStore::native(new_capacity, &self.owner)?,
        };
        new_store.write_store(0, &self.store, self.store.start(), current)?;
        let old = std::mem::replace(&mut self.store, new_store);
        old.release(&self.owner)?;
        Ok(())
    }

    #[inline]
    pub(crate) fn advance_written(&mut self, n: u64) {
        self.write_position += n;
        if self.read_limit < self.write_position {
            self.read_limit = self.write_position;
        }
    }

    #[inline]
    pub(crate) fn read_check(&self, adding: u64) -> Result<()> {
        if self
            .read_position
            .checked_add(adding)
            .is_none_or(|end| end > self.read_limit)
        {
            return Err(BytesError::BufferUnderflow {
                offset: self.read_position,
                available: self.read_remaining(),
            });
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn advance_read(&mut self, n: u64) {
        self.read_position += n;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Thread affinity
    // ─────────────────────────────────────────────────────────────────────

    #[inline]
    fn check_thread(&self) -> Result<()> {
        let me = thread_token();
        match self
            .thread_stamp
            .compare_exchange(0, me, Ordering::Relaxed, Ordering::Relaxed)
        {
            Ok(_) => Ok(()),
            Err(prev) if prev == me => Ok(()),
            Err(prev) => Err(BytesError::ThreadingIllegalState(format!(
                "cursor stamped by thread token {} written from thread token {}",
                prev, me
            ))),
        }
    }

    /// Forget the stamped thread so the cursor can be handed to another
    /// thread deliberately.
    pub fn single_threaded_check_reset(&self) {
        self.thread_stamp.store(0, Ordering::Relaxed);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Release the cursor's reservation, demanding it is the last one.
    pub fn release_last(mut self) -> Result<()> {
        let store = std::mem::replace(&mut self.store, BytesStore::noop());
        store.release_last(&self.owner)
    }
}

impl Drop for Bytes {
    fn drop(&mut self) {
        if let Err(e) = self.store.release(&self.owner) {
            // Already-released stores are fine to observe here (e.g. after
            // an explicit release_last); anything else is worth a log line.
            if !matches!(e, BytesError::ClosedState(_)) {
                log::warn!("cursor drop could not release its store: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for Bytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bytes")
            .field("read_position", &self.read_position)
            .field("read_limit", &self.read_limit)
            .field("write_position", &self.write_position)
            .field("write_limit", &self.write_limit)
            .field("elastic", &self.elastic)
            .field("store", &self.store)
            .finish()
    }
}

impl std::io::Read for Bytes {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = (self.read_remaining() as usize).min(buf.len());
        if n == 0 {
            return Ok(0);
        }
        self.read_slice(&mut buf[..n])
            .map_err(std::io::Error::other)?;
        Ok(n)
    }
}

impl std::io::Write for Bytes {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.write_slice(buf).map_err(std::io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
