//! Fixed-capacity random-access stores.
//!
//! A [`BytesStore`] is a bounds-checked window of bytes addressed by
//! *absolute* offsets, backed by one of the kinds in [`StoreKind`]:
//!
//! - `Native`: a page-aligned off-heap allocation;
//! - `Heap`: a boxed byte array (optionally a window into one);
//! - `Mapped`: one chunk of a memory-mapped file (see [`crate::mmap`]);
//! - `Pointer`: caller-owned raw memory;
//! - `Noop` / `Released`: process-wide sentinels that let higher layers
//!   hold "no store" and "store is gone" without extra branches.
//!
//! Stores are shared as [`StoreRef`] (`Arc<BytesStore>`) and carry an
//! owner-tracked [`ReferenceCounter`].  Releasing the last reservation runs
//! the release hook (msync for mapped chunks) and flips the store to its
//! logically released state; the backing memory itself is freed or unmapped
//! only when the last `Arc` drops, so a stale holder observes `ClosedState`
//! rather than freed memory.
//!
//! Concurrency contract: multiple holders may perform absolute-offset
//! accesses to *disjoint* regions; the volatile/ordered/CAS accessors are the
//! only safe way to coordinate overlapping access (including across
//! processes, for mapped stores).

mod heap;
mod native;

pub use heap::HeapStore;
pub use native::{page_round_up, page_size, NativeStore, PointerStore};

use std::sync::{Arc, OnceLock};

use crate::error::{BytesError, Result};
use crate::mem;
use crate::mmap::MappedChunk;
use crate::refcount::{ReferenceCounter, ReferenceOwner, ReleaseHook};

/// Shared handle to a store.
pub type StoreRef = Arc<BytesStore>;

/// The backing-storage tag of a [`BytesStore`].
pub enum StoreKind {
    Native(NativeStore),
    Heap(HeapStore),
    Mapped(MappedChunk),
    Pointer(PointerStore),
    Noop,
    Released,
}

/// A fixed random-access byte region with reference-counted ownership.
pub struct BytesStore {
    kind: StoreKind,
    refs: ReferenceCounter,
}

/// Resolved addressing facts for one access.
#[derive(Clone, Copy)]
struct Geometry {
    base: *mut u8,
    start: u64,
    capacity: u64,
}

impl BytesStore {
    // ─────────────────────────────────────────────────────────────────────
    // Construction
    // ─────────────────────────────────────────────────────────────────────

    pub(crate) fn with_kind(
        kind: StoreKind,
        resource: &'static str,
        creator: &ReferenceOwner,
        hook: Option<ReleaseHook>,
    ) -> StoreRef {
        Arc::new(BytesStore {
            kind,
            refs: ReferenceCounter::new(resource, creator, hook),
        })
    }

    /// Allocate a page-aligned off-heap store of `capacity` bytes, count 1
    /// held by `creator`.
    pub fn native(capacity: u64, creator: &ReferenceOwner) -> Result<StoreRef> {
        let inner = NativeStore::allocate(capacity)?;
        Ok(Self::with_kind(
            StoreKind::Native(inner),
            "native store",
            creator,
            None,
        ))
    }

    /// Allocate a zero-filled on-heap store of `capacity` bytes.
    pub fn on_heap(capacity: u64, creator: &ReferenceOwner) -> StoreRef {
        Self::with_kind(
            StoreKind::Heap(HeapStore::allocate(capacity)),
            "heap store",
            creator,
            None,
        )
    }

    /// Wrap an owned byte vector as a heap store.
    pub fn wrap_vec(data: Vec<u8>, creator: &ReferenceOwner) -> StoreRef {
        Self::with_kind(
            StoreKind::Heap(HeapStore::from_vec(data)),
            "heap store",
            creator,
            None,
        )
    }

    /// Wrap an owned byte vector exposing only `[base_offset, len)`.
    pub fn wrap_vec_offset(data: Vec<u8>, base_offset: u64, creator: &ReferenceOwner) -> StoreRef {
        Self::with_kind(
            StoreKind::Heap(HeapStore::from_vec_offset(data, base_offset)),
            "heap store",
            creator,
            None,
        )
    }

    /// Wrap caller-owned raw memory.
    ///
    /// # Safety
    /// The memory must stay valid and writable until the last `Arc` drops.
    pub unsafe fn wrap_pointer(addr: *mut u8, len: u64, creator: &ReferenceOwner) -> StoreRef {
        Self::with_kind(
            StoreKind::Pointer(PointerStore::wrap(addr, len)),
            "pointer store",
            creator,
            None,
        )
    }

    pub(crate) fn mapped(
        chunk: MappedChunk,
        creator: &ReferenceOwner,
        hook: Option<ReleaseHook>,
    ) -> StoreRef {
        Self::with_kind(StoreKind::Mapped(chunk), "mapped store", creator, hook)
    }

    /// The process-wide no-op store: capacity 0, rejects reads and writes,
    /// never closes.
    pub fn noop() -> StoreRef {
        static NOOP: OnceLock<StoreRef> = OnceLock::new();
        NOOP.get_or_init(|| {
            Arc::new(BytesStore {
                kind: StoreKind::Noop,
                refs: ReferenceCounter::new("noop store", &ReferenceOwner::new("noop"), None),
            })
        })
        .clone()
    }

    /// The process-wide released sentinel: every operation fails with
    /// `ClosedState`.
    pub fn released_sentinel() -> StoreRef {
        static RELEASED: OnceLock<StoreRef> = OnceLock::new();
        RELEASED
            .get_or_init(|| {
                Arc::new(BytesStore {
                    kind: StoreKind::Released,
                    refs: ReferenceCounter::released("released store"),
                })
            })
            .clone()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Observers
    // ─────────────────────────────────────────────────────────────────────

    /// Lowest valid absolute offset.
    pub fn start(&self) -> u64 {
        match &self.kind {
            StoreKind::Mapped(c) => c.start(),
            _ => 0,
        }
    }

    /// Highest addressable absolute offset plus one.
    pub fn capacity(&self) -> u64 {
        match &self.kind {
            StoreKind::Native(n) => n.capacity(),
            StoreKind::Heap(h) => h.capacity(),
            StoreKind::Mapped(c) => c.start() + c.mapping_len(),
            StoreKind::Pointer(p) => p.len(),
            StoreKind::Noop | StoreKind::Released => 0,
        }
    }

    /// Absolute offset beyond which a writer should resize or remap.  Equals
    /// `capacity()` for every kind except mapped chunks, where the tail of
    /// the mapping is overlap grace for records straddling a chunk boundary.
    pub fn safe_limit(&self) -> u64 {
        match &self.kind {
            StoreKind::Mapped(c) => c.start() + c.safe_len(),
            _ => self.capacity(),
        }
    }

    /// `true` for off-heap kinds (native, mapped, pointer).
    pub fn is_direct(&self) -> bool {
        matches!(
            self.kind,
            StoreKind::Native(_) | StoreKind::Mapped(_) | StoreKind::Pointer(_)
        )
    }

    /// `true` when `offset` is addressable.
    pub fn inside(&self, offset: u64) -> bool {
        offset >= self.start() && offset < self.capacity()
    }

    /// `true` when the whole span `[offset, offset + span)` is addressable.
    pub fn inside_span(&self, offset: u64, span: u64) -> bool {
        offset >= self.start() && offset.checked_add(span).is_some_and(|end| end <= self.capacity())
    }

    /// Raw address of `offset`, for kinds that have one.
    pub fn address(&self, offset: u64) -> Result<*mut u8> {
        match &self.kind {
            StoreKind::Heap(_) => Err(BytesError::UnsupportedOperation(
                "address() on a heap store",
            )),
            StoreKind::Noop => Err(BytesError::UnsupportedOperation("address() on the no-op store")),
            _ => {
                let g = self.geometry()?;
                self.check_read(&g, offset, 0)?;
                // SAFETY: offset is within the window per the check above.
                Ok(unsafe { g.base.add((offset - g.start) as usize) })
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    pub fn reserve(&self, owner: &ReferenceOwner) -> Result<()> {
        match self.kind {
            StoreKind::Noop => Ok(()),
            _ => self.refs.reserve(owner),
        }
    }

    pub fn try_reserve(&self, owner: &ReferenceOwner) -> Result<bool> {
        match self.kind {
            StoreKind::Noop => Ok(true),
            _ => self.refs.try_reserve(owner),
        }
    }

    pub fn release(&self, owner: &ReferenceOwner) -> Result<()> {
        match self.kind {
            StoreKind::Noop => Ok(()),
            _ => self.refs.release(owner),
        }
    }

    pub fn release_last(&self, owner: &ReferenceOwner) -> Result<()> {
        match self.kind {
            StoreKind::Noop => Ok(()),
            _ => self.refs.release_last(owner),
        }
    }

    pub fn reserve_transfer(&self, from: &ReferenceOwner, to: &ReferenceOwner) -> Result<()> {
        match self.kind {
            StoreKind::Noop => Ok(()),
            _ => self.refs.reserve_transfer(from, to),
        }
    }

    pub fn refcount(&self) -> usize {
        match self.kind {
            StoreKind::Noop => 1,
            _ => self.refs.refcount(),
        }
    }

    pub fn is_released(&self) -> bool {
        self.refs.is_released()
    }

    pub(crate) fn kind(&self) -> &StoreKind {
        &self.kind
    }

    // ─────────────────────────────────────────────────────────────────────
    // Access plumbing
    // ─────────────────────────────────────────────────────────────────────

    fn geometry(&self) -> Result<Geometry> {
        self.refs.check_live()?;
        let (base, start, capacity) = match &self.kind {
            StoreKind::Native(n) => (n.addr(), 0, n.capacity()),
            StoreKind::Heap(h) => (h.base(), 0, h.capacity()),
            StoreKind::Pointer(p) => (p.addr(), 0, p.len()),
            StoreKind::Mapped(c) => (c.addr(), c.start(), c.start() + c.mapping_len()),
            StoreKind::Noop => (core::ptr::null_mut(), 0, 0),
            StoreKind::Released => return Err(BytesError::ClosedState("released store")),
        };
        Ok(Geometry {
            base,
            start,
            capacity,
        })
    }

    #[inline]
    fn check_read(&self, g: &Geometry, offset: u64, span: u64) -> Result<()> {
        if offset < g.start || offset.checked_add(span).is_none_or(|end| end > g.capacity) {
            return Err(BytesError::BufferUnderflow {
                offset,
                available: g.capacity.saturating_sub(offset),
            });
        }
        Ok(())
    }

    #[inline]
    fn check_write(&self, g: &Geometry, offset: u64, span: u64) -> Result<()> {
        if let StoreKind::Mapped(c) = &self.kind {
            if c.read_only() {
                return Err(BytesError::IllegalState("Read Only".to_string()));
            }
        }
        if offset < g.start || offset.checked_add(span).is_none_or(|end| end > g.capacity) {
            return Err(BytesError::BufferOverflow {
                offset,
                capacity: g.capacity,
            });
        }
        Ok(())
    }

    #[inline]
    unsafe fn ptr_at(g: &Geometry, offset: u64) -> *mut u8 {
        g.base.add((offset - g.start) as usize)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Typed absolute-offset access
// ─────────────────────────────────────────────────────────────────────────────

macro_rules! typed_access {
    ($read:ident, $write:ident, $ty:ty, $width:expr) => {
        /// Read at an absolute offset.
        pub fn $read(&self, offset: u64) -> Result<$ty> {
            let g = self.geometry()?;
            self.check_read(&g, offset, $width)?;
            // SAFETY: bounds checked above; store memory outlives the call.
            Ok(unsafe { mem::$read(g.base, offset - g.start) })
        }

        /// Write at an absolute offset.
        pub fn $write(&self, offset: u64, value: $ty) -> Result<()> {
            let g = self.geometry()?;
            self.check_write(&g, offset, $width)?;
            // SAFETY: bounds checked above; store memory outlives the call.
            unsafe { mem::$write(g.base, offset - g.start, value) };
            Ok(())
        }
    };
}

impl BytesStore {
    typed_access!(read_u8, write_u8, u8, 1);
    typed_access!(read_i8, write_i8, i8, 1);
    typed_access!(read_u16, write_u16, u16, 2);
    typed_access!(read_i16, write_i16, i16, 2);
    typed_access!(read_u32, write_u32, u32, 4);
    typed_access!(read_i32, write_i32, i32, 4);
    typed_access!(read_u64, write_u64, u64, 8);
    typed_access!(read_i64, write_i64, i64, 8);
    typed_access!(read_f32, write_f32, f32, 4);
    typed_access!(read_f64, write_f64, f64, 8);

    /// Read the byte at `offset`, or -1 when the offset is not addressable
    /// (including on the no-op store).
    pub fn peek_unsigned_byte(&self, offset: u64) -> i32 {
        match self.geometry() {
            Ok(g) if self.check_read(&g, offset, 1).is_ok() => {
                // SAFETY: bounds checked.
                unsafe { mem::read_u8(g.base, offset - g.start) as i32 }
            }
            _ => -1,
        }
    }

    /// Acquire-load of a 32-bit word at an aligned absolute offset.
    pub fn read_volatile_u32(&self, offset: u64) -> Result<u32> {
        let g = self.geometry()?;
        self.check_read(&g, offset, 4)?;
        // SAFETY: bounds checked; alignment asserted by the primitive.
        Ok(unsafe { mem::read_volatile_u32(g.base, offset - g.start) })
    }

    /// Acquire-load of a 64-bit word at an aligned absolute offset.
    pub fn read_volatile_u64(&self, offset: u64) -> Result<u64> {
        let g = self.geometry()?;
        self.check_read(&g, offset, 8)?;
        // SAFETY: bounds checked; alignment asserted by the primitive.
        Ok(unsafe { mem::read_volatile_u64(g.base, offset - g.start) })
    }

    /// Release-store of a 32-bit word at an aligned absolute offset.
    pub fn write_ordered_u32(&self, offset: u64, value: u32) -> Result<()> {
        let g = self.geometry()?;
        self.check_write(&g, offset, 4)?;
        // SAFETY: bounds checked; alignment asserted by the primitive.
        unsafe { mem::write_ordered_u32(g.base, offset - g.start, value) };
        Ok(())
    }

    /// Release-store of a 64-bit word at an aligned absolute offset.
    pub fn write_ordered_u64(&self, offset: u64, value: u64) -> Result<()> {
        let g = self.geometry()?;
        self.check_write(&g, offset, 8)?;
        // SAFETY: bounds checked; alignment asserted by the primitive.
        unsafe { mem::write_ordered_u64(g.base, offset - g.start, value) };
        Ok(())
    }

    /// Sequentially consistent 32-bit compare-and-swap at an aligned absolute
    /// offset.
    pub fn cas_u32(&self, offset: u64, expected: u32, new: u32) -> Result<bool> {
        let g = self.geometry()?;
        self.check_write(&g, offset, 4)?;
        // SAFETY: bounds checked; alignment asserted by the primitive.
        Ok(unsafe { mem::cas_u32(g.base, offset - g.start, expected, new) })
    }

    /// Sequentially consistent 64-bit compare-and-swap at an aligned absolute
    /// offset.
    pub fn cas_u64(&self, offset: u64, expected: u64, new: u64) -> Result<bool> {
        let g = self.geometry()?;
        self.check_write(&g, offset, 8)?;
        // SAFETY: bounds checked; alignment asserted by the primitive.
        Ok(unsafe { mem::cas_u64(g.base, offset - g.start, expected, new) })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Bulk access
    // ─────────────────────────────────────────────────────────────────────

    /// Copy `dst.len()` bytes starting at `offset` into `dst`.
    pub fn read_into(&self, offset: u64, dst: &mut [u8]) -> Result<()> {
        let g = self.geometry()?;
        self.check_read(&g, offset, dst.len() as u64)?;
        // SAFETY: bounds checked; slices never alias store memory.
        unsafe {
            mem::copy(
                g.base,
                offset - g.start,
                dst.as_mut_ptr(),
                0,
                dst.len() as u64,
            )
        };
        Ok(())
    }

    /// Copy `src` into the store starting at `offset`.
    pub fn write_from(&self, offset: u64, src: &[u8]) -> Result<()> {
        let g = self.geometry()?;
        self.check_write(&g, offset, src.len() as u64)?;
        // SAFETY: bounds checked; slices never alias store memory.
        unsafe {
            mem::copy(
                src.as_ptr(),
                0,
                g.base,
                offset - g.start,
                src.len() as u64,
            )
        };
        Ok(())
    }

    /// Copy `len` bytes from `src` (starting at `src_offset`) into this store
    /// at `offset`.  Works across kinds: both sides resolve to raw windows.
    pub fn write_store(&self, offset: u64, src: &BytesStore, src_offset: u64, len: u64) -> Result<()> {
        let dst_g = self.geometry()?;
        let src_g = src.geometry()?;
        src.check_read(&src_g, src_offset, len)?;
        self.check_write(&dst_g, offset, len)?;
        // SAFETY: both ranges bounds checked.  `move` semantics cover the
        // self-to-self overlapping case.
        unsafe {
            mem::move_bytes(
                src_g.base,
                src_offset - src_g.start,
                dst_g.base,
                offset - dst_g.start,
                len,
            )
        };
        Ok(())
    }

    /// Copy as many bytes as fit from this store's window into `other`.
    /// Returns the number of bytes copied.
    pub fn copy_to(&self, other: &BytesStore) -> Result<u64> {
        let len = (self.capacity() - self.start()).min(other.capacity() - other.start());
        other.write_store(other.start(), self, self.start(), len)?;
        Ok(len)
    }

    /// Copy `len` store bytes starting at `offset` to raw memory.
    ///
    /// # Safety
    /// `dst` must be valid for `len` bytes of writes.
    pub unsafe fn native_read(&self, offset: u64, dst: *mut u8, len: u64) -> Result<()> {
        let g = self.geometry()?;
        self.check_read(&g, offset, len)?;
        mem::copy(g.base, offset - g.start, dst, 0, len);
        Ok(())
    }

    /// Copy `len` raw bytes into the store at `offset`.
    ///
    /// # Safety
    /// `src` must be valid for `len` bytes of reads.
    pub unsafe fn native_write(&self, offset: u64, src: *const u8, len: u64) -> Result<()> {
        let g = self.geometry()?;
        self.check_write(&g, offset, len)?;
        mem::copy(src, 0, g.base, offset - g.start, len);
        Ok(())
    }

    /// Zero the range `[from, to)`.
    pub fn zero_out(&self, from: u64, to: u64) -> Result<()> {
        if to < from {
            return Err(BytesError::IllegalState(format!(
                "zero_out range inverted: {}..{}",
                from, to
            )));
        }
        let g = self.geometry()?;
        self.check_write(&g, from, to - from)?;
        // SAFETY: bounds checked.
        unsafe { mem::zero(g.base, from - g.start, to - from) };
        Ok(())
    }

    /// Overlap-safe move of `len` bytes from absolute `from` to absolute `to`.
    pub fn move_range(&self, from: u64, to: u64, len: u64) -> Result<()> {
        let g = self.geometry()?;
        self.check_read(&g, from, len)?;
        self.check_write(&g, to, len)?;
        // SAFETY: both ranges bounds checked; `move` tolerates overlap.
        unsafe { mem::move_bytes(g.base, from - g.start, g.base, to - g.start, len) };
        Ok(())
    }

    /// `true` iff the first `len` bytes of the two stores' windows are equal.
    pub fn compare_bytes(&self, other: &BytesStore, len: u64) -> Result<bool> {
        let a = self.geometry()?;
        let b = other.geometry()?;
        self.check_read(&a, a.start, len)?;
        other.check_read(&b, b.start, len)?;
        // SAFETY: both windows bounds checked above.
        let eq = unsafe {
            let lhs = core::slice::from_raw_parts(Self::ptr_at(&a, a.start), len as usize);
            let rhs = core::slice::from_raw_parts(Self::ptr_at(&b, b.start), len as usize);
            lhs == rhs
        };
        Ok(eq)
    }
}

impl std::fmt::Debug for BytesStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            StoreKind::Native(_) => "Native",
            StoreKind::Heap(_) => "Heap",
            StoreKind::Mapped(_) => "Mapped",
            StoreKind::Pointer(_) => "Pointer",
            StoreKind::Noop => "Noop",
            StoreKind::Released => "Released",
        };
        f.debug_struct("BytesStore")
            .field("kind", &kind)
            .field("start", &self.start())
            .field("capacity", &self.capacity())
            .field("refcount", &self.refcount())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> ReferenceOwner {
        ReferenceOwner::new("test")
    }

    #[test]
    fn absolute_typed_round_trip_native_and_heap() {
        let o = owner();
        for store in [BytesStore::native(64, &o).unwrap(), BytesStore::on_heap(64, &o)] {
            store.write_u32(3, 0xCAFE_BABE).unwrap();
            store.write_f64(8, -1.5).unwrap();
            assert_eq!(store.read_u32(3).unwrap(), 0xCAFE_BABE);
            assert_eq!(store.read_f64(8).unwrap(), -1.5);
            store.release(&o).unwrap();
        }
    }

    #[test]
    fn noop_reports_capacity_zero_and_peek_minus_one() {
        let noop = BytesStore::noop();
        assert_eq!(noop.capacity(), 0);
        assert_eq!(noop.peek_unsigned_byte(0), -1);
        assert!(noop.read_u8(0).is_err());
        assert!(noop.write_u8(0, 1).is_err());
        // Lifecycle calls are absorbed.
        let o = owner();
        noop.reserve(&o).unwrap();
        noop.release(&o).unwrap();
    }

    #[test]
    fn released_sentinel_rejects_everything() {
        let released = BytesStore::released_sentinel();
        assert!(matches!(
            released.read_u8(0),
            Err(BytesError::ClosedState(_))
        ));
        assert!(matches!(
            released.reserve(&owner()),
            Err(BytesError::ClosedState(_))
        ));
    }

    #[test]
    fn cross_kind_copy() {
        let o = owner();
        let native = BytesStore::native(32, &o).unwrap();
        let heap = BytesStore::on_heap(32, &o);
        native.write_from(0, b"0123456789abcdef").unwrap();
        heap.write_store(4, &native, 2, 6).unwrap();
        let mut got = [0u8; 6];
        heap.read_into(4, &mut got).unwrap();
        assert_eq!(&got, b"234567");
        native.release(&o).unwrap();
        heap.release(&o).unwrap();
    }

    #[test]
    fn use_after_release_is_closed_state() {
        let o = owner();
        let store = BytesStore::native(16, &o).unwrap();
        store.write_u8(0, 7).unwrap();
        store.release(&o).unwrap();
        assert!(matches!(
            store.read_u8(0),
            Err(BytesError::ClosedState(_))
        ));
        assert!(matches!(
            store.write_u8(0, 1),
            Err(BytesError::ClosedState(_))
        ));
    }

    #[test]
    fn address_unsupported_on_heap() {
        let o = owner();
        let heap = BytesStore::on_heap(8, &o);
        assert!(matches!(
            heap.address(0),
            Err(BytesError::UnsupportedOperation(_))
        ));
        let native = BytesStore::native(8, &o).unwrap();
        assert!(!native.address(0).unwrap().is_null());
    }

    #[test]
    fn move_range_is_overlap_safe() {
        let o = owner();
        let store = BytesStore::on_heap(16, &o);
        store.write_from(0, b"abcdefgh").unwrap();
        store.move_range(0, 2, 6).unwrap();
        let mut got = [0u8; 8];
        store.read_into(0, &mut got).unwrap();
        assert_eq!(&got, b"ababcdef");
    }
}
