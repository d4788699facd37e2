//! Off-heap backing memory: page-aligned zeroed allocations and the wrapper
//! for caller-owned raw pointers.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{BytesError, Result};

/// Cached OS page size in bytes.
pub fn page_size() -> u64 {
    static PAGE: AtomicU64 = AtomicU64::new(0);
    let cached = PAGE.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }
    // SAFETY: sysconf is always safe to call.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let size = if size > 0 { size as u64 } else { 4096 };
    PAGE.store(size, Ordering::Relaxed);
    size
}

/// Round `n` up to the next page boundary.
pub fn page_round_up(n: u64) -> u64 {
    let page = page_size();
    n.div_ceil(page) * page
}

/// A page-aligned, zero-initialised off-heap allocation.
///
/// Freed when the owning store is dropped, not when it is released: release
/// flips the store's logical state so that stale holders observe
/// `ClosedState` instead of dereferencing freed memory.
pub struct NativeStore {
    addr: *mut u8,
    capacity: u64,
    layout: Layout,
}

impl NativeStore {
    /// Allocate `capacity` bytes (page-aligned start, zero-filled).
    pub fn allocate(capacity: u64) -> Result<Self> {
        if capacity == 0 {
            return Err(BytesError::IllegalState(
                "cannot allocate a zero-capacity native store".to_string(),
            ));
        }
        let layout = Layout::from_size_align(capacity as usize, page_size() as usize)
            .map_err(|e| BytesError::IllegalState(format!("bad allocation layout: {}", e)))?;
        // SAFETY: layout has non-zero size.
        let addr = unsafe { alloc_zeroed(layout) };
        if addr.is_null() {
            return Err(BytesError::IoRuntime(std::io::Error::new(
                std::io::ErrorKind::OutOfMemory,
                format!("failed to allocate {} bytes off-heap", capacity),
            )));
        }
        Ok(NativeStore {
            addr,
            capacity,
            layout,
        })
    }

    #[inline]
    pub fn addr(&self) -> *mut u8 {
        self.addr
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}

impl Drop for NativeStore {
    fn drop(&mut self) {
        // SAFETY: addr/layout came from alloc_zeroed above.
        unsafe { dealloc(self.addr, self.layout) };
    }
}

// SAFETY: the allocation is exclusively owned by the store; concurrent access
// discipline is the store's documented contract (disjoint regions, or the
// atomic accessors).
unsafe impl Send for NativeStore {}
unsafe impl Sync for NativeStore {}

/// A view over caller-owned memory.  Never freed by this crate.
pub struct PointerStore {
    addr: *mut u8,
    len: u64,
}

impl PointerStore {
    /// Wrap `len` bytes at `addr`.
    ///
    /// # Safety
    /// The memory must stay valid and writable for the lifetime of the store.
    pub unsafe fn wrap(addr: *mut u8, len: u64) -> Self {
        PointerStore { addr, len }
    }

    #[inline]
    pub fn addr(&self) -> *mut u8 {
        self.addr
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.len
    }
}

// SAFETY: validity and aliasing are the wrapper's documented caller contract.
unsafe impl Send for PointerStore {}
unsafe impl Sync for PointerStore {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_round_up_is_monotone() {
        let page = page_size();
        assert_eq!(page_round_up(0), 0);
        assert_eq!(page_round_up(1), page);
        assert_eq!(page_round_up(page), page);
        assert_eq!(page_round_up(page + 1), 2 * page);
    }

    #[test]
    fn allocation_is_zeroed_and_page_aligned() {
        let store = NativeStore::allocate(100).unwrap();
        assert_eq!(store.addr() as usize % page_size() as usize, 0);
        for i in 0..100 {
            assert_eq!(unsafe { *store.addr().add(i) }, 0);
        }
    }
}
