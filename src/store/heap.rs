//! On-heap backing memory: a boxed byte array, optionally viewed through an
//! interior window.

use std::cell::UnsafeCell;

/// A heap-array-backed store.
///
/// `base_offset` lets a store view the tail of a larger array (the window
/// `[base_offset, buf.len())`) without copying; reported capacity is the
/// window length.
pub struct HeapStore {
    buf: UnsafeCell<Box<[u8]>>,
    base_offset: u64,
}

impl HeapStore {
    /// Allocate a zero-filled array of `capacity` bytes.
    pub fn allocate(capacity: u64) -> Self {
        HeapStore {
            buf: UnsafeCell::new(vec![0u8; capacity as usize].into_boxed_slice()),
            base_offset: 0,
        }
    }

    /// Take ownership of `data` as the backing array.
    pub fn from_vec(data: Vec<u8>) -> Self {
        HeapStore {
            buf: UnsafeCell::new(data.into_boxed_slice()),
            base_offset: 0,
        }
    }

    /// Take ownership of `data`, exposing only `[base_offset, data.len())`.
    pub fn from_vec_offset(data: Vec<u8>, base_offset: u64) -> Self {
        debug_assert!(base_offset <= data.len() as u64);
        HeapStore {
            buf: UnsafeCell::new(data.into_boxed_slice()),
            base_offset,
        }
    }

    /// Base pointer of the visible window.
    #[inline]
    pub fn base(&self) -> *mut u8 {
        // SAFETY: the box is never reallocated after construction.
        unsafe { (*self.buf.get()).as_mut_ptr().add(self.base_offset as usize) }
    }

    /// Offset of the window within the underlying array.
    #[inline]
    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    /// Length of the visible window in bytes.
    #[inline]
    pub fn capacity(&self) -> u64 {
        let full = unsafe { (&*self.buf.get()).len() as u64 };
        full - self.base_offset
    }
}

// SAFETY: mutation goes through raw pointers under the store's documented
// access contract; the box itself is never resized or moved.
unsafe impl Send for HeapStore {}
unsafe impl Sync for HeapStore {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_hides_the_prefix() {
        let store = HeapStore::from_vec_offset(vec![1, 2, 3, 4, 5], 2);
        assert_eq!(store.capacity(), 3);
        assert_eq!(unsafe { *store.base() }, 3);
    }
}
