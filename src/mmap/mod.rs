//! Chunked memory mapping over a growing file.
//!
//! A [`MappedFile`] presents a file as an effectively unbounded sequence of
//! bytes by mapping fixed-size windows (chunks) on demand:
//!
//! - chunk `i` covers file offsets `[i * chunk_size, (i + 1) * chunk_size)`
//!   with an extra `overlap_size` bytes mapped past the end, so a record that
//!   straddles a chunk boundary can still be written through one contiguous
//!   mapping;
//! - chunk and overlap sizes are rounded up to the OS page size so every
//!   mmap offset is page-aligned;
//! - the file is extended (and padded to the chunk boundary plus overlap)
//!   when a chunk beyond the current length is first acquired for writing;
//!   the kernel zero-fills the new pages.
//!
//! Each mapped chunk is a reference-counted [`BytesStore`]; the mapper holds
//! only weak references, so a chunk whose last reservation is released runs
//! its sync hook, becomes logically closed, and is unmapped when the last
//! `Arc` drops.  Acquiring the same chunk index later maps it afresh.

mod filelock;

pub use filelock::FileLockGuard;

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use libc::c_void;

use crate::bytes::Bytes;
use crate::error::{BytesError, Result};
use crate::refcount::ReferenceOwner;
use crate::store::{page_round_up, BytesStore, StoreRef};

/// When mapped chunks are flushed to the backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Never msync; the OS writes pages back at its own pace.
    None,
    /// msync every live chunk when the `MappedFile` is dropped.
    MSyncOnClose,
    /// msync each chunk's range when its last reservation is released.
    MSyncEveryChunk,
}

/// One mmap window of the file, owned by a `Mapped` [`BytesStore`].
pub struct MappedChunk {
    addr: *mut u8,
    start: u64,
    mapping_len: u64,
    safe_len: u64,
    read_only: bool,
}

impl MappedChunk {
    /// File offset of the first byte of the window.
    #[inline]
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Total mapped length (chunk plus overlap).
    #[inline]
    pub fn mapping_len(&self) -> u64 {
        self.mapping_len
    }

    /// Length before the overlap grace region.
    #[inline]
    pub fn safe_len(&self) -> u64 {
        self.safe_len
    }

    #[inline]
    pub fn read_only(&self) -> bool {
        self.read_only
    }

    #[inline]
    pub(crate) fn addr(&self) -> *mut u8 {
        self.addr
    }
}

impl Drop for MappedChunk {
    fn drop(&mut self) {
        // SAFETY: addr/mapping_len came from a successful mmap.
        unsafe { libc::munmap(self.addr as *mut c_void, self.mapping_len as usize) };
    }
}

// SAFETY: the mapping is process-shared memory; access discipline is the
// store contract (disjoint regions or atomic accessors).
unsafe impl Send for MappedChunk {}
unsafe impl Sync for MappedChunk {}

/// msync a raw range, logging rather than failing when the flush is slow.
fn msync_range(addr: usize, len: u64) -> Result<()> {
    let began = Instant::now();
    // SAFETY: caller passes a live mapping's address and length.
    let rc = unsafe { libc::msync(addr as *mut c_void, len as usize, libc::MS_SYNC) };
    if rc != 0 {
        return Err(BytesError::IoRuntime(std::io::Error::last_os_error()));
    }
    let took = began.elapsed();
    if took.as_millis() >= 5 {
        log::warn!(
            "slow msync: {} bytes took {:.1} ms",
            len,
            took.as_secs_f64() * 1e3
        );
    }
    Ok(())
}

/// A chunked, page-aligned memory mapping of one file.
pub struct MappedFile {
    path: PathBuf,
    canonical_path: PathBuf,
    file: File,
    chunk_size: u64,
    overlap_size: u64,
    read_only: bool,
    sync_mode: SyncMode,
    file_length: AtomicU64,
    chunks: Mutex<Vec<Option<Weak<BytesStore>>>>,
}

impl MappedFile {
    /// Open (creating if absent, unless read-only) with [`SyncMode::None`].
    ///
    /// `chunk_size` and `overlap_size` are rounded up to the page size.
    pub fn open(
        path: impl AsRef<Path>,
        chunk_size: u64,
        overlap_size: u64,
        read_only: bool,
    ) -> Result<Arc<MappedFile>> {
        Self::open_sync(path, chunk_size, overlap_size, read_only, SyncMode::None)
    }

    /// Open with an explicit [`SyncMode`].
    pub fn open_sync(
        path: impl AsRef<Path>,
        chunk_size: u64,
        overlap_size: u64,
        read_only: bool,
        sync_mode: SyncMode,
    ) -> Result<Arc<MappedFile>> {
        if chunk_size == 0 {
            return Err(BytesError::IllegalState(
                "chunk_size must be non-zero".to_string(),
            ));
        }
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(!read_only)
            .open(&path)?;
        let canonical_path = path.canonicalize()?;
        let file_length = file.metadata()?.len();
        Ok(Arc::new(MappedFile {
            path,
            canonical_path,
            file,
            chunk_size: page_round_up(chunk_size),
            overlap_size: page_round_up(overlap_size),
            read_only,
            sync_mode,
            file_length: AtomicU64::new(file_length),
            chunks: Mutex::new(Vec::new()),
        }))
    }

    /// Path the file was opened with.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Chunk size after page rounding.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Overlap size after page rounding.
    pub fn overlap_size(&self) -> u64 {
        self.overlap_size
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn sync_mode(&self) -> SyncMode {
        self.sync_mode
    }

    /// Current file length in bytes.
    pub fn file_length(&self) -> u64 {
        self.file_length.load(Ordering::Acquire)
    }

    /// Number of chunks currently mapped and live.
    pub fn chunk_count(&self) -> usize {
        let chunks = self.lock_chunks();
        chunks
            .iter()
            .flatten()
            .filter(|w| w.upgrade().is_some_and(|s| !s.is_released()))
            .count()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Chunk acquisition
    // ─────────────────────────────────────────────────────────────────────

    /// Return the mapped store whose window contains `offset`, reserving it
    /// for `owner`.  Maps the chunk (growing the file if permitted) when it
    /// is not currently live.
    pub fn acquire_chunk_for(&self, offset: u64, owner: &ReferenceOwner) -> Result<StoreRef> {
        let index = (offset / self.chunk_size) as usize;
        let mut chunks = self.lock_chunks();

        if let Some(Some(weak)) = chunks.get(index) {
            if let Some(store) = weak.upgrade() {
                if !store.is_released() {
                    store.reserve(owner)?;
                    return Ok(store);
                }
            }
        }

        let store = self.map_chunk(index, owner)?;
        if chunks.len() <= index {
            chunks.resize_with(index + 1, || None);
        }
        chunks[index] = Some(Arc::downgrade(&store));
        Ok(store)
    }

    /// Build a cursor positioned for reading at `offset` over the containing
    /// chunk.
    pub fn acquire_bytes_for_read(
        self: &Arc<Self>,
        owner: &ReferenceOwner,
        offset: u64,
    ) -> Result<Bytes> {
        let store = self.acquire_chunk_for(offset, owner)?;
        Bytes::over_mapped(self.clone(), store, owner.clone(), offset, false)
    }

    /// Build a cursor positioned for writing at `offset` over the containing
    /// chunk.
    pub fn acquire_bytes_for_write(
        self: &Arc<Self>,
        owner: &ReferenceOwner,
        offset: u64,
    ) -> Result<Bytes> {
        if self.read_only {
            return Err(BytesError::IllegalState("Read Only".to_string()));
        }
        let store = self.acquire_chunk_for(offset, owner)?;
        Bytes::over_mapped(self.clone(), store, owner.clone(), offset, true)
    }

    /// Maps chunk `index`; caller holds the chunks lock (growth is
    /// serialised by it).
    fn map_chunk(&self, index: usize, owner: &ReferenceOwner) -> Result<StoreRef> {
        let start = index as u64 * self.chunk_size;
        let mapping_len = self.chunk_size + self.overlap_size;
        let needed = start + mapping_len;

        if self.file_length() < needed {
            if self.read_only {
                return Err(BytesError::IoRuntime(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!(
                        "chunk {} at offset {} is beyond the end of read-only file {}",
                        index,
                        start,
                        self.path.display()
                    ),
                )));
            }
            // SAFETY: fd is open for writing; length is non-negative.
            let rc = unsafe { libc::ftruncate(self.file.as_raw_fd(), needed as libc::off_t) };
            if rc != 0 {
                return Err(BytesError::IoRuntime(std::io::Error::last_os_error()));
            }
            self.file_length.store(needed, Ordering::Release);
        }

        let prot = if self.read_only {
            libc::PROT_READ
        } else {
            libc::PROT_READ | libc::PROT_WRITE
        };
        // SAFETY: fd is open, start is page-aligned (chunk_size is page
        // rounded), and the file covers [start, start + mapping_len).
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                mapping_len as usize,
                prot,
                libc::MAP_SHARED,
                self.file.as_raw_fd(),
                start as libc::off_t,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(BytesError::IoRuntime(std::io::Error::last_os_error()));
        }

        let chunk = MappedChunk {
            addr: addr as *mut u8,
            start,
            mapping_len,
            safe_len: self.chunk_size,
            read_only: self.read_only,
        };
        let hook: Option<crate::refcount::ReleaseHook> = match self.sync_mode {
            SyncMode::MSyncEveryChunk => {
                let raw_addr = addr as usize;
                Some(Box::new(move || {
                    if let Err(e) = msync_range(raw_addr, mapping_len) {
                        log::warn!("msync on chunk release failed: {}", e);
                    }
                }))
            }
            _ => None,
        };
        Ok(BytesStore::mapped(chunk, owner, hook))
    }

    // ─────────────────────────────────────────────────────────────────────
    // File locks
    // ─────────────────────────────────────────────────────────────────────

    /// Acquire a re-entrant OS file lock over `[pos, pos + size)`, blocking
    /// until it is granted.
    pub fn lock(&self, pos: u64, size: u64, shared: bool) -> Result<FileLockGuard> {
        match filelock::lock_region(
            &self.canonical_path,
            self.file.as_raw_fd(),
            pos,
            size,
            shared,
            true,
        )? {
            Some(guard) => Ok(guard),
            // Unreachable on the blocking path; keep the error honest.
            None => Err(BytesError::IoRuntime(std::io::Error::other(
                "blocking file lock was not granted",
            ))),
        }
    }

    /// Like [`lock`](Self::lock) but returns `None` immediately when the
    /// region is held elsewhere.
    pub fn try_lock(&self, pos: u64, size: u64, shared: bool) -> Result<Option<FileLockGuard>> {
        filelock::lock_region(
            &self.canonical_path,
            self.file.as_raw_fd(),
            pos,
            size,
            shared,
            false,
        )
    }

    fn lock_chunks(&self) -> std::sync::MutexGuard<'_, Vec<Option<Weak<BytesStore>>>> {
        self.chunks.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        if self.sync_mode != SyncMode::MSyncOnClose {
            return;
        }
        let chunks = self.lock_chunks();
        for store in chunks.iter().flatten().filter_map(|w| w.upgrade()) {
            if let crate::store::StoreKind::Mapped(chunk) = store.kind() {
                if let Err(e) = msync_range(chunk.addr() as usize, chunk.mapping_len()) {
                    log::warn!(
                        "msync on close of {} failed: {}",
                        self.path.display(),
                        e
                    );
                }
            }
        }
    }
}

impl std::fmt::Debug for MappedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedFile")
            .field("path", &self.path)
            .field("chunk_size", &self.chunk_size)
            .field("overlap_size", &self.overlap_size)
            .field("read_only", &self.read_only)
            .field("file_length", &self.file_length())
            .finish()
    }
}
