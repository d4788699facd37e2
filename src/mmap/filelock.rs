//! Re-entrant POSIX record locks keyed by canonical path.
//!
//! POSIX `fcntl` record locks are held per process, so two threads of one
//! process locking the same file would silently succeed where two processes
//! would serialise.  The process-wide table below makes the re-acquire path
//! explicit: the thread already holding the lock for a path bumps a counter
//! with no OS call, and a *different* thread re-acquiring is a programming
//! error that is logged and not serialised.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::thread::ThreadId;

use crate::error::{BytesError, Result};

struct HeldLock {
    owning_thread: ThreadId,
    counter: u32,
}

fn held_locks() -> &'static Mutex<HashMap<PathBuf, HeldLock>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, HeldLock>>> = OnceLock::new();
    LOCKS.get_or_init(|| Mutex::new(HashMap::new()))
}

fn fcntl_lock(fd: RawFd, pos: u64, size: u64, shared: bool, block: bool) -> Result<bool> {
    // SAFETY: zeroed flock then explicit field init is the portable way to
    // build the struct across libc layouts.
    let mut fl: libc::flock = unsafe { std::mem::zeroed() };
    fl.l_type = if shared { libc::F_RDLCK } else { libc::F_WRLCK } as libc::c_short;
    fl.l_whence = libc::SEEK_SET as libc::c_short;
    fl.l_start = pos as libc::off_t;
    fl.l_len = size as libc::off_t;
    let cmd = if block { libc::F_SETLKW } else { libc::F_SETLK };
    // SAFETY: fd is an open descriptor, fl is initialised above.
    let rc = unsafe { libc::fcntl(fd, cmd, &fl as *const libc::flock) };
    if rc == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        // Held elsewhere: only reachable on the non-blocking path.
        Some(code) if code == libc::EACCES || code == libc::EAGAIN => Ok(false),
        _ => Err(BytesError::IoRuntime(err)),
    }
}

fn fcntl_unlock(fd: RawFd, pos: u64, size: u64) {
    let mut fl: libc::flock = unsafe { std::mem::zeroed() };
    fl.l_type = libc::F_UNLCK as libc::c_short;
    fl.l_whence = libc::SEEK_SET as libc::c_short;
    fl.l_start = pos as libc::off_t;
    fl.l_len = size as libc::off_t;
    // SAFETY: as in fcntl_lock.  Unlock failures have no recovery path;
    // the descriptor close will drop the lock regardless.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETLK, &fl as *const libc::flock) };
    if rc != 0 {
        log::error!(
            "failed to release file lock: {}",
            std::io::Error::last_os_error()
        );
    }
}

/// Holds one level of a re-entrant file lock; dropping it releases that
/// level, and the OS lock itself when the count reaches zero.
///
/// Deliberately `!Send`: a guard must be dropped on the thread that acquired
/// it.
pub struct FileLockGuard {
    path: PathBuf,
    fd: RawFd,
    pos: u64,
    size: u64,
    _not_send: PhantomData<*const ()>,
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        let mut table = held_locks().lock().unwrap_or_else(|p| p.into_inner());
        let Some(held) = table.get_mut(&self.path) else {
            log::error!(
                "file lock table has no entry for {} on release",
                self.path.display()
            );
            return;
        };
        held.counter -= 1;
        if held.counter == 0 {
            table.remove(&self.path);
            fcntl_unlock(self.fd, self.pos, self.size);
        }
    }
}

impl std::fmt::Debug for FileLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLockGuard")
            .field("path", &self.path)
            .field("pos", &self.pos)
            .field("size", &self.size)
            .finish()
    }
}

/// Acquire (or re-acquire) the lock for `canonical_path` over
/// `[pos, pos + size)`.
///
/// Returns `Ok(None)` only on the non-blocking path when the OS lock is held
/// by another process.
pub(crate) fn lock_region(
    canonical_path: &Path,
    fd: RawFd,
    pos: u64,
    size: u64,
    shared: bool,
    block: bool,
) -> Result<Option<FileLockGuard>> {
    let me = std::thread::current().id();
    let mut table = held_locks().lock().unwrap_or_else(|p| p.into_inner());

    if let Some(held) = table.get_mut(canonical_path) {
        if held.owning_thread != me {
            // fcntl locks do not serialise threads of one process; calling
            // in from a second thread cannot be given real exclusion.
            log::error!(
                "file lock on {} acquired by thread {:?} while held by {:?}; \
                 fcntl locks are per-process and this will NOT serialise",
                canonical_path.display(),
                me,
                held.owning_thread
            );
        }
        held.counter += 1;
        return Ok(Some(FileLockGuard {
            path: canonical_path.to_path_buf(),
            fd,
            pos,
            size,
            _not_send: PhantomData,
        }));
    }

    // First acquisition by this process: take the OS lock while holding the
    // table mutex so a racing thread sees the entry, not a second fcntl.
    if !fcntl_lock(fd, pos, size, shared, block)? {
        return Ok(None);
    }
    table.insert(
        canonical_path.to_path_buf(),
        HeldLock {
            owning_thread: me,
            counter: 1,
        },
    );
    Ok(Some(FileLockGuard {
        path: canonical_path.to_path_buf(),
        fd,
        pos,
        size,
        _not_send: PhantomData,
    }))
}
