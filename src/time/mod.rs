//! Distributed unique timestamps over a shared mapped page.
//!
//! A [`DistributedUniqueTimeProvider`] emits strictly increasing timestamps
//! whose lowest two decimal digits carry a host id (0..=99), so up to 100
//! cooperating processes or machines sharing one file never emit the same
//! value.  The shared page layout:
//!
//! ```text
//! offset   0: ASCII header "&TSF" + four newlines
//! offset 128: 8-byte word holding the last emitted nanosecond timestamp
//! offset 192: 100 slots of 8 bytes, one per host id (deduplication table)
//! ```
//!
//! The word at 128 is advanced only through compare-and-swap, so between any
//! two contenders at most one attempt succeeds and every successful emission
//! is strictly greater than the previous one.  Failed attempts re-derive the
//! next candidate from the freshly observed value, which grows monotonically,
//! so the retry loop terminates.
//!
//! Microsecond timestamps share the same word: a microsecond value `v` is
//! embedded as `v * 1000 + host_id`, which preserves both the nanosecond
//! ordering and the `% 100 == host_id` tag on the stored word.
//!
//! Configuration comes from the environment: `TIMESTAMP_PATH` overrides the
//! whole file path, `TIMESTAMP_DIR` the directory (default: the platform
//! temp directory), `HOST_ID` the host id (default 0), and `USER` names the
//! default file.

use std::cmp::Ordering;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{BytesError, Result};
use crate::mmap::MappedFile;
use crate::refcount::ReferenceOwner;
use crate::store::{page_size, StoreRef};

/// Number of distinct host ids encodable in a timestamp.
pub const HOST_IDS: u64 = 100;

const HEADER: [u8; 8] = *b"&TSF\n\n\n\n";
const LAST_TIME_OFFSET: u64 = 128;
const HOST_TABLE_OFFSET: u64 = 192;

/// The timestamp with the host id digits removed.
#[inline]
pub fn timestamp_of(value: u64) -> u64 {
    value - value % HOST_IDS
}

/// The host id carried in the lowest two decimal digits.
#[inline]
pub fn host_id_of(value: u64) -> u64 {
    value % HOST_IDS
}

// ─────────────────────────────────────────────────────────────────────────────
// Clock source
// ─────────────────────────────────────────────────────────────────────────────

/// A wall-clock source in Unix epoch time.
pub trait TimeProvider {
    fn current_time_nanos(&self) -> u64;

    fn current_time_micros(&self) -> u64 {
        self.current_time_nanos() / 1_000
    }

    fn current_time_millis(&self) -> u64 {
        self.current_time_nanos() / 1_000_000
    }
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeProvider for SystemClock {
    fn current_time_nanos(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Unique time provider
// ─────────────────────────────────────────────────────────────────────────────

/// Strictly increasing, host-tagged timestamps backed by a shared mapped
/// page.
pub struct DistributedUniqueTimeProvider {
    // The mapping must outlive the chunk store.
    _file: Arc<MappedFile>,
    store: StoreRef,
    owner: ReferenceOwner,
    host_id: u64,
    clock: Box<dyn TimeProvider + Send + Sync>,
}

impl DistributedUniqueTimeProvider {
    /// The process-wide provider, configured from the environment.
    pub fn instance() -> Result<Arc<DistributedUniqueTimeProvider>> {
        static INSTANCE: OnceLock<Mutex<Option<Arc<DistributedUniqueTimeProvider>>>> =
            OnceLock::new();
        let slot = INSTANCE.get_or_init(|| Mutex::new(None));
        let mut guard = slot.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(existing) = guard.as_ref() {
            return Ok(existing.clone());
        }
        let provider = Arc::new(Self::for_host_id(default_host_id()?)?);
        *guard = Some(provider.clone());
        Ok(provider)
    }

    /// A provider over the default file for an explicit host id.
    pub fn for_host_id(host_id: u64) -> Result<DistributedUniqueTimeProvider> {
        Self::for_path(default_path(), host_id)
    }

    /// A provider over an explicit file.
    pub fn for_path(path: impl AsRef<Path>, host_id: u64) -> Result<DistributedUniqueTimeProvider> {
        Self::with_clock(path, host_id, Box::new(SystemClock))
    }

    /// A provider with a caller-supplied clock source.
    pub fn with_clock(
        path: impl AsRef<Path>,
        host_id: u64,
        clock: Box<dyn TimeProvider + Send + Sync>,
    ) -> Result<DistributedUniqueTimeProvider> {
        if host_id >= HOST_IDS {
            return Err(BytesError::IllegalState(format!(
                "host id {} outside 0..{}",
                host_id, HOST_IDS
            )));
        }
        let file = MappedFile::open(path, page_size(), 0, false)?;
        let owner = ReferenceOwner::new("unique time provider");
        let store = file.acquire_chunk_for(0, &owner)?;
        // Fresh files are zero-filled; stamp the header once.  Concurrent
        // initialisers write identical bytes.
        if store.read_u8(0)? == 0 {
            store.write_from(0, &HEADER)?;
        }
        Ok(DistributedUniqueTimeProvider {
            _file: file,
            store,
            owner,
            host_id,
            clock,
        })
    }

    /// Host id encoded into every emitted value.
    pub fn host_id(&self) -> u64 {
        self.host_id
    }

    #[inline]
    fn pause() {
        std::hint::spin_loop();
    }

    /// A unique nanosecond timestamp: strictly greater than every previous
    /// emission through this file, with `value % 100 == host_id`.
    pub fn current_time_nanos(&self) -> Result<u64> {
        let t = self.clock.current_time_nanos();
        let candidate = t - t % HOST_IDS + self.host_id;
        let t0 = self.store.read_volatile_u64(LAST_TIME_OFFSET)?;
        if candidate > t0 && self.store.cas_u64(LAST_TIME_OFFSET, t0, candidate)? {
            return Ok(candidate);
        }
        loop {
            let t0 = self.store.read_volatile_u64(LAST_TIME_OFFSET)?;
            let mut next = t0 - t0 % HOST_IDS + self.host_id;
            if next <= t0 {
                next += HOST_IDS;
            }
            if self.store.cas_u64(LAST_TIME_OFFSET, t0, next)? {
                return Ok(next);
            }
            Self::pause();
        }
    }

    /// A unique microsecond timestamp with `value % 100 == host_id`,
    /// interoperating with nanosecond emissions on the same file.
    pub fn current_time_micros(&self) -> Result<u64> {
        let t = self.clock.current_time_micros();
        let value = t - t % HOST_IDS + self.host_id;
        let word = value * 1_000 + self.host_id;
        let t0 = self.store.read_volatile_u64(LAST_TIME_OFFSET)?;
        if word > t0 && self.store.cas_u64(LAST_TIME_OFFSET, t0, word)? {
            return Ok(value);
        }
        loop {
            let t0 = self.store.read_volatile_u64(LAST_TIME_OFFSET)?;
            let observed = t0 / 1_000;
            let mut next = observed - observed % HOST_IDS + self.host_id;
            let mut word = next * 1_000 + self.host_id;
            while word <= t0 {
                next += HOST_IDS;
                word = next * 1_000 + self.host_id;
            }
            if self.store.cas_u64(LAST_TIME_OFFSET, t0, word)? {
                return Ok(next);
            }
            Self::pause();
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Per-host deduplication table
    // ─────────────────────────────────────────────────────────────────────

    fn slot_for(value: u64) -> u64 {
        HOST_TABLE_OFFSET + 8 * host_id_of(value)
    }

    /// Compare `value` against the last retained timestamp for its host id.
    pub fn compare_by_host_id(&self, value: u64) -> Result<Ordering> {
        let prev = self.store.read_volatile_u64(Self::slot_for(value))?;
        Ok(timestamp_of(value).cmp(&timestamp_of(prev)))
    }

    /// Retain `value` for its host id when newer than the stored timestamp;
    /// returns how `value` compared.
    pub fn compare_and_retain_newer(&self, value: u64) -> Result<Ordering> {
        let slot = Self::slot_for(value);
        loop {
            let prev = self.store.read_volatile_u64(slot)?;
            let ord = timestamp_of(value).cmp(&timestamp_of(prev));
            if ord != Ordering::Greater {
                return Ok(ord);
            }
            if self.store.cas_u64(slot, prev, value)? {
                return Ok(Ordering::Greater);
            }
            Self::pause();
        }
    }
}

impl Drop for DistributedUniqueTimeProvider {
    fn drop(&mut self) {
        if let Err(e) = self.store.release(&self.owner) {
            if !matches!(e, BytesError::ClosedState(_)) {
                log::warn!("time provider drop could not release its store: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for DistributedUniqueTimeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedUniqueTimeProvider")
            .field("host_id", &self.host_id)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Environment configuration
// ─────────────────────────────────────────────────────────────────────────────

fn default_path() -> PathBuf {
    if let Ok(p) = env::var("TIMESTAMP_PATH") {
        return PathBuf::from(p);
    }
    let dir = env::var("TIMESTAMP_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir());
    let user = env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    dir.join(format!("{}.timestamps.dat", user))
}

fn default_host_id() -> Result<u64> {
    match env::var("HOST_ID") {
        Err(_) => Ok(0),
        Ok(raw) => raw.parse().map_err(|_| {
            BytesError::IllegalState(format!("HOST_ID must be an integer, got {:?}", raw))
        }),
    }
}
