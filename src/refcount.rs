//! Owner-tracked reference counting for stores and other shared resources.
//!
//! A [`ReferenceCounter`] tracks *which* owners hold a reservation, not just
//! how many: double-reserve and release-by-stranger are contract violations
//! and fail loudly instead of corrupting the count.  When the last owner
//! releases, the release hook runs exactly once and the counter transitions
//! permanently to the released state; every later operation fails with
//! `ClosedState`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{BytesError, Result};

static NEXT_OWNER_ID: AtomicU64 = AtomicU64::new(1);

/// An opaque reservation identity.
///
/// Owners compare by id, so two owners created with the same name are still
/// distinct.  Cloning an owner yields the *same* identity (the clone is a
/// handle, not a new owner).
#[derive(Debug, Clone)]
pub struct ReferenceOwner {
    id: u64,
    name: Arc<str>,
}

impl ReferenceOwner {
    /// Create a fresh owner identity with a diagnostic name.
    pub fn new(name: &str) -> Self {
        ReferenceOwner {
            id: NEXT_OWNER_ID.fetch_add(1, Ordering::Relaxed),
            name: Arc::from(name),
        }
    }

    /// Unique id of this owner.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Diagnostic name given at creation.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for ReferenceOwner {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ReferenceOwner {}

/// Hook invoked exactly once when the count reaches zero.
pub type ReleaseHook = Box<dyn Fn() + Send + Sync>;

struct CounterInner {
    owners: Vec<ReferenceOwner>,
    hook: Option<ReleaseHook>,
}

/// A per-resource reference counter with owner tracking.
pub struct ReferenceCounter {
    inner: Mutex<CounterInner>,
    /// Mirrors "owner list is empty" for lock-free liveness checks on the
    /// data path.
    released: AtomicBool,
    resource: &'static str,
}

impl ReferenceCounter {
    /// Create a counter with count 1 held by `creator`.
    pub fn new(resource: &'static str, creator: &ReferenceOwner, hook: Option<ReleaseHook>) -> Self {
        ReferenceCounter {
            inner: Mutex::new(CounterInner {
                owners: vec![creator.clone()],
                hook,
            }),
            released: AtomicBool::new(false),
            resource,
        }
    }

    /// Create a counter that is already in the released state.  Used by the
    /// `Released` sentinel store.
    pub fn released(resource: &'static str) -> Self {
        ReferenceCounter {
            inner: Mutex::new(CounterInner {
                owners: Vec::new(),
                hook: None,
            }),
            released: AtomicBool::new(true),
            resource,
        }
    }

    /// Cheap liveness check for the data path.
    #[inline]
    pub fn check_live(&self) -> Result<()> {
        if self.released.load(Ordering::Acquire) {
            Err(BytesError::ClosedState(self.resource))
        } else {
            Ok(())
        }
    }

    /// `true` once the count has reached zero.
    #[inline]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Add a reservation for `owner`.
    pub fn reserve(&self, owner: &ReferenceOwner) -> Result<()> {
        let mut inner = self.lock();
        if self.is_released() {
            return Err(BytesError::ClosedState(self.resource));
        }
        if inner.owners.iter().any(|o| o.id == owner.id) {
            return Err(BytesError::IllegalState(format!(
                "owner {} already holds a reservation on {}",
                owner.name(),
                self.resource
            )));
        }
        inner.owners.push(owner.clone());
        Ok(())
    }

    /// Like [`reserve`](Self::reserve) but returns `false` instead of failing
    /// when the resource is already released.
    pub fn try_reserve(&self, owner: &ReferenceOwner) -> Result<bool> {
        let mut inner = self.lock();
        if self.is_released() {
            return Ok(false);
        }
        if inner.owners.iter().any(|o| o.id == owner.id) {
            return Err(BytesError::IllegalState(format!(
                "owner {} already holds a reservation on {}",
                owner.name(),
                self.resource
            )));
        }
        inner.owners.push(owner.clone());
        Ok(true)
    }

    /// Drop `owner`'s reservation; runs the release hook if the count reaches
    /// zero.
    pub fn release(&self, owner: &ReferenceOwner) -> Result<()> {
        let hook = {
            let mut inner = self.lock();
            if self.is_released() {
                return Err(BytesError::ClosedState(self.resource));
            }
            let pos = inner.owners.iter().position(|o| o.id == owner.id);
            let Some(pos) = pos else {
                return Err(BytesError::IllegalState(format!(
                    "owner {} does not hold a reservation on {}",
                    owner.name(),
                    self.resource
                )));
            };
            inner.owners.swap_remove(pos);
            if inner.owners.is_empty() {
                self.released.store(true, Ordering::Release);
                inner.hook.take()
            } else {
                None
            }
        };
        // Run the hook outside the lock; it may touch the resource.
        if let Some(hook) = hook {
            hook();
        }
        Ok(())
    }

    /// Release `owner`'s reservation, demanding that it is the last one.
    ///
    /// Fails with `IllegalState` naming the remaining owners when the count
    /// would not reach zero; the reservation is kept in that case.
    pub fn release_last(&self, owner: &ReferenceOwner) -> Result<()> {
        {
            let inner = self.lock();
            if self.is_released() {
                return Err(BytesError::ClosedState(self.resource));
            }
            let others: Vec<&str> = inner
                .owners
                .iter()
                .filter(|o| o.id != owner.id)
                .map(|o| o.name())
                .collect();
            if !others.is_empty() {
                return Err(BytesError::IllegalState(format!(
                    "release_last of {} by {} leaves owner(s): {}",
                    self.resource,
                    owner.name(),
                    others.join(", ")
                )));
            }
        }
        self.release(owner)
    }

    /// Atomically move the reservation from `from` to `to` without the count
    /// crossing zero.
    pub fn reserve_transfer(&self, from: &ReferenceOwner, to: &ReferenceOwner) -> Result<()> {
        let mut inner = self.lock();
        if self.is_released() {
            return Err(BytesError::ClosedState(self.resource));
        }
        if inner.owners.iter().any(|o| o.id == to.id) {
            return Err(BytesError::IllegalState(format!(
                "owner {} already holds a reservation on {}",
                to.name(),
                self.resource
            )));
        }
        let pos = inner.owners.iter().position(|o| o.id == from.id);
        let Some(pos) = pos else {
            return Err(BytesError::IllegalState(format!(
                "owner {} does not hold a reservation on {}",
                from.name(),
                self.resource
            )));
        };
        inner.owners[pos] = to.clone();
        Ok(())
    }

    /// Current reservation count; 0 once released.
    pub fn refcount(&self) -> usize {
        self.lock().owners.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CounterInner> {
        // A poisoned counter mutex means a hook panicked; the owner list is
        // still consistent, so continue with the data.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl std::fmt::Debug for ReferenceCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceCounter")
            .field("resource", &self.resource)
            .field("refcount", &self.refcount())
            .field("released", &self.is_released())
            .finish()
    }
}
