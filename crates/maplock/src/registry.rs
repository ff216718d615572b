//! Lock registry - a concurrent map of named, fail-fast locks
//!
//! Provides create/destroy/acquire/probe on keys, with optional
//! timeout-driven automatic release.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::entry::{EntryHandle, LockEntry, LockState};
use crate::error::LockError;
use crate::expiry::ExpiryScheduler;

/// Opaque payload type carried by the shared registry
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Registry type of the process-wide instance; `None` stands for "no payload"
pub type SharedRegistry = LockRegistry<Option<Payload>>;

static SHARED_REGISTRY: OnceLock<SharedRegistry> = OnceLock::new();

/// The process-wide registry, created with default settings on first use
/// unless [`init_shared`] ran earlier
pub fn shared() -> &'static SharedRegistry {
    SHARED_REGISTRY.get_or_init(|| build_shared(RegistryConfig::default()))
}

/// Create the process-wide registry from `config`.
///
/// Returns `false` and leaves the existing registry untouched if it was
/// already created, either by an earlier call or by [`shared`].
pub fn init_shared(config: RegistryConfig) -> bool {
    let mut initialized = false;
    SHARED_REGISTRY.get_or_init(|| {
        initialized = true;
        build_shared(config)
    });
    initialized
}

fn build_shared(config: RegistryConfig) -> SharedRegistry {
    info!(
        initial_capacity = config.initial_capacity,
        "Shared lock registry initialized"
    );
    LockRegistry::with_config(config)
}

struct RegistryInner<V> {
    locks: DashMap<String, Arc<LockEntry<V>>>,
    scheduler: ExpiryScheduler,
}

/// Concurrent registry of named locks
///
/// Every operation returns immediately: acquisition either succeeds or
/// reports [`LockError::KeyNotFound`] / [`LockError::LockBusy`], it never
/// waits. Clones share the same set of locks.
pub struct LockRegistry<V> {
    inner: Arc<RegistryInner<V>>,
}

impl SharedRegistry {
    /// The process-wide registry, see [`shared`]
    pub fn shared() -> &'static SharedRegistry {
        shared()
    }
}

impl<V: Send + Sync + 'static> LockRegistry<V> {
    /// Create an empty registry whose timers run on the global expiry runtime
    pub fn new() -> Self {
        Self::with_scheduler(ExpiryScheduler::global())
    }

    /// Create an empty registry from configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self::build(
            DashMap::with_capacity(config.initial_capacity),
            ExpiryScheduler::global_with(&config.expiry),
        )
    }

    /// Create an empty registry whose timers run on `scheduler`
    pub fn with_scheduler(scheduler: ExpiryScheduler) -> Self {
        Self::build(DashMap::new(), scheduler)
    }

    fn build(locks: DashMap<String, Arc<LockEntry<V>>>, scheduler: ExpiryScheduler) -> Self {
        Self {
            inner: Arc::new(RegistryInner { locks, scheduler }),
        }
    }

    /// Create a lock named `key` carrying `value`. The lock starts unlocked.
    pub fn store(&self, key: impl Into<String>, value: V) -> Result<(), LockError> {
        self.insert(key.into(), value).map(|_| ())
    }

    /// Create a lock for every item, or none of them.
    ///
    /// On the first failure every lock created by this call is destroyed
    /// before the error is returned. Locks that existed beforehand are left
    /// untouched.
    pub fn store_many<I, K>(&self, items: I) -> Result<(), LockError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
    {
        let mut created: Vec<Arc<LockEntry<V>>> = Vec::new();

        for (key, value) in items {
            match self.insert(key.into(), value) {
                Ok(entry) => created.push(entry),
                Err(err) => {
                    warn!(
                        key = %err.key(),
                        rolled_back = created.len(),
                        "Batch lock creation failed, rolling back"
                    );
                    for entry in &created {
                        self.remove_entry(entry);
                    }
                    return Err(err);
                }
            }
        }

        debug!(count = created.len(), "Batch lock creation completed");
        Ok(())
    }

    /// Release and remove the lock named `key`. Absent keys are ignored.
    pub fn destroy(&self, key: &str) {
        if let Some((_, entry)) = self.inner.locks.remove(key) {
            entry.retire();
            debug!(key = %key, "Lock destroyed");
        }
    }

    /// Destroy every lock present when the call starts
    pub fn destroy_all(&self) {
        let keys = self.keys();
        for key in &keys {
            self.destroy(key);
        }
        debug!(count = keys.len(), "All locks destroyed");
    }

    /// Try to acquire `key`, auto-releasing after `timeout` unless it is zero
    pub fn lock(&self, key: &str, timeout: Duration) -> Result<EntryHandle<V>, LockError> {
        self.entry(key)?.acquire(timeout, &self.inner.scheduler)
    }

    /// Report whether `key` could be acquired right now, without acquiring it.
    ///
    /// The answer may be stale by the time a following [`lock`](Self::lock)
    /// runs.
    pub fn try_lock(&self, key: &str) -> Result<(), LockError> {
        self.entry(key)?.probe()
    }

    /// Force-release `key` regardless of who acquired it
    pub fn release(&self, key: &str) {
        if let Ok(entry) = self.entry(key) {
            entry.release();
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.locks.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.locks.is_empty()
    }

    /// Number of keys the map can hold without reallocating
    pub fn capacity(&self) -> usize {
        self.inner.locks.capacity()
    }

    /// Snapshot of the registered keys
    pub fn keys(&self) -> Vec<String> {
        self.inner
            .locks
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn state(&self, key: &str) -> Option<LockState> {
        self.entry(key).ok().map(|entry| entry.state())
    }

    pub fn is_locked(&self, key: &str) -> Option<bool> {
        self.state(key).map(LockState::is_locked)
    }

    fn insert(&self, key: String, value: V) -> Result<Arc<LockEntry<V>>, LockError> {
        match self.inner.locks.entry(key) {
            Entry::Occupied(occupied) => Err(LockError::DuplicateKey(occupied.key().clone())),
            Entry::Vacant(vacant) => {
                let entry = Arc::new(LockEntry::new(vacant.key().clone(), value));
                vacant.insert(Arc::clone(&entry));
                debug!(key = %entry.key(), "Lock created");
                Ok(entry)
            }
        }
    }

    // Only removes the mapping if it still points at this exact entry, so a
    // rollback never destroys a lock re-created under the same key.
    fn remove_entry(&self, entry: &Arc<LockEntry<V>>) {
        let removed = self
            .inner
            .locks
            .remove_if(entry.key(), |_, current| Arc::ptr_eq(current, entry));
        if removed.is_some() {
            entry.retire();
            debug!(key = %entry.key(), "Lock destroyed");
        }
    }

    fn entry(&self, key: &str) -> Result<Arc<LockEntry<V>>, LockError> {
        self.inner
            .locks
            .get(key)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| LockError::KeyNotFound(key.to_string()))
    }
}

impl<V: Clone + Send + Sync + 'static> LockRegistry<V> {
    /// Payload stored with `key`
    pub fn value(&self, key: &str) -> Option<V> {
        self.entry(key).ok().map(|entry| entry.value().clone())
    }
}

impl<V: Send + Sync + 'static> Default for LockRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Clone for LockRegistry<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for LockRegistry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockRegistry")
            .field("locks", &self.inner.locks.len())
            .field("scheduler", &self.inner.scheduler)
            .finish()
    }
}
