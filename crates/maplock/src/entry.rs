//! Per-key lock records and the handles returned to lock holders
//!
//! All state transitions of one key (acquire, release, expiry, destroy) run
//! under that entry's mutex. A generation counter ties each timer and each
//! handle to the acquisition that created it, so a late timer or a stale
//! handle can never release somebody else's acquisition.

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::LockError;
use crate::expiry::{ExpiryScheduler, ExpiryTimer};

/// Observable state of a single lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// Free to acquire
    Unlocked,
    /// Held until explicitly released
    LockedUntimed,
    /// Held until released or until the timeout elapses
    LockedTimed,
}

impl LockState {
    pub fn is_locked(self) -> bool {
        !matches!(self, LockState::Unlocked)
    }
}

#[derive(Default)]
struct EntryState {
    in_use: bool,
    timeout: Duration,
    timer: Option<ExpiryTimer>,
    generation: u64,
    removed: bool,
}

impl EntryState {
    fn release(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        self.in_use = false;
    }

    fn lock_state(&self) -> LockState {
        match (self.in_use, self.timer.is_some()) {
            (false, _) => LockState::Unlocked,
            (true, false) => LockState::LockedUntimed,
            (true, true) => LockState::LockedTimed,
        }
    }
}

/// An entry in the registry: one named lock and its payload
pub(crate) struct LockEntry<V> {
    key: String,
    value: V,
    state: Mutex<EntryState>,
}

impl<V> LockEntry<V> {
    pub(crate) fn new(key: String, value: V) -> Self {
        Self {
            key,
            value,
            state: Mutex::new(EntryState::default()),
        }
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn value(&self) -> &V {
        &self.value
    }

    pub(crate) fn state(&self) -> LockState {
        self.state.lock().lock_state()
    }

    /// Fail-fast probe, never mutates
    pub(crate) fn probe(&self) -> Result<(), LockError> {
        let state = self.state.lock();
        if state.removed {
            return Err(LockError::KeyNotFound(self.key.clone()));
        }
        if state.in_use {
            return Err(LockError::LockBusy(self.key.clone()));
        }
        Ok(())
    }

    /// Force-release whatever acquisition is current
    pub(crate) fn release(&self) {
        let mut state = self.state.lock();
        if state.in_use {
            state.release();
            debug!(key = %self.key, "Lock released");
        }
    }

    /// Release and retire the entry so it can never be acquired again
    pub(crate) fn retire(&self) {
        let mut state = self.state.lock();
        state.release();
        state.removed = true;
    }

    fn release_generation(&self, generation: u64) -> bool {
        let mut state = self.state.lock();
        if state.in_use && state.generation == generation {
            state.release();
            debug!(key = %self.key, generation, "Lock released");
            true
        } else {
            false
        }
    }

    fn is_held_by(&self, generation: u64) -> bool {
        let state = self.state.lock();
        state.in_use && state.generation == generation
    }

    fn expire(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.removed || !state.in_use || state.generation != generation {
            return;
        }
        // The timer slot is only emptied by release, so an empty slot here
        // means this firing lost the race.
        if state.timer.is_none() {
            return;
        }
        state.timer = None;
        state.in_use = false;
        debug!(key = %self.key, generation, timeout_ms = state.timeout.as_millis() as u64, "Lock expired");
    }
}

impl<V: Send + Sync + 'static> LockEntry<V> {
    /// Atomically take the lock, arming an expiry timer for non-zero timeouts
    pub(crate) fn acquire(
        self: &Arc<Self>,
        timeout: Duration,
        scheduler: &ExpiryScheduler,
    ) -> Result<EntryHandle<V>, LockError> {
        let mut state = self.state.lock();
        if state.removed {
            return Err(LockError::KeyNotFound(self.key.clone()));
        }
        if state.in_use {
            return Err(LockError::LockBusy(self.key.clone()));
        }

        state.in_use = true;
        state.generation = state.generation.wrapping_add(1);
        state.timeout = timeout;
        let generation = state.generation;

        if !timeout.is_zero() {
            let entry: Weak<Self> = Arc::downgrade(self);
            state.timer = Some(scheduler.schedule(timeout, move || {
                if let Some(entry) = entry.upgrade() {
                    entry.expire(generation);
                }
            }));
        }

        debug!(key = %self.key, generation, timeout_ms = timeout.as_millis() as u64, "Lock acquired");

        Ok(EntryHandle {
            entry: Arc::clone(self),
            generation,
            timeout,
        })
    }
}

/// Proof of one successful acquisition, used to release it later
///
/// Releasing is idempotent and scoped to the acquisition that produced this
/// handle: once the lock has been released or has expired, the handle can
/// no longer affect it, even if someone else acquires the key again.
pub struct EntryHandle<V> {
    entry: Arc<LockEntry<V>>,
    generation: u64,
    timeout: Duration,
}

impl<V> EntryHandle<V> {
    /// Release this acquisition, cancelling its expiry timer if armed
    pub fn release(&self) {
        self.entry.release_generation(self.generation);
    }

    pub fn key(&self) -> &str {
        self.entry.key()
    }

    pub fn value(&self) -> &V {
        self.entry.value()
    }

    /// Timeout the lock was acquired with, `Duration::ZERO` if untimed
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether this acquisition still holds the lock
    pub fn is_held(&self) -> bool {
        self.entry.is_held_by(self.generation)
    }

    /// Convert into a guard that releases when dropped
    pub fn into_guard(self) -> LockGuard<V> {
        LockGuard { handle: self }
    }
}

impl<V> Clone for EntryHandle<V> {
    fn clone(&self) -> Self {
        Self {
            entry: Arc::clone(&self.entry),
            generation: self.generation,
            timeout: self.timeout,
        }
    }
}

impl<V> fmt::Debug for EntryHandle<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryHandle")
            .field("key", &self.entry.key())
            .field("generation", &self.generation)
            .finish()
    }
}

/// Scoped lock that releases its acquisition on drop
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<V> {
    handle: EntryHandle<V>,
}

impl<V> Deref for LockGuard<V> {
    type Target = EntryHandle<V>;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl<V> Drop for LockGuard<V> {
    fn drop(&mut self) {
        self.handle.release();
    }
}

impl<V> fmt::Debug for LockGuard<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LockGuard").field(&self.handle).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str) -> Arc<LockEntry<()>> {
        Arc::new(LockEntry::new(key.to_string(), ()))
    }

    #[test]
    fn test_state_transitions() {
        let scheduler = ExpiryScheduler::global();
        let e = entry("a");
        assert_eq!(e.state(), LockState::Unlocked);

        let untimed = e.acquire(Duration::ZERO, &scheduler).unwrap();
        assert_eq!(e.state(), LockState::LockedUntimed);
        untimed.release();
        assert_eq!(e.state(), LockState::Unlocked);

        let timed = e.acquire(Duration::from_secs(60), &scheduler).unwrap();
        assert_eq!(e.state(), LockState::LockedTimed);
        assert_eq!(timed.timeout(), Duration::from_secs(60));
        timed.release();
        assert_eq!(e.state(), LockState::Unlocked);
        assert!(!e.state().is_locked());
    }

    #[test]
    fn test_second_acquire_is_busy() {
        let scheduler = ExpiryScheduler::global();
        let e = entry("a");

        let _held = e.acquire(Duration::ZERO, &scheduler).unwrap();
        let err = e.acquire(Duration::ZERO, &scheduler).unwrap_err();
        assert_eq!(err, LockError::LockBusy("a".to_string()));
        assert_eq!(e.probe().unwrap_err(), LockError::LockBusy("a".to_string()));
    }

    #[test]
    fn test_release_is_idempotent() {
        let scheduler = ExpiryScheduler::global();
        let e = entry("a");

        let handle = e.acquire(Duration::from_secs(60), &scheduler).unwrap();
        assert!(handle.is_held());
        handle.release();
        handle.release();
        assert!(!handle.is_held());
        assert!(e.probe().is_ok());
    }

    #[test]
    fn test_stale_handle_cannot_release_new_acquisition() {
        let scheduler = ExpiryScheduler::global();
        let e = entry("a");

        let first = e.acquire(Duration::ZERO, &scheduler).unwrap();
        first.release();
        let second = e.acquire(Duration::ZERO, &scheduler).unwrap();

        first.release();
        assert!(second.is_held());
        assert_eq!(e.state(), LockState::LockedUntimed);
    }

    #[test]
    fn test_stale_timer_is_inert() {
        let scheduler = ExpiryScheduler::global();
        let e = entry("a");

        let first = e.acquire(Duration::from_secs(60), &scheduler).unwrap();
        let stale_generation = first.generation;
        first.release();
        let _second = e.acquire(Duration::from_secs(60), &scheduler).unwrap();

        // Simulate the first timer firing after it was cancelled
        e.expire(stale_generation);
        assert_eq!(e.state(), LockState::LockedTimed);
    }

    #[test]
    fn test_timer_expires_lock() {
        let scheduler = ExpiryScheduler::global();
        let e = entry("a");

        let handle = e.acquire(Duration::from_millis(30), &scheduler).unwrap();
        std::thread::sleep(Duration::from_millis(200));
        assert!(!handle.is_held());
        assert_eq!(e.state(), LockState::Unlocked);

        // Releasing after expiry is harmless
        handle.release();
        assert!(e.probe().is_ok());
    }

    #[test]
    fn test_handle_keeps_its_own_timeout() {
        let scheduler = ExpiryScheduler::global();
        let e = entry("a");

        let first = e.acquire(Duration::from_millis(30), &scheduler).unwrap();
        std::thread::sleep(Duration::from_millis(150));
        let second = e.acquire(Duration::ZERO, &scheduler).unwrap();

        assert_eq!(first.timeout(), Duration::from_millis(30));
        assert_eq!(first.clone().timeout(), Duration::from_millis(30));
        assert_eq!(second.timeout(), Duration::ZERO);
    }

    #[test]
    fn test_retired_entry_cannot_be_acquired() {
        let scheduler = ExpiryScheduler::global();
        let e = entry("a");

        let handle = e.acquire(Duration::from_secs(60), &scheduler).unwrap();
        e.retire();
        assert!(!handle.is_held());
        assert_eq!(
            e.acquire(Duration::ZERO, &scheduler).unwrap_err(),
            LockError::KeyNotFound("a".to_string())
        );
        assert_eq!(e.probe().unwrap_err(), LockError::KeyNotFound("a".to_string()));
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let scheduler = ExpiryScheduler::global();
        let e = entry("a");

        {
            let guard = e.acquire(Duration::ZERO, &scheduler).unwrap().into_guard();
            assert_eq!(guard.key(), "a");
            assert!(e.probe().is_err());
        }
        assert!(e.probe().is_ok());
    }
}
