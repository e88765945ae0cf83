//! Per-resource, non-blocking mutual exclusion.
//!
//! Node operations key a lock by volume and target path.  A caller that
//! finds the key held fails immediately instead of waiting; the orchestrator
//! retries later.  Keys are removed on release, so the table only ever holds
//! in-flight operations.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Table of currently held keys.
#[derive(Debug, Default)]
pub struct ResourceLocks {
    held: DashMap<String, ()>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take `key` if nobody holds it.  Returns `true` when the caller now
    /// owns the key.
    pub fn try_lock(&self, key: &str) -> bool {
        match self.held.entry(key.to_owned()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(());
                true
            }
        }
    }

    /// Release `key`.  Releasing a key that is not held does nothing.
    pub fn unlock(&self, key: &str) {
        self.held.remove(key);
    }

    /// Like [`Self::try_lock`], but releases the key when the guard drops.
    pub fn try_acquire(&self, key: impl Into<String>) -> Option<LockGuard<'_>> {
        let key = key.into();
        self.try_lock(&key).then(|| LockGuard { locks: self, key })
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

/// Holds a key in a [`ResourceLocks`] table until dropped.
#[derive(Debug)]
pub struct LockGuard<'a> {
    locks: &'a ResourceLocks,
    key: String,
}

impl LockGuard<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.locks.unlock(&self.key);
    }
}
