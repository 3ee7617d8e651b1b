//! Mutual exclusion between runs of the same pipeline.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Held for the lifetime of a run. Dropping it releases the lock.
pub struct RunLockGuard {
    key: String,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl RunLockGuard {
    /// Creates a guard that calls `release` when dropped.
    pub fn new(key: impl Into<String>, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            key: key.into(),
            release: Some(Box::new(release)),
        }
    }

    /// The key this guard holds.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for RunLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunLockGuard").field("key", &self.key).finish()
    }
}

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Grants at most one live run per key.
pub trait RunLock: Send + Sync + fmt::Debug {
    /// Acquires the lock for `key`, or returns `None` if it is held.
    fn try_acquire(&self, key: &str) -> Option<RunLockGuard>;

    /// Returns true if `key` is currently held.
    fn is_held(&self, key: &str) -> bool;
}

/// Process-local run lock.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRunLock {
    held: Arc<DashMap<String, Uuid>>,
}

impl InMemoryRunLock {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunLock for InMemoryRunLock {
    fn try_acquire(&self, key: &str) -> Option<RunLockGuard> {
        let holder = Uuid::new_v4();
        match self.held.entry(key.to_string()) {
            Entry::Occupied(_) => return None,
            Entry::Vacant(slot) => {
                slot.insert(holder);
            }
        }

        let held = Arc::clone(&self.held);
        let owned_key = key.to_string();
        Some(RunLockGuard::new(key, move || {
            held.remove_if(&owned_key, |_, current| *current == holder);
        }))
    }

    fn is_held(&self, key: &str) -> bool {
        self.held.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_until_release() {
        let lock = InMemoryRunLock::new();
        let guard = lock.try_acquire("enterprise_data_pipeline").unwrap();
        assert_eq!(guard.key(), "enterprise_data_pipeline");
        assert!(lock.is_held("enterprise_data_pipeline"));
        assert!(lock.try_acquire("enterprise_data_pipeline").is_none());

        drop(guard);
        assert!(!lock.is_held("enterprise_data_pipeline"));
        assert!(lock.try_acquire("enterprise_data_pipeline").is_some());
    }

    #[test]
    fn test_keys_are_independent() {
        let lock = InMemoryRunLock::new();
        let _a = lock.try_acquire("a").unwrap();
        assert!(lock.try_acquire("b").is_some());
    }

    #[test]
    fn test_clones_share_state() {
        let lock = InMemoryRunLock::new();
        let other = lock.clone();
        let _guard = lock.try_acquire("p").unwrap();
        assert!(other.try_acquire("p").is_none());
    }
}
