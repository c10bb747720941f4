//! Serialized access to raster and weather-model file readers
//!
//! The metadata readers behind [`crate::init::WeatherModelSource`] are not
//! safe to open concurrently. Every open/read happens while holding a
//! [`MetadataGuard`]; sources take the guard by reference so a read without
//! the lock does not type-check.

use parking_lot::{Mutex, MutexGuard};
use std::sync::{Arc, OnceLock};
use tracing::trace;

/// Process-wide lock around metadata file access, shared by `Arc`
#[derive(Debug, Clone, Default)]
pub struct MetadataLock {
    inner: Arc<Mutex<()>>,
}

/// Scoped proof that the metadata lock is held; released on drop
#[derive(Debug)]
pub struct MetadataGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl MetadataLock {
    /// A fresh, independent lock
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock shared by every run in this process
    pub fn global() -> MetadataLock {
        static GLOBAL: OnceLock<MetadataLock> = OnceLock::new();
        GLOBAL.get_or_init(MetadataLock::new).clone()
    }

    /// Block until the lock is free
    pub fn acquire(&self) -> MetadataGuard<'_> {
        trace!("acquiring metadata lock");
        MetadataGuard {
            _guard: self.inner.lock(),
        }
    }

    /// Run `f` with the lock held
    pub fn with<T>(&self, f: impl FnOnce(&MetadataGuard<'_>) -> T) -> T {
        let guard = self.acquire();
        f(&guard)
    }

    /// Whether some thread currently holds the lock
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    /// Whether both handles refer to the same lock
    pub fn same_lock(&self, other: &MetadataLock) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn test_guard_releases_on_scope_exit() {
        let lock = MetadataLock::new();
        {
            let _guard = lock.acquire();
            assert!(lock.is_locked());
        }
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_guard_releases_on_error_and_panic() {
        let lock = MetadataLock::new();
        let result: Result<(), &str> = lock.with(|_| Err("read failed"));
        assert!(result.is_err());
        assert!(!lock.is_locked());

        let shared = lock.clone();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let _guard = shared.acquire();
            panic!("reader blew up");
        }));
        assert!(outcome.is_err());
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_global_is_shared() {
        assert!(MetadataLock::global().same_lock(&MetadataLock::global()));
        assert!(!MetadataLock::new().same_lock(&MetadataLock::new()));
    }
}
