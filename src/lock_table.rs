// Named resource locks. One async mutex per resource key, created on first use
// and kept for the life of the table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

/// A mutex for one resource key plus the number of tasks holding or waiting on it.
pub struct ResourceLock {
    mutex: Arc<tokio::sync::Mutex<()>>,
    ref_count: AtomicUsize,
}

/// Held for the duration of a protected task body.
pub struct ResourceGuard {
    _guard: OwnedMutexGuard<()>,
    _ref: RefCountGuard,
}

/// Decrements the lock's ref count on drop (waiter gave up, or holder finished).
struct RefCountGuard(Arc<ResourceLock>);

impl Drop for RefCountGuard {
    fn drop(&mut self) {
        self.0.ref_count.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ResourceLock {
    fn new() -> Self {
        Self {
            mutex: Arc::new(tokio::sync::Mutex::new(())),
            ref_count: AtomicUsize::new(0),
        }
    }

    fn retain(self: &Arc<Self>) -> RefCountGuard {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
        RefCountGuard(self.clone())
    }

    /// Waits for the lock. Waiters are served in FIFO order.
    pub async fn lock(self: &Arc<Self>) -> ResourceGuard {
        let r = self.retain();
        let guard = self.mutex.clone().lock_owned().await;
        ResourceGuard {
            _guard: guard,
            _ref: r,
        }
    }

    pub fn try_lock(self: &Arc<Self>) -> Option<ResourceGuard> {
        let r = self.retain();
        let guard = self.mutex.clone().try_lock_owned().ok()?;
        Some(ResourceGuard {
            _guard: guard,
            _ref: r,
        })
    }

    /// Tasks currently holding or waiting for this lock.
    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    pub fn is_locked(&self) -> bool {
        self.mutex.try_lock().is_err()
    }
}

/// Maps resource keys to locks. The table-level mutex covers lookup/insert only.
#[derive(Default)]
pub struct ResourceLockTable {
    locks: Mutex<HashMap<String, Arc<ResourceLock>>>,
}

impl ResourceLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock for `key`, creating it on first use. Entries are never removed.
    pub fn acquire(&self, key: &str) -> Arc<ResourceLock> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(lock) = locks.get(key) {
            return lock.clone();
        }
        let lock = Arc::new(ResourceLock::new());
        locks.insert(key.to_string(), lock.clone());
        lock
    }

    pub fn contains(&self, key: &str) -> bool {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_returns_same_lock_for_same_key() {
        let table = ResourceLockTable::new();
        let a = table.acquire("data_refresh_task");
        let b = table.acquire("data_refresh_task");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn distinct_keys_get_distinct_locks() {
        let table = ResourceLockTable::new();
        let a = table.acquire("a");
        let b = table.acquire("b");
        assert!(!Arc::ptr_eq(&a, &b));
        let _ga = a.try_lock().expect("a free");
        assert!(b.try_lock().is_some(), "lock on a must not block b");
    }

    #[test]
    fn table_only_grows() {
        let table = ResourceLockTable::new();
        {
            let lock = table.acquire("grid_swap");
            let _g = lock.try_lock();
        }
        assert!(table.contains("grid_swap"));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn ref_count_tracks_holders_and_waiters() {
        let table = ResourceLockTable::new();
        let lock = table.acquire("k");
        let held = lock.lock().await;
        assert_eq!(lock.ref_count(), 1);
        assert!(lock.is_locked());
        assert!(lock.try_lock().is_none());
        assert_eq!(lock.ref_count(), 1, "failed try_lock must not leak a reference");

        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move {
                let _g = lock.lock().await;
            })
        };
        for _ in 0..50 {
            if lock.ref_count() == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(lock.ref_count(), 2);
        drop(held);
        waiter.await.unwrap();
        assert_eq!(lock.ref_count(), 0);
        assert!(!lock.is_locked());
    }
}
