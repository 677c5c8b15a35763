//! Per-application mutual exclusion

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::store::ObjectKey;

/// One async mutex per application key, created on first use
#[derive(Default)]
pub struct KeyedLocks {
    locks: DashMap<ObjectKey, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other pass holds `key`
    pub async fn lock(&self, key: &ObjectKey) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the map shard is not held across the await
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        lock.lock_owned().await
    }

    /// Drop the entry for a deleted application. Only removed when the
    /// caller's guard is the sole remaining user.
    pub fn forget(&self, key: &ObjectKey) {
        self.locks.remove_if(key, |_, lock| Arc::strong_count(lock) <= 2);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let locks = Arc::new(KeyedLocks::new());
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));
        let key = ObjectKey::new("default", "shop");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let (locks, active, max_active, key) =
                (locks.clone(), active.clone(), max_active.clone(), key.clone());
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(&key).await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_active.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock(&ObjectKey::new("default", "a")).await;
        let _b = tokio::time::timeout(Duration::from_secs(1), locks.lock(&ObjectKey::new("default", "b")))
            .await
            .expect("distinct key should not wait");
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_forget_removes_idle_entry() {
        let locks = KeyedLocks::new();
        let key = ObjectKey::new("default", "gone");
        let guard = locks.lock(&key).await;
        locks.forget(&key);
        drop(guard);
        assert!(locks.is_empty());
    }
}
