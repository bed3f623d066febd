//! Keyed synchronization
//!
//! Serializes access to resources that are expensive to recompute and shared
//! between suites running concurrently, such as the vendored cookbooks or the
//! image built from a particular Dockerfile. Callers with equal keys run one
//! at a time; callers with different keys never block each other.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Mutex as AsyncMutex;

/// Registry of lazily created locks, one per key.
///
/// Locks are created on first use and live as long as the registry.
#[derive(Debug)]
pub struct KeyedMutex<K> {
    locks: Mutex<HashMap<Option<K>, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for KeyedMutex<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> KeyedMutex<K>
where
    K: Eq + Hash + Clone,
{
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: Option<&K>) -> Arc<AsyncMutex<()>> {
        // The map only guards insertion, so a poisoned lock holds no broken invariant
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.cloned()).or_default())
    }

    /// Run `f` while holding the lock for `key`.
    ///
    /// The lock is released however the future completes, including on
    /// error or panic.
    pub async fn synchronize<F, Fut, T>(&self, key: &K, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = self.lock_for(Some(key));
        let _guard = lock.lock().await;
        f().await
    }

    /// Run `f` while holding the single registry-wide lock
    pub async fn synchronize_global<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = self.lock_for(None);
        let _guard = lock.lock().await;
        f().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn equal_keys_are_serialized() {
        let registry = Arc::new(KeyedMutex::<String>::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                registry
                    .synchronize(&"Dockerfile".to_string(), || async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let registry = KeyedMutex::<&'static str>::new();
        let r = &registry;

        let result = r
            .synchronize(&"a", || async move {
                // Taking another key while holding "a" must not deadlock
                r.synchronize(&"b", || async { 42 }).await
            })
            .await;

        assert_eq!(result, 42);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn lock_released_after_error() {
        let registry = KeyedMutex::<u32>::new();

        let failed: Result<(), &str> = registry.synchronize(&1, || async { Err("boom") }).await;
        assert!(failed.is_err());

        let again = tokio::time::timeout(
            Duration::from_secs(1),
            registry.synchronize(&1, || async { "ok" }),
        )
        .await;
        assert_eq!(again.unwrap(), "ok");
    }

    #[tokio::test]
    async fn lock_released_after_panic() {
        let registry = Arc::new(KeyedMutex::<u32>::new());

        let panicking = Arc::clone(&registry);
        let joined = tokio::spawn(async move {
            panicking
                .synchronize(&7, || async { panic!("build exploded") })
                .await
        })
        .await;
        assert!(joined.is_err());

        let again = tokio::time::timeout(
            Duration::from_secs(1),
            registry.synchronize(&7, || async { 1 }),
        )
        .await;
        assert_eq!(again.unwrap(), 1);
    }

    #[tokio::test]
    async fn global_lock_is_separate_from_keys() {
        let registry = KeyedMutex::<u32>::new();
        let r = &registry;
        let value = r
            .synchronize_global(|| async move { r.synchronize(&1, || async { 5 }).await })
            .await;
        assert_eq!(value, 5);
    }
}
