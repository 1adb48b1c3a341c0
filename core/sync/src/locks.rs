//! Per-name write serialization.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per note name.
///
/// Every read-compare-write against the local store for a name happens while
/// holding that name's guard. Different names never contend. Entries that no
/// guard or waiter references are dropped on the next acquisition.
#[derive(Default)]
pub struct NameLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl NameLocks {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the guard for `name`.
    pub async fn lock(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(name.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of names with a live entry.
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    /// Check if no name has a live entry.
    pub async fn is_empty(&self) -> bool {
        self.locks.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_name_is_exclusive() {
        let locks = NameLocks::new();
        let _guard = locks.lock("foo").await;

        let second = tokio::time::timeout(Duration::from_millis(50), locks.lock("foo")).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_different_names_do_not_contend() {
        let locks = NameLocks::new();
        let _foo = locks.lock("foo").await;

        let bar = tokio::time::timeout(Duration::from_millis(50), locks.lock("bar")).await;
        assert!(bar.is_ok());
    }

    #[tokio::test]
    async fn test_released_names_are_pruned() {
        let locks = NameLocks::new();
        for i in 0..100 {
            let _guard = locks.lock(&format!("note-{}", i)).await;
        }

        // Only the entry just acquired survives.
        let _last = locks.lock("last").await;
        assert_eq!(locks.len().await, 1);
    }

    #[tokio::test]
    async fn test_held_name_is_not_pruned() {
        let locks = Arc::new(NameLocks::new());
        let guard = locks.lock("foo").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("foo").await;
            })
        };
        tokio::task::yield_now().await;

        // Acquiring another name prunes nothing that is held or awaited.
        let _bar = locks.lock("bar").await;
        assert_eq!(locks.len().await, 2);
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }
}
