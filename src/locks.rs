//! Per-document write serialization.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Registry of async mutexes keyed by document id. Holding the guard gives
/// exclusive write access to that document within this process; writers in
/// other processes are caught by the document version check.
///
/// Entries live only while some task holds or waits on them: hand the guard
/// back through [`DocumentLocks::release`] and an idle entry is dropped.
#[derive(Default)]
pub struct DocumentLocks {
    locks: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl DocumentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, document_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(document_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Unlock and drop the entry unless another task holds or awaits it.
    pub fn release(&self, document_id: i64, guard: OwnedMutexGuard<()>) {
        drop(guard);
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // the map's own Arc is the last one: nobody is queued
        if locks
            .get(&document_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&document_id);
        }
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
    use std::time::Duration;

    #[tokio::test]
    async fn same_document_is_serialized() {
        let locks = Arc::new(DocumentLocks::new());
        let guard = locks.acquire(1).await;

        let other = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = other.acquire(1).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn different_documents_do_not_block() {
        let locks = DocumentLocks::new();
        let a = locks.acquire(1).await;
        let _b = tokio::time::timeout(Duration::from_millis(100), locks.acquire(2))
            .await
            .unwrap();
        assert_eq!(locks.len(), 2);
        locks.release(1, a);
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn release_keeps_entry_while_others_wait() {
        let locks = Arc::new(DocumentLocks::new());
        let guard = locks.acquire(5).await;

        let other = locks.clone();
        let waiter = tokio::spawn(async move {
            let g = other.acquire(5).await;
            other.release(5, g);
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        locks.release(5, guard);
        assert_eq!(locks.len(), 1);
        waiter.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn idle_entries_are_dropped() {
        let locks = DocumentLocks::new();
        for id in 0..100 {
            let guard = locks.acquire(id).await;
            locks.release(id, guard);
        }
        assert!(locks.is_empty());
    }
}
