//! Per-key in-flight locks.
//!
//! At most one fetch per cache key runs at a time. Entries are removed from
//! the map once the last holder or waiter is gone.
//!
//! Each key also carries a completion counter. A guard remembers the counter
//! value seen when its caller queued, so a waiter can tell whether another
//! holder finished a fetch while it was waiting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default, Clone)]
struct Slot {
    lock: Arc<AsyncMutex<()>>,
    completed: Arc<AtomicU64>,
}

type LockMap = Arc<Mutex<HashMap<String, Slot>>>;

#[derive(Debug, Default)]
pub(crate) struct KeyedLocks {
    locks: LockMap,
}

impl KeyedLocks {
    /// Wait for exclusive ownership of `key`.
    pub(crate) async fn acquire(&self, key: &str) -> FlightGuard {
        // the cloned lock keeps the slot (and its counter) alive while queued
        let (slot, seen) = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = locks.entry(key.to_string()).or_default().clone();
            let seen = slot.completed.load(Ordering::Acquire);
            (slot, seen)
        };
        let guard = Arc::clone(&slot.lock).lock_owned().await;
        FlightGuard {
            key: key.to_string(),
            locks: Arc::clone(&self.locks),
            completed: slot.completed,
            seen,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

pub(crate) struct FlightGuard {
    key: String,
    locks: LockMap,
    completed: Arc<AtomicU64>,
    seen: u64,
    guard: Option<OwnedMutexGuard<()>>,
}

impl FlightGuard {
    /// Whether another holder completed a fetch for this key after this caller queued.
    pub(crate) fn joined(&self) -> bool {
        self.completed.load(Ordering::Acquire) != self.seen
    }

    /// Record a successful fetch so current waiters can reuse it.
    pub(crate) fn complete(&self) {
        self.completed.fetch_add(1, Ordering::AcqRel);
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // only the map itself still references the lock
        if locks.get(&self.key).is_some_and(|slot| Arc::strong_count(&slot.lock) == 1) {
            locks.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_map_is_cleaned_after_release() {
        let locks = KeyedLocks::default();
        {
            let _a = locks.acquire("a").await;
            let _b = locks.acquire("b").await;
            assert_eq!(locks.len(), 2);
        }
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::default());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let (locks, active, peak) = (Arc::clone(&locks), Arc::clone(&active), Arc::clone(&peak));
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("k").await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_sees_completion_by_holder() {
        let locks = Arc::new(KeyedLocks::default());
        let holder = locks.acquire("k").await;
        assert!(!holder.joined());

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move { locks.acquire("k").await.joined() })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        holder.complete();
        drop(holder);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_waiter_without_completion_is_not_joined() {
        let locks = KeyedLocks::default();
        drop(locks.acquire("k").await);
        assert!(!locks.acquire("k").await.joined());
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let locks = KeyedLocks::default();
        let _a = locks.acquire("a").await;
        tokio::time::timeout(Duration::from_millis(50), locks.acquire("b")).await.unwrap();
    }
}
