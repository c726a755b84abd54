use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use vecsync_core::LogicalKey;

/// Per-logical-key async mutexes.
///
/// Serializes reconciliation of the same key while leaving different keys
/// fully concurrent. Waiters are served in FIFO order, so notifications for
/// one key are applied in the order they reached the lock. Entries are held
/// weakly and pruned once no guard references them.
#[derive(Default)]
pub struct KeyLocks {
    inner: Mutex<HashMap<LogicalKey, Weak<AsyncMutex<()>>>>,
}

/// Guards for a set of keys; the keys unlock when this is dropped.
#[must_use = "keys unlock as soon as the guards are dropped"]
pub struct KeyGuards {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl KeyGuards {
    pub fn len(&self) -> usize {
        self._guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self._guards.is_empty()
    }
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every key in `keys`.
    ///
    /// Keys are acquired in sorted order, so two batches sharing keys cannot
    /// deadlock.
    pub async fn lock_all<'a>(&self, keys: impl IntoIterator<Item = &'a LogicalKey>) -> KeyGuards {
        let sorted: BTreeSet<&LogicalKey> = keys.into_iter().collect();
        let mut guards = Vec::with_capacity(sorted.len());
        for key in sorted {
            let mutex = self.mutex_for(key);
            guards.push(mutex.lock_owned().await);
        }
        KeyGuards { _guards: guards }
    }

    pub async fn lock(&self, key: &LogicalKey) -> KeyGuards {
        self.lock_all(std::iter::once(key)).await
    }

    /// Number of keys with a live lock entry.
    pub fn active(&self) -> usize {
        let map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.values().filter(|w| w.strong_count() > 0).count()
    }

    fn mutex_for(&self, key: &LogicalKey) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = map.get(key).and_then(Weak::upgrade) {
            return existing;
        }
        map.retain(|_, weak| weak.strong_count() > 0);
        let mutex = Arc::new(AsyncMutex::new(()));
        map.insert(key.clone(), Arc::downgrade(&mutex));
        mutex
    }
}
