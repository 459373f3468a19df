//! Keyed mutexes, one per resource key, created on demand and evicted once
//! nobody holds or waits on them.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

struct Slot {
    mutex: Arc<Mutex<()>>,
    /// Holders plus waiters.
    refs: usize,
}

#[derive(Clone, Default)]
pub struct KeyedLocks {
    slots: Arc<DashMap<String, Slot>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> KeyedGuard {
        let mutex = {
            let mut slot = self.slots.entry(key.to_string()).or_insert_with(|| Slot {
                mutex: Arc::new(Mutex::new(())),
                refs: 0,
            });
            slot.refs += 1;
            slot.mutex.clone()
        };

        // Released on drop if this future is cancelled while waiting.
        let mut pending = Pending {
            slots: self.slots.clone(),
            key: Some(key.to_string()),
        };
        let guard = mutex.lock_owned().await;
        let key = pending.key.take().unwrap_or_default();

        KeyedGuard {
            slots: self.slots.clone(),
            key,
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or awaited.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

fn release(slots: &DashMap<String, Slot>, key: &str) {
    slots.remove_if_mut(key, |_, slot| {
        slot.refs = slot.refs.saturating_sub(1);
        slot.refs == 0
    });
}

struct Pending {
    slots: Arc<DashMap<String, Slot>>,
    key: Option<String>,
}

impl Drop for Pending {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            release(&self.slots, &key);
        }
    }
}

/// Exclusive hold on one key. Dropping it unlocks.
pub struct KeyedGuard {
    slots: Arc<DashMap<String, Slot>>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release early. Safe to call more than once.
    pub fn unlock(&mut self) {
        if let Some(guard) = self.guard.take() {
            drop(guard);
            release(&self.slots, &self.key);
        }
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        self.unlock();
    }
}

impl std::fmt::Debug for KeyedGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedGuard")
            .field("key", &self.key)
            .field("held", &self.guard.is_some())
            .finish()
    }
}
