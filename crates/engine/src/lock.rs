//! Per-session mutual exclusion.
//!
//! At most one executor advances a given session at a time inside this
//! process. Locks for different sessions never block each other, and entries
//! are removed once nobody holds or waits on them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Registry = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

#[derive(Clone, Default)]
pub struct SessionLocks {
    registry: Registry,
}

/// Held while a session is being executed. Released on drop.
pub struct SessionGuard {
    id: String,
    registry: Registry,
    guard: Option<OwnedMutexGuard<()>>,
}

impl SessionGuard {
    pub fn session_id(&self) -> &str {
        &self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut map = self.registry.lock();
        if let Some(entry) = map.get(&self.id) {
            if Arc::strong_count(entry) == 1 {
                map.remove(&self.id);
            }
        }
    }
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: &str) -> Arc<AsyncMutex<()>> {
        self.registry
            .lock()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Wait until `id` is free, then hold it.
    pub async fn acquire(&self, id: &str) -> SessionGuard {
        let lock = self.entry(id);
        let guard = lock.lock_owned().await;
        SessionGuard {
            id: id.to_string(),
            registry: self.registry.clone(),
            guard: Some(guard),
        }
    }

    pub fn is_locked(&self, id: &str) -> bool {
        match self.registry.lock().get(id) {
            Some(lock) => lock.try_lock().is_err(),
            None => false,
        }
    }

    /// Sessions with a live lock entry.
    pub fn active(&self) -> usize {
        self.registry.lock().len()
    }
}
