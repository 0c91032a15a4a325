//! Named async locks, one per key.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use super::cancel::{Cancellation, Interrupt};

/// Map of per-key mutexes, created on first use.
///
/// Guards are owned so they can live inside whatever holds the key for the
/// rest of an attempt.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the lock on `key`
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Entries only referenced by the map are idle
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(key.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Wait for the lock on `key`, giving up when `cancel` fires
    pub async fn acquire_or_interrupt(
        &self,
        key: &str,
        cancel: &Cancellation,
    ) -> Result<OwnedMutexGuard<()>, Interrupt> {
        tokio::select! {
            biased;
            guard = self.acquire(key) => Ok(guard),
            interrupt = cancel.fired() => Err(interrupt),
        }
    }
}
