//! Async mutual exclusion keyed by string.
//!
//! Used for per-repository-URL serialization in the git cache and
//! per-resource serialization in the job processor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct KeyedMutex {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Held for as long as the keyed section runs.
pub type KeyedGuard = OwnedMutexGuard<()>;

impl KeyedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other holder has `key`, then returns a guard.
    pub async fn lock(&self, key: &str) -> KeyedGuard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|poisoned| {
                log::warn!("KeyedMutex map lock was poisoned, recovering");
                poisoned.into_inner()
            });
            // A count of 1 means only the map holds it: nobody owns or waits.
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            Arc::clone(
                slots
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        slot.lock_owned().await
    }

    /// Number of keys currently held or waited on.
    pub fn active_keys(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slots
            .values()
            .filter(|slot| Arc::strong_count(slot) > 1)
            .count()
    }
}
