//! In-Flight Request Registry
//!
//! Guarantees at most one resolution per key at a time. The first caller
//! becomes the owner and gets an `InFlightGuard`; later callers wait until
//! the guard is released and then read the tiers the owner populated.
//!
//! Release happens in `Drop`, so a panicking or cancelled owner still wakes
//! its waiters.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use super::key::CacheKey;

type Slots = Arc<Mutex<SlotTable>>;

#[derive(Default)]
struct SlotTable {
    /// Generation handed to the next owner
    next_generation: u64,
    /// key -> current owner
    owners: HashMap<CacheKey, Owner>,
}

struct Owner {
    generation: u64,
    done: watch::Sender<bool>,
}

/// Tracks which keys are currently being resolved
#[derive(Default, Clone)]
pub struct InFlightRegistry {
    slots: Slots,
}

impl InFlightRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to become the owner of `key`.
    ///
    /// `Some(guard)` if no resolution was in progress; `None` if another
    /// caller already owns it.
    pub fn begin(&self, key: &CacheKey) -> Option<InFlightGuard> {
        let mut table = self.slots.lock();
        if table.owners.contains_key(key) {
            return None;
        }

        let generation = table.next_generation;
        table.next_generation += 1;

        let (done, _rx) = watch::channel(false);
        table.owners.insert(key.clone(), Owner { generation, done });
        Some(InFlightGuard {
            key: key.clone(),
            generation,
            slots: Arc::clone(&self.slots),
        })
    }

    /// Wait until the current owner of `key` finishes.
    ///
    /// Returns immediately when nothing is in flight.
    pub async fn await_completion(&self, key: &CacheKey) {
        let mut rx = match self.slots.lock().owners.get(key) {
            Some(owner) => owner.done.subscribe(),
            None => return,
        };

        // A closed channel also means the owner is gone.
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Release ownership and wake every waiter.
    ///
    /// Same as dropping the guard.
    pub fn complete(&self, guard: InFlightGuard) {
        drop(guard);
    }

    /// Check if `key` is being resolved
    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.slots.lock().owners.contains_key(key)
    }

    /// Number of keys being resolved
    pub fn len(&self) -> usize {
        self.slots.lock().owners.len()
    }

    /// Check if nothing is in flight
    pub fn is_empty(&self) -> bool {
        self.slots.lock().owners.is_empty()
    }
}

/// Ownership of one in-flight key; releases it when dropped
pub struct InFlightGuard {
    key: CacheKey,
    generation: u64,
    slots: Slots,
}

impl InFlightGuard {
    /// Key this guard owns
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut table = self.slots.lock();

        // Only release the slot this guard was issued for.
        let owned = matches!(
            table.owners.get(&self.key),
            Some(owner) if owner.generation == self.generation
        );
        if !owned {
            return;
        }

        if let Some(owner) = table.owners.remove(&self.key) {
            owner.done.send_replace(true);
            debug!(key = %self.key, "In-flight request completed");
        }
    }
}

impl std::fmt::Debug for InFlightGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightGuard").field("key", &self.key).finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
