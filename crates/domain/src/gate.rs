//! In-process serialization of writers that contend on the same aggregates.
//!
//! Optimistic concurrency still guards every commit; the gate only keeps
//! writers inside one process from burning their retries on each other.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

use common::AggregateId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slot = Arc<AsyncMutex<()>>;

static SHARED: LazyLock<KeyedGate> = LazyLock::new(KeyedGate::new);

/// One async lock per aggregate ID, created on demand and dropped when idle.
#[derive(Debug, Default)]
pub struct KeyedGate {
    slots: Mutex<HashMap<AggregateId, Slot>>,
}

impl KeyedGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// The gate every service in this process shares.
    pub fn shared() -> &'static KeyedGate {
        &SHARED
    }

    /// Waits for every key in ascending order, so two passes over
    /// overlapping keys cannot deadlock.
    pub async fn acquire(&self, keys: impl IntoIterator<Item = AggregateId>) -> GatePass<'_> {
        let mut keys: Vec<AggregateId> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let mut pass = GatePass {
            gate: self,
            held: Vec::with_capacity(keys.len()),
        };
        for key in keys {
            let slot = Arc::clone(self.slots().entry(key).or_default());
            let guard = slot.lock_owned().await;
            pass.held.push((key, guard));
        }
        pass
    }

    /// Number of keys currently locked or awaited.
    pub fn active_keys(&self) -> usize {
        self.slots().len()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<AggregateId, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held locks of one [`KeyedGate::acquire`]. Released on drop.
#[must_use]
pub struct GatePass<'a> {
    gate: &'a KeyedGate,
    held: Vec<(AggregateId, OwnedMutexGuard<()>)>,
}

impl GatePass<'_> {
    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

impl Drop for GatePass<'_> {
    fn drop(&mut self) {
        let mut slots = self.gate.slots();
        for (key, guard) in self.held.drain(..) {
            drop(guard);
            // Waiters clone the slot under this map lock, so a lone
            // reference means nobody is queued.
            if slots.get(&key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
                slots.remove(&key);
            }
        }
    }
}
