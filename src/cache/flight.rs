//! Per-key request coalescing.
//!
//! Callers asking for the same entry queue behind one in-flight fetch and
//! then read whatever it stored.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::keys::EntryKey;

#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    inflight: Arc<DashMap<EntryKey, Arc<Mutex<()>>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other holder of `key` remains.
    pub async fn acquire(&self, key: &EntryKey) -> FlightGuard {
        let gate = Arc::clone(
            &*self
                .inflight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        );
        let guard = gate.lock_owned().await;
        FlightGuard {
            key: key.clone(),
            inflight: Arc::clone(&self.inflight),
            _guard: guard,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }
}

pub struct FlightGuard {
    key: EntryKey,
    inflight: Arc<DashMap<EntryKey, Arc<Mutex<()>>>>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        // The map and this guard hold two references; anything above that is
        // a waiter that still needs the gate.
        self.inflight
            .remove_if(&self.key, |_, gate| Arc::strong_count(gate) <= 2);
    }
}
