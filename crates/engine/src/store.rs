//! Registry of suspended runs, keyed by context id.
//!
//! A run enters the store exactly when it pauses on an externally rendered
//! input node. Opening an entry leases it: the stored snapshot stays in place
//! while the caller resumes a copy, and a second `open` of the same id is
//! rejected until the lease is released. Completion or failure removes the
//! entry, a further pause overwrites it (unless the entry was closed while
//! leased), and a dropped or cancelled resume
//! leaves it exactly as it was.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::context::RunState;
use crate::EngineError;

struct Slot {
    state: RunState,
    leased_by: Option<u64>,
    suspended_at: DateTime<Utc>,
}

/// Shared handle to the store. Clones refer to the same entries.
#[derive(Clone, Default)]
pub struct ResumeStore {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
    leases: Arc<AtomicU64>,
}

impl std::fmt::Debug for ResumeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResumeStore").field("len", &self.len()).finish()
    }
}

impl ResumeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store (or overwrite) a paused run. A run resumed under `lease` is only
    /// stored again while that lease still holds its entry; returns `false`
    /// when the entry was closed in the meantime.
    pub(crate) fn park(&self, state: RunState, lease: Option<&Lease>) -> bool {
        let id = state.id.to_string();
        let mut slots = self.slots.lock();
        if let Some(lease) = lease {
            let held = slots.get(&id).is_some_and(|slot| slot.leased_by == Some(lease.token));
            if !held {
                warn!(context_id = %id, "context closed while resuming; not parked");
                return false;
            }
        }
        debug!(context_id = %id, "context parked");
        slots.insert(
            id,
            Slot {
                state,
                leased_by: None,
                suspended_at: Utc::now(),
            },
        );
        true
    }

    /// Lease the entry for `id` and return a copy of its state.
    pub(crate) fn checkout(&self, id: &str) -> Result<(RunState, Lease), EngineError> {
        let mut slots = self.slots.lock();
        let slot = slots
            .get_mut(id)
            .ok_or_else(|| EngineError::ResumeNotFound(id.to_string()))?;
        if slot.leased_by.is_some() {
            return Err(EngineError::ResumeInUse(id.to_string()));
        }

        let token = self.leases.fetch_add(1, Ordering::Relaxed) + 1;
        slot.leased_by = Some(token);
        let lease = Lease {
            id: id.to_string(),
            token,
            store: self.clone(),
        };
        Ok((slot.state.clone(), lease))
    }

    fn release(&self, id: &str, token: u64) {
        if let Some(slot) = self.slots.lock().get_mut(id) {
            if slot.leased_by == Some(token) {
                slot.leased_by = None;
            }
        }
    }

    /// Remove the entry for `id`. Closing an absent id is a no-op.
    pub fn close(&self, id: &str) {
        if self.slots.lock().remove(id).is_some() {
            debug!(context_id = %id, "context closed");
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slots.lock().contains_key(id)
    }

    /// Whether the entry is currently opened by some caller.
    pub fn is_leased(&self, id: &str) -> bool {
        self.slots
            .lock()
            .get(id)
            .is_some_and(|slot| slot.leased_by.is_some())
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.slots.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drop unleased entries suspended for longer than `max_age`.
    /// Returns how many were removed.
    pub fn prune(&self, max_age: chrono::Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, slot| slot.leased_by.is_some() || slot.suspended_at > cutoff);
        before - slots.len()
    }
}

/// Exclusive claim on a stored entry, released on drop.
pub(crate) struct Lease {
    id: String,
    token: u64,
    store: ResumeStore,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.store.release(&self.id, self.token);
    }
}
