//! Success-only result cache
//!
//! Failures are never stored, so a transient error is retried by the next
//! request for the same identifier. Lookups for one identifier are serialized
//! through a per-identifier gate: a duplicate that arrives while the first is
//! in flight waits, then finds the cached success instead of calling out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::lookup::LookupPayload;

use super::types::{LookupOutcome, LookupResult, Metadata};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CachedSuccess {
    pub full_identifier: String,
    pub jurisdiction_code: String,
    pub payload: LookupPayload,
    pub attempts: u32,
}

impl CachedSuccess {
    /// Copy of the cached result carrying the caller's metadata.
    pub fn to_result(&self, metadata: Metadata) -> LookupResult {
        LookupResult {
            full_identifier: self.full_identifier.clone(),
            jurisdiction_code: self.jurisdiction_code.clone(),
            outcome: LookupOutcome::Success {
                payload: self.payload.clone(),
            },
            attempts: self.attempts,
            metadata,
        }
    }
}

type Gate = Arc<tokio::sync::Mutex<()>>;

#[derive(Default)]
pub(crate) struct SuccessCache {
    entries: Mutex<HashMap<String, CachedSuccess>>,
    gates: Mutex<HashMap<String, Gate>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SuccessCache {
    pub fn get(&self, full_identifier: &str) -> Option<CachedSuccess> {
        lock(&self.entries).get(full_identifier).cloned()
    }

    pub fn insert(&self, entry: CachedSuccess) {
        lock(&self.entries).insert(entry.full_identifier.clone(), entry);
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }

    /// Gate serializing lookups for `full_identifier`. Hand it back with
    /// [`Self::release_gate`] once the lookup is done.
    pub fn gate(&self, full_identifier: &str) -> Gate {
        lock(&self.gates)
            .entry(full_identifier.to_string())
            .or_default()
            .clone()
    }

    /// Drop the gate from the map when no other task holds it.
    pub fn release_gate(&self, full_identifier: &str, gate: Gate) {
        let mut gates = lock(&self.gates);
        // Clones are only taken under this lock: the map and `gate` account for two.
        if Arc::strong_count(&gate) <= 2 {
            gates.remove(full_identifier);
        }
    }
}
