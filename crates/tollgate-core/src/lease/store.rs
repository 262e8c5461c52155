//! In-memory lease store.
//!
//! Owns every active lease, indexed by lease id and, when present, by the
//! caller's idempotency key. The secondary index always points at a live
//! lease; stale key entries are cleaned up lazily on lookup and eagerly on
//! removal.

use std::collections::HashMap;

use super::Lease;

/// The set of active leases with both indexes.
#[derive(Debug, Default)]
pub(crate) struct LeaseStore {
    leases: HashMap<String, Lease>,
    by_idempotency_key: HashMap<String, String>,
}

impl LeaseStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Inserts a lease, indexing its idempotency key when present.
    pub(crate) fn add(&mut self, lease: Lease) {
        if let Some(key) = lease.idempotency_key() {
            self.by_idempotency_key
                .insert(key.to_string(), lease.lease_id().to_string());
        }
        self.leases.insert(lease.lease_id().to_string(), lease);
    }

    pub(crate) fn get(&self, lease_id: &str) -> Option<&Lease> {
        self.leases.get(lease_id)
    }

    /// Looks up the live lease for an idempotency key.
    ///
    /// A key entry whose lease has since been removed is dropped here rather
    /// than answered.
    pub(crate) fn get_by_idempotency_key(&mut self, key: &str) -> Option<&Lease> {
        let lease_id = self.by_idempotency_key.get(key)?.clone();
        if self.leases.contains_key(&lease_id) {
            self.leases.get(&lease_id)
        } else {
            self.by_idempotency_key.remove(key);
            None
        }
    }

    /// Removes a lease and its idempotency entry, returning the prior value.
    pub(crate) fn remove(&mut self, lease_id: &str) -> Option<Lease> {
        let lease = self.leases.remove(lease_id)?;
        if let Some(key) = lease.idempotency_key() {
            // Only drop the key entry if it still points at this lease.
            if self.by_idempotency_key.get(key).map(String::as_str) == Some(lease_id) {
                self.by_idempotency_key.remove(key);
            }
        }
        Some(lease)
    }

    /// Returns the minimum `expires_at_ms` among active leases.
    pub(crate) fn earliest_expiry_ms(&self) -> Option<u64> {
        self.leases.values().map(Lease::expires_at_ms).min()
    }

    /// Removes and returns every lease expired at `now_ms`.
    ///
    /// Idempotent: sweeping an empty or freshly swept store returns nothing.
    pub(crate) fn sweep(&mut self, now_ms: u64) -> Vec<Lease> {
        let expired_ids: Vec<String> = self
            .leases
            .values()
            .filter(|lease| lease.is_expired_at(now_ms))
            .map(|lease| lease.lease_id().to_string())
            .collect();

        expired_ids
            .iter()
            .filter_map(|id| self.remove(id))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.leases.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    /// Iterates over all active leases (used by invariant checks in tests).
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Lease> {
        self.leases.values()
    }
}
