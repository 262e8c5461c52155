//! Lease records.
//!
//! A [`Lease`] is a time-bounded permit to perform one unit of governed
//! work. The governor owns every record exclusively; callers only ever hold
//! the opaque `lease_id` string.

mod store;

pub(crate) use store::LeaseStore;

use serde::{Deserialize, Serialize};

/// Scheduling class of a request.
///
/// Background requests are barred from the interactive reserve of the
/// concurrency pool; interactive requests may consume the whole ceiling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Latency-sensitive work, allowed into the reserve.
    #[default]
    Interactive,
    /// Deferrable work, kept out of the reserve.
    Background,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interactive => write!(f, "interactive"),
            Self::Background => write!(f, "background"),
        }
    }
}

/// An issued permission to perform work, bounded by a TTL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    lease_id: String,
    actor_id: String,
    action: String,
    priority: Priority,
    weight: u32,
    idempotency_key: Option<String>,
    created_at_ms: u64,
    expires_at_ms: u64,
    estimated_tokens: u64,
}

impl Lease {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        lease_id: String,
        actor_id: String,
        action: String,
        priority: Priority,
        weight: u32,
        idempotency_key: Option<String>,
        created_at_ms: u64,
        expires_at_ms: u64,
        estimated_tokens: u64,
    ) -> Self {
        Self {
            lease_id,
            actor_id,
            action,
            priority,
            weight,
            idempotency_key,
            created_at_ms,
            expires_at_ms,
            estimated_tokens,
        }
    }

    /// Returns the opaque lease id.
    #[must_use]
    pub fn lease_id(&self) -> &str {
        &self.lease_id
    }

    /// Returns the fairness principal the lease is charged to.
    #[must_use]
    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    /// Returns the caller-supplied action label.
    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Returns the scheduling class the lease was admitted under.
    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    /// Returns the concurrency units the lease holds.
    #[must_use]
    pub const fn weight(&self) -> u32 {
        self.weight
    }

    /// Returns the idempotency key, if the caller supplied one.
    #[must_use]
    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    /// Returns the clock reading at issuance.
    #[must_use]
    pub const fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    /// Returns the clock reading at which the lease expires.
    #[must_use]
    pub const fn expires_at_ms(&self) -> u64 {
        self.expires_at_ms
    }

    /// Returns the token charge recorded at acquisition.
    #[must_use]
    pub const fn estimated_tokens(&self) -> u64 {
        self.estimated_tokens
    }

    /// Returns `true` if the lease is expired at the given clock reading.
    #[must_use]
    pub const fn is_expired_at(&self, now_ms: u64) -> bool {
        self.expires_at_ms <= now_ms
    }

    /// Returns the remaining TTL at the given clock reading, zero if expired.
    #[must_use]
    pub const fn remaining_ttl_ms(&self, now_ms: u64) -> u64 {
        self.expires_at_ms.saturating_sub(now_ms)
    }
}
