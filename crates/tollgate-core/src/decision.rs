//! Admission decision model.
//!
//! Denials are first-class values, never errors: every `acquire` call
//! receives a verdict carrying a stable reason, a bounded retry hint, a
//! human-readable recommendation, and the responsible limiter's counters.

use serde::{Deserialize, Serialize};

/// Lower bound on every denial's retry hint, in milliseconds.
pub const MIN_RETRY_AFTER_MS: u64 = 25;

/// Upper bound on every denial's retry hint, in milliseconds.
pub const MAX_RETRY_AFTER_MS: u64 = 5_000;

/// Clamps a raw retry hint into the contractual `[25, 5000]` ms band.
#[must_use]
pub fn clamp_retry_after(raw_ms: u64) -> u64 {
    raw_ms.clamp(MIN_RETRY_AFTER_MS, MAX_RETRY_AFTER_MS)
}

/// Stable reason attached to every denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum DenyReason {
    /// The weighted concurrency pool cannot fit the request.
    Concurrency,
    /// A rolling-window limit (requests or tokens) is exhausted.
    Rate,
    /// Reserved for cost-based limits. No current limiter emits this.
    Budget,
    /// A fairness policy blocked the request.
    Policy,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Concurrency => write!(f, "concurrency"),
            Self::Rate => write!(f, "rate"),
            Self::Budget => write!(f, "budget"),
            Self::Policy => write!(f, "policy"),
        }
    }
}

/// Counters from the limiter responsible for a denial.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsHint {
    /// In-flight weight at decision time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_flight: Option<u64>,

    /// The operative concurrency ceiling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_in_flight: Option<u64>,

    /// Consumed portion of the denying rate window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_used: Option<u64>,

    /// Capacity of the denying rate window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u64>,
}

/// Verdict returned by `acquire`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AcquireDecision {
    /// The request was admitted and a lease issued.
    Granted {
        /// Opaque lease handle to pass back to `release`.
        lease_id: String,
        /// When the lease will expire if never released.
        expires_at_ms: u64,
    },

    /// The request was refused.
    Denied {
        /// Which class of limit refused the request.
        reason: DenyReason,
        /// Suggested wait before retrying, within `[25, 5000]` ms.
        retry_after_ms: u64,
        /// Human-readable guidance for the caller.
        recommendation: String,
        /// Counters from the responsible limiter.
        #[serde(skip_serializing_if = "Option::is_none")]
        limits: Option<LimitsHint>,
    },
}

impl AcquireDecision {
    /// Returns `true` for a granted decision.
    #[must_use]
    pub const fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }

    /// Returns the lease id of a granted decision.
    #[must_use]
    pub fn lease_id(&self) -> Option<&str> {
        match self {
            Self::Granted { lease_id, .. } => Some(lease_id),
            Self::Denied { .. } => None,
        }
    }

    /// Returns the deny reason of a denied decision.
    #[must_use]
    pub const fn deny_reason(&self) -> Option<DenyReason> {
        match self {
            Self::Granted { .. } => None,
            Self::Denied { reason, .. } => Some(*reason),
        }
    }

    /// Returns the retry hint of a denied decision.
    #[must_use]
    pub const fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::Granted { .. } => None,
            Self::Denied { retry_after_ms, .. } => Some(*retry_after_ms),
        }
    }
}
