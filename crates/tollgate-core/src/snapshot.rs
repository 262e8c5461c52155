//! Read-only governor state views.

use serde::{Deserialize, Serialize};

use crate::decision::DenyReason;

/// Concurrency pool counters at snapshot time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencySnapshot {
    /// Summed weight of in-flight leases.
    pub in_flight_weight: u64,
    /// Number of in-flight leases.
    pub in_flight_count: usize,
    /// Remaining weight under the effective ceiling.
    pub available: u64,
    /// Configured hard ceiling.
    pub max_weight: u64,
    /// Current operative ceiling.
    pub effective_max: u64,
}

/// Occupancy of one rolling rate window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateWindowSnapshot {
    /// Consumed portion of the window.
    pub current: u64,
    /// Window capacity.
    pub limit: u64,
}

/// The most recent denial the governor issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastDeny {
    /// Which class of limit refused the request.
    pub reason: DenyReason,
    /// Clock reading at refusal.
    pub timestamp_ms: u64,
    /// The actor that was refused.
    pub actor_id: String,
}

/// Point-in-time view of the governor's state.
///
/// Optional sections mirror which limiters are configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernorSnapshot {
    /// Clock reading when the snapshot was taken.
    pub timestamp_ms: u64,
    /// Number of active leases.
    pub active_leases: usize,
    /// Concurrency counters, when that limiter is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<ConcurrencySnapshot>,
    /// Request window occupancy, when that limiter is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_rate: Option<RateWindowSnapshot>,
    /// Token window occupancy, when that limiter is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_rate: Option<RateWindowSnapshot>,
    /// Whether per-actor fairness is active.
    pub fairness: bool,
    /// Whether the adaptive controller is active.
    pub adaptive: bool,
    /// The most recent denial, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_deny: Option<LastDeny>,
}
