//! Structured governor events.
//!
//! Every state transition emits one [`GovernorEvent`] to the optional sink
//! supplied at construction. Handlers run inline, under the governor's lock;
//! a panicking handler is caught and discarded so observability can never
//! corrupt admission state or surface as a caller error.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::decision::DenyReason;
use crate::governor::ReleaseOutcome;

/// Callback receiving every governor event.
pub type EventSink = Arc<dyn Fn(&GovernorEvent) + Send + Sync>;

/// A structured event describing one governor state transition.
///
/// All timestamps come from the injected monotonic clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum GovernorEvent {
    /// A lease was issued.
    Acquire {
        /// Clock reading at issuance.
        timestamp_ms: u64,
        /// The issued lease id.
        lease_id: String,
        /// Fairness principal of the request.
        actor_id: String,
        /// Caller-supplied action label.
        action: String,
        /// Concurrency units the lease holds.
        weight: u32,
    },

    /// A request was refused.
    Deny {
        /// Clock reading at refusal.
        timestamp_ms: u64,
        /// Fairness principal of the request.
        actor_id: String,
        /// Caller-supplied action label.
        action: String,
        /// Which class of limit refused the request.
        reason: DenyReason,
        /// Suggested wait before retrying.
        retry_after_ms: u64,
        /// Human-readable guidance.
        recommendation: String,
        /// Weight the request asked for.
        weight: u32,
    },

    /// A lease was surrendered.
    Release {
        /// Clock reading at release.
        timestamp_ms: u64,
        /// The released lease id.
        lease_id: String,
        /// Fairness principal of the lease.
        actor_id: String,
        /// Caller-supplied action label.
        action: String,
        /// Concurrency units the lease held.
        weight: u32,
        /// How the governed work ended.
        outcome: ReleaseOutcome,
    },

    /// The reaper expired an unreleased lease.
    Expire {
        /// Clock reading at expiry.
        timestamp_ms: u64,
        /// The expired lease id.
        lease_id: String,
        /// Fairness principal of the lease.
        actor_id: String,
        /// Caller-supplied action label.
        action: String,
        /// Concurrency units the lease held.
        weight: u32,
    },

    /// Advisory condition worth surfacing to operators.
    Warn {
        /// Clock reading at emission.
        timestamp_ms: u64,
        /// Free-form description.
        message: String,
        /// Lease the warning concerns, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        lease_id: Option<String>,
    },
}

impl GovernorEvent {
    /// Returns the event's clock reading.
    #[must_use]
    pub const fn timestamp_ms(&self) -> u64 {
        match self {
            Self::Acquire { timestamp_ms, .. }
            | Self::Deny { timestamp_ms, .. }
            | Self::Release { timestamp_ms, .. }
            | Self::Expire { timestamp_ms, .. }
            | Self::Warn { timestamp_ms, .. } => *timestamp_ms,
        }
    }
}

/// Delivers an event to the sink, swallowing handler panics.
pub(crate) fn dispatch(sink: Option<&EventSink>, event: &GovernorEvent) {
    let Some(sink) = sink else {
        return;
    };

    if catch_unwind(AssertUnwindSafe(|| sink(event))).is_err() {
        tracing::warn!(timestamp_ms = event.timestamp_ms(), "event handler panicked; discarding");
    }
}
