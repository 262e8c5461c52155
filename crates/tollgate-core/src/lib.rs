//! # tollgate-core
//!
//! In-process admission-control governor for high-cost outbound calls,
//! typically AI model APIs.
//!
//! Callers obtain a short-lived *lease* before performing the external work
//! and surrender it afterward. Each `acquire` composes up to five checks
//! (weighted concurrency with an interactive reserve, per-actor fairness, a
//! rolling request-rate window, a rolling token-rate window, and an
//! adaptive concurrency ceiling) and either issues a lease or returns a
//! structured denial with a bounded retry hint. Leases that are never
//! released expire under a TTL and are reclaimed by a background reaper,
//! so a crashed caller cannot leak capacity.
//!
//! ## Features
//!
//! - **Weighted concurrency**: heavy calls charge more than one slot, with
//!   a reserve carve-out that background work cannot touch
//! - **Rolling windows**: request and token budgets over a sliding window,
//!   with post-hoc reconciliation of token estimates against actual usage
//! - **Fairness**: per-actor soft caps under pressure, with an
//!   anti-starvation pass for recently denied actors
//! - **Adaptive control**: an EMA feedback loop that walks the effective
//!   concurrency ceiling down under stress and back up when healthy
//! - **Deterministic time**: every component reads an injected monotonic
//!   clock, so tests drive the windows and TTLs explicitly
//!
//! ## Example
//!
//! ```rust
//! use tollgate_core::{
//!     AcquireDecision, AcquireRequest, ConcurrencyConfig, Governor, GovernorConfig,
//!     RateConfig, ReleaseReport, TokenUsage,
//! };
//!
//! let governor = Governor::new(GovernorConfig {
//!     concurrency: Some(ConcurrencyConfig::new(8).with_interactive_reserve(2)),
//!     rate: Some(RateConfig {
//!         requests_per_minute: Some(120),
//!         tokens_per_minute: Some(90_000),
//!         ..RateConfig::default()
//!     }),
//!     ..GovernorConfig::default()
//! })
//! .unwrap();
//!
//! let request = AcquireRequest::builder()
//!     .actor_id("user-42")
//!     .action("chat.completion")
//!     .prompt_tokens(1_500)
//!     .max_output_tokens(500)
//!     .build()
//!     .unwrap();
//!
//! if let AcquireDecision::Granted { lease_id, .. } = governor.acquire(request) {
//!     // ... perform the governed call ...
//!     let report = ReleaseReport::default()
//!         .usage(TokenUsage::new(1_500, 320))
//!         .latency_ms(840);
//!     governor.release(&lease_id, Some(report)).unwrap();
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod adaptive;
mod clock;
mod config;
mod decision;
mod error;
mod event;
mod fairness;
mod governor;
mod lease;
mod limiter;
mod snapshot;

pub use clock::{ManualClock, MonotonicClock, SystemClock};
pub use config::{
    AdaptiveConfig, ConcurrencyConfig, FairnessConfig, GovernorConfig, RateConfig,
};
pub use decision::{
    AcquireDecision, DenyReason, LimitsHint, MAX_RETRY_AFTER_MS, MIN_RETRY_AFTER_MS,
    clamp_retry_after,
};
pub use error::GovernorError;
pub use event::{EventSink, GovernorEvent};
pub use governor::{
    AcquireRequest, AcquireRequestBuilder, Governor, ReleaseOutcome, ReleaseReport, TokenUsage,
};
pub use lease::{Lease, Priority};
pub use snapshot::{ConcurrencySnapshot, GovernorSnapshot, LastDeny, RateWindowSnapshot};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::clock::{ManualClock, MonotonicClock, SystemClock};
    pub use crate::config::{ConcurrencyConfig, GovernorConfig, RateConfig};
    pub use crate::decision::{AcquireDecision, DenyReason};
    pub use crate::governor::{AcquireRequest, Governor, ReleaseReport, TokenUsage};
    pub use crate::lease::Priority;
}
