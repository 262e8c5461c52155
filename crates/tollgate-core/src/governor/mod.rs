//! The governor facade.
//!
//! [`Governor`] composes the lease store, the three limiter pools, the
//! fairness tracker, and the adaptive controller behind a single lock, so
//! every `acquire`, `release`, and reaper sweep observes and mutates a
//! consistent whole.
//!
//! # Admission ordering
//!
//! `acquire` runs its checks in a fixed order: idempotency replay, adaptive
//! tick, concurrency, fairness, request rate, token rate, commit. The two
//! rate pools are probed without recording; only the commit step records
//! them. The concurrency pool is the one check that reserves immediately,
//! and any later refusal releases that reservation before returning, so a
//! denied request leaves every pool exactly as it found it.
//!
//! # Lifecycle
//!
//! Leases expire at `created_at + lease_ttl_ms` unless released first. The
//! background reaper reclaims expired leases' concurrency and fairness
//! weight; their token-window charges are left to age out, since those
//! tokens were presumably spent. `dispose` stops the reaper (idempotently);
//! `acquire` and `release` keep working afterwards, only automatic expiry
//! stops.

mod reaper;
mod request;

#[cfg(test)]
mod proptest_invariants;
#[cfg(test)]
mod tests;

pub use request::{
    AcquireRequest, AcquireRequestBuilder, ReleaseOutcome, ReleaseReport, TokenUsage,
};

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use crate::adaptive::AdaptiveController;
use crate::clock::{MonotonicClock, SystemClock};
use crate::config::GovernorConfig;
use crate::decision::{AcquireDecision, DenyReason, LimitsHint};
use crate::error::GovernorError;
use crate::event::{EventSink, GovernorEvent, dispatch};
use crate::fairness::FairnessTracker;
use crate::lease::{Lease, LeaseStore};
use crate::limiter::{ConcurrencyPool, RequestRatePool, TokenRatePool};
use crate::snapshot::{ConcurrencySnapshot, GovernorSnapshot, LastDeny, RateWindowSnapshot};

use self::reaper::ReaperHandle;

const RECOMMEND_CONCURRENCY: &str =
    "concurrency ceiling reached; retry after the hinted delay or lower the request weight";
const RECOMMEND_POLICY: &str =
    "actor is over its fair share while the pool is busy; retry shortly or spread work across actors";
const RECOMMEND_REQUEST_RATE: &str = "request window is full; retry after the hinted delay";
const RECOMMEND_TOKEN_RATE: &str =
    "token window is full; retry after the hinted delay or reduce the token estimate";

/// Bound on the strict-mode set of recently released lease ids.
const RELEASED_LEDGER_CAP: usize = 10_000;

/// Insertion-ordered set of recently released ids with FIFO eviction.
///
/// Powers strict-mode double-release detection without unbounded growth.
#[derive(Debug, Default)]
struct ReleasedLedger {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl ReleasedLedger {
    fn insert(&mut self, lease_id: String) {
        if self.seen.insert(lease_id.clone()) {
            self.order.push_back(lease_id);
            if self.order.len() > RELEASED_LEDGER_CAP {
                if let Some(evicted) = self.order.pop_front() {
                    self.seen.remove(&evicted);
                }
            }
        }
    }

    fn contains(&self, lease_id: &str) -> bool {
        self.seen.contains(lease_id)
    }
}

/// All mutable governor state, guarded by one mutex.
///
/// A single lock is deliberate: the rollback discipline in `acquire`
/// composes the four limiters atomically, which per-pool locks cannot give.
pub(crate) struct GovernorState {
    pub(crate) store: LeaseStore,
    pub(crate) concurrency: Option<ConcurrencyPool>,
    pub(crate) request_rate: Option<RequestRatePool>,
    pub(crate) token_rate: Option<TokenRatePool>,
    pub(crate) fairness: Option<FairnessTracker>,
    pub(crate) adaptive: Option<AdaptiveController>,
    released: ReleasedLedger,
    last_deny: Option<LastDeny>,
}

pub(crate) struct GovernorInner {
    clock: Arc<dyn MonotonicClock>,
    sink: Option<EventSink>,
    lease_ttl_ms: u64,
    strict: bool,
    state: Mutex<GovernorState>,
}

impl GovernorInner {
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, GovernorState> {
        // A poisoned lock means another thread panicked mid-operation; the
        // counters are still internally consistent, so keep serving.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Expires every overdue lease, reversing its bookkeeping.
    ///
    /// Called by the reaper thread; also reachable from tests for
    /// deterministic sweeps. Returns the number of leases expired.
    pub(crate) fn sweep_expired(&self) -> usize {
        let now_ms = self.clock.now_ms();
        let mut guard = self.lock_state();
        let state = &mut *guard;

        let expired = state.store.sweep(now_ms);
        for lease in &expired {
            let weight = u64::from(lease.weight());
            if let Some(pool) = state.concurrency.as_mut() {
                pool.release(weight);
            }
            if let Some(fairness) = state.fairness.as_mut() {
                fairness.record_release(lease.actor_id(), weight);
            }
            tracing::debug!(
                lease_id = lease.lease_id(),
                actor_id = lease.actor_id(),
                "expired unreleased lease"
            );
            dispatch(
                self.sink.as_ref(),
                &GovernorEvent::Expire {
                    timestamp_ms: now_ms,
                    lease_id: lease.lease_id().to_string(),
                    actor_id: lease.actor_id().to_string(),
                    action: lease.action().to_string(),
                    weight: lease.weight(),
                },
            );
        }
        expired.len()
    }
}

/// The admission-control governor.
///
/// Construct one per governed resource (typically per provider or model
/// endpoint), share it freely across threads, `acquire` before each call
/// and `release` afterward.
///
/// # Example
///
/// ```rust
/// use tollgate_core::{
///     AcquireDecision, AcquireRequest, ConcurrencyConfig, Governor, GovernorConfig,
/// };
///
/// let governor = Governor::new(GovernorConfig {
///     concurrency: Some(ConcurrencyConfig::new(4)),
///     ..GovernorConfig::default()
/// })
/// .unwrap();
///
/// let request = AcquireRequest::builder()
///     .actor_id("user-42")
///     .action("chat.completion")
///     .build()
///     .unwrap();
///
/// match governor.acquire(request) {
///     AcquireDecision::Granted { lease_id, .. } => {
///         // ... perform the governed call ...
///         governor.release(&lease_id, None).unwrap();
///     }
///     AcquireDecision::Denied { retry_after_ms, .. } => {
///         // back off for retry_after_ms
///         let _ = retry_after_ms;
///     }
/// }
/// ```
pub struct Governor {
    inner: Arc<GovernorInner>,
    reaper: Mutex<Option<ReaperHandle>>,
}

impl Governor {
    /// Creates a governor on the system clock with no event sink.
    ///
    /// # Errors
    ///
    /// Returns [`GovernorError::InvalidConfig`] for an inconsistent
    /// configuration.
    pub fn new(config: GovernorConfig) -> Result<Self, GovernorError> {
        Self::build(config, Arc::new(SystemClock::new()), None)
    }

    /// Creates a governor on an injected clock.
    ///
    /// # Errors
    ///
    /// Returns [`GovernorError::InvalidConfig`] for an inconsistent
    /// configuration.
    pub fn with_clock(
        config: GovernorConfig,
        clock: Arc<dyn MonotonicClock>,
    ) -> Result<Self, GovernorError> {
        Self::build(config, clock, None)
    }

    /// Creates a governor on an injected clock with an event sink.
    ///
    /// The sink is invoked inline, under the governor's lock; keep handlers
    /// short. A panicking handler is caught and discarded.
    ///
    /// # Errors
    ///
    /// Returns [`GovernorError::InvalidConfig`] for an inconsistent
    /// configuration.
    pub fn with_clock_and_sink(
        config: GovernorConfig,
        clock: Arc<dyn MonotonicClock>,
        sink: EventSink,
    ) -> Result<Self, GovernorError> {
        Self::build(config, clock, Some(sink))
    }

    fn build(
        config: GovernorConfig,
        clock: Arc<dyn MonotonicClock>,
        sink: Option<EventSink>,
    ) -> Result<Self, GovernorError> {
        config.validate()?;
        let now_ms = clock.now_ms();

        let concurrency = config
            .concurrency
            .map(|c| ConcurrencyPool::new(c.max_in_flight, c.interactive_reserve))
            .transpose()?;

        let request_rate = config.rate.and_then(|rate| {
            rate.requests_per_minute
                .map(|cap| RequestRatePool::new(cap, rate.window_ms))
        });
        let token_rate = config.rate.and_then(|rate| {
            rate.tokens_per_minute
                .map(|cap| TokenRatePool::new(cap, rate.window_ms))
        });

        let fairness = match (&config.fairness, &config.concurrency) {
            (Some(fairness), Some(_)) => Some(FairnessTracker::new(fairness)),
            (Some(_), None) => {
                tracing::debug!("fairness configured without concurrency; ignored");
                None
            }
            _ => None,
        };
        let adaptive = match (&config.adaptive, &config.concurrency) {
            (Some(adaptive), Some(concurrency)) => Some(AdaptiveController::new(
                adaptive,
                concurrency.max_in_flight,
                now_ms,
            )),
            (Some(_), None) => {
                tracing::debug!("adaptive controller configured without concurrency; ignored");
                None
            }
            _ => None,
        };

        let inner = Arc::new(GovernorInner {
            clock,
            sink,
            lease_ttl_ms: config.lease_ttl_ms,
            strict: config.strict,
            state: Mutex::new(GovernorState {
                store: LeaseStore::new(),
                concurrency,
                request_rate,
                token_rate,
                fairness,
                adaptive,
                released: ReleasedLedger::default(),
                last_deny: None,
            }),
        });

        let reaper = if config.reaper_interval_ms > 0 {
            Some(ReaperHandle::spawn(&inner, config.reaper_interval_ms))
        } else {
            None
        };

        tracing::info!(
            strict = config.strict,
            lease_ttl_ms = config.lease_ttl_ms,
            reaper_interval_ms = config.reaper_interval_ms,
            "governor constructed"
        );
        Ok(Self {
            inner,
            reaper: Mutex::new(reaper),
        })
    }

    /// Decides whether the request may proceed and, if so, issues a lease.
    ///
    /// Denials are ordinary return values carrying a reason, a retry hint
    /// within `[25, 5000]` ms, and the responsible limiter's counters. A
    /// denial makes no net change to any limiter's state.
    ///
    /// A request whose `idempotency_key` matches an outstanding lease is
    /// re-handed that lease without consuming any capacity.
    #[must_use]
    pub fn acquire(&self, request: AcquireRequest) -> AcquireDecision {
        let now_ms = self.inner.clock.now_ms();
        let mut guard = self.inner.lock_state();
        let state = &mut *guard;

        let weight = u64::from(request.weight());
        let needed_tokens = request.estimated_tokens();

        // Idempotent replay: re-hand the outstanding permit, touch nothing.
        if let Some(key) = request.idempotency_key() {
            if let Some(lease) = state.store.get_by_idempotency_key(key) {
                if !lease.is_expired_at(now_ms) {
                    tracing::debug!(
                        lease_id = lease.lease_id(),
                        idempotency_key = key,
                        "re-handing lease for repeated idempotency key"
                    );
                    return AcquireDecision::Granted {
                        lease_id: lease.lease_id().to_string(),
                        expires_at_ms: lease.expires_at_ms(),
                    };
                }
            }
        }

        // Self-clocked adaptive tick.
        if let (Some(adaptive), Some(pool)) = (state.adaptive.as_mut(), state.concurrency.as_mut())
        {
            pool.set_effective_max(adaptive.maybe_adjust(now_ms));
        }

        // Concurrency reserves immediately; everything later must roll this
        // back on its own denial path.
        let mut reserved = false;
        if let Some(pool) = state.concurrency.as_mut() {
            if pool.try_admit(weight, request.priority()) {
                reserved = true;
            } else {
                let until_expiry = state
                    .store
                    .earliest_expiry_ms()
                    .map(|expiry| expiry.saturating_sub(now_ms));
                let retry_after_ms = pool.retry_after_hint(until_expiry);
                let limits = LimitsHint {
                    in_flight: Some(pool.in_flight_weight()),
                    max_in_flight: Some(pool.effective_max()),
                    ..LimitsHint::default()
                };
                if let Some(fairness) = state.fairness.as_mut() {
                    fairness.record_denial(request.actor_id(), now_ms);
                }
                return self.deny(
                    state,
                    now_ms,
                    &request,
                    DenyReason::Concurrency,
                    retry_after_ms,
                    RECOMMEND_CONCURRENCY,
                    Some(limits),
                );
            }
        }

        // Fairness (present only alongside concurrency).
        if reserved {
            if let (Some(fairness), Some(pool)) =
                (state.fairness.as_mut(), state.concurrency.as_mut())
            {
                if !fairness.check(
                    request.actor_id(),
                    weight,
                    pool.in_flight_weight(),
                    pool.max_weight(),
                    now_ms,
                ) {
                    pool.release(weight);
                    fairness.record_denial(request.actor_id(), now_ms);
                    let retry_after_ms = pool.retry_after_hint(None);
                    let limits = LimitsHint {
                        in_flight: Some(pool.in_flight_weight()),
                        max_in_flight: Some(pool.effective_max()),
                        ..LimitsHint::default()
                    };
                    return self.deny(
                        state,
                        now_ms,
                        &request,
                        DenyReason::Policy,
                        retry_after_ms,
                        RECOMMEND_POLICY,
                        Some(limits),
                    );
                }
            }
        }

        // Request rate: probe only, recorded at commit.
        if let Some(rate) = state.request_rate.as_mut() {
            if let Err(denied) = rate.probe(now_ms) {
                if reserved {
                    if let Some(pool) = state.concurrency.as_mut() {
                        pool.release(weight);
                    }
                }
                let limits = LimitsHint {
                    rate_used: Some(denied.current),
                    rate_limit: Some(denied.limit),
                    ..LimitsHint::default()
                };
                return self.deny(
                    state,
                    now_ms,
                    &request,
                    DenyReason::Rate,
                    denied.retry_after_ms,
                    RECOMMEND_REQUEST_RATE,
                    Some(limits),
                );
            }
        }

        // Token rate: probe only, recorded at commit.
        if let Some(tokens) = state.token_rate.as_mut() {
            if let Err(denied) = tokens.probe(now_ms, needed_tokens) {
                if reserved {
                    if let Some(pool) = state.concurrency.as_mut() {
                        pool.release(weight);
                    }
                }
                let limits = LimitsHint {
                    rate_used: Some(denied.current),
                    rate_limit: Some(denied.limit),
                    ..LimitsHint::default()
                };
                return self.deny(
                    state,
                    now_ms,
                    &request,
                    DenyReason::Rate,
                    denied.retry_after_ms,
                    RECOMMEND_TOKEN_RATE,
                    Some(limits),
                );
            }
        }

        // Commit.
        let lease_id = format!("lease-{}", Uuid::new_v4());
        let expires_at_ms = now_ms.saturating_add(self.inner.lease_ttl_ms);

        if let Some(rate) = state.request_rate.as_mut() {
            rate.record(now_ms);
        }
        if needed_tokens > 0 {
            if let Some(tokens) = state.token_rate.as_mut() {
                tokens.record(now_ms, needed_tokens, Some(lease_id.clone()));
            }
        }

        state.store.add(Lease::new(
            lease_id.clone(),
            request.actor_id().to_string(),
            request.action().to_string(),
            request.priority(),
            request.weight(),
            request.idempotency_key().map(str::to_string),
            now_ms,
            expires_at_ms,
            needed_tokens,
        ));

        if let Some(fairness) = state.fairness.as_mut() {
            fairness.record_acquire(request.actor_id(), weight);
        }
        if let Some(adaptive) = state.adaptive.as_mut() {
            adaptive.record_acquire();
        }

        tracing::debug!(
            lease_id = %lease_id,
            actor_id = request.actor_id(),
            action = request.action(),
            weight = request.weight(),
            "lease granted"
        );
        dispatch(
            self.inner.sink.as_ref(),
            &GovernorEvent::Acquire {
                timestamp_ms: now_ms,
                lease_id: lease_id.clone(),
                actor_id: request.actor_id().to_string(),
                action: request.action().to_string(),
                weight: request.weight(),
            },
        );

        AcquireDecision::Granted {
            lease_id,
            expires_at_ms,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn deny(
        &self,
        state: &mut GovernorState,
        now_ms: u64,
        request: &AcquireRequest,
        reason: DenyReason,
        retry_after_ms: u64,
        recommendation: &str,
        limits: Option<LimitsHint>,
    ) -> AcquireDecision {
        if let Some(adaptive) = state.adaptive.as_mut() {
            adaptive.record_denial();
        }
        state.last_deny = Some(LastDeny {
            reason,
            timestamp_ms: now_ms,
            actor_id: request.actor_id().to_string(),
        });

        tracing::warn!(
            actor_id = request.actor_id(),
            action = request.action(),
            reason = %reason,
            retry_after_ms,
            "admission denied"
        );
        dispatch(
            self.inner.sink.as_ref(),
            &GovernorEvent::Deny {
                timestamp_ms: now_ms,
                actor_id: request.actor_id().to_string(),
                action: request.action().to_string(),
                reason,
                retry_after_ms,
                recommendation: recommendation.to_string(),
                weight: request.weight(),
            },
        );

        AcquireDecision::Denied {
            reason,
            retry_after_ms,
            recommendation: recommendation.to_string(),
            limits,
        }
    }

    /// Surrenders a lease, reversing its bookkeeping.
    ///
    /// Returns the released lease record, or `None` when the id is unknown
    /// (already released, expired, or never issued). In strict mode those
    /// cases are hard errors instead.
    ///
    /// An attached [`ReleaseReport`] reconciles the token window against
    /// actual usage and feeds completion latency to the adaptive
    /// controller.
    ///
    /// # Errors
    ///
    /// In strict mode only: [`GovernorError::DoubleRelease`] when the id
    /// was already released, [`GovernorError::UnknownLease`] when it was
    /// never issued or has expired.
    pub fn release(
        &self,
        lease_id: &str,
        report: Option<ReleaseReport>,
    ) -> Result<Option<Lease>, GovernorError> {
        let now_ms = self.inner.clock.now_ms();
        let mut guard = self.inner.lock_state();
        let state = &mut *guard;

        if self.inner.strict && state.released.contains(lease_id) {
            return Err(GovernorError::DoubleRelease {
                lease_id: lease_id.to_string(),
            });
        }

        let Some(lease) = state.store.remove(lease_id) else {
            if self.inner.strict {
                return Err(GovernorError::UnknownLease {
                    lease_id: lease_id.to_string(),
                });
            }
            tracing::warn!(lease_id, "release of unknown lease id ignored");
            return Ok(None);
        };

        let weight = u64::from(lease.weight());
        if let Some(pool) = state.concurrency.as_mut() {
            pool.release(weight);
        }
        if let Some(fairness) = state.fairness.as_mut() {
            fairness.record_release(lease.actor_id(), weight);
        }

        let report = report.unwrap_or_default();
        if let Some(usage) = report.usage {
            if let Some(tokens) = state.token_rate.as_mut() {
                tokens.reconcile(lease_id, usage.total());
            }
        }
        if let Some(latency_ms) = report.latency_ms {
            if let Some(adaptive) = state.adaptive.as_mut() {
                adaptive.record_latency(latency_ms);
            }
        }

        if self.inner.strict {
            state.released.insert(lease_id.to_string());

            let held_ms = now_ms.saturating_sub(lease.created_at_ms());
            if held_ms * 5 > self.inner.lease_ttl_ms * 4 {
                let message = format!(
                    "lease held {held_ms}ms, over 80% of the {}ms TTL; release sooner or raise lease_ttl_ms",
                    self.inner.lease_ttl_ms
                );
                tracing::warn!(lease_id, held_ms, "{message}");
                dispatch(
                    self.inner.sink.as_ref(),
                    &GovernorEvent::Warn {
                        timestamp_ms: now_ms,
                        message,
                        lease_id: Some(lease_id.to_string()),
                    },
                );
            }
        }

        tracing::debug!(
            lease_id,
            actor_id = lease.actor_id(),
            outcome = %report.outcome,
            "lease released"
        );
        dispatch(
            self.inner.sink.as_ref(),
            &GovernorEvent::Release {
                timestamp_ms: now_ms,
                lease_id: lease_id.to_string(),
                actor_id: lease.actor_id().to_string(),
                action: lease.action().to_string(),
                weight: lease.weight(),
                outcome: report.outcome,
            },
        );

        Ok(Some(lease))
    }

    /// Returns a point-in-time view of the governor's state.
    #[must_use]
    pub fn snapshot(&self) -> GovernorSnapshot {
        let now_ms = self.inner.clock.now_ms();
        let mut guard = self.inner.lock_state();
        let state = &mut *guard;

        GovernorSnapshot {
            timestamp_ms: now_ms,
            active_leases: state.store.len(),
            concurrency: state.concurrency.as_ref().map(|pool| ConcurrencySnapshot {
                in_flight_weight: pool.in_flight_weight(),
                in_flight_count: pool.in_flight_count(),
                available: pool.available(),
                max_weight: pool.max_weight(),
                effective_max: pool.effective_max(),
            }),
            request_rate: state.request_rate.as_mut().map(|rate| RateWindowSnapshot {
                current: rate.current(now_ms),
                limit: rate.limit(),
            }),
            token_rate: state.token_rate.as_mut().map(|tokens| RateWindowSnapshot {
                current: tokens.current(now_ms),
                limit: tokens.limit(),
            }),
            fairness: state.fairness.is_some(),
            adaptive: state.adaptive.is_some(),
            last_deny: state.last_deny.clone(),
        }
    }

    /// Stops the background reaper. Idempotent.
    ///
    /// `acquire` and `release` continue to work afterwards; only automatic
    /// expiry of abandoned leases stops.
    pub fn dispose(&self) {
        let handle = self
            .reaper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.stop();
            tracing::info!("governor disposed; reaper stopped");
        }
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<GovernorInner> {
        &self.inner
    }
}

impl Drop for Governor {
    fn drop(&mut self) {
        self.dispose();
    }
}
