//! Property tests: the universal invariants hold after any operation
//! sequence.
//!
//! Random interleavings of acquires, releases (valid, repeated, and bogus),
//! clock advances, and reaper sweeps run against a governor with every
//! limiter configured. After each step the weight ledgers must agree with
//! the lease store, denials must be free and bounded, and every active
//! lease must map to at most one token-window entry.

use std::sync::Arc;

use proptest::prelude::*;

use crate::clock::{ManualClock, MonotonicClock};
use crate::config::{
    AdaptiveConfig, ConcurrencyConfig, FairnessConfig, GovernorConfig, RateConfig,
};
use crate::decision::{AcquireDecision, MAX_RETRY_AFTER_MS, MIN_RETRY_AFTER_MS};
use crate::lease::Priority;

use super::{AcquireRequest, Governor};

const WINDOW_MS: u64 = 1_000;
const LEASE_TTL_MS: u64 = 500;

#[derive(Debug, Clone)]
enum Op {
    Acquire {
        actor: u8,
        weight: u32,
        tokens: u64,
        background: bool,
        key: Option<u8>,
    },
    Release {
        pick: usize,
        usage: Option<(u64, u64)>,
        latency_ms: Option<u64>,
    },
    ReleaseBogus,
    Advance {
        ms: u64,
    },
    Sweep,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (
            0..4u8,
            1..=3u32,
            0..200u64,
            any::<bool>(),
            prop::option::of(0..4u8)
        )
            .prop_map(|(actor, weight, tokens, background, key)| Op::Acquire {
                actor,
                weight,
                tokens,
                background,
                key,
            }),
        3 => (
            0..64usize,
            prop::option::of((0..200u64, 0..200u64)),
            prop::option::of(0..2_000u64)
        )
            .prop_map(|(pick, usage, latency_ms)| Op::Release {
                pick,
                usage,
                latency_ms,
            }),
        1 => Just(Op::ReleaseBogus),
        2 => (0..300u64).prop_map(|ms| Op::Advance { ms }),
        1 => Just(Op::Sweep),
    ]
}

fn governed_config() -> GovernorConfig {
    GovernorConfig {
        concurrency: Some(ConcurrencyConfig::new(6).with_interactive_reserve(1)),
        rate: Some(RateConfig {
            requests_per_minute: Some(50),
            tokens_per_minute: Some(500),
            window_ms: WINDOW_MS,
        }),
        fairness: Some(FairnessConfig::default()),
        adaptive: Some(AdaptiveConfig {
            adjust_interval_ms: 100,
            ..AdaptiveConfig::default()
        }),
        lease_ttl_ms: LEASE_TTL_MS,
        reaper_interval_ms: 0,
        strict: false,
    }
}

/// Checks every cross-component invariant against the live internals.
fn check_invariants(governor: &Governor, now_ms: u64) {
    let mut guard = governor.inner().lock_state();
    let state = &mut *guard;

    let lease_weight_sum: u64 = state.store.iter().map(|l| u64::from(l.weight())).sum();
    let lease_count = state.store.len();

    let pool = state.concurrency.as_ref().expect("concurrency configured");
    assert_eq!(
        pool.in_flight_weight(),
        lease_weight_sum,
        "pool weight must equal the summed weight of active leases"
    );
    assert_eq!(
        pool.in_flight_count(),
        lease_count,
        "pool count must equal the number of active leases"
    );
    assert!(pool.effective_max() >= 1);
    assert!(pool.effective_max() <= pool.max_weight());

    let fairness = state.fairness.as_ref().expect("fairness configured");
    assert_eq!(
        fairness.total_weight(),
        lease_weight_sum,
        "fairness ledger must equal the summed weight of active leases"
    );

    let token_rate = state.token_rate.as_mut().expect("token rate configured");
    // Force a prune so entry counts reflect the current window.
    token_rate.current(now_ms);
    for lease in state.store.iter() {
        if lease.estimated_tokens() == 0 {
            assert_eq!(token_rate.entry_count_for(lease.lease_id()), 0);
            continue;
        }
        let entries = token_rate.entry_count_for(lease.lease_id());
        assert!(entries <= 1, "never more than one charge per lease");
        if now_ms < lease.created_at_ms() + WINDOW_MS {
            assert_eq!(entries, 1, "charge must survive while inside the window");
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Counters {
    in_flight_weight: u64,
    fairness_total: u64,
    requests_in_window: u64,
    tokens_in_window: u64,
    active_leases: usize,
}

fn counters(governor: &Governor, now_ms: u64) -> Counters {
    let mut guard = governor.inner().lock_state();
    let state = &mut *guard;
    Counters {
        in_flight_weight: state
            .concurrency
            .as_ref()
            .map_or(0, |pool| pool.in_flight_weight()),
        fairness_total: state.fairness.as_ref().map_or(0, |f| f.total_weight()),
        requests_in_window: state.request_rate.as_mut().map_or(0, |r| r.current(now_ms)),
        tokens_in_window: state.token_rate.as_mut().map_or(0, |t| t.current(now_ms)),
        active_leases: state.store.len(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn invariants_hold_across_operation_sequences(
        ops in prop::collection::vec(op_strategy(), 1..100)
    ) {
        let clock = ManualClock::new(0);
        let governor =
            Governor::with_clock(governed_config(), Arc::new(clock.clone())).unwrap();
        let mut granted: Vec<String> = Vec::new();

        for op in ops {
            match op {
                Op::Acquire { actor, weight, tokens, background, key } => {
                    let before = counters(&governor, clock.now_ms());
                    let mut builder = AcquireRequest::builder()
                        .actor_id(format!("actor-{actor}"))
                        .action("chat.completion")
                        .weight(weight)
                        .prompt_tokens(tokens);
                    if background {
                        builder = builder.priority(Priority::Background);
                    }
                    if let Some(key) = key {
                        builder = builder.idempotency_key(format!("key-{key}"));
                    }
                    let request = builder.build().unwrap();

                    match governor.acquire(request) {
                        AcquireDecision::Granted { lease_id, .. } => {
                            granted.push(lease_id);
                        }
                        AcquireDecision::Denied { retry_after_ms, .. } => {
                            prop_assert!(
                                (MIN_RETRY_AFTER_MS..=MAX_RETRY_AFTER_MS)
                                    .contains(&retry_after_ms)
                            );
                            // A denial makes no net change to any pool.
                            let after = counters(&governor, clock.now_ms());
                            prop_assert_eq!(before, after);
                        }
                    }
                }
                Op::Release { pick, usage, latency_ms } => {
                    if granted.is_empty() {
                        continue;
                    }
                    let lease_id = granted[pick % granted.len()].clone();
                    let mut report = crate::governor::ReleaseReport::default();
                    if let Some((prompt, output)) = usage {
                        report = report.usage(crate::governor::TokenUsage::new(prompt, output));
                    }
                    if let Some(latency) = latency_ms {
                        report = report.latency_ms(latency);
                    }
                    governor.release(&lease_id, Some(report)).unwrap();
                }
                Op::ReleaseBogus => {
                    prop_assert!(governor.release("lease-bogus", None).unwrap().is_none());
                }
                Op::Advance { ms } => {
                    clock.advance(ms);
                }
                Op::Sweep => {
                    governor.inner().sweep_expired();
                }
            }

            check_invariants(&governor, clock.now_ms());
        }
    }
}
