//! End-to-end governor scenarios over a manually advanced clock.

use std::sync::{Arc, Mutex};

use crate::clock::ManualClock;
use crate::config::{
    AdaptiveConfig, ConcurrencyConfig, FairnessConfig, GovernorConfig, RateConfig,
};
use crate::decision::{AcquireDecision, DenyReason, MAX_RETRY_AFTER_MS, MIN_RETRY_AFTER_MS};
use crate::error::GovernorError;
use crate::event::{EventSink, GovernorEvent};
use crate::lease::Priority;

use super::{AcquireRequest, Governor, ReleaseOutcome, ReleaseReport, TokenUsage};

fn request(actor_id: &str) -> AcquireRequest {
    AcquireRequest::builder()
        .actor_id(actor_id)
        .action("chat.completion")
        .build()
        .unwrap()
}

/// Base config with the background reaper disabled so tests drive expiry
/// deterministically through `sweep_expired`.
fn base_config() -> GovernorConfig {
    GovernorConfig {
        reaper_interval_ms: 0,
        ..GovernorConfig::default()
    }
}

fn governor_with_clock(config: GovernorConfig) -> (Governor, ManualClock) {
    let clock = ManualClock::new(0);
    let governor = Governor::with_clock(config, Arc::new(clock.clone())).unwrap();
    (governor, clock)
}

fn expect_granted(decision: &AcquireDecision) -> String {
    match decision {
        AcquireDecision::Granted { lease_id, .. } => lease_id.clone(),
        AcquireDecision::Denied { reason, .. } => panic!("expected grant, denied: {reason}"),
    }
}

fn expect_denied(decision: &AcquireDecision) -> (DenyReason, u64) {
    match decision {
        AcquireDecision::Granted { lease_id, .. } => panic!("expected denial, granted {lease_id}"),
        AcquireDecision::Denied {
            reason,
            retry_after_ms,
            ..
        } => (*reason, *retry_after_ms),
    }
}

#[test]
fn test_concurrency_denial_and_recovery() {
    let (governor, clock) = governor_with_clock(GovernorConfig {
        concurrency: Some(ConcurrencyConfig::new(1)),
        lease_ttl_ms: 1_000,
        ..base_config()
    });

    let first = governor.acquire(request("actor-a"));
    let lease_id = expect_granted(&first);
    assert!(matches!(
        first,
        AcquireDecision::Granted { expires_at_ms, .. } if expires_at_ms == 1_000
    ));

    clock.set(10);
    let (reason, retry_after_ms) = expect_denied(&governor.acquire(request("actor-b")));
    assert_eq!(reason, DenyReason::Concurrency);
    // The hint tracks the earliest active lease's expiry.
    assert_eq!(retry_after_ms, 990);

    clock.set(500);
    governor.release(&lease_id, None).unwrap();

    clock.set(501);
    expect_granted(&governor.acquire(request("actor-b")));
}

#[test]
fn test_rate_window_slide() {
    let (governor, clock) = governor_with_clock(GovernorConfig {
        rate: Some(RateConfig {
            requests_per_minute: Some(2),
            window_ms: 1_000,
            ..RateConfig::default()
        }),
        ..base_config()
    });

    expect_granted(&governor.acquire(request("actor-a")));
    clock.set(100);
    expect_granted(&governor.acquire(request("actor-a")));
    clock.set(200);
    let (reason, _) = expect_denied(&governor.acquire(request("actor-a")));
    assert_eq!(reason, DenyReason::Rate);

    // The request at t=0 has aged out of the window by t=1050.
    clock.set(1_050);
    expect_granted(&governor.acquire(request("actor-a")));
}

#[test]
fn test_token_reconciliation() {
    let (governor, _clock) = governor_with_clock(GovernorConfig {
        rate: Some(RateConfig {
            tokens_per_minute: Some(1_000),
            ..RateConfig::default()
        }),
        ..base_config()
    });

    let first = governor.acquire(
        AcquireRequest::builder()
            .actor_id("actor-a")
            .action("chat.completion")
            .prompt_tokens(500)
            .max_output_tokens(300)
            .build()
            .unwrap(),
    );
    let lease_id = expect_granted(&first);

    let follow_up = AcquireRequest::builder()
        .actor_id("actor-a")
        .action("chat.completion")
        .prompt_tokens(100)
        .max_output_tokens(200)
        .build()
        .unwrap();

    // 800 charged + 300 needed exceeds the 1000-token window.
    let (reason, _) = expect_denied(&governor.acquire(follow_up.clone()));
    assert_eq!(reason, DenyReason::Rate);

    // Actual usage came in at 600; the delta is freed immediately.
    governor
        .release(
            &lease_id,
            Some(ReleaseReport::default().usage(TokenUsage::new(500, 100))),
        )
        .unwrap();
    expect_granted(&governor.acquire(follow_up));

    let snapshot = governor.snapshot();
    assert_eq!(snapshot.token_rate.unwrap().current, 900);
}

#[test]
fn test_fairness_soft_cap() {
    let (governor, _clock) = governor_with_clock(GovernorConfig {
        concurrency: Some(ConcurrencyConfig::new(10)),
        fairness: Some(FairnessConfig {
            soft_cap_ratio: 0.5,
            ..FairnessConfig::default()
        }),
        ..base_config()
    });

    for _ in 0..5 {
        expect_granted(&governor.acquire(request("actor-a")));
    }

    let (reason, retry_after_ms) = expect_denied(&governor.acquire(request("actor-a")));
    assert_eq!(reason, DenyReason::Policy);
    assert!((MIN_RETRY_AFTER_MS..=MAX_RETRY_AFTER_MS).contains(&retry_after_ms));

    // Another actor is unaffected by actor-a's share.
    expect_granted(&governor.acquire(request("actor-b")));
}

#[test]
fn test_starvation_pass_admits_denied_actor_once() {
    let (governor, _clock) = governor_with_clock(GovernorConfig {
        concurrency: Some(ConcurrencyConfig::new(10)),
        fairness: Some(FairnessConfig {
            soft_cap_ratio: 0.5,
            ..FairnessConfig::default()
        }),
        ..base_config()
    });

    for _ in 0..5 {
        expect_granted(&governor.acquire(request("actor-a")));
    }
    let (reason, _) = expect_denied(&governor.acquire(request("actor-a")));
    assert_eq!(reason, DenyReason::Policy);

    // The denial banked a one-shot pass; the next attempt goes through,
    // the one after that is blocked again.
    expect_granted(&governor.acquire(request("actor-a")));
    let (reason, _) = expect_denied(&governor.acquire(request("actor-a")));
    assert_eq!(reason, DenyReason::Policy);
}

#[test]
fn test_rollback_on_later_limiter_denial() {
    let (governor, _clock) = governor_with_clock(GovernorConfig {
        concurrency: Some(ConcurrencyConfig::new(10)),
        rate: Some(RateConfig {
            requests_per_minute: Some(1),
            ..RateConfig::default()
        }),
        ..base_config()
    });

    expect_granted(&governor.acquire(request("actor-a")));
    let (reason, _) = expect_denied(&governor.acquire(request("actor-a")));
    assert_eq!(reason, DenyReason::Rate);

    // The concurrency reservation made before the rate check was rolled
    // back; the denial cost nothing.
    let snapshot = governor.snapshot();
    assert_eq!(snapshot.concurrency.unwrap().in_flight_weight, 1);
}

#[test]
fn test_token_denial_rolls_back_concurrency_and_request_rate() {
    let (governor, _clock) = governor_with_clock(GovernorConfig {
        concurrency: Some(ConcurrencyConfig::new(10)),
        rate: Some(RateConfig {
            requests_per_minute: Some(10),
            tokens_per_minute: Some(100),
            ..RateConfig::default()
        }),
        ..base_config()
    });

    let oversized = AcquireRequest::builder()
        .actor_id("actor-a")
        .action("chat.completion")
        .prompt_tokens(200)
        .build()
        .unwrap();
    let (reason, _) = expect_denied(&governor.acquire(oversized));
    assert_eq!(reason, DenyReason::Rate);

    let snapshot = governor.snapshot();
    assert_eq!(snapshot.concurrency.unwrap().in_flight_weight, 0);
    assert_eq!(snapshot.request_rate.unwrap().current, 0);
    assert_eq!(snapshot.token_rate.unwrap().current, 0);
}

#[test]
fn test_weighted_concurrency() {
    let (governor, _clock) = governor_with_clock(GovernorConfig {
        concurrency: Some(ConcurrencyConfig::new(10)),
        ..base_config()
    });

    let heavy = |actor: &str| {
        AcquireRequest::builder()
            .actor_id(actor)
            .action("batch.embed")
            .weight(5)
            .build()
            .unwrap()
    };

    expect_granted(&governor.acquire(heavy("actor-a")));
    expect_granted(&governor.acquire(heavy("actor-b")));

    let (reason, _) = expect_denied(&governor.acquire(request("actor-c")));
    assert_eq!(reason, DenyReason::Concurrency);
}

#[test]
fn test_interactive_reserve_protects_against_background() {
    let (governor, _clock) = governor_with_clock(GovernorConfig {
        concurrency: Some(ConcurrencyConfig::new(4).with_interactive_reserve(2)),
        ..base_config()
    });

    let background = |weight: u32| {
        AcquireRequest::builder()
            .actor_id("actor-a")
            .action("batch.embed")
            .priority(Priority::Background)
            .weight(weight)
            .build()
            .unwrap()
    };

    expect_granted(&governor.acquire(background(2)));

    // available == reserve: background is denied, interactive admitted.
    let (reason, _) = expect_denied(&governor.acquire(background(1)));
    assert_eq!(reason, DenyReason::Concurrency);
    expect_granted(&governor.acquire(request("actor-b")));
}

#[test]
fn test_adaptive_reduction_under_deny_pressure() {
    let (governor, clock) = governor_with_clock(GovernorConfig {
        concurrency: Some(ConcurrencyConfig::new(5)),
        adaptive: Some(AdaptiveConfig {
            alpha: 1.0,
            target_deny_rate: 0.05,
            adjust_interval_ms: 100,
            ..AdaptiveConfig::default()
        }),
        lease_ttl_ms: 60_000,
        ..base_config()
    });

    for _ in 0..5 {
        expect_granted(&governor.acquire(request("actor-a")));
    }
    for _ in 0..20 {
        expect_denied(&governor.acquire(request("actor-a")));
    }

    // Past the interval the next acquire runs the tick and the ceiling
    // steps down by exactly one.
    clock.set(150);
    expect_denied(&governor.acquire(request("actor-a")));
    let snapshot = governor.snapshot().concurrency.unwrap();
    assert_eq!(snapshot.effective_max, 4);
    assert_eq!(snapshot.max_weight, 5);
}

#[test]
fn test_adaptive_recovers_after_pressure_clears() {
    let (governor, clock) = governor_with_clock(GovernorConfig {
        concurrency: Some(ConcurrencyConfig::new(3)),
        adaptive: Some(AdaptiveConfig {
            alpha: 1.0,
            adjust_interval_ms: 100,
            ..AdaptiveConfig::default()
        }),
        ..base_config()
    });

    // Drive the ceiling down.
    let mut lease_ids = Vec::new();
    for _ in 0..3 {
        lease_ids.push(expect_granted(&governor.acquire(request("actor-a"))));
    }
    for _ in 0..10 {
        expect_denied(&governor.acquire(request("actor-a")));
    }
    clock.set(150);
    expect_denied(&governor.acquire(request("actor-a")));
    assert_eq!(governor.snapshot().concurrency.unwrap().effective_max, 2);

    // Clear the pool; the lone denial at t=150 still drags the EMA down one
    // more step at the next tick.
    for lease_id in lease_ids {
        governor.release(&lease_id, None).unwrap();
    }
    clock.set(300);
    expect_granted(&governor.acquire(request("actor-b")));
    assert_eq!(governor.snapshot().concurrency.unwrap().effective_max, 1);

    // From here every interval is clean, so the ceiling walks back up one
    // unit per tick.
    clock.set(450);
    expect_granted(&governor.acquire(request("actor-b")));
    assert_eq!(governor.snapshot().concurrency.unwrap().effective_max, 2);
    clock.set(600);
    expect_granted(&governor.acquire(request("actor-b")));
    assert_eq!(governor.snapshot().concurrency.unwrap().effective_max, 3);
}

#[test]
fn test_idempotency_returns_same_lease() {
    let (governor, _clock) = governor_with_clock(GovernorConfig {
        concurrency: Some(ConcurrencyConfig::new(5)),
        ..base_config()
    });

    let keyed = || {
        AcquireRequest::builder()
            .actor_id("actor-a")
            .action("chat.completion")
            .idempotency_key("req-1")
            .build()
            .unwrap()
    };

    let first = expect_granted(&governor.acquire(keyed()));
    let second = expect_granted(&governor.acquire(keyed()));
    assert_eq!(first, second);

    // The replay consumed no additional capacity.
    assert_eq!(governor.snapshot().concurrency.unwrap().in_flight_weight, 1);

    // Releasing once frees the capacity once; the key is forgotten.
    governor.release(&first, None).unwrap();
    assert_eq!(governor.snapshot().concurrency.unwrap().in_flight_weight, 0);

    let third = expect_granted(&governor.acquire(keyed()));
    assert_ne!(first, third);
}

#[test]
fn test_release_unknown_lease_permissive_and_strict() {
    let (governor, _clock) = governor_with_clock(base_config());
    assert!(governor.release("lease-unknown", None).unwrap().is_none());

    let (strict, _clock) = governor_with_clock(GovernorConfig {
        strict: true,
        ..base_config()
    });
    let result = strict.release("lease-unknown", None);
    assert!(matches!(result, Err(GovernorError::UnknownLease { .. })));
}

#[test]
fn test_double_release_permissive_and_strict() {
    let (governor, _clock) = governor_with_clock(GovernorConfig {
        concurrency: Some(ConcurrencyConfig::new(2)),
        ..base_config()
    });
    let lease_id = expect_granted(&governor.acquire(request("actor-a")));
    assert!(governor.release(&lease_id, None).unwrap().is_some());
    // Permissive: the second release is a silent no-op with no effect on
    // the pool.
    assert!(governor.release(&lease_id, None).unwrap().is_none());
    assert_eq!(governor.snapshot().concurrency.unwrap().in_flight_weight, 0);

    let (strict, _clock) = governor_with_clock(GovernorConfig {
        concurrency: Some(ConcurrencyConfig::new(2)),
        strict: true,
        ..base_config()
    });
    let lease_id = expect_granted(&strict.acquire(request("actor-a")));
    assert!(strict.release(&lease_id, None).unwrap().is_some());
    let result = strict.release(&lease_id, None);
    assert!(matches!(result, Err(GovernorError::DoubleRelease { .. })));
}

#[test]
fn test_strict_long_hold_warns() {
    let seen: Arc<Mutex<Vec<GovernorEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&seen);
    let sink: EventSink = Arc::new(move |event| captured.lock().unwrap().push(event.clone()));

    let clock = ManualClock::new(0);
    let governor = Governor::with_clock_and_sink(
        GovernorConfig {
            concurrency: Some(ConcurrencyConfig::new(2)),
            lease_ttl_ms: 1_000,
            strict: true,
            ..base_config()
        },
        Arc::new(clock.clone()),
        sink,
    )
    .unwrap();

    let lease_id = expect_granted(&governor.acquire(request("actor-a")));
    clock.set(900);
    governor.release(&lease_id, None).unwrap();

    let events = seen.lock().unwrap();
    assert!(events.iter().any(|event| matches!(
        event,
        GovernorEvent::Warn { lease_id: Some(id), .. } if *id == lease_id
    )));
}

#[test]
fn test_event_stream_shapes() {
    let seen: Arc<Mutex<Vec<GovernorEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&seen);
    let sink: EventSink = Arc::new(move |event| captured.lock().unwrap().push(event.clone()));

    let clock = ManualClock::new(0);
    let governor = Governor::with_clock_and_sink(
        GovernorConfig {
            concurrency: Some(ConcurrencyConfig::new(1)),
            ..base_config()
        },
        Arc::new(clock.clone()),
        sink,
    )
    .unwrap();

    let lease_id = expect_granted(&governor.acquire(request("actor-a")));
    clock.set(5);
    expect_denied(&governor.acquire(request("actor-b")));
    clock.set(10);
    governor
        .release(
            &lease_id,
            Some(ReleaseReport::with_outcome(ReleaseOutcome::Timeout)),
        )
        .unwrap();

    let events = seen.lock().unwrap();
    assert_eq!(events.len(), 3);

    assert!(matches!(
        &events[0],
        GovernorEvent::Acquire { lease_id: id, actor_id, weight: 1, .. }
            if *id == lease_id && actor_id == "actor-a"
    ));
    assert!(matches!(
        &events[1],
        GovernorEvent::Deny { reason: DenyReason::Concurrency, actor_id, retry_after_ms, .. }
            if actor_id == "actor-b"
                && (MIN_RETRY_AFTER_MS..=MAX_RETRY_AFTER_MS).contains(retry_after_ms)
    ));
    assert!(matches!(
        &events[2],
        GovernorEvent::Release { outcome: ReleaseOutcome::Timeout, timestamp_ms: 10, .. }
    ));
}

#[test]
fn test_panicking_sink_does_not_break_admission() {
    let sink: EventSink = Arc::new(|_| panic!("observer bug"));
    let clock = ManualClock::new(0);
    let governor = Governor::with_clock_and_sink(
        GovernorConfig {
            concurrency: Some(ConcurrencyConfig::new(2)),
            ..base_config()
        },
        Arc::new(clock.clone()),
        sink,
    )
    .unwrap();

    let lease_id = expect_granted(&governor.acquire(request("actor-a")));
    governor.release(&lease_id, None).unwrap();
    assert_eq!(governor.snapshot().concurrency.unwrap().in_flight_weight, 0);
}

#[test]
fn test_expired_leases_reclaim_capacity_on_sweep() {
    let (governor, clock) = governor_with_clock(GovernorConfig {
        concurrency: Some(ConcurrencyConfig::new(2)),
        fairness: Some(FairnessConfig::default()),
        lease_ttl_ms: 1_000,
        ..base_config()
    });

    expect_granted(&governor.acquire(request("actor-a")));
    expect_granted(&governor.acquire(request("actor-a")));
    assert_eq!(governor.snapshot().concurrency.unwrap().in_flight_weight, 2);

    clock.set(1_000);
    assert_eq!(governor.inner().sweep_expired(), 2);
    assert_eq!(governor.inner().sweep_expired(), 0);

    let snapshot = governor.snapshot();
    assert_eq!(snapshot.active_leases, 0);
    assert_eq!(snapshot.concurrency.unwrap().in_flight_weight, 0);

    expect_granted(&governor.acquire(request("actor-b")));
}

#[test]
fn test_release_after_expiry_is_a_permissive_no_op() {
    let (governor, clock) = governor_with_clock(GovernorConfig {
        concurrency: Some(ConcurrencyConfig::new(1)),
        lease_ttl_ms: 100,
        ..base_config()
    });

    let lease_id = expect_granted(&governor.acquire(request("actor-a")));
    clock.set(200);
    governor.inner().sweep_expired();

    // The reaper already reclaimed the weight; the late release must not
    // subtract it a second time.
    assert!(governor.release(&lease_id, None).unwrap().is_none());
    assert_eq!(governor.snapshot().concurrency.unwrap().in_flight_weight, 0);
}

#[test]
fn test_expire_event_emitted() {
    let seen: Arc<Mutex<Vec<GovernorEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&seen);
    let sink: EventSink = Arc::new(move |event| captured.lock().unwrap().push(event.clone()));

    let clock = ManualClock::new(0);
    let governor = Governor::with_clock_and_sink(
        GovernorConfig {
            lease_ttl_ms: 50,
            ..base_config()
        },
        Arc::new(clock.clone()),
        sink,
    )
    .unwrap();

    let lease_id = expect_granted(&governor.acquire(request("actor-a")));
    clock.set(60);
    governor.inner().sweep_expired();

    let events = seen.lock().unwrap();
    assert!(events.iter().any(|event| matches!(
        event,
        GovernorEvent::Expire { lease_id: id, .. } if *id == lease_id
    )));
}

#[test]
fn test_reaper_thread_sweeps_in_background() {
    let clock = ManualClock::new(0);
    let governor = Governor::with_clock(
        GovernorConfig {
            concurrency: Some(ConcurrencyConfig::new(1)),
            lease_ttl_ms: 100,
            reaper_interval_ms: 10,
            ..GovernorConfig::default()
        },
        Arc::new(clock.clone()),
    )
    .unwrap();

    expect_granted(&governor.acquire(request("actor-a")));
    clock.set(200);

    // Give the 10ms reaper a generous number of cycles.
    for _ in 0..100 {
        std::thread::sleep(std::time::Duration::from_millis(5));
        if governor.snapshot().active_leases == 0 {
            break;
        }
    }
    assert_eq!(governor.snapshot().active_leases, 0);
    governor.dispose();
}

#[test]
fn test_dispose_is_idempotent_and_operations_survive_it() {
    let (governor, _clock) = governor_with_clock(GovernorConfig {
        concurrency: Some(ConcurrencyConfig::new(2)),
        reaper_interval_ms: 50,
        ..GovernorConfig::default()
    });

    governor.dispose();
    governor.dispose();

    let lease_id = expect_granted(&governor.acquire(request("actor-a")));
    assert!(governor.release(&lease_id, None).unwrap().is_some());
}

#[test]
fn test_snapshot_reflects_configuration_and_last_deny() {
    let (governor, _clock) = governor_with_clock(GovernorConfig {
        concurrency: Some(ConcurrencyConfig::new(1)),
        fairness: Some(FairnessConfig::default()),
        adaptive: Some(AdaptiveConfig::default()),
        ..base_config()
    });

    let snapshot = governor.snapshot();
    assert!(snapshot.fairness);
    assert!(snapshot.adaptive);
    assert!(snapshot.request_rate.is_none());
    assert!(snapshot.token_rate.is_none());
    assert!(snapshot.last_deny.is_none());

    expect_granted(&governor.acquire(request("actor-a")));
    expect_denied(&governor.acquire(request("actor-b")));

    let last_deny = governor.snapshot().last_deny.unwrap();
    assert_eq!(last_deny.reason, DenyReason::Concurrency);
    assert_eq!(last_deny.actor_id, "actor-b");
}

#[test]
fn test_governor_without_limiters_grants_everything() {
    let (governor, _clock) = governor_with_clock(base_config());

    for _ in 0..100 {
        expect_granted(&governor.acquire(request("actor-a")));
    }
    let snapshot = governor.snapshot();
    assert_eq!(snapshot.active_leases, 100);
    assert!(snapshot.concurrency.is_none());
}

#[test]
fn test_fairness_without_concurrency_is_ignored() {
    let (governor, _clock) = governor_with_clock(GovernorConfig {
        fairness: Some(FairnessConfig::default()),
        adaptive: Some(AdaptiveConfig::default()),
        ..base_config()
    });

    let snapshot = governor.snapshot();
    assert!(!snapshot.fairness);
    assert!(!snapshot.adaptive);
}

#[test]
fn test_governor_is_shareable_across_threads() {
    let (governor, _clock) = governor_with_clock(GovernorConfig {
        concurrency: Some(ConcurrencyConfig::new(64)),
        ..base_config()
    });
    let governor = Arc::new(governor);

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let governor = Arc::clone(&governor);
            std::thread::spawn(move || {
                for _ in 0..8 {
                    let decision = governor.acquire(
                        AcquireRequest::builder()
                            .actor_id(format!("actor-{worker}"))
                            .action("chat.completion")
                            .build()
                            .unwrap(),
                    );
                    if let AcquireDecision::Granted { lease_id, .. } = decision {
                        governor.release(&lease_id, None).unwrap();
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(governor.snapshot().concurrency.unwrap().in_flight_weight, 0);
}
