//! Per-actor fairness tracking.
//!
//! Tracks how much in-flight weight each actor holds and blocks an actor
//! from growing past its soft share while the pool is under pressure. A
//! recently denied actor holds a one-shot starvation pass that lifts the
//! next block, so a heavy neighbor cannot shut an actor out indefinitely.

use std::collections::HashMap;

use crate::config::FairnessConfig;

#[derive(Debug)]
pub(crate) struct FairnessTracker {
    soft_cap_ratio: f64,
    starvation_window_ms: u64,
    actor_weight: HashMap<String, u64>,
    last_denial_ms: HashMap<String, u64>,
}

impl FairnessTracker {
    pub(crate) fn new(config: &FairnessConfig) -> Self {
        Self {
            soft_cap_ratio: config.soft_cap_ratio,
            starvation_window_ms: config.starvation_window_ms,
            actor_weight: HashMap::new(),
            last_denial_ms: HashMap::new(),
        }
    }

    /// Decides whether `actor_id` may add `weight` more units.
    ///
    /// `in_flight_weight` is the pool's post-reservation total; enforcement
    /// only kicks in once it reaches half of `max_weight`. Consuming a
    /// starvation pass clears the stored denial timestamp.
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn check(
        &mut self,
        actor_id: &str,
        weight: u64,
        in_flight_weight: u64,
        max_weight: u64,
        now_ms: u64,
    ) -> bool {
        // Under low utilization every actor may burst freely.
        if in_flight_weight * 2 < max_weight {
            return true;
        }

        let held = self.actor_weight.get(actor_id).copied().unwrap_or(0);
        let soft_cap = self.soft_cap_ratio * max_weight as f64;
        if (held + weight) as f64 <= soft_cap {
            return true;
        }

        if let Some(denied_at) = self.last_denial_ms.get(actor_id).copied() {
            if now_ms.saturating_sub(denied_at) <= self.starvation_window_ms {
                self.last_denial_ms.remove(actor_id);
                tracing::debug!(actor_id, "starvation pass consumed");
                return true;
            }
        }

        false
    }

    pub(crate) fn record_acquire(&mut self, actor_id: &str, weight: u64) {
        *self.actor_weight.entry(actor_id.to_string()).or_insert(0) += weight;
    }

    pub(crate) fn record_release(&mut self, actor_id: &str, weight: u64) {
        if let Some(held) = self.actor_weight.get_mut(actor_id) {
            *held = held.saturating_sub(weight);
            if *held == 0 {
                self.actor_weight.remove(actor_id);
            }
        }
    }

    pub(crate) fn record_denial(&mut self, actor_id: &str, now_ms: u64) {
        // Keep the map from accumulating stamps for actors that gave up.
        let window = self.starvation_window_ms;
        self.last_denial_ms
            .retain(|_, &mut denied_at| now_ms.saturating_sub(denied_at) <= window);
        self.last_denial_ms.insert(actor_id.to_string(), now_ms);
    }

    pub(crate) fn actor_weight(&self, actor_id: &str) -> u64 {
        self.actor_weight.get(actor_id).copied().unwrap_or(0)
    }

    /// Summed weight across all actors (used by invariant checks in tests).
    pub(crate) fn total_weight(&self) -> u64 {
        self.actor_weight.values().sum()
    }
}
