//! Weighted concurrency pool.
//!
//! Tracks the summed weight of in-flight leases against an adjustable
//! ceiling. The configured `max_weight` is the hard bound; the adaptive
//! controller may pull `effective_max` down toward its floor and back up.
//! An `interactive_reserve` carve-out keeps the last units of capacity out
//! of reach of background-priority requests.

use crate::decision::clamp_retry_after;
use crate::error::GovernorError;
use crate::lease::Priority;

#[derive(Debug)]
pub(crate) struct ConcurrencyPool {
    max_weight: u64,
    effective_max: u64,
    interactive_reserve: u64,
    in_flight_weight: u64,
    in_flight_count: usize,
}

impl ConcurrencyPool {
    /// Creates a pool with the full ceiling in effect.
    ///
    /// Rejects a reserve that swallows the whole ceiling; interactive
    /// requests aside, such a pool could never admit anything.
    pub(crate) fn new(max_in_flight: u32, interactive_reserve: u32) -> Result<Self, GovernorError> {
        if max_in_flight == 0 {
            return Err(GovernorError::invalid_config("max_in_flight must be positive"));
        }
        if interactive_reserve >= max_in_flight {
            return Err(GovernorError::invalid_config(format!(
                "interactive_reserve ({interactive_reserve}) must be below max_in_flight ({max_in_flight})"
            )));
        }
        Ok(Self {
            max_weight: u64::from(max_in_flight),
            effective_max: u64::from(max_in_flight),
            interactive_reserve: u64::from(interactive_reserve),
            in_flight_weight: 0,
            in_flight_count: 0,
        })
    }

    /// Attempts to reserve `weight` units for a request of the given
    /// priority. Returns `true` and records the reservation on success.
    pub(crate) fn try_admit(&mut self, weight: u64, priority: Priority) -> bool {
        let available = self.available();
        if available < weight {
            return false;
        }
        if priority == Priority::Background && available - weight < self.interactive_reserve {
            return false;
        }

        self.in_flight_weight += weight;
        self.in_flight_count += 1;
        true
    }

    /// Returns `weight` units to the pool.
    ///
    /// Over-release clamps at zero; strict-mode detection of the misuse
    /// happens at the governor, which knows lease identities.
    pub(crate) fn release(&mut self, weight: u64) {
        if weight > self.in_flight_weight {
            tracing::warn!(
                weight,
                in_flight_weight = self.in_flight_weight,
                "concurrency release exceeds in-flight weight; clamping to zero"
            );
        }
        self.in_flight_weight = self.in_flight_weight.saturating_sub(weight);
        self.in_flight_count = self.in_flight_count.saturating_sub(1);
    }

    /// Suggests how long a denied caller should wait.
    ///
    /// Prefers the time until the earliest active lease expires; without one
    /// (or when it is already due) falls back to a pressure-proportional
    /// heuristic. Either path lands in the `[25, 5000]` ms band.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub(crate) fn retry_after_hint(&self, ms_until_earliest_expiry: Option<u64>) -> u64 {
        if let Some(ms) = ms_until_earliest_expiry {
            if ms > 0 {
                return clamp_retry_after(ms);
            }
        }

        let pressure = if self.effective_max == 0 {
            1.0
        } else {
            self.in_flight_weight as f64 / self.effective_max as f64
        };
        clamp_retry_after((250.0 + pressure * 750.0).round() as u64)
    }

    /// Installs a new effective ceiling, clamped to `[1, max_weight]`.
    pub(crate) fn set_effective_max(&mut self, effective_max: u64) {
        self.effective_max = effective_max.clamp(1, self.max_weight);
    }

    pub(crate) fn available(&self) -> u64 {
        self.effective_max.saturating_sub(self.in_flight_weight)
    }

    pub(crate) const fn in_flight_weight(&self) -> u64 {
        self.in_flight_weight
    }

    pub(crate) const fn in_flight_count(&self) -> usize {
        self.in_flight_count
    }

    pub(crate) const fn max_weight(&self) -> u64 {
        self.max_weight
    }

    pub(crate) const fn effective_max(&self) -> u64 {
        self.effective_max
    }
}
