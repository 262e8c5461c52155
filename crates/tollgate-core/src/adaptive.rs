//! Adaptive concurrency controller.
//!
//! Feedback loop over two EMA signals: the per-interval deny rate and the
//! completion latency reported on release. When either signal degrades the
//! controller walks the effective concurrency ceiling down one unit; when
//! both look healthy it walks the ceiling back up. Single-unit steps keep
//! the loop from thrashing.
//!
//! The controller is self-clocked: `maybe_adjust` piggy-backs on `acquire`
//! calls and runs at most once per `adjust_interval_ms`, so no extra
//! background task is needed.

use crate::config::AdaptiveConfig;

#[derive(Debug)]
pub(crate) struct AdaptiveController {
    alpha: f64,
    target_deny_rate: f64,
    latency_threshold: f64,
    adjust_interval_ms: u64,
    min_concurrency: u64,
    max_weight: u64,

    effective_max: u64,
    ema_deny_rate: f64,
    ema_latency_ms: f64,
    baseline_latency_ms: Option<f64>,

    interval_accepts: u64,
    interval_denials: u64,
    interval_latency_sum_ms: u64,
    interval_latency_samples: u64,
    last_adjust_ms: u64,
}

impl AdaptiveController {
    pub(crate) fn new(config: &AdaptiveConfig, max_in_flight: u32, now_ms: u64) -> Self {
        let max_weight = u64::from(max_in_flight);
        Self {
            alpha: config.alpha,
            target_deny_rate: config.target_deny_rate,
            latency_threshold: config.latency_threshold,
            adjust_interval_ms: config.adjust_interval_ms,
            min_concurrency: u64::from(config.min_concurrency),
            max_weight,
            effective_max: max_weight,
            ema_deny_rate: 0.0,
            ema_latency_ms: 0.0,
            baseline_latency_ms: None,
            interval_accepts: 0,
            interval_denials: 0,
            interval_latency_sum_ms: 0,
            interval_latency_samples: 0,
            last_adjust_ms: now_ms,
        }
    }

    pub(crate) fn record_acquire(&mut self) {
        self.interval_accepts += 1;
    }

    /// Counts a denial from *any* limiter toward the deny rate.
    pub(crate) fn record_denial(&mut self) {
        self.interval_denials += 1;
    }

    pub(crate) fn record_latency(&mut self, latency_ms: u64) {
        self.interval_latency_sum_ms += latency_ms;
        self.interval_latency_samples += 1;
    }

    /// Runs one adjustment step if the interval has elapsed.
    ///
    /// Returns the (possibly updated) effective ceiling for the caller to
    /// install on the concurrency pool.
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn maybe_adjust(&mut self, now_ms: u64) -> u64 {
        if now_ms.saturating_sub(self.last_adjust_ms) < self.adjust_interval_ms {
            return self.effective_max;
        }
        self.last_adjust_ms = now_ms;

        let total = self.interval_accepts + self.interval_denials;
        let deny_rate = if total == 0 {
            0.0
        } else {
            self.interval_denials as f64 / total as f64
        };
        self.ema_deny_rate = self.alpha * deny_rate + (1.0 - self.alpha) * self.ema_deny_rate;

        if self.interval_latency_samples > 0 {
            let mean = self.interval_latency_sum_ms as f64 / self.interval_latency_samples as f64;
            if self.baseline_latency_ms.is_none() {
                // First interval that saw completions anchors the baseline.
                self.baseline_latency_ms = Some(mean);
                self.ema_latency_ms = mean;
            } else {
                self.ema_latency_ms = self.alpha * mean + (1.0 - self.alpha) * self.ema_latency_ms;
            }
        }

        let latency_degraded = self
            .baseline_latency_ms
            .is_some_and(|baseline| self.ema_latency_ms > baseline * self.latency_threshold);
        let latency_healthy = self
            .baseline_latency_ms
            .map_or(true, |baseline| self.ema_latency_ms <= baseline * 1.1);

        if self.ema_deny_rate > self.target_deny_rate || latency_degraded {
            let lowered = self.effective_max.saturating_sub(1).max(self.min_concurrency);
            if lowered != self.effective_max {
                tracing::debug!(
                    effective_max = lowered,
                    ema_deny_rate = self.ema_deny_rate,
                    ema_latency_ms = self.ema_latency_ms,
                    "adaptive controller lowering concurrency ceiling"
                );
            }
            self.effective_max = lowered;
        } else if self.effective_max < self.max_weight
            && self.ema_deny_rate < self.target_deny_rate / 2.0
            && latency_healthy
        {
            self.effective_max += 1;
            tracing::debug!(
                effective_max = self.effective_max,
                ema_deny_rate = self.ema_deny_rate,
                "adaptive controller raising concurrency ceiling"
            );
        }

        self.interval_accepts = 0;
        self.interval_denials = 0;
        self.interval_latency_sum_ms = 0;
        self.interval_latency_samples = 0;

        self.effective_max
    }

    pub(crate) const fn effective_max(&self) -> u64 {
        self.effective_max
    }
}
