//! Governor configuration.
//!
//! A single [`GovernorConfig`] record is consumed at construction. Every
//! limiter is optional; a governor with no limiters configured grants every
//! request (leases are still issued and reaped). Defaults follow the
//! documented contract: 60s rolling windows, 60s lease TTL, 5s reaper
//! interval, permissive lifecycle handling.

use serde::{Deserialize, Serialize};

use crate::error::GovernorError;

/// Weighted concurrency limiter settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConcurrencyConfig {
    /// Hard ceiling on the summed weight of in-flight leases.
    pub max_in_flight: u32,

    /// Weight units reserved for interactive-priority requests.
    ///
    /// Background requests are denied whenever granting them would leave
    /// fewer than this many units available. Must be strictly below
    /// `max_in_flight`.
    #[serde(default)]
    pub interactive_reserve: u32,
}

impl ConcurrencyConfig {
    /// Creates a concurrency config with no interactive reserve.
    #[must_use]
    pub const fn new(max_in_flight: u32) -> Self {
        Self {
            max_in_flight,
            interactive_reserve: 0,
        }
    }

    /// Sets the interactive reserve.
    #[must_use]
    pub const fn with_interactive_reserve(mut self, reserve: u32) -> Self {
        self.interactive_reserve = reserve;
        self
    }
}

/// Rolling-window rate limiter settings.
///
/// The per-minute field names describe the conventional window; shortening
/// `window_ms` scales the caps to that window rather than to a literal
/// minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateConfig {
    /// Cap on requests admitted per window, if any.
    #[serde(default)]
    pub requests_per_minute: Option<u32>,

    /// Cap on estimated tokens charged per window, if any.
    #[serde(default)]
    pub tokens_per_minute: Option<u32>,

    /// Rolling window length in milliseconds.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: None,
            tokens_per_minute: None,
            window_ms: default_window_ms(),
        }
    }
}

/// Per-actor fairness settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FairnessConfig {
    /// Fraction of `max_in_flight` a single actor may hold while the pool is
    /// under pressure.
    #[serde(default = "default_soft_cap_ratio")]
    pub soft_cap_ratio: f64,

    /// How long a denial entitles the actor to a one-shot soft-cap
    /// exemption.
    #[serde(default = "default_starvation_window_ms")]
    pub starvation_window_ms: u64,
}

impl Default for FairnessConfig {
    fn default() -> Self {
        Self {
            soft_cap_ratio: default_soft_cap_ratio(),
            starvation_window_ms: default_starvation_window_ms(),
        }
    }
}

/// Adaptive concurrency controller settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdaptiveConfig {
    /// EMA smoothing factor in `(0, 1]`.
    #[serde(default = "default_alpha")]
    pub alpha: f64,

    /// Deny-rate the controller steers toward.
    #[serde(default = "default_target_deny_rate")]
    pub target_deny_rate: f64,

    /// Multiple of the baseline latency treated as degradation.
    #[serde(default = "default_latency_threshold")]
    pub latency_threshold: f64,

    /// Minimum spacing between adjustments in milliseconds.
    #[serde(default = "default_adjust_interval_ms")]
    pub adjust_interval_ms: u64,

    /// Floor for the effective concurrency ceiling. Never below 1.
    #[serde(default = "default_min_concurrency")]
    pub min_concurrency: u32,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            target_deny_rate: default_target_deny_rate(),
            latency_threshold: default_latency_threshold(),
            adjust_interval_ms: default_adjust_interval_ms(),
            min_concurrency: default_min_concurrency(),
        }
    }
}

/// Top-level governor configuration.
///
/// # Example
///
/// ```rust
/// use tollgate_core::{ConcurrencyConfig, GovernorConfig, RateConfig};
///
/// let config = GovernorConfig {
///     concurrency: Some(ConcurrencyConfig::new(8).with_interactive_reserve(2)),
///     rate: Some(RateConfig {
///         requests_per_minute: Some(120),
///         tokens_per_minute: Some(90_000),
///         ..RateConfig::default()
///     }),
///     ..GovernorConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GovernorConfig {
    /// Weighted concurrency limiter; absent means unlimited concurrency.
    #[serde(default)]
    pub concurrency: Option<ConcurrencyConfig>,

    /// Request/token rate limiters; absent means unlimited rate.
    #[serde(default)]
    pub rate: Option<RateConfig>,

    /// Per-actor fairness; ignored unless `concurrency` is configured.
    #[serde(default)]
    pub fairness: Option<FairnessConfig>,

    /// Adaptive concurrency controller; ignored unless `concurrency` is
    /// configured.
    #[serde(default)]
    pub adaptive: Option<AdaptiveConfig>,

    /// Lease time-to-live in milliseconds.
    #[serde(default = "default_lease_ttl_ms")]
    pub lease_ttl_ms: u64,

    /// Reaper sweep interval in milliseconds. Zero disables the background
    /// reaper thread entirely.
    #[serde(default = "default_reaper_interval_ms")]
    pub reaper_interval_ms: u64,

    /// Strict lifecycle handling: double releases and unknown lease ids
    /// become hard errors instead of logged no-ops.
    #[serde(default)]
    pub strict: bool,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            concurrency: None,
            rate: None,
            fairness: None,
            adaptive: None,
            lease_ttl_ms: default_lease_ttl_ms(),
            reaper_interval_ms: default_reaper_interval_ms(),
            strict: false,
        }
    }
}

const fn default_window_ms() -> u64 {
    60_000
}

const fn default_soft_cap_ratio() -> f64 {
    0.6
}

const fn default_starvation_window_ms() -> u64 {
    5_000
}

const fn default_alpha() -> f64 {
    0.2
}

const fn default_target_deny_rate() -> f64 {
    0.05
}

const fn default_latency_threshold() -> f64 {
    1.5
}

const fn default_adjust_interval_ms() -> u64 {
    5_000
}

const fn default_min_concurrency() -> u32 {
    1
}

const fn default_lease_ttl_ms() -> u64 {
    60_000
}

const fn default_reaper_interval_ms() -> u64 {
    5_000
}

impl GovernorConfig {
    /// Checks the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`GovernorError::InvalidConfig`] when a field is out of range
    /// or two fields contradict each other.
    pub fn validate(&self) -> Result<(), GovernorError> {
        if self.lease_ttl_ms == 0 {
            return Err(GovernorError::invalid_config("lease_ttl_ms must be positive"));
        }

        if let Some(concurrency) = &self.concurrency {
            if concurrency.max_in_flight == 0 {
                return Err(GovernorError::invalid_config("max_in_flight must be positive"));
            }
            if concurrency.interactive_reserve >= concurrency.max_in_flight {
                return Err(GovernorError::invalid_config(format!(
                    "interactive_reserve ({}) must be below max_in_flight ({})",
                    concurrency.interactive_reserve, concurrency.max_in_flight
                )));
            }
        }

        if let Some(rate) = &self.rate {
            if rate.window_ms == 0 {
                return Err(GovernorError::invalid_config("rate window_ms must be positive"));
            }
        }

        if let Some(fairness) = &self.fairness {
            if !fairness.soft_cap_ratio.is_finite()
                || fairness.soft_cap_ratio <= 0.0
                || fairness.soft_cap_ratio > 1.0
            {
                return Err(GovernorError::invalid_config(
                    "soft_cap_ratio must be within (0, 1]",
                ));
            }
        }

        if let Some(adaptive) = &self.adaptive {
            if !adaptive.alpha.is_finite() || adaptive.alpha <= 0.0 || adaptive.alpha > 1.0 {
                return Err(GovernorError::invalid_config("alpha must be within (0, 1]"));
            }
            if !adaptive.target_deny_rate.is_finite()
                || adaptive.target_deny_rate <= 0.0
                || adaptive.target_deny_rate >= 1.0
            {
                return Err(GovernorError::invalid_config(
                    "target_deny_rate must be within (0, 1)",
                ));
            }
            if !adaptive.latency_threshold.is_finite() || adaptive.latency_threshold < 1.0 {
                return Err(GovernorError::invalid_config(
                    "latency_threshold must be at least 1.0",
                ));
            }
            if adaptive.adjust_interval_ms == 0 {
                return Err(GovernorError::invalid_config(
                    "adjust_interval_ms must be positive",
                ));
            }
            if adaptive.min_concurrency == 0 {
                return Err(GovernorError::invalid_config(
                    "min_concurrency must be at least 1",
                ));
            }
            if let Some(concurrency) = &self.concurrency {
                if adaptive.min_concurrency > concurrency.max_in_flight {
                    return Err(GovernorError::invalid_config(format!(
                        "min_concurrency ({}) must not exceed max_in_flight ({})",
                        adaptive.min_concurrency, concurrency.max_in_flight
                    )));
                }
            }
        }

        Ok(())
    }
}
