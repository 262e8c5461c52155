//! Rolling-window request counter.
//!
//! Admission is two-phase: `probe` only answers whether the window has room,
//! and the governor calls `record` once every other limiter has also agreed.
//! A denial from a later limiter therefore never consumes rate budget.
//!
//! Timestamps live in a `VecDeque`; pruning pops from the front, so the
//! steady-state cost is amortized O(1) per operation regardless of window
//! length.

use std::collections::VecDeque;

use crate::decision::clamp_retry_after;

use super::RateDenied;

#[derive(Debug)]
pub(crate) struct RequestRatePool {
    window_ms: u64,
    max_per_window: u64,
    timestamps: VecDeque<u64>,
}

impl RequestRatePool {
    pub(crate) fn new(max_per_window: u32, window_ms: u64) -> Self {
        Self {
            window_ms,
            max_per_window: u64::from(max_per_window),
            timestamps: VecDeque::new(),
        }
    }

    /// Drops entries that have aged out of the window ending at `now_ms`.
    fn prune(&mut self, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        while self.timestamps.front().is_some_and(|&ts| ts <= cutoff) {
            self.timestamps.pop_front();
        }
    }

    /// Checks whether one more request fits in the window.
    ///
    /// Does **not** record the request; see the module docs for the
    /// two-phase contract.
    pub(crate) fn probe(&mut self, now_ms: u64) -> Result<(), RateDenied> {
        self.prune(now_ms);

        let current = self.timestamps.len() as u64;
        if current < self.max_per_window {
            return Ok(());
        }

        let retry_raw = self
            .timestamps
            .front()
            .map_or(self.window_ms, |&oldest| {
                (oldest + self.window_ms).saturating_sub(now_ms)
            });

        Err(RateDenied {
            retry_after_ms: clamp_retry_after(retry_raw),
            current,
            limit: self.max_per_window,
        })
    }

    /// Commits an admitted request into the window.
    pub(crate) fn record(&mut self, now_ms: u64) {
        self.timestamps.push_back(now_ms);
    }

    /// Returns the number of requests currently inside the window.
    pub(crate) fn current(&mut self, now_ms: u64) -> u64 {
        self.prune(now_ms);
        self.timestamps.len() as u64
    }

    pub(crate) const fn limit(&self) -> u64 {
        self.max_per_window
    }
}
