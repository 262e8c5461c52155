//! Rolling-window token budget.
//!
//! Same window structure as the request pool, but entries carry a token
//! amount and admission compares the window *sum* against the cap. Entries
//! are tagged with the lease id that charged them so the governor can
//! reconcile the estimate against actual usage on release; an entry that
//! has already aged out of the window is left alone.

use std::collections::VecDeque;

use crate::decision::clamp_retry_after;

use super::RateDenied;

#[derive(Debug)]
struct TokenEntry {
    timestamp_ms: u64,
    tokens: u64,
    lease_id: Option<String>,
}

#[derive(Debug)]
pub(crate) struct TokenRatePool {
    window_ms: u64,
    max_per_window: u64,
    entries: VecDeque<TokenEntry>,
    window_total: u64,
}

impl TokenRatePool {
    pub(crate) fn new(max_per_window: u32, window_ms: u64) -> Self {
        Self {
            window_ms,
            max_per_window: u64::from(max_per_window),
            entries: VecDeque::new(),
            window_total: 0,
        }
    }

    fn prune(&mut self, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        while let Some(entry) = self.entries.pop_front() {
            if entry.timestamp_ms > cutoff {
                self.entries.push_front(entry);
                break;
            }
            self.window_total = self.window_total.saturating_sub(entry.tokens);
        }
    }

    /// Checks whether `needed` more tokens fit in the window.
    ///
    /// On denial the retry hint is the age-out time of the oldest prefix of
    /// entries whose removal frees enough room; a request larger than the
    /// cap itself gets the whole window as its (clamped) hint.
    pub(crate) fn probe(&mut self, now_ms: u64, needed: u64) -> Result<(), RateDenied> {
        self.prune(now_ms);

        if self.window_total + needed <= self.max_per_window {
            return Ok(());
        }

        let surplus = self.window_total + needed - self.max_per_window;
        let mut freed = 0u64;
        let mut retry_raw = self.window_ms;
        for entry in &self.entries {
            freed += entry.tokens;
            if freed >= surplus {
                retry_raw = (entry.timestamp_ms + self.window_ms).saturating_sub(now_ms);
                break;
            }
        }

        Err(RateDenied {
            retry_after_ms: clamp_retry_after(retry_raw),
            current: self.window_total,
            limit: self.max_per_window,
        })
    }

    /// Commits an admitted charge into the window.
    pub(crate) fn record(&mut self, now_ms: u64, tokens: u64, lease_id: Option<String>) {
        self.window_total += tokens;
        self.entries.push_back(TokenEntry {
            timestamp_ms: now_ms,
            tokens,
            lease_id,
        });
    }

    /// Replaces the estimated charge of `lease_id` with the actual amount.
    ///
    /// Actual usage may run higher or lower than the estimate; no clamp is
    /// applied. A lease whose entry already aged out is silently ignored.
    pub(crate) fn reconcile(&mut self, lease_id: &str, actual_tokens: u64) {
        // Recent charges live at the tail; search from there.
        let Some(entry) = self
            .entries
            .iter_mut()
            .rev()
            .find(|entry| entry.lease_id.as_deref() == Some(lease_id))
        else {
            return;
        };

        let estimated = entry.tokens;
        entry.tokens = actual_tokens;
        self.window_total = self
            .window_total
            .saturating_sub(estimated)
            .saturating_add(actual_tokens);

        tracing::debug!(
            lease_id,
            estimated,
            actual = actual_tokens,
            "reconciled token charge"
        );
    }

    /// Returns the summed tokens currently inside the window.
    pub(crate) fn current(&mut self, now_ms: u64) -> u64 {
        self.prune(now_ms);
        self.window_total
    }

    pub(crate) const fn limit(&self) -> u64 {
        self.max_per_window
    }

    #[cfg(test)]
    pub(crate) fn entry_count_for(&self, lease_id: &str) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.lease_id.as_deref() == Some(lease_id))
            .count()
    }
}
