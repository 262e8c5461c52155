//! Admission limiter pools.
//!
//! Each pool answers one orthogonal question about a request: does it fit
//! under the weighted concurrency ceiling, under the request-rate window,
//! and under the token-rate window. The governor composes them in a fixed
//! order and rolls back the concurrency reservation when a later pool
//! refuses, so a denial never consumes budget anywhere.

mod concurrency;
mod request_rate;
mod token_rate;

pub(crate) use concurrency::ConcurrencyPool;
pub(crate) use request_rate::RequestRatePool;
pub(crate) use token_rate::TokenRatePool;

/// Denial detail shared by the rolling-window pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RateDenied {
    /// Clamped retry hint in milliseconds.
    pub retry_after_ms: u64,
    /// Consumed portion of the window at probe time.
    pub current: u64,
    /// Window capacity.
    pub limit: u64,
}
