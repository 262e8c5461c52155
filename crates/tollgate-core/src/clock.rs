//! Injected monotonic time source.
//!
//! Every component reads time through [`MonotonicClock`] rather than calling
//! into the OS directly. Production code installs [`SystemClock`]; tests
//! install a [`ManualClock`] and advance it explicitly, which makes the
//! rolling windows and TTL behavior fully deterministic.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A monotonic millisecond clock.
///
/// Implementors must be thread-safe; the governor reads the clock from the
/// caller's thread and from the reaper thread. Values must never decrease.
pub trait MonotonicClock: Send + Sync {
    /// Returns the current monotonic time in milliseconds.
    ///
    /// The origin is arbitrary (process start for [`SystemClock`], zero for
    /// [`ManualClock`]); only differences between readings are meaningful.
    fn now_ms(&self) -> u64;
}

/// Production clock backed by [`Instant`], anchored at construction.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Creates a clock whose zero point is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for SystemClock {
    #[allow(clippy::cast_possible_truncation)] // u64 ms covers ~584 million years
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Manually advanced clock for tests.
///
/// Clones share the same underlying counter, so a test can hand one handle to
/// the governor and keep another to advance time.
///
/// # Example
///
/// ```rust
/// use tollgate_core::{ManualClock, MonotonicClock};
///
/// let clock = ManualClock::new(0);
/// let shared = clock.clone();
/// clock.advance(250);
/// assert_eq!(shared.now_ms(), 250);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ms: Arc<AtomicU64>,
}

impl ManualClock {
    /// Creates a manual clock starting at `start_ms`.
    #[must_use]
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    /// Moves the clock forward by `delta_ms`.
    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Jumps the clock to an absolute reading.
    ///
    /// Callers are responsible for keeping the value monotonic; the governor
    /// assumes time never runs backwards.
    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl MonotonicClock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
