//! Background TTL reaper.
//!
//! A named thread wakes every `reaper_interval_ms`, upgrades its weak
//! reference to the governor internals, and sweeps expired leases under the
//! same lock the public operations use. The thread holds only a `Weak`, so
//! dropping the last `Governor` handle ends it; `dispose` ends it
//! deterministically by dropping the shutdown sender, which wakes
//! `recv_timeout` immediately.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::GovernorInner;

pub(crate) struct ReaperHandle {
    shutdown: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl ReaperHandle {
    pub(crate) fn spawn(inner: &Arc<GovernorInner>, interval_ms: u64) -> Self {
        let weak = Arc::downgrade(inner);
        let (shutdown, wakeups) = mpsc::channel();
        let join = thread::Builder::new()
            .name("tollgate-reaper".to_string())
            .spawn(move || run(&weak, &wakeups, interval_ms))
            .expect("spawning the reaper thread");
        Self { shutdown, join }
    }

    /// Stops the thread and waits for it to exit.
    pub(crate) fn stop(self) {
        drop(self.shutdown);
        if self.join.join().is_err() {
            tracing::warn!("reaper thread panicked during shutdown");
        }
    }
}

fn run(inner: &Weak<GovernorInner>, wakeups: &mpsc::Receiver<()>, interval_ms: u64) {
    let interval = Duration::from_millis(interval_ms);
    loop {
        match wakeups.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                inner.sweep_expired();
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}
