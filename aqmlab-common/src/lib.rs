//! Shared async primitives for the aqmlab crates: the single-use readiness
//! rendezvous used when starting monitoring processes, and the one-shot
//! watchdog deadline that bounds an experiment iteration.

pub mod ready;
pub mod watchdog;

pub use ready::{ready_signal, ReadyNotifier, ReadySignal};
pub use watchdog::{Watchdog, WatchdogExpired};

use std::time::SystemTime;

/// Returns the current UNIX timestamp in seconds.
#[inline]
pub fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
