//! Single-flight guard for producer calls.
//!
//! A synchronizer may be asked to fetch from several directions at once:
//! a timer tick, a visibility transition, and an explicit `refresh_now`.
//! The guard serializes them by construction — whoever holds the permit
//! is the one outstanding fetch, everyone else skips and relies on the
//! next tick. No queueing, no replay.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Hands out at most one [`FetchPermit`] at a time.
#[derive(Debug, Clone, Default)]
pub struct FetchGuard {
    busy: Arc<AtomicBool>,
}

impl FetchGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the in-flight slot. Returns `None` while another permit is
    /// alive; the caller must then skip its fetch entirely.
    pub fn begin(&self) -> Option<FetchPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FetchPermit {
                busy: Arc::clone(&self.busy),
            })
    }

    /// Whether a fetch is currently outstanding.
    pub fn in_flight(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// RAII token for the single in-flight fetch. Dropping it frees the slot.
#[derive(Debug)]
pub struct FetchPermit {
    busy: Arc<AtomicBool>,
}

impl Drop for FetchPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
