//! Time source injection.
//!
//! All reads of "now" in this crate go through a single `Clock` trait so
//! tests can drive the rolling window and recovery timers deterministically
//! instead of racing real wall-clock time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A source of wall-clock seconds since the Unix epoch.
///
/// Implementations must tolerate being read concurrently from many
/// endpoints' critical sections; they must not block.
pub trait Clock: Send + Sync {
    /// Current time, in whole seconds since the Unix epoch.
    fn now_secs(&self) -> u64;
}

/// The real system clock, read via `chrono`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        chrono::Utc::now().timestamp().max(0) as u64
    }
}

/// A settable clock for deterministic tests.
#[derive(Debug, Clone)]
pub struct MockClock {
    now: Arc<AtomicU64>,
}

impl MockClock {
    pub fn new(start_secs: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_secs)),
        }
    }

    pub fn set(&self, secs: u64) {
        self.now.store(secs, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_secs: u64) {
        self.now.fetch_add(delta_secs, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now_secs(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
