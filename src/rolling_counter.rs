//! `RollingCounter`, a fixed-length sliding-window integer counter whose
//! position advances lazily based on wall-clock time, with no background
//! timer.
//!
//! A rolling counter behaves like a FIFO queue of fixed length: its value is
//! the sum of the queue, and the rightmost element rolls into an older
//! position once the clock passes one `granularity`. Every read or write
//! first aligns the queue with "now" by shifting elements off the left and
//! filling zeros on the right, so a long idle gap zeroes the whole window.

use crate::clock::Clock;

/// A sliding-window counter over `window_size` slots of `granularity`
/// seconds each.
pub struct RollingCounter {
    window_size: usize,
    granularity_secs: u64,
    slots: Vec<i64>,
    clock_secs: u64,
}

impl RollingCounter {
    /// Create a new, zeroed counter aligned to `now`.
    ///
    /// Panics if `window_size` is zero. Callers are expected to validate
    /// configuration (see [`crate::config::BreakerConfig::validate`])
    /// before constructing counters.
    pub fn new(window_size: usize, granularity_secs: u64, now_secs: u64) -> Self {
        assert!(window_size > 0, "rolling counter window_size must be positive");
        assert!(granularity_secs > 0, "rolling counter granularity must be positive");
        Self {
            window_size,
            granularity_secs,
            slots: vec![0; window_size],
            clock_secs: now_secs,
        }
    }

    /// Increment the current (rightmost) slot by `v`, aligning first.
    pub fn increment(&mut self, v: i64, clock: &dyn Clock) {
        self.align(clock.now_secs());
        *self.slots.last_mut().expect("window_size > 0") += v;
    }

    /// Current value: the sum of all slots, after aligning.
    pub fn value(&mut self, clock: &dyn Clock) -> i64 {
        self.align(clock.now_secs());
        self.slots.iter().sum()
    }

    /// Zero all slots. Does not touch the alignment clock: the next
    /// operation still computes its shift from the previous alignment.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = 0);
    }

    /// Lazily advance the window to `now`: compute the number of whole
    /// granularities elapsed since the last alignment, shift that many zero
    /// slots in from the right (or clear entirely if the gap covers the
    /// whole window), then record `now` as the new alignment point.
    fn align(&mut self, now_secs: u64) {
        let delta = now_secs as i128 - self.clock_secs as i128;
        let shift = delta.div_euclid(self.granularity_secs as i128);
        if shift <= 0 {
            // Non-monotonic clock readings are treated defensively as no
            // shift, same as "no time passed".
            return;
        }
        if shift as u128 >= self.window_size as u128 {
            self.clear();
        } else {
            let shift = shift as usize;
            self.slots.drain(0..shift);
            self.slots.resize(self.window_size, 0);
        }
        self.clock_secs = now_secs;
    }
}
