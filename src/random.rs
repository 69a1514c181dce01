//! Randomness injection for the gradual-release admission draw.
//!
//! `HealthTester`'s RECOVER state admits probes with probability
//! `elapsed / max_recovery`; the draw must be injectable so that test suites
//! can force both branches deterministically.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// A source of uniform draws in `[0, 1)`.
pub trait RandomSource: Send + Sync {
    fn draw(&self) -> f64;
}

/// The default source, backed by `rand`'s thread-local generator.
///
/// Cosmetic/probabilistic use only (gradual admission during recovery), not
/// a cryptographic operation, so the non-CSPRNG thread_rng is the right
/// tool here.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn draw(&self) -> f64 {
        use rand::Rng;
        rand::thread_rng().gen_range(0.0..1.0)
    }
}

/// A scripted sequence of draws for deterministic tests. Repeats the last
/// value once exhausted so tests don't need to size the script exactly.
#[derive(Debug)]
pub struct DeterministicRandom {
    script: Vec<f64>,
    cursor: AtomicUsize,
    fallback: Mutex<f64>,
}

impl DeterministicRandom {
    pub fn new(script: Vec<f64>) -> Self {
        let fallback = *script.last().unwrap_or(&0.0);
        Self {
            script,
            cursor: AtomicUsize::new(0),
            fallback: Mutex::new(fallback),
        }
    }

    /// Always draws `value`.
    pub fn fixed(value: f64) -> Self {
        Self::new(vec![value])
    }
}

impl RandomSource for DeterministicRandom {
    fn draw(&self) -> f64 {
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst);
        match self.script.get(idx) {
            Some(v) => *v,
            None => *self.fallback.lock().unwrap(),
        }
    }
}
