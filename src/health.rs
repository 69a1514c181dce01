//! `HealthTester`, the per-endpoint admission gate.
//!
//! Consulted once per call, before dispatch: reads the current counter
//! ratios and the endpoint's lock state, decides admit or deny, and drives
//! the endpoint through `UNLOCKED -> LOCKED -> RECOVER -> UNLOCKED`.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::BreakerConfig;
use crate::metrics::{endpoint_key, sys_exc_key, timeout_key, unknown_exc_key, MetricsStore};
use crate::random::RandomSource;

/// The three admission states an endpoint can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LockStatus {
    /// Normal operation: calls are admitted as long as the endpoint stays healthy.
    Unlocked,
    /// Calls are denied outright; waiting out the minimum cooling period.
    Locked,
    /// Gradually re-admitting calls based on the most recent probe's outcome.
    Recover,
}

/// Which destination transition fired during a `test` call, if any.
///
/// `RECOVER` is intentionally not an observable destination: `on_lock` and
/// `on_unlock` fire only for `LOCKED`/`UNLOCKED` destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTransition {
    ToLocked,
    ToUnlocked,
}

#[derive(Debug, Clone, Copy)]
struct EndpointLock {
    locked_at: u64,
    status: LockStatus,
}

impl EndpointLock {
    fn new() -> Self {
        Self {
            locked_at: 0,
            status: LockStatus::Unlocked,
        }
    }
}

/// A read-only snapshot of an endpoint's lock state, for introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LockSnapshot {
    pub locked_at: u64,
    pub status: LockStatus,
}

/// Immutable record of one `test` call, handed to every observer.
#[derive(Debug, Clone)]
pub struct TestContext {
    pub service: String,
    pub endpoint: String,
    /// The admission decision: `true` admits, `false` denies.
    pub admitted: bool,
    /// Whether [`HealthTester::is_healthy`] evaluated true at the start of this call.
    pub health_ok_now: bool,
    pub lock: LockSnapshot,
    pub lock_changed: Option<LockTransition>,
    pub start_secs: u64,
    pub end_secs: u64,
}

/// A registered observer callback.
pub type Observer = Arc<dyn Fn(&TestContext) + Send + Sync>;

#[derive(Default, Clone)]
struct Observers {
    on_lock: Vec<Observer>,
    on_unlock: Vec<Observer>,
    on_tested: Vec<Observer>,
    on_tested_ok: Vec<Observer>,
    on_tested_bad: Vec<Observer>,
}

fn fire(list: &[Observer], ctx: &TestContext) {
    for obs in list {
        let obs = Arc::clone(obs);
        let ctx2 = ctx.clone();
        // An observer must never be allowed to unwind through `test`; the
        // lock is already committed by the time any observer runs.
        if panic::catch_unwind(AssertUnwindSafe(move || obs(&ctx2))).is_err() {
            warn!(
                service = %ctx.service,
                endpoint = %ctx.endpoint,
                "circuit breaker observer panicked; ignoring"
            );
        }
    }
}

/// The per-endpoint admission gate.
pub struct HealthTester {
    metrics: Arc<MetricsStore>,
    locks: RwLock<HashMap<String, Arc<Mutex<EndpointLock>>>>,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    observers: Observers,
}

impl HealthTester {
    pub fn new(metrics: Arc<MetricsStore>, clock: Arc<dyn Clock>, random: Arc<dyn RandomSource>) -> Self {
        let config = *metrics.config();
        Self {
            metrics,
            locks: RwLock::new(HashMap::new()),
            config,
            clock,
            random,
            observers: Observers::default(),
        }
    }

    /// Register a callback fired when an endpoint transitions into `LOCKED`.
    pub fn on_lock(&mut self, f: impl Fn(&TestContext) + Send + Sync + 'static) {
        self.observers.on_lock.push(Arc::new(f));
    }

    /// Register a callback fired when an endpoint transitions into `UNLOCKED`.
    pub fn on_unlock(&mut self, f: impl Fn(&TestContext) + Send + Sync + 'static) {
        self.observers.on_unlock.push(Arc::new(f));
    }

    /// Register a callback fired on every `test` call.
    pub fn on_tested(&mut self, f: impl Fn(&TestContext) + Send + Sync + 'static) {
        self.observers.on_tested.push(Arc::new(f));
    }

    /// Register a callback fired when `test` admits.
    pub fn on_tested_ok(&mut self, f: impl Fn(&TestContext) + Send + Sync + 'static) {
        self.observers.on_tested_ok.push(Arc::new(f));
    }

    /// Register a callback fired when `test` denies.
    pub fn on_tested_bad(&mut self, f: impl Fn(&TestContext) + Send + Sync + 'static) {
        self.observers.on_tested_bad.push(Arc::new(f));
    }

    /// `is_healthy(S,E)`: true iff the endpoint has too few requests for the
    /// ratio check to be meaningful, or all three error ratios are strictly
    /// under their thresholds.
    pub fn is_healthy(&self, service: &str, endpoint: &str) -> bool {
        let key = endpoint_key(service, endpoint);
        let requests = self.metrics.get(&key, 0);
        if requests <= self.config.health_threshold_request as i64 {
            return true;
        }
        let timeouts = self.metrics.get(&timeout_key(&key), 0);
        let sys_excs = self.metrics.get(&sys_exc_key(&key), 0);
        let unkwn_excs = self.metrics.get(&unknown_exc_key(&key), 0);
        let requests = requests as f64;
        (timeouts as f64 / requests) < self.config.health_threshold_timeout
            && (sys_excs as f64 / requests) < self.config.health_threshold_sys_exc
            && (unkwn_excs as f64 / requests) < self.config.health_threshold_unkwn_exc
    }

    /// Read-only snapshot of an endpoint's lock state, `None` if it has
    /// never been tested.
    pub fn lock_status(&self, service: &str, endpoint: &str) -> Option<LockSnapshot> {
        let key = endpoint_key(service, endpoint);
        let locks = self.locks.read().expect("locks map poisoned");
        locks.get(&key).map(|lock| {
            let lock = lock.lock().expect("endpoint lock mutex poisoned");
            LockSnapshot {
                locked_at: lock.locked_at,
                status: lock.status,
            }
        })
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<EndpointLock>> {
        if let Some(lock) = self.locks.read().expect("locks map poisoned").get(key) {
            return Arc::clone(lock);
        }
        let mut locks = self.locks.write().expect("locks map poisoned");
        Arc::clone(
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(EndpointLock::new()))),
        )
    }

    /// Decide whether to admit a call to `(service, endpoint)` and advance
    /// its lock state machine. Synchronous, non-blocking, bounded-time.
    pub fn test(&self, service: &str, endpoint: &str) -> bool {
        let key = endpoint_key(service, endpoint);
        let start_secs = self.clock.now_secs();

        // `is_healthy` is computed once up front, outside the per-endpoint
        // critical section; it only reads counters, which have their own
        // per-key locking.
        let health_ok_now = self.is_healthy(service, endpoint);

        let lock = self.lock_for(&key);
        let mut guard = lock.lock().expect("endpoint lock mutex poisoned");

        let locked_at = guard.locked_at;
        let locked_status = guard.status;
        let now = self.clock.now_secs();

        let (admitted, lock_changed) = match locked_status {
            LockStatus::Unlocked => {
                if health_ok_now {
                    (true, None)
                } else {
                    guard.locked_at = now;
                    guard.status = LockStatus::Locked;
                    (false, Some(LockTransition::ToLocked))
                }
            }
            LockStatus::Locked => {
                if !health_ok_now {
                    (false, None)
                } else {
                    let elapsed = now.saturating_sub(locked_at);
                    if elapsed < self.config.health_min_recovery_time {
                        (false, None)
                    } else {
                        // Enter recovery; this admitted call is the probe.
                        guard.status = LockStatus::Recover;
                        (true, None)
                    }
                }
            }
            LockStatus::Recover => {
                let latest_ok = self.metrics.latest_state(service, endpoint);
                if !latest_ok {
                    guard.locked_at = now;
                    guard.status = LockStatus::Locked;
                    (false, Some(LockTransition::ToLocked))
                } else {
                    let elapsed = now.saturating_sub(locked_at);
                    if elapsed >= self.config.health_max_recovery_time {
                        guard.locked_at = 0;
                        guard.status = LockStatus::Unlocked;
                        (true, Some(LockTransition::ToUnlocked))
                    } else {
                        let admit_probability =
                            elapsed as f64 / self.config.health_max_recovery_time as f64;
                        (self.random.draw() < admit_probability, None)
                    }
                }
            }
        };

        let snapshot = LockSnapshot {
            locked_at: guard.locked_at,
            status: guard.status,
        };
        drop(guard);

        let end_secs = self.clock.now_secs();
        let ctx = TestContext {
            service: service.to_string(),
            endpoint: endpoint.to_string(),
            admitted,
            health_ok_now,
            lock: snapshot,
            lock_changed,
            start_secs,
            end_secs,
        };

        match lock_changed {
            Some(LockTransition::ToLocked) => {
                warn!(service, endpoint, "circuit breaker locked");
                fire(&self.observers.on_lock, &ctx);
            }
            Some(LockTransition::ToUnlocked) => {
                info!(service, endpoint, "circuit breaker unlocked");
                fire(&self.observers.on_unlock, &ctx);
            }
            None => {}
        }

        debug!(service, endpoint, admitted, "circuit breaker tested");
        fire(&self.observers.on_tested, &ctx);
        if admitted {
            fire(&self.observers.on_tested_ok, &ctx);
        } else {
            fire(&self.observers.on_tested_bad, &ctx);
        }

        admitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::random::DeterministicRandom;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tester_with(
        threshold_request: u64,
        min_recovery: u64,
        max_recovery: u64,
        draw: f64,
    ) -> (HealthTester, Arc<MetricsStore>, MockClock) {
        let clock = MockClock::new(1_000_000);
        let cfg = BreakerConfig {
            health_threshold_request: threshold_request,
            health_min_recovery_time: min_recovery,
            health_max_recovery_time: max_recovery,
            ..BreakerConfig::default()
        };
        let metrics = Arc::new(MetricsStore::new(cfg, Arc::new(clock.clone())));
        let tester = HealthTester::new(
            Arc::clone(&metrics),
            Arc::new(clock.clone()),
            Arc::new(DeterministicRandom::fixed(draw)),
        );
        (tester, metrics, clock)
    }

    // Scenario 1: all-OK, stays UNLOCKED, admits.
    #[test]
    fn scenario_all_ok_stays_unlocked() {
        let (tester, metrics, _clock) = tester_with(9, 1, 1, 0.0);
        for _ in 0..10 {
            metrics.record_called("hello", "world");
            metrics.record_ok("hello", "world");
        }
        assert!(tester.test("hello", "world"));
        assert_eq!(
            tester.lock_status("hello", "world").unwrap().status,
            LockStatus::Unlocked
        );
    }

    // Scenario 2: timeout-triggered lock.
    #[test]
    fn scenario_timeout_triggers_lock() {
        let (tester, metrics, _clock) = tester_with(9, 1, 1, 0.0);
        for _ in 0..10 {
            metrics.record_called("hello", "world");
            metrics.record_ok("hello", "world");
        }
        for _ in 0..6 {
            metrics.record_timeout("hello", "world");
        }
        assert!(!tester.is_healthy("hello", "world"));
        let locked_count = Arc::new(AtomicUsize::new(0));
        let mut tester = tester;
        {
            let locked_count = Arc::clone(&locked_count);
            tester.on_lock(move |_ctx| {
                locked_count.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(!tester.test("hello", "world"));
        assert_eq!(
            tester.lock_status("hello", "world").unwrap().status,
            LockStatus::Locked
        );
        assert_eq!(locked_count.load(Ordering::SeqCst), 1);
    }

    // Scenario 3: min-recovery hold.
    #[test]
    fn scenario_min_recovery_hold() {
        let (tester, metrics, clock) = tester_with(9, 1, 1, 0.0);
        let lock = tester.lock_for(&endpoint_key("hello", "world"));
        {
            let mut guard = lock.lock().unwrap();
            guard.status = LockStatus::Locked;
            guard.locked_at = clock.now_secs();
        }
        for _ in 0..10 {
            metrics.record_called("hello", "world");
            metrics.record_ok("hello", "world");
        }
        assert!(!tester.test("hello", "world"));
        assert_eq!(
            tester.lock_status("hello", "world").unwrap().status,
            LockStatus::Locked
        );
    }

    // Scenario 4: LOCKED -> RECOVER after min_recovery elapses.
    #[test]
    fn scenario_lock_to_recover() {
        let (tester, metrics, clock) = tester_with(9, 1, 1, 0.0);
        let lock = tester.lock_for(&endpoint_key("hello", "world"));
        {
            let mut guard = lock.lock().unwrap();
            guard.status = LockStatus::Locked;
            guard.locked_at = clock.now_secs();
        }
        for _ in 0..10 {
            metrics.record_called("hello", "world");
            metrics.record_ok("hello", "world");
        }
        clock.advance(1); // min_recovery elapses
        let lock_events = Arc::new(AtomicUsize::new(0));
        let unlock_events = Arc::new(AtomicUsize::new(0));
        let mut tester = tester;
        {
            let lock_events = Arc::clone(&lock_events);
            tester.on_lock(move |_| {
                lock_events.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let unlock_events = Arc::clone(&unlock_events);
            tester.on_unlock(move |_| {
                unlock_events.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(tester.test("hello", "world"));
        assert_eq!(
            tester.lock_status("hello", "world").unwrap().status,
            LockStatus::Recover
        );
        assert_eq!(lock_events.load(Ordering::SeqCst), 0);
        assert_eq!(unlock_events.load(Ordering::SeqCst), 0);
    }

    // Scenario 5: RECOVER -> LOCKED on bad probe.
    #[test]
    fn scenario_recover_to_lock_on_bad_probe() {
        let (tester, metrics, clock) = tester_with(9, 1, 1, 0.0);
        let lock = tester.lock_for(&endpoint_key("hello", "world"));
        {
            let mut guard = lock.lock().unwrap();
            guard.status = LockStatus::Recover;
            guard.locked_at = clock.now_secs();
        }
        for _ in 0..10 {
            metrics.record_called("hello", "world");
        }
        metrics.record_sys_exc("hello", "world"); // latest_state = false
        let lock_events = Arc::new(AtomicUsize::new(0));
        let mut tester = tester;
        {
            let lock_events = Arc::clone(&lock_events);
            tester.on_lock(move |_| {
                lock_events.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(!tester.test("hello", "world"));
        assert_eq!(
            tester.lock_status("hello", "world").unwrap().status,
            LockStatus::Locked
        );
        assert_eq!(lock_events.load(Ordering::SeqCst), 1);
    }

    // Scenario 6: RECOVER -> UNLOCKED after max_recovery.
    #[test]
    fn scenario_recover_to_unlock_after_max_recovery() {
        let (tester, metrics, clock) = tester_with(9, 1, 1, 0.0);
        let lock = tester.lock_for(&endpoint_key("hello", "world"));
        {
            let mut guard = lock.lock().unwrap();
            guard.status = LockStatus::Recover;
            guard.locked_at = clock.now_secs();
        }
        for _ in 0..10 {
            metrics.record_called("hello", "world");
        }
        metrics.record_ok("hello", "world"); // latest_state = true
        clock.advance(1); // max_recovery elapses
        let unlock_events = Arc::new(AtomicUsize::new(0));
        let mut tester = tester;
        {
            let unlock_events = Arc::clone(&unlock_events);
            tester.on_unlock(move |_| {
                unlock_events.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(tester.test("hello", "world"));
        assert_eq!(
            tester.lock_status("hello", "world").unwrap().status,
            LockStatus::Unlocked
        );
        assert_eq!(unlock_events.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn gradual_release_uses_injected_random_draw() {
        let (tester, metrics, clock) = tester_with(9, 1, 100, 0.5);
        let lock = tester.lock_for(&endpoint_key("hello", "world"));
        {
            let mut guard = lock.lock().unwrap();
            guard.status = LockStatus::Recover;
            guard.locked_at = clock.now_secs();
        }
        for _ in 0..10 {
            metrics.record_called("hello", "world");
        }
        metrics.record_ok("hello", "world");
        clock.advance(60); // elapsed/max = 0.6 > draw(0.5) -> admit
        assert!(tester.test("hello", "world"));
        assert_eq!(
            tester.lock_status("hello", "world").unwrap().status,
            LockStatus::Recover
        );
    }

    #[test]
    fn gradual_release_denies_when_draw_exceeds_probability() {
        let (tester, metrics, clock) = tester_with(9, 1, 100, 0.9);
        let lock = tester.lock_for(&endpoint_key("hello", "world"));
        {
            let mut guard = lock.lock().unwrap();
            guard.status = LockStatus::Recover;
            guard.locked_at = clock.now_secs();
        }
        for _ in 0..10 {
            metrics.record_called("hello", "world");
        }
        metrics.record_ok("hello", "world");
        clock.advance(10); // elapsed/max = 0.1 < draw(0.9) -> deny
        assert!(!tester.test("hello", "world"));
        assert_eq!(
            tester.lock_status("hello", "world").unwrap().status,
            LockStatus::Recover
        );
    }

    #[test]
    fn boundary_exactly_threshold_requests_is_healthy_regardless_of_errors() {
        let (tester, metrics, _clock) = tester_with(9, 1, 1, 0.0);
        for _ in 0..9 {
            metrics.record_called("hello", "world");
        }
        for _ in 0..9 {
            metrics.record_sys_exc("hello", "world");
        }
        assert!(tester.is_healthy("hello", "world"));
    }

    #[test]
    fn boundary_one_over_threshold_with_ratio_at_threshold_is_unhealthy() {
        let (tester, metrics, _clock) = tester_with(9, 1, 1, 0.0);
        let requests = 10;
        for _ in 0..requests {
            metrics.record_called("hello", "world");
        }
        for _ in 0..5 {
            metrics.record_sys_exc("hello", "world");
        }
        // 5/10 == 0.5 == threshold; strict "<" means NOT healthy.
        assert!(!tester.is_healthy("hello", "world"));
    }

    #[test]
    fn observer_panics_are_isolated_from_state() {
        let (tester, metrics, _clock) = tester_with(9, 1, 1, 0.0);
        for _ in 0..10 {
            metrics.record_called("hello", "world");
        }
        for _ in 0..6 {
            metrics.record_timeout("hello", "world");
        }
        let mut tester = tester;
        tester.on_lock(|_ctx| panic!("boom"));
        let prev_hook = panic::take_hook();
        panic::set_hook(Box::new(|_| {}));
        let admitted = tester.test("hello", "world");
        panic::set_hook(prev_hook);
        assert!(!admitted);
        assert_eq!(
            tester.lock_status("hello", "world").unwrap().status,
            LockStatus::Locked
        );
    }
}
