//! `MetricsStore`, per-endpoint rolling counters plus a latest-call-outcome
//! map, the substrate [`crate::health::HealthTester`] reads before every
//! admission decision.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::clock::Clock;
use crate::config::BreakerConfig;
use crate::rolling_counter::RollingCounter;

/// Canonical counter key for a `(service, endpoint)` pair: `"service.endpoint"`.
pub fn endpoint_key(service: &str, endpoint: &str) -> String {
    format!("{service}.{endpoint}")
}

pub(crate) fn timeout_key(endpoint_key: &str) -> String {
    format!("{endpoint_key}.timeout")
}

pub(crate) fn sys_exc_key(endpoint_key: &str) -> String {
    format!("{endpoint_key}.sys_exc")
}

pub(crate) fn unknown_exc_key(endpoint_key: &str) -> String {
    format!("{endpoint_key}.unkwn_exc")
}

/// Aggregates per-endpoint counters and the outcome of the most recent call
/// per endpoint.
///
/// Each distinct counter key gets its own `Mutex`, created lazily on first
/// write with the configured window/granularity. `latest_state` is a
/// separate map guarded by its own lock since it's written far more often
/// than counters are read together as a set.
pub struct MetricsStore {
    config: BreakerConfig,
    counters: RwLock<HashMap<String, Arc<Mutex<RollingCounter>>>>,
    latest_state: RwLock<HashMap<String, bool>>,
    clock: Arc<dyn Clock>,
}

impl MetricsStore {
    pub fn new(config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            counters: RwLock::new(HashMap::new()),
            latest_state: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Increment `key` by `v`, creating the counter on first use.
    pub fn incr(&self, key: &str, v: i64) {
        let counter = self.counter_for(key);
        let mut counter = counter.lock().expect("rolling counter mutex poisoned");
        counter.increment(v, self.clock.as_ref());
    }

    /// Current value of `key`, or `default` if the counter has never been
    /// written.
    pub fn get(&self, key: &str, default: i64) -> i64 {
        let counters = self.counters.read().expect("counters map poisoned");
        match counters.get(key) {
            Some(counter) => {
                let mut counter = counter.lock().expect("rolling counter mutex poisoned");
                counter.value(self.clock.as_ref())
            }
            None => default,
        }
    }

    fn counter_for(&self, key: &str) -> Arc<Mutex<RollingCounter>> {
        if let Some(counter) = self.counters.read().expect("counters map poisoned").get(key) {
            return Arc::clone(counter);
        }
        let mut counters = self.counters.write().expect("counters map poisoned");
        Arc::clone(counters.entry(key.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(RollingCounter::new(
                self.config.metrics_rollingsize as usize,
                self.config.metrics_granularity,
                self.clock.now_secs(),
            )))
        }))
    }

    /// A call was dispatched: increment the request counter.
    pub fn record_called(&self, service: &str, endpoint: &str) {
        self.incr(&endpoint_key(service, endpoint), 1);
    }

    /// The call completed successfully.
    pub fn record_ok(&self, service: &str, endpoint: &str) {
        self.set_latest_state(service, endpoint, true);
    }

    /// The call completed with an expected, application-level error; this
    /// is a success signal for recovery purposes even though it is not a
    /// plain `ok`.
    pub fn record_user_exc(&self, service: &str, endpoint: &str) {
        self.set_latest_state(service, endpoint, true);
    }

    /// The call timed out. Influences the ratio-based health check but does
    /// not update `latest_state`: a pure-timeout probe during RECOVER leaves
    /// the prior outcome in effect.
    pub fn record_timeout(&self, service: &str, endpoint: &str) {
        self.incr(&timeout_key(&endpoint_key(service, endpoint)), 1);
    }

    /// The call failed with a system error.
    pub fn record_sys_exc(&self, service: &str, endpoint: &str) {
        self.incr(&sys_exc_key(&endpoint_key(service, endpoint)), 1);
        self.set_latest_state(service, endpoint, false);
    }

    /// The call failed with an unclassified error.
    pub fn record_unknown_exc(&self, service: &str, endpoint: &str) {
        self.incr(&unknown_exc_key(&endpoint_key(service, endpoint)), 1);
        self.set_latest_state(service, endpoint, false);
    }

    fn set_latest_state(&self, service: &str, endpoint: &str, ok: bool) {
        let key = endpoint_key(service, endpoint);
        self.latest_state
            .write()
            .expect("latest_state map poisoned")
            .insert(key, ok);
    }

    /// The most recent definitive success/failure recorded for this
    /// endpoint. Absent means "no recent observation" and is treated as
    /// `false` by [`crate::health::HealthTester`]'s recovery decision.
    pub fn latest_state(&self, service: &str, endpoint: &str) -> bool {
        let key = endpoint_key(service, endpoint);
        *self
            .latest_state
            .read()
            .expect("latest_state map poisoned")
            .get(&key)
            .unwrap_or(&false)
    }

    /// Read-only snapshot of every counter's current value, keyed by
    /// counter key. Intended for monitoring/debugging tooling built on top
    /// of this substrate.
    pub fn snapshot_counters(&self) -> HashMap<String, i64> {
        let counters = self.counters.read().expect("counters map poisoned");
        counters
            .iter()
            .map(|(k, v)| {
                let mut v = v.lock().expect("rolling counter mutex poisoned");
                (k.clone(), v.value(self.clock.as_ref()))
            })
            .collect()
    }

    /// Read-only snapshot of `latest_state` for a single endpoint, `None`
    /// if no observation has been recorded.
    pub fn latest_state_of(&self, service: &str, endpoint: &str) -> Option<bool> {
        let key = endpoint_key(service, endpoint);
        self.latest_state
            .read()
            .expect("latest_state map poisoned")
            .get(&key)
            .copied()
    }

}
