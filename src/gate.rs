//! `AdmissionGate`, the adapter-facing surface that bundles one
//! [`MetricsStore`] with one [`HealthTester`] over a shared configuration
//! and clock/random source.
//!
//! This is the "thin RPC hook" contract: a fanout client wraps each
//! downstream call with `record_called` before dispatch, one of the outcome
//! recorders after, and consults `test` to decide whether to dispatch at
//! all. The crate itself ships no RPC framework integration.

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::BreakerConfig;
use crate::error::ConfigError;
use crate::health::{HealthTester, LockSnapshot, TestContext};
use crate::metrics::MetricsStore;
use crate::random::{RandomSource, ThreadRandom};

/// A fully wired admission gate for one configuration.
///
/// Endpoints are identified by `(service, endpoint)` pairs and created
/// lazily on first use; a single `AdmissionGate` is meant to be shared
/// (behind an `Arc`) across every call site in a process.
pub struct AdmissionGate {
    metrics: Arc<MetricsStore>,
    health: HealthTester,
}

impl AdmissionGate {
    /// Build a gate with the real system clock and thread-local randomness.
    pub fn new(config: BreakerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Self::with_sources(config, Arc::new(SystemClock), Arc::new(ThreadRandom))
    }

    /// Build a gate over injected time and randomness sources, for tests or
    /// alternative deployments.
    pub fn with_sources(
        config: BreakerConfig,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let metrics = Arc::new(MetricsStore::new(config, Arc::clone(&clock)));
        let health = HealthTester::new(Arc::clone(&metrics), clock, random);
        Ok(Self { metrics, health })
    }

    /// Register a callback fired when an endpoint transitions into `LOCKED`.
    pub fn on_lock(&mut self, f: impl Fn(&TestContext) + Send + Sync + 'static) {
        self.health.on_lock(f);
    }

    /// Register a callback fired when an endpoint transitions into `UNLOCKED`.
    pub fn on_unlock(&mut self, f: impl Fn(&TestContext) + Send + Sync + 'static) {
        self.health.on_unlock(f);
    }

    /// Register a callback fired on every `test` call.
    pub fn on_tested(&mut self, f: impl Fn(&TestContext) + Send + Sync + 'static) {
        self.health.on_tested(f);
    }

    /// Register a callback fired when `test` admits.
    pub fn on_tested_ok(&mut self, f: impl Fn(&TestContext) + Send + Sync + 'static) {
        self.health.on_tested_ok(f);
    }

    /// Register a callback fired when `test` denies.
    pub fn on_tested_bad(&mut self, f: impl Fn(&TestContext) + Send + Sync + 'static) {
        self.health.on_tested_bad(f);
    }

    /// Decide whether to admit a call to `(service, endpoint)`.
    pub fn test(&self, service: &str, endpoint: &str) -> bool {
        self.health.test(service, endpoint)
    }

    /// Record that a call was dispatched.
    pub fn record_called(&self, service: &str, endpoint: &str) {
        self.metrics.record_called(service, endpoint);
    }

    /// Record a successful call.
    pub fn record_ok(&self, service: &str, endpoint: &str) {
        self.metrics.record_ok(service, endpoint);
    }

    /// Record an expected, application-level error.
    pub fn record_user_exc(&self, service: &str, endpoint: &str) {
        self.metrics.record_user_exc(service, endpoint);
    }

    /// Record a timeout.
    pub fn record_timeout(&self, service: &str, endpoint: &str) {
        self.metrics.record_timeout(service, endpoint);
    }

    /// Record a system-level error.
    pub fn record_sys_exc(&self, service: &str, endpoint: &str) {
        self.metrics.record_sys_exc(service, endpoint);
    }

    /// Record an unclassified error.
    pub fn record_unknown_exc(&self, service: &str, endpoint: &str) {
        self.metrics.record_unknown_exc(service, endpoint);
    }

    /// Current lock state of an endpoint, `None` if it has never been tested.
    pub fn lock_status(&self, service: &str, endpoint: &str) -> Option<LockSnapshot> {
        self.health.lock_status(service, endpoint)
    }

    /// Whether an endpoint currently satisfies the health predicate.
    pub fn is_healthy(&self, service: &str, endpoint: &str) -> bool {
        self.health.is_healthy(service, endpoint)
    }

    /// Read-only access to the underlying metrics store, for monitoring
    /// tooling that wants raw counter snapshots.
    pub fn metrics(&self) -> &MetricsStore {
        &self.metrics
    }
}
