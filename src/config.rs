//! Immutable configuration record for [`crate::metrics::MetricsStore`] and
//! [`crate::health::HealthTester`].
//!
//! A typed, closed record rather than an attribute-style dict-like object:
//! the field set is exactly the table below, and loading from an external
//! map copies only recognized keys.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default stats time granularity, in seconds per rolling-window slot.
pub const DEFAULT_METRICS_GRANULARITY: u64 = 20;
/// Default rolling-window length, in slots.
pub const DEFAULT_METRICS_ROLLINGSIZE: u64 = 20;
/// Default minimum time an endpoint must stay locked before a probe is released.
pub const DEFAULT_HEALTH_MIN_RECOVERY_TIME: u64 = 20;
/// Default time after which a recovering endpoint is unconditionally unlocked.
pub const DEFAULT_HEALTH_MAX_RECOVERY_TIME: u64 = 120;
/// Default minimum request count per window before ratio checks apply.
pub const DEFAULT_HEALTH_THRESHOLD_REQUEST: u64 = 10;
/// Default timeout-ratio threshold.
pub const DEFAULT_HEALTH_THRESHOLD_TIMEOUT: f64 = 0.5;
/// Default system-exception-ratio threshold.
pub const DEFAULT_HEALTH_THRESHOLD_SYS_EXC: f64 = 0.5;
/// Default unknown-exception-ratio threshold.
pub const DEFAULT_HEALTH_THRESHOLD_UNKWN_EXC: f64 = 0.5;

/// One recognized value in an external settings map, as fed to
/// [`BreakerConfig::from_map`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Int(i64),
    Float(f64),
}

impl ConfigValue {
    fn as_u64(self) -> Option<u64> {
        match self {
            ConfigValue::Int(v) if v >= 0 => Some(v as u64),
            ConfigValue::Float(v) if v >= 0.0 => Some(v as u64),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            ConfigValue::Int(v) => v as f64,
            ConfigValue::Float(v) => v,
        }
    }
}

/// Immutable configuration, read-only to the core after construction.
///
/// Implements `Serialize`/`Deserialize` so a host process can load it from
/// the same config file format (JSON, YAML, ...) it uses for everything
/// else; `from_map` remains the entry point for untyped key/value settings
/// sources that only recognize a subset of fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Slot width, in seconds per rolling-window slot.
    pub metrics_granularity: u64,
    /// Number of slots in the rolling window.
    pub metrics_rollingsize: u64,
    /// Minimum seconds an endpoint stays `LOCKED` before a probe is released.
    pub health_min_recovery_time: u64,
    /// Seconds after which a recovering endpoint is unconditionally unlocked.
    pub health_max_recovery_time: u64,
    /// Minimum requests per window before ratio checks apply.
    pub health_threshold_request: u64,
    /// Timeout-ratio threshold.
    pub health_threshold_timeout: f64,
    /// System-exception-ratio threshold.
    pub health_threshold_sys_exc: f64,
    /// Unknown-exception-ratio threshold.
    pub health_threshold_unkwn_exc: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            metrics_granularity: DEFAULT_METRICS_GRANULARITY,
            metrics_rollingsize: DEFAULT_METRICS_ROLLINGSIZE,
            health_min_recovery_time: DEFAULT_HEALTH_MIN_RECOVERY_TIME,
            health_max_recovery_time: DEFAULT_HEALTH_MAX_RECOVERY_TIME,
            health_threshold_request: DEFAULT_HEALTH_THRESHOLD_REQUEST,
            health_threshold_timeout: DEFAULT_HEALTH_THRESHOLD_TIMEOUT,
            health_threshold_sys_exc: DEFAULT_HEALTH_THRESHOLD_SYS_EXC,
            health_threshold_unkwn_exc: DEFAULT_HEALTH_THRESHOLD_UNKWN_EXC,
        }
    }
}

impl BreakerConfig {
    /// Build from defaults overlaid with recognized keys from `settings`;
    /// unrecognized keys are silently ignored.
    pub fn from_map(settings: &HashMap<String, ConfigValue>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(v) = settings.get("METRICS_GRANULARITY").copied() {
            cfg.metrics_granularity = v
                .as_u64()
                .filter(|v| *v > 0)
                .ok_or(ConfigError::InvalidGranularity(raw_int(v)))?;
        }
        if let Some(v) = settings.get("METRICS_ROLLINGSIZE").copied() {
            cfg.metrics_rollingsize = v
                .as_u64()
                .filter(|v| *v > 0)
                .ok_or(ConfigError::InvalidWindowSize(raw_int(v)))?;
        }
        if let Some(v) = settings.get("HEALTH_MIN_RECOVERY_TIME").copied() {
            cfg.health_min_recovery_time = v.as_u64().unwrap_or(cfg.health_min_recovery_time);
        }
        if let Some(v) = settings.get("HEALTH_MAX_RECOVERY_TIME").copied() {
            cfg.health_max_recovery_time = v.as_u64().unwrap_or(cfg.health_max_recovery_time);
        }
        if let Some(v) = settings.get("HEALTH_THRESHOLD_REQUEST").copied() {
            cfg.health_threshold_request = v.as_u64().unwrap_or(cfg.health_threshold_request);
        }
        if let Some(v) = settings.get("HEALTH_THRESHOLD_TIMEOUT").copied() {
            cfg.health_threshold_timeout = v.as_f64();
        }
        if let Some(v) = settings.get("HEALTH_THRESHOLD_SYS_EXC").copied() {
            cfg.health_threshold_sys_exc = v.as_f64();
        }
        if let Some(v) = settings.get("HEALTH_THRESHOLD_UNKWN_EXC").copied() {
            cfg.health_threshold_unkwn_exc = v.as_f64();
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate invariants that construction of [`crate::metrics::MetricsStore`]
    /// and [`crate::health::HealthTester`] depend on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.metrics_granularity == 0 {
            return Err(ConfigError::InvalidGranularity(0));
        }
        if self.metrics_rollingsize == 0 {
            return Err(ConfigError::InvalidWindowSize(0));
        }
        if self.health_min_recovery_time > self.health_max_recovery_time {
            return Err(ConfigError::RecoveryWindowInverted(
                self.health_min_recovery_time,
                self.health_max_recovery_time,
            ));
        }
        for (name, value) in [
            ("HEALTH_THRESHOLD_TIMEOUT", self.health_threshold_timeout),
            ("HEALTH_THRESHOLD_SYS_EXC", self.health_threshold_sys_exc),
            ("HEALTH_THRESHOLD_UNKWN_EXC", self.health_threshold_unkwn_exc),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidRatio { name, value });
            }
        }
        Ok(())
    }
}

fn raw_int(v: ConfigValue) -> i64 {
    match v {
        ConfigValue::Int(v) => v,
        ConfigValue::Float(v) => v as i64,
    }
}
