//! Error types for construction-time failures.
//!
//! The core's admission decision is never itself an error; deny is a normal
//! outcome. The only fallible path is constructing a `BreakerConfig` /
//! `MetricsStore` / `HealthTester` from bad settings.

/// Errors raised while validating or loading a [`crate::config::BreakerConfig`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("METRICS_ROLLINGSIZE must be a positive number of slots, got {0}")]
    InvalidWindowSize(i64),

    #[error("METRICS_GRANULARITY must be a positive duration in seconds, got {0}")]
    InvalidGranularity(i64),

    #[error("HEALTH_MIN_RECOVERY_TIME must not exceed HEALTH_MAX_RECOVERY_TIME ({0} > {1})")]
    RecoveryWindowInverted(u64, u64),

    #[error("threshold ratio {name} must be within [0, 1], got {value}")]
    InvalidRatio { name: &'static str, value: f64 },
}
