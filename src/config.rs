//! Configuration and tuning for the dependency core.
//!
//! This module provides:
//! - A plain configuration struct with sensible defaults
//! - Profiles for common deployment scenarios
//! - Validation for guardrail invariants
//!
//! Configuration is deliberately small: the core has no persistent state
//! and no external services, so everything here is an in-process knob.

use std::time::Duration;

/// Top-level configuration for the dependency core runtime.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Worker thread count. `None` uses available parallelism; `Some(0)`
    /// spawns no workers, leaving execution to the caller (useful for
    /// deterministic tests that pump the policy by hand).
    pub workers: Option<usize>,
    /// How long an idle worker parks before re-checking the policy.
    pub park_timeout: Duration,
    /// Whether arbiters created by this runtime use the congestion
    /// delegation list instead of blocking on the arbiter mutex.
    pub arbiter_delegation: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::from_profile(CoreProfile::Production)
    }
}

/// Deployment profiles with pre-tuned settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreProfile {
    /// Few workers, short park timeout; favors fast feedback in tests.
    Development,
    /// Parallelism-sized worker pool, longer park timeout.
    Production,
}

impl CoreConfig {
    /// Builds a configuration from a profile.
    #[must_use]
    pub fn from_profile(profile: CoreProfile) -> Self {
        match profile {
            CoreProfile::Development => Self {
                workers: Some(2),
                park_timeout: Duration::from_millis(5),
                arbiter_delegation: false,
            },
            CoreProfile::Production => Self {
                workers: None,
                park_timeout: Duration::from_millis(50),
                arbiter_delegation: true,
            },
        }
    }

    /// Validates the configuration for basic sanity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(workers) = self.workers {
            if workers > MAX_WORKERS {
                return Err(ConfigError::TooManyWorkers(workers));
            }
        }

        if self.park_timeout < Duration::from_micros(100) {
            return Err(ConfigError::ParkTimeoutTooShort(self.park_timeout));
        }

        if self.park_timeout > Duration::from_secs(10) {
            return Err(ConfigError::ParkTimeoutTooLong(self.park_timeout));
        }

        Ok(())
    }

    /// Resolves the effective worker count.
    #[must_use]
    pub fn effective_workers(&self) -> usize {
        match self.workers {
            Some(n) => n,
            None => std::thread::available_parallelism().map_or(1, usize::from),
        }
    }
}

/// Hard upper bound on the worker pool size.
pub const MAX_WORKERS: usize = 1024;

/// Configuration validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The requested worker count exceeds [`MAX_WORKERS`].
    TooManyWorkers(usize),
    /// The idle park timeout is below the supported floor.
    ParkTimeoutTooShort(Duration),
    /// The idle park timeout is above the supported ceiling.
    ParkTimeoutTooLong(Duration),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooManyWorkers(n) => write!(f, "worker count {n} exceeds {MAX_WORKERS}"),
            Self::ParkTimeoutTooShort(d) => write!(f, "park timeout {d:?} is below 100µs"),
            Self::ParkTimeoutTooLong(d) => write!(f, "park timeout {d:?} is above 10s"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_validate() {
        assert!(CoreConfig::from_profile(CoreProfile::Development).validate().is_ok());
        assert!(CoreConfig::from_profile(CoreProfile::Production).validate().is_ok());
        assert!(CoreConfig::default().validate().is_ok());
    }

    #[test]
    fn guardrails_reject_bad_values() {
        let mut config = CoreConfig::default();
        config.workers = Some(MAX_WORKERS + 1);
        assert_eq!(
            config.validate(),
            Err(ConfigError::TooManyWorkers(MAX_WORKERS + 1))
        );

        let mut config = CoreConfig::default();
        config.park_timeout = Duration::from_nanos(1);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ParkTimeoutTooShort(_))
        ));

        let mut config = CoreConfig::default();
        config.park_timeout = Duration::from_secs(60);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ParkTimeoutTooLong(_))
        ));
    }

    #[test]
    fn zero_workers_is_a_valid_manual_mode() {
        let mut config = CoreConfig::default();
        config.workers = Some(0);
        assert!(config.validate().is_ok());
        assert_eq!(config.effective_workers(), 0);
    }

    #[test]
    fn effective_workers_resolves_auto() {
        let config = CoreConfig {
            workers: None,
            ..CoreConfig::default()
        };
        assert!(config.effective_workers() >= 1);
    }
}
