//! Sampling cycle configuration.

use serde::Serialize;
use std::time::Duration;

use crate::domain::ConfigError;

/// Processes younger than this are not handed to runtime profilers.
pub const DEFAULT_MIN_DURATION: Duration = Duration::from_secs(10);

/// Length of one sampling window.
pub const DEFAULT_CYCLE_DURATION: Duration = Duration::from_secs(60);

/// Extra time a source gets beyond the window before it is abandoned.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Validated timing parameters for the cycle orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleConfig {
    pub min_duration: Duration,
    pub cycle_duration: Duration,
    pub grace_period: Duration,
}

impl CycleConfig {
    /// # Errors
    /// Returns `ConfigError::ZeroCycleDuration` for an empty sampling window.
    pub fn new(
        min_duration: Duration,
        cycle_duration: Duration,
        grace_period: Duration,
    ) -> Result<Self, ConfigError> {
        if cycle_duration.is_zero() {
            return Err(ConfigError::ZeroCycleDuration);
        }
        Ok(Self { min_duration, cycle_duration, grace_period })
    }

    /// Upper bound on how long any single source may run in a cycle.
    pub fn adapter_timeout(&self) -> Duration {
        self.cycle_duration + self.grace_period
    }
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            min_duration: DEFAULT_MIN_DURATION,
            cycle_duration: DEFAULT_CYCLE_DURATION,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CycleConfig::default();
        assert_eq!(config.min_duration, Duration::from_secs(10));
        assert_eq!(config.adapter_timeout(), Duration::from_secs(65));
    }

    #[test]
    fn test_zero_cycle_rejected() {
        let result = CycleConfig::new(Duration::from_secs(10), Duration::ZERO, Duration::ZERO);
        assert!(matches!(result, Err(ConfigError::ZeroCycleDuration)));
    }

    #[test]
    fn test_zero_min_duration_allowed() {
        let config =
            CycleConfig::new(Duration::ZERO, Duration::from_secs(30), Duration::from_secs(2))
                .unwrap();
        assert_eq!(config.adapter_timeout(), Duration::from_secs(32));
    }
}
