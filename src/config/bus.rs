//! Delivery configuration shared by every node of one bus.

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

const MAX_LOCK_TIME_SECS: u64 = 86_400;
const MAX_SUCCEED_EXPIRE_HOURS: u64 = 87_600;
const MAX_START_RETRY_AFTER_SECS: u64 = 30 * 86_400;
const MAX_INTERVAL_SECS: u64 = 7 * 86_400;
const MAX_COMMIT_TIMEOUT_SECS: u64 = 86_400;
const MAX_SUPERVISOR_BACKOFF_MS: u64 = 3_600_000;

/// Bus options. Immutable once loaded; passed to constructors by value or `Arc`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BusConfig {
    /// Logical partition key; every record and query is scoped to it.
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Lease duration in seconds. Must exceed worst-case handling latency.
    #[serde(default = "default_lock_time")]
    pub lock_time_secs: u64,

    /// How long `Succeeded` records are kept before cleanup.
    #[serde(default = "default_succeed_expire_hours")]
    pub succeed_expire_hours: u64,

    /// Minimum record age before the retry coordinator picks it up.
    #[serde(default = "default_start_retry_after")]
    pub start_retry_after_secs: u64,

    /// Attempt ceiling; records at this retry count are abandoned.
    #[serde(default = "default_retry_failed_max")]
    pub retry_failed_max: u32,

    /// Retry poll batch size.
    #[serde(default = "default_retry_limit_count")]
    pub retry_limit_count: usize,

    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,

    #[serde(default = "default_expiry_interval")]
    pub expiry_interval_secs: u64,

    /// How long a publish waits for its transaction to conclude before
    /// leaving the record to the retry coordinator.
    #[serde(default = "default_commit_timeout")]
    pub transaction_commit_timeout_secs: u64,

    #[serde(default = "default_supervisor_max_restarts")]
    pub supervisor_max_restarts: u32,

    #[serde(default = "default_supervisor_backoff")]
    pub supervisor_backoff_ms: u64,
}

impl BusConfig {
    /// Default options for the given partition.
    pub fn for_environment(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            ..Default::default()
        }
    }

    pub fn lock_time(&self) -> Duration {
        Duration::from_secs(self.lock_time_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn expiry_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_interval_secs)
    }

    pub fn transaction_commit_timeout(&self) -> Duration {
        Duration::from_secs(self.transaction_commit_timeout_secs)
    }

    pub fn supervisor_backoff(&self) -> Duration {
        Duration::from_millis(self.supervisor_backoff_ms)
    }

    /// Validate bus configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.environment.trim().is_empty() {
            return Err(ValidationError::MissingRequired("bus.environment"));
        }
        if self.lock_time_secs == 0 {
            return Err(ValidationError::InvalidLockTime);
        }
        if self.succeed_expire_hours == 0 {
            return Err(ValidationError::InvalidDuration("bus.succeed_expire_hours"));
        }
        if self.retry_interval_secs == 0 {
            return Err(ValidationError::InvalidDuration("bus.retry_interval_secs"));
        }
        if self.expiry_interval_secs == 0 {
            return Err(ValidationError::InvalidDuration("bus.expiry_interval_secs"));
        }
        if self.retry_limit_count == 0 {
            return Err(ValidationError::InvalidBatchSize);
        }
        if self.retry_failed_max == 0 {
            return Err(ValidationError::InvalidRetryCeiling);
        }

        let bounds = [
            ("bus.lock_time_secs", self.lock_time_secs, MAX_LOCK_TIME_SECS),
            ("bus.succeed_expire_hours", self.succeed_expire_hours, MAX_SUCCEED_EXPIRE_HOURS),
            ("bus.start_retry_after_secs", self.start_retry_after_secs, MAX_START_RETRY_AFTER_SECS),
            ("bus.retry_interval_secs", self.retry_interval_secs, MAX_INTERVAL_SECS),
            ("bus.expiry_interval_secs", self.expiry_interval_secs, MAX_INTERVAL_SECS),
            (
                "bus.transaction_commit_timeout_secs",
                self.transaction_commit_timeout_secs,
                MAX_COMMIT_TIMEOUT_SECS,
            ),
            ("bus.supervisor_backoff_ms", self.supervisor_backoff_ms, MAX_SUPERVISOR_BACKOFF_MS),
        ];
        for (field, value, max) in bounds {
            if value > max {
                return Err(ValidationError::OutOfRange { field, max });
            }
        }
        Ok(())
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            lock_time_secs: default_lock_time(),
            succeed_expire_hours: default_succeed_expire_hours(),
            start_retry_after_secs: default_start_retry_after(),
            retry_failed_max: default_retry_failed_max(),
            retry_limit_count: default_retry_limit_count(),
            retry_interval_secs: default_retry_interval(),
            expiry_interval_secs: default_expiry_interval(),
            transaction_commit_timeout_secs: default_commit_timeout(),
            supervisor_max_restarts: default_supervisor_max_restarts(),
            supervisor_backoff_ms: default_supervisor_backoff(),
        }
    }
}

fn default_environment() -> String {
    "Production".to_string()
}

fn default_lock_time() -> u64 {
    110
}

fn default_succeed_expire_hours() -> u64 {
    72
}

fn default_start_retry_after() -> u64 {
    300
}

fn default_retry_failed_max() -> u32 {
    60
}

fn default_retry_limit_count() -> usize {
    100
}

fn default_retry_interval() -> u64 {
    60
}

fn default_expiry_interval() -> u64 {
    3600
}

fn default_commit_timeout() -> u64 {
    60
}

fn default_supervisor_max_restarts() -> u32 {
    5
}

fn default_supervisor_backoff() -> u64 {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_config_defaults() {
        let config = BusConfig::default();
        assert_eq!(config.environment, "Production");
        assert_eq!(config.lock_time_secs, 110);
        assert_eq!(config.succeed_expire_hours, 72);
        assert_eq!(config.start_retry_after_secs, 300);
        assert_eq!(config.retry_failed_max, 60);
        assert_eq!(config.retry_limit_count, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_for_environment_keeps_other_defaults() {
        let config = BusConfig::for_environment("Staging");
        assert_eq!(config.environment, "Staging");
        assert_eq!(config.lock_time(), Duration::from_secs(110));
    }

    #[test]
    fn test_validation_blank_environment() {
        let config = BusConfig::for_environment("  ");
        assert!(matches!(
            config.validate(),
            Err(ValidationError::MissingRequired("bus.environment"))
        ));
    }

    #[test]
    fn test_validation_zero_lock_time() {
        let config = BusConfig {
            lock_time_secs: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidLockTime)
        ));
    }

    #[test]
    fn test_validation_zero_intervals_and_batches() {
        let zero_interval = BusConfig {
            retry_interval_secs: 0,
            ..Default::default()
        };
        assert!(zero_interval.validate().is_err());

        let zero_batch = BusConfig {
            retry_limit_count: 0,
            ..Default::default()
        };
        assert!(matches!(
            zero_batch.validate(),
            Err(ValidationError::InvalidBatchSize)
        ));

        let zero_ceiling = BusConfig {
            retry_failed_max: 0,
            ..Default::default()
        };
        assert!(matches!(
            zero_ceiling.validate(),
            Err(ValidationError::InvalidRetryCeiling)
        ));
    }

    #[test]
    fn test_validation_rejects_oversized_durations() {
        let huge_lease = BusConfig {
            lock_time_secs: u64::MAX,
            ..Default::default()
        };
        assert!(matches!(
            huge_lease.validate(),
            Err(ValidationError::OutOfRange {
                field: "bus.lock_time_secs",
                ..
            })
        ));

        let huge_expiry = BusConfig {
            succeed_expire_hours: u64::MAX,
            ..Default::default()
        };
        assert!(matches!(
            huge_expiry.validate(),
            Err(ValidationError::OutOfRange {
                field: "bus.succeed_expire_hours",
                ..
            })
        ));

        let huge_backoff = BusConfig {
            supervisor_backoff_ms: u64::MAX,
            ..Default::default()
        };
        assert!(huge_backoff.validate().is_err());
    }

    #[test]
    fn test_validation_accepts_values_at_the_bounds() {
        let config = BusConfig {
            lock_time_secs: MAX_LOCK_TIME_SECS,
            succeed_expire_hours: MAX_SUCCEED_EXPIRE_HOURS,
            start_retry_after_secs: MAX_START_RETRY_AFTER_SECS,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
