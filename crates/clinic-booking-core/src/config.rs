//! Runtime configuration.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Penalty rules for repeated no-shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PenaltyPolicy {
    /// No-show count at which (and at each multiple of which) a ban is issued
    pub threshold: i64,
    /// Ban length in days, counted from the day it is issued
    pub ban_days: i64,
    /// Record cancellations as penalty occurrences as well
    pub count_cancellations: bool,
}

impl Default for PenaltyPolicy {
    fn default() -> Self {
        Self {
            threshold: 3,
            ban_days: 14,
            count_cancellations: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BookingConfig {
    /// SQLite database file
    pub database_path: String,
    /// How long a writer waits for a contended database lock
    pub busy_timeout: Duration,
    pub penalty: PenaltyPolicy,
    /// Default encounter edit lease length
    pub encounter_lock_ttl: Duration,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            database_path: "clinic.db".to_string(),
            busy_timeout: Duration::from_millis(5_000),
            penalty: PenaltyPolicy::default(),
            encounter_lock_ttl: Duration::from_secs(30 * 60),
        }
    }
}

impl BookingConfig {
    /// Defaults with the database placed at `path`.
    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            database_path: path.into(),
            ..Self::default()
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let database_path =
            env::var("CLINIC_DB_PATH").unwrap_or_else(|_| defaults.database_path.clone());
        let busy_timeout = Duration::from_millis(env_or(
            "CLINIC_BUSY_TIMEOUT_MS",
            defaults.busy_timeout.as_millis() as u64,
        )?);
        let penalty = PenaltyPolicy {
            threshold: env_or("CLINIC_BAN_THRESHOLD", defaults.penalty.threshold)?,
            ban_days: env_or("CLINIC_BAN_DAYS", defaults.penalty.ban_days)?,
            count_cancellations: env_or(
                "CLINIC_COUNT_CANCELLATIONS",
                defaults.penalty.count_cancellations,
            )?,
        };
        let encounter_lock_ttl = Duration::from_secs(
            60 * env_or::<u64>("CLINIC_ENCOUNTER_LOCK_MINUTES", 30)?,
        );

        if penalty.threshold <= 0 {
            anyhow::bail!("CLINIC_BAN_THRESHOLD must be positive");
        }

        Ok(Self {
            database_path,
            busy_timeout,
            penalty,
            encounter_lock_ttl,
        })
    }
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw:?}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BookingConfig::default();
        assert_eq!(config.penalty.threshold, 3);
        assert_eq!(config.penalty.ban_days, 14);
        assert!(!config.penalty.count_cancellations);
        assert_eq!(config.encounter_lock_ttl, Duration::from_secs(1800));
    }

    #[test]
    fn test_env_or_parses_and_rejects() {
        // Keys unique to this test so parallel tests do not interfere.
        env::set_var("CLINIC_TEST_ENV_OR_OK", " 42 ");
        env::set_var("CLINIC_TEST_ENV_OR_BAD", "forty-two");

        assert_eq!(env_or::<i64>("CLINIC_TEST_ENV_OR_OK", 1).unwrap(), 42);
        assert!(env_or::<i64>("CLINIC_TEST_ENV_OR_BAD", 1).is_err());
        assert_eq!(env_or::<i64>("CLINIC_TEST_ENV_OR_MISSING", 7).unwrap(), 7);
    }

    #[test]
    fn test_with_path() {
        let config = BookingConfig::with_path("/tmp/x.db");
        assert_eq!(config.database_path, "/tmp/x.db");
        assert_eq!(config.penalty, PenaltyPolicy::default());
    }
}
