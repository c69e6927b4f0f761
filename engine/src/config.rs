//! Engine configuration.

use std::env;
use std::time::Duration;

/// Tunables of the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Base URL of the reading list service
    pub api_url: Option<String>,
    /// Bearer token identifying the account
    pub token: Option<String>,
    /// Quiet interval before a scheduled cycle runs
    pub debounce: Duration,
    /// Interval of the periodic sync while started
    pub poll_interval: Duration,
    /// Remote calls in flight at once within a phase
    pub max_concurrency: usize,
    /// Per-request timeout of the HTTP client
    pub request_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            token: None,
            debounce: Duration::from_millis(500),
            poll_interval: Duration::from_secs(15),
            max_concurrency: 16,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let debounce = match env_number("READING_LISTS_DEBOUNCE_MS")? {
            Some(ms) => Duration::from_millis(ms),
            None => defaults.debounce,
        };
        let poll_interval = match env_number("READING_LISTS_POLL_SECS")? {
            Some(secs) => Duration::from_secs(secs),
            None => defaults.poll_interval,
        };
        let max_concurrency = match env_number("READING_LISTS_MAX_CONCURRENCY")? {
            Some(0) => {
                return Err(ConfigError::Invalid {
                    name: "READING_LISTS_MAX_CONCURRENCY",
                    value: "0".into(),
                })
            }
            Some(n) => n as usize,
            None => defaults.max_concurrency,
        };
        let request_timeout = match env_number("READING_LISTS_TIMEOUT_SECS")? {
            Some(secs) => Duration::from_secs(secs),
            None => defaults.request_timeout,
        };

        Ok(Self {
            api_url: env::var("READING_LISTS_API_URL").ok(),
            token: env::var("READING_LISTS_TOKEN").ok(),
            debounce,
            poll_interval,
            max_concurrency,
            request_timeout,
        })
    }

    /// Set the debounce interval.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Set the polling interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the per-phase concurrency cap.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }
}

fn env_number(name: &'static str) -> Result<Option<u64>, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(None),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("READING_LISTS_API_URL environment variable is required")]
    MissingApiUrl,

    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.debounce, Duration::from_millis(500));
        assert_eq!(config.poll_interval, Duration::from_secs(15));
        assert_eq!(config.max_concurrency, 16);
        assert!(config.api_url.is_none());
    }

    #[test]
    fn builders() {
        let config = SyncConfig::default()
            .with_debounce(Duration::from_millis(10))
            .with_max_concurrency(0);
        assert_eq!(config.debounce, Duration::from_millis(10));
        assert_eq!(config.max_concurrency, 1);
    }

    #[test]
    fn from_env_reads_overrides() {
        // Only this test touches these variables.
        env::set_var("READING_LISTS_POLL_SECS", "60");
        env::set_var("READING_LISTS_DEBOUNCE_MS", "abc");
        assert!(matches!(
            SyncConfig::from_env(),
            Err(ConfigError::Invalid {
                name: "READING_LISTS_DEBOUNCE_MS",
                ..
            })
        ));

        env::remove_var("READING_LISTS_DEBOUNCE_MS");
        let config = SyncConfig::from_env().unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.debounce, Duration::from_millis(500));
        env::remove_var("READING_LISTS_POLL_SECS");
    }
}
