// Runtime configuration read from the environment
//
// Every knob has a default so `cargo run` works against a local pos.db.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Bounded retry for lock contention (TransientError only)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (minimum 1)
    pub max_attempts: u32,

    /// Backoff unit; attempt n waits n * backoff
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        RetryPolicy {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub bind_addr: String,
    /// How long a transaction waits for the SQLite write lock
    pub busy_timeout: Duration,
    pub retry: RetryPolicy,
    pub low_stock_threshold: i64,
    /// Default tracing filter when RUST_LOG is unset
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            db_path: PathBuf::from("pos.db"),
            bind_addr: "0.0.0.0:3000".to_string(),
            busy_timeout: Duration::from_millis(5000),
            retry: RetryPolicy::default(),
            low_stock_threshold: 5,
            log_filter: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from POS_* environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup (tests pass a map here)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AppConfig::default();

        if let Some(path) = lookup("POS_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(addr) = lookup("POS_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(ms) = lookup("POS_BUSY_TIMEOUT_MS") {
            let ms: u64 = ms
                .parse()
                .with_context(|| format!("POS_BUSY_TIMEOUT_MS is not a number: {}", ms))?;
            config.busy_timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) = lookup("POS_RETRY_ATTEMPTS") {
            let attempts: u32 = attempts
                .parse()
                .with_context(|| format!("POS_RETRY_ATTEMPTS is not a number: {}", attempts))?;
            config.retry.max_attempts = attempts.max(1);
        }
        if let Some(ms) = lookup("POS_RETRY_BACKOFF_MS") {
            let ms: u64 = ms
                .parse()
                .with_context(|| format!("POS_RETRY_BACKOFF_MS is not a number: {}", ms))?;
            config.retry.backoff = Duration::from_millis(ms);
        }
        if let Some(threshold) = lookup("POS_LOW_STOCK_THRESHOLD") {
            config.low_stock_threshold = threshold.parse().with_context(|| {
                format!("POS_LOW_STOCK_THRESHOLD is not a number: {}", threshold)
            })?;
        }
        if let Some(filter) = lookup("POS_LOG") {
            config.log_filter = filter;
        }

        Ok(config)
    }
}

/// Install the global tracing subscriber (RUST_LOG wins over the config)
pub fn init_logging(config: &AppConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // A second init (tests, embedding) is harmless
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_env_is_empty() {
        let config = AppConfig::from_lookup(|_| None).unwrap();

        assert_eq!(config.db_path, PathBuf::from("pos.db"));
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.busy_timeout, Duration::from_millis(5000));
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.low_stock_threshold, 5);
    }

    #[test]
    fn test_overrides_from_env() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("POS_DB_PATH", "/tmp/shop.db"),
            ("POS_BUSY_TIMEOUT_MS", "250"),
            ("POS_RETRY_ATTEMPTS", "0"),
            ("POS_RETRY_BACKOFF_MS", "10"),
            ("POS_LOW_STOCK_THRESHOLD", "12"),
        ]))
        .unwrap();

        assert_eq!(config.db_path, PathBuf::from("/tmp/shop.db"));
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        // Zero attempts would mean never running the operation
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.retry.backoff, Duration::from_millis(10));
        assert_eq!(config.low_stock_threshold, 12);
    }

    #[test]
    fn test_invalid_number_is_an_error() {
        let result = AppConfig::from_lookup(lookup_from(&[("POS_BUSY_TIMEOUT_MS", "soon")]));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("POS_BUSY_TIMEOUT_MS"));
    }

    #[test]
    fn test_retry_delay_is_linear() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(20),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(20));
        assert_eq!(policy.delay_for(2), Duration::from_millis(40));
    }
}
