//! Configuration types
//!
//! Every section has a `Default` built from [`crate::constants`], builder
//! style `with_*` setters, and can be overridden from `WARDEN_*` environment
//! variables through [`WardenConfig::from_env`].

use crate::constants::*;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// QUERY CACHE
// ============================================================================

/// Configuration for the query cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL for entries that resolved to a node.
    pub found_ttl: Duration,
    /// TTL for entries that resolved to nothing. Kept short so content that
    /// appears right after a failed lookup is picked up quickly.
    pub not_found_ttl: Duration,
    /// Maximum number of single-node entries.
    pub max_entries: usize,
    /// Delay between background sweeps.
    pub sweep_interval: Duration,
    /// Upper bound on deletions per sweep pass.
    pub max_sweep_deletions: usize,
    /// Polling period for patterns listed in `polling_patterns`.
    pub poll_interval: Duration,
    /// Substrings of patterns whose waits poll instead of observing.
    pub polling_patterns: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            found_ttl: Duration::from_millis(DEFAULT_FOUND_TTL_MS),
            not_found_ttl: Duration::from_millis(DEFAULT_NOT_FOUND_TTL_MS),
            max_entries: DEFAULT_MAX_CACHE_ENTRIES,
            sweep_interval: Duration::from_millis(DEFAULT_SWEEP_INTERVAL_MS),
            max_sweep_deletions: DEFAULT_MAX_SWEEP_DELETIONS,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            polling_patterns: Vec::new(),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_found_ttl(mut self, ttl: Duration) -> Self {
        self.found_ttl = ttl;
        self
    }

    pub fn with_not_found_ttl(mut self, ttl: Duration) -> Self {
        self.not_found_ttl = ttl;
        self
    }

    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_max_sweep_deletions(mut self, max: usize) -> Self {
        self.max_sweep_deletions = max;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Waits on patterns containing `fragment` poll instead of observing.
    pub fn with_polling_pattern(mut self, fragment: impl Into<String>) -> Self {
        self.polling_patterns.push(fragment.into());
        self
    }

    /// TTL that applies to an entry, depending on whether it holds a value.
    pub fn ttl_for(&self, found: bool) -> Duration {
        if found {
            self.found_ttl
        } else {
            self.not_found_ttl
        }
    }

    /// Whether waits on `pattern` should poll.
    pub fn polls(&self, pattern: &str) -> bool {
        self.polling_patterns
            .iter()
            .any(|fragment| !fragment.is_empty() && pattern.contains(fragment.as_str()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::invalid("cache.max_entries", 0, "must be > 0"));
        }
        if self.found_ttl.is_zero() {
            return Err(ConfigError::invalid("cache.found_ttl", "0ms", "must be > 0"));
        }
        if self.not_found_ttl.is_zero() {
            return Err(ConfigError::invalid("cache.not_found_ttl", "0ms", "must be > 0"));
        }
        if self.not_found_ttl > self.found_ttl {
            return Err(ConfigError::IncompatibleOptions {
                option_a: "cache.not_found_ttl".to_string(),
                option_b: "cache.found_ttl".to_string(),
            });
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::invalid("cache.sweep_interval", "0ms", "must be > 0"));
        }
        if self.max_sweep_deletions == 0 {
            return Err(ConfigError::invalid("cache.max_sweep_deletions", 0, "must be > 0"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::invalid("cache.poll_interval", "0ms", "must be > 0"));
        }
        Ok(())
    }
}

// ============================================================================
// CIRCUIT BREAKER
// ============================================================================

/// Configuration for the circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_CIRCUIT_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_CIRCUIT_SUCCESS_THRESHOLD,
            reset_timeout: Duration::from_secs(DEFAULT_CIRCUIT_RESET_TIMEOUT_SECS),
        }
    }
}

impl BreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("breaker.failure_threshold", 0, "must be > 0"));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::invalid("breaker.success_threshold", 0, "must be > 0"));
        }
        Ok(())
    }
}

// ============================================================================
// ERROR BOUNDARY
// ============================================================================

/// Configuration for the error boundary's log, throttle and recovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundaryConfig {
    /// Records retained in memory.
    pub max_records: usize,
    /// Records written to durable storage.
    pub max_persisted: usize,
    /// Notifications stop once more than this many errors land in `notify_window`.
    pub notify_rate_limit: usize,
    pub notify_window: Duration,
    /// Identical message+severity inside this window is not re-notified.
    pub duplicate_window: Duration,
    pub max_recovery_attempts: u32,
    pub recovery_window: Duration,
    /// Storage key for the persisted log.
    pub storage_key: String,
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            max_records: DEFAULT_MAX_ERROR_RECORDS,
            max_persisted: DEFAULT_MAX_PERSISTED_RECORDS,
            notify_rate_limit: DEFAULT_NOTIFY_RATE_LIMIT,
            notify_window: Duration::from_secs(DEFAULT_NOTIFY_RATE_WINDOW_SECS),
            duplicate_window: Duration::from_secs(DEFAULT_DUPLICATE_WINDOW_SECS),
            max_recovery_attempts: DEFAULT_MAX_RECOVERY_ATTEMPTS,
            recovery_window: Duration::from_secs(DEFAULT_RECOVERY_WINDOW_SECS),
            storage_key: ERROR_LOG_STORAGE_KEY.to_string(),
        }
    }
}

impl BoundaryConfig {
    pub fn with_max_records(mut self, max: usize) -> Self {
        self.max_records = max;
        self
    }

    pub fn with_max_persisted(mut self, max: usize) -> Self {
        self.max_persisted = max;
        self
    }

    pub fn with_max_recovery_attempts(mut self, attempts: u32) -> Self {
        self.max_recovery_attempts = attempts;
        self
    }

    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_records == 0 {
            return Err(ConfigError::invalid("boundary.max_records", 0, "must be > 0"));
        }
        if self.max_persisted > self.max_records {
            return Err(ConfigError::IncompatibleOptions {
                option_a: "boundary.max_persisted".to_string(),
                option_b: "boundary.max_records".to_string(),
            });
        }
        if self.storage_key.is_empty() {
            return Err(ConfigError::invalid("boundary.storage_key", "\"\"", "must not be empty"));
        }
        Ok(())
    }
}

// ============================================================================
// MASTER CONFIG
// ============================================================================

/// Configuration for the whole runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub cache: CacheConfig,
    pub breaker: BreakerConfig,
    pub boundary: BoundaryConfig,
}

impl WardenConfig {
    /// Defaults overridden by environment variables.
    ///
    /// # Environment Variables
    /// - `WARDEN_CACHE_FOUND_TTL_MS`: TTL for found entries (default: 5000)
    /// - `WARDEN_CACHE_NOT_FOUND_TTL_MS`: TTL for not-found entries (default: 250)
    /// - `WARDEN_CACHE_MAX_ENTRIES`: Single-entry capacity (default: 500)
    /// - `WARDEN_CACHE_SWEEP_INTERVAL_MS`: Background sweep period (default: 30000)
    /// - `WARDEN_CIRCUIT_FAILURE_THRESHOLD`: Failures before opening (default: 5)
    /// - `WARDEN_CIRCUIT_SUCCESS_THRESHOLD`: Successes needed to close from half-open (default: 3)
    /// - `WARDEN_CIRCUIT_RESET_TIMEOUT_SECS`: How long the circuit stays open (default: 30)
    /// - `WARDEN_ERROR_LOG_SIZE`: In-memory error records (default: 50)
    /// - `WARDEN_ERROR_LOG_PERSISTED`: Persisted error records (default: 20)
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`WardenConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
            lookup(name).and_then(|s| s.trim().parse().ok())
        }

        let mut config = Self::default();

        if let Some(ms) = parse::<u64>(&lookup, "WARDEN_CACHE_FOUND_TTL_MS") {
            config.cache.found_ttl = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64>(&lookup, "WARDEN_CACHE_NOT_FOUND_TTL_MS") {
            config.cache.not_found_ttl = Duration::from_millis(ms);
        }
        if let Some(max) = parse(&lookup, "WARDEN_CACHE_MAX_ENTRIES") {
            config.cache.max_entries = max;
        }
        if let Some(ms) = parse::<u64>(&lookup, "WARDEN_CACHE_SWEEP_INTERVAL_MS") {
            config.cache.sweep_interval = Duration::from_millis(ms);
        }
        if let Some(threshold) = parse(&lookup, "WARDEN_CIRCUIT_FAILURE_THRESHOLD") {
            config.breaker.failure_threshold = threshold;
        }
        if let Some(threshold) = parse(&lookup, "WARDEN_CIRCUIT_SUCCESS_THRESHOLD") {
            config.breaker.success_threshold = threshold;
        }
        if let Some(secs) = parse::<u64>(&lookup, "WARDEN_CIRCUIT_RESET_TIMEOUT_SECS") {
            config.breaker.reset_timeout = Duration::from_secs(secs);
        }
        if let Some(size) = parse(&lookup, "WARDEN_ERROR_LOG_SIZE") {
            config.boundary.max_records = size;
        }
        if let Some(size) = parse(&lookup, "WARDEN_ERROR_LOG_PERSISTED") {
            config.boundary.max_persisted = size;
        }

        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        self.breaker.validate()?;
        self.boundary.validate()
    }
}

// ============================================================================
// TESTS
// ============================================================================
