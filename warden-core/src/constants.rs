//! Default values for WARDEN configuration.
//!
//! Centralizing constants makes them easy to find, modify, and test.

// ============================================================================
// QUERY CACHE
// ============================================================================

/// TTL for cache entries whose lookup found a node (milliseconds).
pub const DEFAULT_FOUND_TTL_MS: u64 = 5_000;

/// TTL for cache entries whose lookup found nothing (milliseconds).
pub const DEFAULT_NOT_FOUND_TTL_MS: u64 = 250;

/// Maximum number of single-node entries before eviction.
pub const DEFAULT_MAX_CACHE_ENTRIES: usize = 500;

/// Interval between background sweeps (milliseconds).
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 30_000;

/// Upper bound on deletions performed by one sweep pass.
pub const DEFAULT_MAX_SWEEP_DELETIONS: usize = 100;

/// Polling interval for patterns that opt out of the shared observer (milliseconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Approximate frame duration used by schedulers without a real frame clock.
pub const FRAME_INTERVAL_MS: u64 = 16;

// ============================================================================
// CIRCUIT BREAKER
// ============================================================================

/// Failures in the closed state before the breaker opens.
pub const DEFAULT_CIRCUIT_FAILURE_THRESHOLD: u32 = 5;

/// Consecutive half-open successes needed to close the breaker.
pub const DEFAULT_CIRCUIT_SUCCESS_THRESHOLD: u32 = 3;

/// How long the breaker stays open after the last failure (seconds).
pub const DEFAULT_CIRCUIT_RESET_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// ERROR BOUNDARY
// ============================================================================

/// Error records kept in memory.
pub const DEFAULT_MAX_ERROR_RECORDS: usize = 50;

/// Error records persisted to the key-value store.
pub const DEFAULT_MAX_PERSISTED_RECORDS: usize = 20;

/// Notifications are suppressed once this many errors land in the rate window.
pub const DEFAULT_NOTIFY_RATE_LIMIT: usize = 5;

/// Trailing window for the notification rate limit (seconds).
pub const DEFAULT_NOTIFY_RATE_WINDOW_SECS: u64 = 60;

/// Trailing window for duplicate suppression (seconds).
pub const DEFAULT_DUPLICATE_WINDOW_SECS: u64 = 10;

/// Recovery attempts allowed per module inside one recovery window.
pub const DEFAULT_MAX_RECOVERY_ATTEMPTS: u32 = 3;

/// Window over which recovery attempts are counted (seconds).
pub const DEFAULT_RECOVERY_WINDOW_SECS: u64 = 60;

/// Storage key for the persisted error log.
pub const ERROR_LOG_STORAGE_KEY: &str = "warden.error_log";
