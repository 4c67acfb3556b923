//! Error types for WARDEN operations

use thiserror::Error;

/// Query errors raised by the node tree.
///
/// A miss is never an error. Only malformed patterns end up here, and callers
/// are expected to guard against those at the call site.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("Invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

impl QueryError {
    /// Shorthand for an [`QueryError::InvalidPattern`].
    pub fn invalid_pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }
}

/// Failures reported by host resources during teardown or persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    #[error("Observer disconnect failed: {reason}")]
    ObserverDisconnect { reason: String },

    #[error("Listener removal for {event} failed: {reason}")]
    ListenerRemoval { event: String, reason: String },

    #[error("Timer operation failed: {reason}")]
    Timer { reason: String },

    #[error("Storage operation on {key} failed: {reason}")]
    Storage { key: String, reason: String },

    #[error("Teardown panicked: {message}")]
    Panicked { message: String },

    #[error("{0}")]
    Other(String),
}

impl HostError {
    /// Convert a payload caught by `catch_unwind`.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        Self::Panicked {
            message: panic_message(payload.as_ref()),
        }
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, value: impl ToString, reason: &str) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Master error type for all WARDEN errors.
#[derive(Debug, Clone, Error)]
pub enum WardenError {
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Host error: {0}")]
    Host(#[from] HostError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for WARDEN operations.
pub type WardenResult<T> = Result<T, WardenError>;

// =============================================================================
// TESTS
// =============================================================================
