//! WARDEN Fault Isolation
//!
//! Feature entry points run inside an [`ErrorBoundary`]. Failures and panics
//! are caught, classified by severity, logged (in memory and persisted),
//! rate-limited before reaching the user, and counted by a
//! [`CircuitBreaker`] that short-circuits a feature whose failures cluster.

mod boundary;
mod breaker;
mod classify;
mod log;
mod recovery;

pub use boundary::{BoundaryStats, ErrorBoundary};
pub use breaker::CircuitBreaker;
pub use classify::{classify, Rule, DEFAULT_SEVERITY, RULES};
pub use log::ErrorLog;
pub use recovery::{RecoveryHook, ANY_MODULE};
