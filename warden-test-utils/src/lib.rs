//! WARDEN Test Utilities
//!
//! Centralized test infrastructure for the WARDEN workspace:
//! - An in-memory node tree with query counting and mutation delivery
//! - A virtual-time scheduler for deterministic TTL/timeout tests
//! - Recording doubles for storage, notifications, event targets, observers
//! - Proptest generators for patterns and labels

pub mod hosts;
pub mod scheduler;
pub mod tree;

pub use hosts::{
    CountingObserver, DisconnectProbe, MemoryStore, RecordingNotifier, RecordingTarget, Removal,
};
pub use scheduler::ManualScheduler;
pub use tree::{MemoryObserver, MemoryTree, NodeRef, ROOT};

// Re-export core types for convenience
pub use warden_core::{
    CacheConfig, HostError, ListenerId, ListenerOptions, NodeTree, Scheduler, Severity, TimerId,
    WardenConfig,
};

use std::time::Duration;

/// Install a test-friendly tracing subscriber once per process.
///
/// Honours `RUST_LOG`; repeated calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Shorthand for millisecond durations in tests.
pub fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use proptest::prelude::*;

    /// Well-formed patterns such as `#player`, `.item-3`, `ytd-app`.
    pub fn pattern_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-z]{1,8}".prop_map(|s| format!("#{}", s)),
            "[a-z]{1,8}(-[0-9]{1,2})?".prop_map(|s| format!(".{}", s)),
            "[a-z]{2,6}-[a-z]{2,6}",
        ]
    }

    /// Failure messages drawn from the shapes classification cares about.
    pub fn message_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("Network request failed".to_string()),
            Just("timeout waiting for element".to_string()),
            Just("Cannot read properties of null".to_string()),
            Just("SyntaxError: unexpected token".to_string()),
            Just("Refused by Content Security Policy".to_string()),
            "[a-zA-Z ]{0,40}",
        ]
    }
}
