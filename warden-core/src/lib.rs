//! WARDEN Core - Shared Types and Host Traits
//!
//! Everything the cache, registry and boundary crates agree on lives here:
//! handle types, the error taxonomy, configuration, the host-environment
//! traits and the lifecycle hub. This crate holds no policy of its own.

pub mod config;
pub mod constants;
pub mod enums;
pub mod error;
pub mod host;
pub mod ids;
pub mod lifecycle;
pub mod record;
pub mod scheduler;

pub use config::{BoundaryConfig, BreakerConfig, CacheConfig, WardenConfig};
pub use enums::{CircuitState, CircuitStateParseError, Severity, SeverityParseError};
pub use error::{panic_message, ConfigError, HostError, QueryError, WardenError, WardenResult};
pub use host::{
    Clock, EventTarget, KeyValueStore, ListenerOptions, MutationBatch, MutationCallback, NodeTree,
    Notifier, Observer, RepeatingTask, Scheduler, SystemClock, Task, TracingNotifier,
};
pub use ids::{CleanupId, FrameId, IdSequence, ListenerId, ListenerToken, ObserverId, TimerId};
pub use lifecycle::{LifecycleHub, LifecycleListener, LifecycleSignal};
pub use record::{module_of, ErrorContext, ErrorKind, ErrorRecord, Notice};
pub use scheduler::TokioScheduler;

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
