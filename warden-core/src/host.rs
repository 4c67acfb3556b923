//! Host environment traits.
//!
//! The runtime never owns the tree, the timers or the storage it works
//! against. These traits describe the slice of the host it consumes, so the
//! same cache/registry/boundary code runs on a browser binding, on tokio
//! ([`TokioScheduler`](crate::TokioScheduler)) or on a deterministic test host.

use crate::error::{HostError, QueryError};
use crate::ids::{FrameId, ListenerId, TimerId};
use crate::record::Notice;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One-shot unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Repeating unit of work for interval timers.
pub type RepeatingTask = Arc<dyn Fn() + Send + Sync + 'static>;

/// Callback invoked with each batch of structural mutations.
pub type MutationCallback = Arc<dyn Fn(&MutationBatch) + Send + Sync + 'static>;

// ============================================================================
// CLOCK & SCHEDULER
// ============================================================================

/// Source of time for TTLs, breaker timeouts and rate windows.
pub trait Clock: Send + Sync {
    /// Monotonic time.
    fn now(&self) -> Instant;

    /// Wall-clock time, used for error record timestamps.
    fn wall_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Timer, frame and idle-callback primitives of the host event loop.
///
/// Clearing an id that already fired or was never issued is a no-op that
/// returns `false`. After a successful clear the task must never run.
pub trait Scheduler: Clock {
    fn set_timeout(&self, delay: Duration, task: Task) -> TimerId;

    fn clear_timeout(&self, id: TimerId) -> bool;

    /// Runs `task` every `period`, first after one full period.
    fn set_interval(&self, period: Duration, task: RepeatingTask) -> TimerId;

    fn clear_interval(&self, id: TimerId) -> bool;

    fn request_animation_frame(&self, task: Task) -> FrameId;

    fn cancel_animation_frame(&self, id: FrameId) -> bool;

    /// Schedules `task` for idle time. Hosts without idle scheduling hand the
    /// task back so the caller can fall back to a plain timer.
    fn request_idle(&self, task: Task) -> Result<TimerId, Task> {
        Err(task)
    }

    fn cancel_idle(&self, id: TimerId) -> bool {
        let _ = id;
        false
    }
}

// ============================================================================
// NODE TREE
// ============================================================================

/// Summary of one batch of structural changes delivered to observers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationBatch {
    /// Nodes attached in this batch
    pub added: usize,
    /// Nodes detached in this batch
    pub removed: usize,
    /// Attribute or label changes in this batch
    pub attributes: usize,
}

impl MutationBatch {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0 && self.attributes == 0
    }
}

/// A live subscription to tree mutations.
pub trait Observer: Send {
    /// Stops delivery. Disconnecting twice may fail; callers log and move on.
    fn disconnect(&mut self) -> Result<(), HostError>;
}

/// The external, continuously-mutating tree the cache reads.
///
/// Node handles are references the runtime does not own: they may be detached
/// at any time and must be re-checked with [`NodeTree::is_attached`].
pub trait NodeTree: Send + Sync + 'static {
    type Node: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    /// First node matching `pattern` under `scope` (the whole tree when `None`).
    fn query(&self, pattern: &str, scope: Option<&Self::Node>) -> Result<Option<Self::Node>, QueryError>;

    /// Every node matching `pattern` under `scope`, in tree order.
    fn query_all(&self, pattern: &str, scope: Option<&Self::Node>) -> Result<Vec<Self::Node>, QueryError>;

    /// Whether `node` is still reachable from the root.
    fn is_attached(&self, node: &Self::Node) -> bool;

    /// Subscribes to structural mutations of the whole tree.
    fn observe(&self, callback: MutationCallback) -> Box<dyn Observer>;
}

// ============================================================================
// EVENT TARGETS, STORAGE, NOTIFICATIONS
// ============================================================================

/// Options an event binding was registered with; removal must match them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerOptions {
    pub capture: bool,
    pub passive: bool,
    pub once: bool,
}

impl ListenerOptions {
    pub fn capture() -> Self {
        Self {
            capture: true,
            ..Self::default()
        }
    }

    pub fn passive() -> Self {
        Self {
            passive: true,
            ..Self::default()
        }
    }
}

/// An element (or window/document) that event handlers are bound to.
pub trait EventTarget: Send + Sync {
    fn remove_listener(
        &self,
        event: &str,
        listener: ListenerId,
        options: &ListenerOptions,
    ) -> Result<(), HostError>;
}

/// Durable string key-value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, HostError>;

    fn set(&self, key: &str, value: &str) -> Result<(), HostError>;

    fn remove(&self, key: &str) -> Result<(), HostError>;
}

/// Surface for user-visible failure notices.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: &Notice);
}

/// Notifier that writes notices to the tracing pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: &Notice) {
        tracing::warn!(
            severity = %notice.severity,
            duration_ms = notice.duration.as_millis() as u64,
            title = %notice.title,
            "{}",
            notice.message
        );
    }
}

/// Clock backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
